use mnemo_core::{AccountConfig, AppConfig, Note, NoteId};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::cli::{AccountCommands, StrategyArg};
use crate::commands::account::run_account;
use crate::commands::add::run_add;
use crate::commands::common::{
    close_repository, database_file_name, default_editor, format_relative_time,
    normalize_content, note_preview, resolve_note_id, short_id, sorted_tags, Context,
    LOCAL_ACCOUNT,
};
use crate::commands::delete::{run_delete, run_restore};
use crate::commands::edit::{run_edit, EditArgs};
use crate::error::CliError;

fn test_context(dir: &TempDir) -> Context {
    Context {
        config_path: dir.path().join("config.json"),
        data_dir: dir.path().join("data"),
        db_path: None,
        account: None,
    }
}

fn remote_note(id: &str) -> Note {
    Note::remote(id.parse::<NoteId>().unwrap(), "1")
}

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
}

#[test]
fn normalize_content_keeps_multiline_text() {
    assert_eq!(
        normalize_content("line 1\nline 2\n"),
        Some("line 1\nline 2".to_string())
    );
}

#[test]
fn default_editor_is_defined() {
    assert!(!default_editor().is_empty());
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn note_preview_prefers_title_and_truncates() {
    let mut note = Note::new_local();
    note.text = "This is a very long sentence that should be shortened".to_string();
    assert_eq!(note_preview(&note, 20), "This is a very lo...");

    note.title = "Short   title".to_string();
    assert_eq!(note_preview(&note, 20), "Short title");
}

#[test]
fn resolve_note_id_accepts_exact_ids_and_unique_prefixes() {
    let notes = vec![remote_note("abc"), remote_note("abcdef"), remote_note("xyz")];

    assert_eq!(resolve_note_id("abc", &notes).unwrap().as_str(), "abc");
    assert_eq!(resolve_note_id(" abcd ", &notes).unwrap().as_str(), "abcdef");
    assert_eq!(resolve_note_id("x", &notes).unwrap().as_str(), "xyz");
}

#[test]
fn resolve_note_id_reports_missing_and_ambiguous_prefixes() {
    let notes = vec![remote_note("abc1"), remote_note("abc2")];

    assert!(matches!(
        resolve_note_id("zz", &notes),
        Err(CliError::NoteNotFound(query)) if query == "zz"
    ));
    assert!(matches!(
        resolve_note_id("abc", &notes),
        Err(CliError::AmbiguousNoteId(message)) if message.contains("abc1")
    ));
    assert!(matches!(resolve_note_id("   ", &notes), Err(CliError::EmptyNoteId)));
}

#[test]
fn database_file_name_is_filesystem_safe() {
    assert_eq!(database_file_name("work"), "work.db");
    assert_eq!(database_file_name("me@home/notes"), "me_home_notes.db");
}

#[test]
fn account_settings_fall_back_to_local_offline_store() {
    let dir = TempDir::new().unwrap();
    let context = test_context(&dir);
    let config = AppConfig::default();

    let (name, settings) = context.account_settings(&config).unwrap();
    assert_eq!(name, LOCAL_ACCOUNT);
    assert_eq!(settings.account, AccountConfig::Offline);
    assert_eq!(
        context.database_path(&name),
        dir.path().join("data").join("local.db")
    );
}

#[test]
fn explicit_db_path_wins_over_account_file() {
    let dir = TempDir::new().unwrap();
    let mut context = test_context(&dir);
    context.db_path = Some(dir.path().join("custom.db"));

    assert_eq!(context.database_path("work"), dir.path().join("custom.db"));
}

#[test]
fn account_commands_update_config_file() {
    let dir = TempDir::new().unwrap();
    let context = test_context(&dir);

    run_account(
        &context,
        AccountCommands::AddOffline {
            name: "journal".to_string(),
        },
    )
    .unwrap();
    run_account(
        &context,
        AccountCommands::AddItemSync {
            name: "work".to_string(),
            server: "https://sync.example.com/".to_string(),
            email: "me@example.com".to_string(),
            password: "hunter2".to_string(),
        },
    )
    .unwrap();
    run_account(
        &context,
        AccountCommands::Strategy {
            strategy: StrategyArg::KeepLocal,
        },
    )
    .unwrap();

    let config = context.load_config().unwrap();
    assert_eq!(config.active_account.as_deref(), Some("journal"));
    assert_eq!(config.accounts.len(), 2);
    assert_eq!(config.conflict_strategy, mnemo_core::ConflictStrategy::KeepLocal);
    let AccountConfig::ItemSync(account) = config.account("work").unwrap() else {
        panic!("expected an item-sync account");
    };
    assert_eq!(account.server, "https://sync.example.com");
    assert_eq!(account.password, "hunter2");

    let raw = std::fs::read_to_string(&context.config_path).unwrap();
    assert!(!raw.contains("hunter2"));

    run_account(
        &context,
        AccountCommands::Use {
            name: "work".to_string(),
        },
    )
    .unwrap();
    assert_eq!(
        context.load_config().unwrap().active_account.as_deref(),
        Some("work")
    );
}

#[test]
fn using_unknown_account_fails() {
    let dir = TempDir::new().unwrap();
    let context = test_context(&dir);

    let result = run_account(
        &context,
        AccountCommands::Use {
            name: "missing".to_string(),
        },
    );
    assert!(matches!(
        result,
        Err(CliError::Core(mnemo_core::Error::NotFound(_)))
    ));
    assert!(!context.config_path.exists());
}

#[tokio::test]
async fn note_commands_persist_across_invocations() {
    let dir = TempDir::new().unwrap();
    let context = test_context(&dir);

    let repository = context.open_repository().unwrap();
    run_add(
        &repository,
        Some("Groceries"),
        &["home".to_string()],
        &["milk".to_string(), "eggs".to_string()],
    )
    .await
    .unwrap();

    let notes = repository.notes().await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Groceries");
    assert_eq!(notes[0].text, "milk eggs");
    assert_eq!(sorted_tags(&notes[0]), vec!["home".to_string()]);
    let prefix = short_id(&notes[0].id);

    run_edit(
        &repository,
        &prefix,
        EditArgs {
            title: Some("Shopping".to_string()),
            add_tags: vec!["#errands".to_string()],
            remove_tags: vec!["home".to_string()],
            ..EditArgs::default()
        },
    )
    .await
    .unwrap();
    close_repository(&repository).await.unwrap();

    let reopened = context.open_repository().unwrap();
    let notes = reopened.notes().await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Shopping");
    assert_eq!(sorted_tags(&notes[0]), vec!["errands".to_string()]);
    assert!(notes[0].dirty);
    close_repository(&reopened).await.unwrap();
}

#[tokio::test]
async fn delete_and_restore_by_prefix() {
    let dir = TempDir::new().unwrap();
    let context = test_context(&dir);
    let repository = context.open_repository().unwrap();

    run_add(&repository, None, &[], &["temporary".to_string()])
        .await
        .unwrap();
    let id = repository.notes().await.unwrap()[0].id.clone();
    let prefix = short_id(&id);

    run_delete(&repository, &prefix, false).await.unwrap();
    assert!(repository.notes().await.unwrap().is_empty());
    assert_eq!(repository.deleted_notes().await.unwrap().len(), 1);

    run_restore(&repository, &prefix).await.unwrap();
    assert_eq!(repository.note(&id).await.unwrap().text, "temporary");

    run_delete(&repository, id.as_str(), true).await.unwrap();
    assert!(repository.notes().await.unwrap().is_empty());
    assert!(repository.deleted_notes().await.unwrap().is_empty());

    close_repository(&repository).await.unwrap();
    // Closing twice is harmless.
    close_repository(&repository).await.unwrap();
}
