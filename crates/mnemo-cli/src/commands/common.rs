use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use mnemo_core::db::{Database, SqliteLocalStore};
use mnemo_core::{AccountConfig, AppConfig, Note, NoteId, NoteRepository, RepositorySettings};
use serde::Serialize;

use crate::error::CliError;
use crate::feedback::ConsoleFeedback;

/// Account used when the config file names none.
pub const LOCAL_ACCOUNT: &str = "local";

const SHORT_ID_LEN: usize = 13;

/// Paths and account selection shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    pub account: Option<String>,
}

impl Context {
    pub fn resolve(
        config_path: Option<PathBuf>,
        db_path: Option<PathBuf>,
        account: Option<String>,
    ) -> Result<Self, CliError> {
        let config_path = match config_path.or_else(|| env::var_os("MNEMO_CONFIG").map(PathBuf::from)) {
            Some(path) => path,
            None => dirs::config_dir()
                .ok_or(CliError::MissingDirectory("config"))?
                .join("mnemo")
                .join("config.json"),
        };
        let data_dir = dirs::data_local_dir()
            .ok_or(CliError::MissingDirectory("data"))?
            .join("mnemo");

        Ok(Self {
            config_path,
            data_dir,
            db_path: db_path.or_else(|| env::var_os("MNEMO_DB_PATH").map(PathBuf::from)),
            account,
        })
    }

    pub fn load_config(&self) -> Result<AppConfig, CliError> {
        Ok(AppConfig::load_from_path(&self.config_path)?)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<(), CliError> {
        Ok(config.save_to_path(&self.config_path)?)
    }

    /// Name and settings of the account this invocation works on. Without
    /// any configured account the notes live in an offline account.
    pub fn account_settings(
        &self,
        config: &AppConfig,
    ) -> Result<(String, RepositorySettings), CliError> {
        match config.resolve_account_name(self.account.as_deref()) {
            Some(name) => {
                let settings = config.settings_for(&name)?;
                Ok((name, settings))
            }
            None => {
                let mut settings = RepositorySettings::new(AccountConfig::Offline);
                settings.conflict_strategy = config.conflict_strategy;
                settings.timing = config.sync;
                Ok((LOCAL_ACCOUNT.to_string(), settings))
            }
        }
    }

    pub fn database_path(&self, account_name: &str) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(database_file_name(account_name)))
    }

    pub fn open_repository(&self) -> Result<NoteRepository, CliError> {
        let config = self.load_config()?;
        let (name, settings) = self.account_settings(&config)?;
        let path = self.database_path(&name);
        tracing::debug!(account = %name, db = %path.display(), "Opening repository");

        let store = SqliteLocalStore::new(Database::open(&path)?);
        let repository = NoteRepository::open(
            Box::new(store),
            settings,
            Arc::new(ConsoleFeedback),
            config.http_client()?,
        )?;
        Ok(repository)
    }
}

/// One database file per account so switching accounts never mixes notes.
pub fn database_file_name(account_name: &str) -> String {
    let sanitized: String = account_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{sanitized}.db")
}

/// Flush and stop the repository. Commands that already closed it are fine.
pub async fn close_repository(repository: &NoteRepository) -> Result<(), CliError> {
    match repository.shutdown(true).await {
        Ok(()) | Err(mnemo_core::Error::RepositoryClosed) => Ok(()),
        Err(error) => Err(error.into()),
    }
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub text: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub dirty: bool,
    pub conflict_of: Option<String>,
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        text: note.text.clone(),
        tags: sorted_tags(note),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, now_ms),
        dirty: note.dirty,
        conflict_of: note.conflict_of.as_ref().map(ToString::to_string),
    }
}

pub fn has_tag(note: &Note, tag: &str) -> bool {
    let wanted = tag.trim().trim_start_matches('#');
    note.tags.names().any(|name| name.eq_ignore_ascii_case(wanted))
}

/// Pick the note `query` refers to: an exact id, or a unique id prefix.
pub fn resolve_note_id(query: &str, candidates: &[Note]) -> Result<NoteId, CliError> {
    let query = normalize_note_identifier(query)?;
    if let Some(note) = candidates.iter().find(|note| note.id.as_str() == query) {
        return Ok(note.id.clone());
    }

    let matching: Vec<&Note> = candidates
        .iter()
        .filter(|note| note.id.as_str().starts_with(&query))
        .collect();

    match matching.as_slice() {
        [] => Err(CliError::NoteNotFound(query)),
        [note] => Ok(note.id.clone()),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|note| short_id(&note.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &NoteId) -> String {
    id.as_str().chars().take(SHORT_ID_LEN).collect()
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let marker = if note.is_conflict_note() {
                '!'
            } else if note.dirty {
                '*'
            } else {
                ' '
            };
            let short_id = short_id(&note.id);
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now_ms);
            let tags = render_tags(note);

            if tags.is_empty() {
                format!("{marker} {short_id:<13}  {preview:<40}  {relative_time}")
            } else {
                format!("{marker} {short_id:<13}  {preview:<40}  {relative_time:<10}  {tags}")
            }
        })
        .collect()
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let collapsed = note
        .preview(usize::MAX)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn sorted_tags(note: &Note) -> Vec<String> {
    let mut tags = note.tags.to_vec();
    tags.sort();
    tags
}

pub fn render_tags(note: &Note) -> String {
    sorted_tags(note)
        .into_iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    capture_editor_input_with_initial("")
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        // EDITOR may carry arguments, e.g. "code --wait"
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("mnemo-note-{}-{now}.md", std::process::id()))
}
