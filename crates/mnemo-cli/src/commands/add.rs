use mnemo_core::{NoteEdit, NoteRepository};

use crate::commands::common::{normalize_content, read_piped_stdin, resolve_note_content};
use crate::error::CliError;

pub async fn run_add(
    repository: &NoteRepository,
    title: Option<&str>,
    tags: &[String],
    content_parts: &[String],
) -> Result<(), CliError> {
    let title = title.and_then(normalize_content);
    let text = match normalize_content(&content_parts.join(" ")) {
        Some(text) => text,
        // A titled note may have an empty body; don't force the editor open.
        None if title.is_some() => read_piped_stdin()?.unwrap_or_default(),
        None => resolve_note_content(&[])?,
    };

    let mut edit = NoteEdit::default().text(text);
    if let Some(title) = title {
        edit = edit.title(title);
    }
    for tag in tags {
        edit = edit.add_tag(tag.trim().trim_start_matches('#'));
    }

    let note = repository.create_note(&edit).await?;
    println!("{}", note.id);
    Ok(())
}
