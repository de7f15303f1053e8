use mnemo_core::{NoteEdit, NoteRepository};

use crate::commands::common::{capture_editor_input_with_initial, resolve_note_id};
use crate::error::CliError;

/// Flags given to `mnemo edit`.
#[derive(Debug, Default)]
pub struct EditArgs {
    pub title: Option<String>,
    pub text: Option<String>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
}

impl EditArgs {
    fn into_edit(self) -> NoteEdit {
        let mut edit = NoteEdit {
            title: self.title,
            text: self.text,
            ..NoteEdit::default()
        };
        for tag in self.add_tags {
            edit = edit.add_tag(tag.trim().trim_start_matches('#'));
        }
        for tag in self.remove_tags {
            edit = edit.remove_tag(tag.trim().trim_start_matches('#'));
        }
        edit
    }
}

pub async fn run_edit(repository: &NoteRepository, id: &str, args: EditArgs) -> Result<(), CliError> {
    let notes = repository.notes().await?;
    let note_id = resolve_note_id(id, &notes)?;
    let edit = args.into_edit();

    let edit = if edit.is_empty() {
        let note = repository.note(&note_id).await?;
        let Some(edited_text) = capture_editor_input_with_initial(&note.text)? else {
            return Err(CliError::EmptyEditedContent);
        };
        if edited_text == note.text {
            println!("{}", note.id);
            return Ok(());
        }
        NoteEdit::default().text(edited_text)
    } else {
        edit
    };

    let updated = repository.update_note(&note_id, &edit).await?;
    println!("{}", updated.id);
    Ok(())
}
