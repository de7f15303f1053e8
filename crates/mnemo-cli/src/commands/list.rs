use mnemo_core::NoteRepository;

use crate::commands::common::{
    format_note_lines, format_timestamp, has_tag, note_to_list_item, render_tags,
    resolve_note_id, NoteListItem,
};
use crate::error::CliError;

pub async fn run_list(
    repository: &NoteRepository,
    limit: usize,
    tag: Option<&str>,
    deleted: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let notes = if deleted {
        repository.deleted_notes().await?
    } else {
        repository.notes().await?
    };
    let notes = notes
        .into_iter()
        .filter(|note| tag.is_none_or(|tag| has_tag(note, tag)))
        .take(limit)
        .collect::<Vec<_>>();

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_show(repository: &NoteRepository, id: &str, as_json: bool) -> Result<(), CliError> {
    let notes = repository.notes().await?;
    let note = repository.note(&resolve_note_id(id, &notes)?).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&note_to_list_item(&note))?);
        return Ok(());
    }

    if !note.title.is_empty() {
        println!("{}\n", note.title);
    }
    println!("{}", note.text);
    println!();
    let tags = render_tags(&note);
    if !tags.is_empty() {
        println!("tags:     {tags}");
    }
    println!("id:       {}", note.id);
    println!("updated:  {}", format_timestamp(note.updated_at));
    if let Some(original) = &note.conflict_of {
        println!("conflict: local copy of {original}");
    }
    if note.dirty {
        println!("status:   not synchronized yet");
    }
    Ok(())
}
