use mnemo_core::NoteRepository;

use crate::commands::common::resolve_note_id;
use crate::error::CliError;

pub async fn run_delete(
    repository: &NoteRepository,
    id: &str,
    permanent: bool,
) -> Result<(), CliError> {
    let notes = repository.notes().await?;
    let note_id = resolve_note_id(id, &notes)?;

    repository.delete_note(&note_id, permanent).await?;
    println!("{note_id}");
    Ok(())
}

pub async fn run_restore(repository: &NoteRepository, id: &str) -> Result<(), CliError> {
    let deleted = repository.deleted_notes().await?;
    let note_id = resolve_note_id(id, &deleted)?;

    let note = repository.restore_note(&note_id).await?;
    println!("{}", note.id);
    Ok(())
}

pub async fn run_resolve(repository: &NoteRepository, id: &str) -> Result<(), CliError> {
    let notes = repository.notes().await?;
    let note_id = resolve_note_id(id, &notes)?;

    let note = repository.resolve_conflict_note(&note_id).await?;
    println!("{}", note.id);
    Ok(())
}
