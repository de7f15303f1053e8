//! Result set of one reconciliation round trip

use std::collections::{BTreeMap, BTreeSet};

use super::{DownloadResult, UploadResult};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, Tombstone};

/// Counts of tag items exchanged during a pass, for backends that sync tags
/// as separate records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagDelta {
    pub retrieved: usize,
    pub saved: usize,
    pub unsaved: usize,
}

/// What the remote reported during one `start_sync`/`finish_sync` pair.
#[derive(Debug, Default)]
pub struct SyncSession {
    retrieved: BTreeMap<NoteId, Note>,
    deleted: BTreeSet<NoteId>,
    saved: BTreeMap<NoteId, Note>,
    unsaved: BTreeMap<NoteId, String>,
    rejected_deletions: BTreeMap<NoteId, String>,
    pub tags: TagDelta,
}

impl SyncSession {
    /// Remote-side create or update. A later record for the same id replaces
    /// the earlier one.
    pub fn record_retrieved(&mut self, note: Note) {
        self.deleted.remove(&note.id);
        self.retrieved.insert(note.id.clone(), note);
    }

    pub fn record_deleted(&mut self, id: NoteId) {
        self.retrieved.remove(&id);
        self.deleted.insert(id);
    }

    pub fn record_saved(&mut self, note: Note) {
        self.unsaved.remove(&note.id);
        self.saved.insert(note.id.clone(), note);
    }

    pub fn record_unsaved(&mut self, id: NoteId, reason: impl Into<String>) {
        self.saved.remove(&id);
        self.unsaved.insert(id, reason.into());
    }

    pub fn record_rejected_deletion(&mut self, id: NoteId, reason: impl Into<String>) {
        self.rejected_deletions.insert(id, reason.into());
    }

    pub fn retrieved(&self, id: &NoteId) -> Option<&Note> {
        self.retrieved.get(id)
    }

    pub fn is_deleted(&self, id: &NoteId) -> bool {
        self.deleted.contains(id)
    }

    pub fn saved(&self, id: &NoteId) -> Option<&Note> {
        self.saved.get(id)
    }

    /// Whether the remote reported anything about `id` that must be applied
    /// locally.
    pub fn mentions(&self, id: &NoteId) -> bool {
        self.retrieved.contains_key(id) || self.deleted.contains(id)
    }

    pub fn retrieved_count(&self) -> usize {
        self.retrieved.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }

    pub fn unsaved_count(&self) -> usize {
        self.unsaved.len()
    }

    /// Classify an upload attempt against what the server acknowledged.
    pub fn classify_upload(&self, note: &mut Note) -> Result<UploadResult> {
        if let Some(saved) = self.saved.get(&note.id) {
            note.apply_remote(saved);
            return Ok(UploadResult::Uploaded);
        }

        if let Some(reason) = self.unsaved.get(&note.id) {
            return Err(Error::note_sync(
                &note.id,
                format!("server refused the upload: {reason}"),
            ));
        }

        if let Some(remote) = self.retrieved.get(&note.id) {
            if note.content_equals(remote) {
                tracing::warn!(note_id = %note.id, "Uploaded note came back as retrieved, keeping server copy");
                note.apply_remote(remote);
                return Ok(UploadResult::Merged);
            }
            return Ok(UploadResult::Conflict(Box::new(remote.clone())));
        }

        Ok(UploadResult::UpToDate)
    }

    /// Apply server-confirmed state onto a local note.
    pub fn apply_download(&self, note: &mut Note) -> DownloadResult {
        if self.deleted.contains(&note.id) {
            return DownloadResult::DeletedOnRemote;
        }

        match self.retrieved.get(&note.id) {
            Some(remote) if note.content_equals(remote) => {
                note.apply_remote(remote);
                DownloadResult::UpToDate
            }
            Some(remote) => {
                note.apply_remote(remote);
                DownloadResult::Updated
            }
            None => DownloadResult::UpToDate,
        }
    }

    pub fn download(&self, id: &NoteId) -> Option<Note> {
        self.retrieved.get(id).cloned()
    }

    /// Retrieved ids with no local counterpart.
    pub fn missing(&self, local_notes: &[Note]) -> Vec<NoteId> {
        let known: BTreeSet<&NoteId> = local_notes.iter().map(|note| &note.id).collect();
        self.retrieved
            .values()
            .filter(|note| !note.deleted && !known.contains(&note.id))
            .map(|note| note.id.clone())
            .collect()
    }

    /// Check that the remote honoured a deletion.
    pub fn confirm_deletion(&self, tombstone: &Tombstone) -> Result<()> {
        if let Some(reason) = self.rejected_deletions.get(&tombstone.note_id) {
            return Err(Error::note_sync(
                &tombstone.note_id,
                format!("server refused the deletion: {reason}"),
            ));
        }
        if !self.deleted.contains(&tombstone.note_id) {
            tracing::warn!(note_id = %tombstone.note_id, "Deletion returned no result, possibly an error");
        }
        Ok(())
    }
}

/// Open a new session in `slot`, refusing to replace one that was never
/// finished.
pub fn begin(slot: &mut Option<SyncSession>) -> Result<&mut SyncSession> {
    ensure_closed(slot.as_ref())?;
    Ok(slot.insert(SyncSession::default()))
}

/// Fail when a previous session was never finished.
pub fn ensure_closed(slot: Option<&SyncSession>) -> Result<()> {
    if slot.is_some() {
        return Err(Error::Invariant(
            "start_sync called while a session is still open".to_string(),
        ));
    }
    Ok(())
}

/// Borrow the open session or fail with an invariant violation.
pub fn require(slot: Option<&SyncSession>) -> Result<&SyncSession> {
    slot.ok_or_else(|| Error::Invariant("no sync session is open".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn remote(id: &str, text: &str, revision: &str) -> Note {
        let mut note = Note::remote(id.parse().unwrap(), revision);
        note.title = "T".to_string();
        note.text = text.to_string();
        note
    }

    fn dirty(id: &str, text: &str) -> Note {
        let mut note = remote(id, text, "1");
        note.dirty = true;
        note
    }

    #[test]
    fn saved_note_is_uploaded() {
        let mut session = SyncSession::default();
        session.record_saved(remote("a", "x", "2"));

        let mut note = dirty("a", "x");
        assert_eq!(session.classify_upload(&mut note).unwrap(), UploadResult::Uploaded);
        assert!(!note.dirty);
        assert_eq!(note.remote_revision.as_deref(), Some("2"));
    }

    #[test]
    fn unsaved_note_is_an_error() {
        let mut session = SyncSession::default();
        session.record_unsaved("a".parse().unwrap(), "conflict");

        let mut note = dirty("a", "x");
        let error = session.classify_upload(&mut note).unwrap_err();
        assert!(matches!(error, Error::NoteSync { .. }));
        assert!(note.dirty);
    }

    #[test]
    fn retrieved_equal_content_is_merged() {
        let mut session = SyncSession::default();
        session.record_retrieved(remote("a", "x ", "3"));

        let mut note = dirty("a", "x");
        assert_eq!(session.classify_upload(&mut note).unwrap(), UploadResult::Merged);
        assert_eq!(note.remote_revision.as_deref(), Some("3"));
    }

    #[test]
    fn retrieved_different_content_is_conflict() {
        let mut session = SyncSession::default();
        session.record_retrieved(remote("a", "theirs", "3"));

        let mut note = dirty("a", "mine");
        let result = session.classify_upload(&mut note).unwrap();
        assert_eq!(result, UploadResult::Conflict(Box::new(remote("a", "theirs", "3"))));
        assert_eq!(note.text, "mine");
    }

    #[test]
    fn download_detects_remote_deletion() {
        let mut session = SyncSession::default();
        session.record_retrieved(remote("a", "x", "1"));
        session.record_deleted("a".parse().unwrap());

        let mut note = remote("a", "x", "1");
        assert!(session.mentions(&note.id));
        assert_eq!(session.apply_download(&mut note), DownloadResult::DeletedOnRemote);
    }

    #[test]
    fn download_ignores_whitespace_changes() {
        let mut session = SyncSession::default();
        session.record_retrieved(remote("a", "x\n", "2"));

        let mut note = remote("a", "x", "1");
        assert_eq!(session.apply_download(&mut note), DownloadResult::UpToDate);
        assert_eq!(note.remote_revision.as_deref(), Some("2"));
    }

    #[test]
    fn missing_lists_unknown_ids_once() {
        let mut session = SyncSession::default();
        session.record_retrieved(remote("a", "1", "1"));
        session.record_retrieved(remote("b", "2", "1"));
        session.record_retrieved(remote("b", "2b", "2"));

        let missing = session.missing(&[remote("a", "1", "1")]);
        assert_eq!(missing, vec!["b".parse::<NoteId>().unwrap()]);
        assert_eq!(session.download(&missing[0]).unwrap().text, "2b");
    }

    #[test]
    fn rejected_deletion_fails() {
        let mut session = SyncSession::default();
        let tombstone = Tombstone::new(&remote("a", "x", "1"));
        session.record_rejected_deletion("a".parse().unwrap(), "locked");
        assert!(session.confirm_deletion(&tombstone).is_err());
    }

    #[test]
    fn second_begin_is_an_invariant_violation() {
        let mut slot = None;
        begin(&mut slot).unwrap();
        assert!(matches!(begin(&mut slot), Err(Error::Invariant(_))));

        slot = None;
        assert!(require(slot.as_ref()).is_err());
    }
}
