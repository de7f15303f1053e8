//! Remote note services.
//!
//! Every backend implements [`RemoteConnection`]; the sync engine only ever
//! talks to the trait. A connection is built from an account configuration
//! and lives as long as that configuration stays active. It owns the
//! authentication state and at most one open [`SyncSession`].

pub mod bucket;
pub mod http;
pub mod item_sync;
mod offline;
mod session;

use async_trait::async_trait;

use crate::db::SyncData;
use crate::error::Result;
use crate::models::{Note, NoteId, Tombstone};

pub use offline::OfflineConnection;
pub use session::{SyncSession, TagDelta};

/// Outcome of uploading one dirty note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    /// The server stored the local content
    Uploaded,
    /// The server already held equivalent content, which was applied locally
    Merged,
    /// Nothing to do
    UpToDate,
    /// The remote changed independently; carries the remote version
    Conflict(Box<Note>),
}

/// Outcome of applying remote state onto a local note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadResult {
    Updated,
    UpToDate,
    DeletedOnRemote,
}

/// Live note that is not a conflict note and whose content the remote has not
/// confirmed yet (never uploaded, or edited since).
pub fn is_upload_candidate(note: &Note) -> bool {
    !note.deleted && !note.is_conflict_note() && !note.is_remote_saved()
}

/// Protocol of one remote backend.
///
/// Calls happen in this order during a pass: `start_sync`, `delete_note` per
/// tombstone, `upload_note_to_remote` per note that `needs_upload`,
/// `update_note_from_remote` per note that `needs_download`,
/// `download_note` per id of `list_missing_notes`, then `finish_sync`.
#[async_trait]
pub trait RemoteConnection: Send {
    /// Short backend name used in logs
    fn backend(&self) -> &'static str;

    /// Run the backend handshake and open a session.
    ///
    /// `data` is the per-account persistence bag; changes made to it are
    /// saved after the pass.
    async fn start_sync(
        &mut self,
        data: &mut SyncData,
        local_notes: &[Note],
        local_deleted: &[Tombstone],
    ) -> Result<()>;

    /// The currently open session.
    fn session(&self) -> Option<&SyncSession>;

    /// Close the session. Safe to call when none is open.
    fn finish_sync(&mut self);

    async fn upload_note_to_remote(&mut self, note: &mut Note) -> Result<UploadResult>;

    /// Confirm the remote deletion of a tombstoned note.
    async fn delete_note(&mut self, tombstone: &Tombstone) -> Result<()>;

    async fn update_note_from_remote(&mut self, note: &mut Note) -> Result<DownloadResult> {
        Ok(session::require(self.session())?.apply_download(note))
    }

    /// Materialize a retrieved note that has no local counterpart.
    async fn download_note(&mut self, id: &NoteId) -> Result<Option<Note>> {
        Ok(session::require(self.session())?.download(id))
    }

    fn list_missing_notes(&self, local_notes: &[Note]) -> Result<Vec<NoteId>> {
        Ok(session::require(self.session())?.missing(local_notes))
    }

    fn needs_upload(&self, note: &Note) -> bool {
        is_upload_candidate(note)
    }

    fn needs_download(&self, note: &Note) -> bool {
        self.session().is_some_and(|session| session.mentions(&note.id))
    }
}
