//! One synchronization pass.
//!
//! Order within a pass: tombstones, then uploads, then downloads of changed
//! notes, then notes the remote has and we do not. The workspace lock is only
//! held between remote calls, never across them.

use std::collections::{BTreeSet, HashMap};
use std::ops::{Deref, DerefMut};

use tokio::sync::Mutex;

use super::workspace::Workspace;
use super::{SyncFailure, SyncReport};
use crate::db::SyncData;
use crate::error::{Error, Result};
use crate::models::{DeletionState, Note, NoteId, Tombstone};
use crate::remote::{DownloadResult, RemoteConnection, UploadResult};

/// A session-fatal failure stopped the pass.
struct Aborted;

type Step = std::result::Result<(), Aborted>;

/// Keeps the remote session open for as long as it lives. Dropping it closes
/// the session, also when the pass future is cancelled halfway.
struct OpenSession<'a>(&'a mut dyn RemoteConnection);

impl<'a> Deref for OpenSession<'a> {
    type Target = dyn RemoteConnection + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for OpenSession<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl Drop for OpenSession<'_> {
    fn drop(&mut self) {
        self.0.finish_sync();
    }
}

/// State of the collection when the pass began.
struct Snapshot {
    notes: Vec<Note>,
    tombstones: Vec<Tombstone>,
    generations: HashMap<NoteId, u64>,
    data: SyncData,
}

impl Snapshot {
    fn generation(&self, id: &NoteId) -> u64 {
        self.generations.get(id).copied().unwrap_or_default()
    }

    fn pending_deletions(&self) -> Vec<Tombstone> {
        self.tombstones
            .iter()
            .filter(|tombstone| tombstone.is_pending())
            .cloned()
            .collect()
    }
}

/// Run one pass of `remote` against the shared workspace.
pub(crate) async fn synchronize<'a>(
    workspace: &'a Mutex<Workspace>,
    remote: &'a mut dyn RemoteConnection,
) -> SyncReport {
    let mut report = SyncReport::default();

    let snapshot = {
        let ws = workspace.lock().await;
        let data = match ws.load_sync_data() {
            Ok(data) => data,
            Err(error) => {
                report
                    .errors
                    .push(SyncFailure::new("Could not load sync state", error));
                return report;
            }
        };
        Snapshot {
            notes: ws.notes().filter(|note| !note.deleted).cloned().collect(),
            tombstones: ws.tombstones().cloned().collect(),
            generations: ws.generations(),
            data,
        }
    };

    tracing::debug!(
        backend = remote.backend(),
        notes = snapshot.notes.len(),
        tombstones = snapshot.tombstones.len(),
        "Starting sync pass"
    );

    let mut data = snapshot.data.clone();
    let pending = snapshot.pending_deletions();
    let mut remote = OpenSession(remote);
    if let Err(error) = remote.start_sync(&mut data, &snapshot.notes, &pending).await {
        tracing::warn!(%error, "Sync handshake failed");
        report
            .errors
            .push(SyncFailure::new("Could not start synchronization", error));
        return report;
    }

    let mut pass = Pass {
        workspace,
        remote,
        report,
        handled: BTreeSet::new(),
        purged: BTreeSet::new(),
    };

    let completed = pass.run(&snapshot).await.is_ok();
    if completed {
        let saved = pass.workspace.lock().await.save_sync_data(&data);
        if let Err(error) = saved {
            pass.report
                .errors
                .push(SyncFailure::new("Could not save sync state", error));
        }
    }

    let Pass { report, .. } = pass;
    tracing::info!(
        uploaded = report.uploaded,
        downloaded = report.downloaded,
        deleted = report.deleted,
        conflicts = report.conflicts,
        errors = report.errors.len(),
        "Sync pass finished"
    );
    report
}

struct Pass<'a> {
    workspace: &'a Mutex<Workspace>,
    remote: OpenSession<'a>,
    report: SyncReport,
    /// Notes the upload step already settled
    handled: BTreeSet<NoteId>,
    /// Notes removed during this pass
    purged: BTreeSet<NoteId>,
}

impl Pass<'_> {
    async fn run(&mut self, snapshot: &Snapshot) -> Step {
        self.delete_tombstoned(&snapshot.tombstones).await?;
        self.upload_dirty(snapshot).await?;
        self.download_changed(snapshot).await?;
        self.download_missing().await
    }

    /// Collect a failure. Session-fatal failures stop the pass.
    fn record(&mut self, summary: impl Into<String>, error: Error) -> Step {
        let summary = summary.into();
        let fatal = error.is_session_fatal();
        tracing::warn!(%error, fatal, "{summary}");
        self.report.errors.push(SyncFailure::new(summary, error));
        if fatal {
            Err(Aborted)
        } else {
            Ok(())
        }
    }

    /// Record the outcome of a workspace update.
    fn settle<T>(&mut self, id: &NoteId, result: Result<T>) -> std::result::Result<Option<T>, Aborted> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                self.record(format!("Could not store note {id}"), error)?;
                Ok(None)
            }
        }
    }

    async fn delete_tombstoned(&mut self, tombstones: &[Tombstone]) -> Step {
        for tombstone in tombstones {
            let id = &tombstone.note_id;
            let needs_remote = tombstone.state == DeletionState::PendingDelete
                && tombstone.remote_revision.is_some();

            if needs_remote {
                if let Err(error) = self.remote.delete_note(tombstone).await {
                    self.record(format!("Could not delete note {id}"), error)?;
                    continue;
                }
            }

            // A tombstone without revision never reached the remote, and a
            // confirmed one only lost its purge to a crash.
            let result = self.workspace.lock().await.complete_deletion(id);
            if let Some(removed) = self.settle(id, result)? {
                if removed {
                    self.purged.insert(id.clone());
                    self.report.deleted += 1;
                }
            }
        }
        Ok(())
    }

    async fn upload_dirty(&mut self, snapshot: &Snapshot) -> Step {
        for note in &snapshot.notes {
            if !self.remote.needs_upload(note) {
                continue;
            }
            self.handled.insert(note.id.clone());
            let generation = snapshot.generation(&note.id);

            let mut uploaded = note.clone();
            match self.remote.upload_note_to_remote(&mut uploaded).await {
                Ok(UploadResult::Uploaded | UploadResult::Merged) => {
                    // The server now holds every local tag.
                    uploaded.mark_clean();
                    let result =
                        self.workspace
                            .lock()
                            .await
                            .apply_upload(&note.id, uploaded, generation);
                    if self.settle(&note.id, result)?.is_some() {
                        self.report.uploaded += 1;
                    }
                }
                Ok(UploadResult::UpToDate) => {
                    // Only a note the remote already knows can be up to date.
                    if uploaded.remote_revision.is_some() {
                        uploaded.mark_clean();
                        let result =
                            self.workspace
                                .lock()
                                .await
                                .apply_upload(&note.id, uploaded, generation);
                        self.settle(&note.id, result)?;
                    }
                }
                Ok(UploadResult::Conflict(remote)) => {
                    let result = self.workspace.lock().await.resolve(&note.id, &remote);
                    if let Some(true) = self.settle(&note.id, result)? {
                        self.report.conflicts += 1;
                    }
                }
                Err(error) => {
                    self.record(format!("Could not upload note {}", note.id), error)?;
                }
            }
        }
        Ok(())
    }

    async fn download_changed(&mut self, snapshot: &Snapshot) -> Step {
        for note in &snapshot.notes {
            let id = &note.id;
            if self.handled.contains(id) || !self.remote.needs_download(note) {
                continue;
            }

            let remote_copy = self
                .remote
                .session()
                .and_then(|session| session.retrieved(id))
                .cloned();

            let (live, generation) = {
                let ws = self.workspace.lock().await;
                match ws.note(id) {
                    Some(live) if !live.deleted => (live.clone(), ws.generation(id)),
                    _ => continue,
                }
            };

            // Never overwrite a local edit with different remote content.
            if let Some(remote) = remote_copy.as_ref() {
                if live.dirty && !live.content_equals(remote) {
                    let result = self.workspace.lock().await.resolve(id, remote);
                    if let Some(true) = self.settle(id, result)? {
                        self.report.conflicts += 1;
                    }
                    continue;
                }
            }

            let mut updated = live;
            match self.remote.update_note_from_remote(&mut updated).await {
                Ok(DownloadResult::DeletedOnRemote) => {
                    let result = self.workspace.lock().await.apply_remote_deletion(id);
                    if let Some(true) = self.settle(id, result)? {
                        self.purged.insert(id.clone());
                        self.report.deleted += 1;
                    }
                }
                Ok(outcome) => {
                    let result = self.workspace.lock().await.apply_download(
                        id,
                        updated,
                        generation,
                        remote_copy.as_ref(),
                    );
                    if let Some(diverged) = self.settle(id, result)? {
                        if diverged {
                            self.report.conflicts += 1;
                        } else if outcome == DownloadResult::Updated {
                            self.report.downloaded += 1;
                        }
                    }
                }
                Err(error) => {
                    self.record(format!("Could not update note {id}"), error)?;
                }
            }
        }
        Ok(())
    }

    async fn download_missing(&mut self) -> Step {
        let known: Vec<Note> = self.workspace.lock().await.notes().cloned().collect();
        let missing = match self.remote.list_missing_notes(&known) {
            Ok(missing) => missing,
            Err(error) => return self.record("Could not list new remote notes", error),
        };

        for id in missing {
            if self.purged.contains(&id) {
                continue;
            }
            match self.remote.download_note(&id).await {
                Ok(Some(note)) => {
                    let result = self.workspace.lock().await.insert_downloaded(note);
                    if let Some(true) = self.settle(&id, result)? {
                        self.report.downloaded += 1;
                    }
                }
                Ok(None) => {
                    let error = Error::note_sync(&id, "the remote no longer has this note");
                    self.record(format!("Could not download note {id}"), error)?;
                }
                Err(error) => {
                    self.record(format!("Could not download note {id}"), error)?;
                }
            }
        }
        Ok(())
    }
}
