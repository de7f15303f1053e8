//! The note repository.
//!
//! Owns the note collection, persists it through a [`LocalStore`] and keeps
//! it reconciled with one remote account. Mutations run on the caller's task
//! and only wake the background dispatcher; they never wait for the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::config::{AccountConfig, RepositorySettings};
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{Note, NoteEdit, NoteId, Tombstone};
use crate::remote::RemoteConnection;
use crate::state::SyncState;
use crate::sync::workspace::Workspace;
use crate::sync::{self, Dispatcher, SyncFeedback, SyncReport};

struct Shared {
    workspace: Mutex<Workspace>,
    /// Held for the whole pass; this is what makes passes single-flight.
    remote: Mutex<Box<dyn RemoteConnection>>,
    feedback: Arc<dyn SyncFeedback>,
    http: reqwest::Client,
    span: tracing::Span,
}

impl Shared {
    async fn run_pass(&self) -> SyncReport {
        let mut remote = self.remote.lock().await;
        self.feedback.start_sync();
        self.workspace.lock().await.state = SyncState::Syncing;

        let report = sync::synchronize(&self.workspace, &mut **remote).await;
        drop(remote);

        {
            let mut ws = self.workspace.lock().await;
            ws.state = if !report.is_success() {
                SyncState::Error
            } else if matches!(ws.settings.account, AccountConfig::Offline) {
                SyncState::Offline
            } else {
                SyncState::Synced
            };
        }

        if report.is_success() {
            self.feedback.sync_success(Utc::now());
        } else {
            self.feedback.sync_error(&report.errors);
        }
        report
    }
}

/// Local note collection kept in sync with one account.
pub struct NoteRepository {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    closed: AtomicBool,
}

impl NoteRepository {
    /// Load the collection from `store` and start the sync worker for the
    /// configured account. Must be called within a tokio runtime.
    pub fn open(
        store: Box<dyn LocalStore>,
        settings: RepositorySettings,
        feedback: Arc<dyn SyncFeedback>,
        http: reqwest::Client,
    ) -> Result<Self> {
        let connection = settings.account.connect(http.clone());
        Self::with_connection(store, settings, feedback, http, connection)
    }

    /// Like [`NoteRepository::open`] with an already built connection.
    pub fn with_connection(
        store: Box<dyn LocalStore>,
        settings: RepositorySettings,
        feedback: Arc<dyn SyncFeedback>,
        http: reqwest::Client,
        connection: Box<dyn RemoteConnection>,
    ) -> Result<Self> {
        let span = tracing::info_span!(
            "repository",
            account = %settings.account.display_identifier(),
            backend = connection.backend()
        );
        let timing = settings.timing;
        let workspace = Workspace::load(store, settings)?;
        tracing::info!(
            parent: &span,
            notes = workspace.notes().count(),
            tombstones = workspace.tombstones().count(),
            "Opened note repository"
        );

        let shared = Arc::new(Shared {
            workspace: Mutex::new(workspace),
            remote: Mutex::new(connection),
            feedback,
            http,
            span: span.clone(),
        });

        let worker = Arc::clone(&shared);
        let dispatcher = Dispatcher::spawn(timing, span, move || {
            let shared = Arc::clone(&worker);
            async move {
                shared.run_pass().await;
            }
        });

        Ok(Self {
            shared,
            dispatcher,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::RepositoryClosed);
        }
        Ok(())
    }

    fn request_sync(&self) -> Result<()> {
        self.dispatcher.request()?;
        self.shared.feedback.on_sync_request();
        Ok(())
    }

    /// Add an empty local note.
    pub async fn create_new_note(&self) -> Result<Note> {
        self.create_note(&NoteEdit::default()).await
    }

    /// Add a local note with initial content.
    pub async fn create_note(&self, content: &NoteEdit) -> Result<Note> {
        self.ensure_open()?;
        let mut note = Note::new_local();
        if !content.is_empty() {
            note.edit(content);
        }

        self.shared.workspace.lock().await.add(note.clone());
        tracing::debug!(parent: &self.shared.span, note_id = %note.id, "Created note");
        self.request_sync()?;
        Ok(note)
    }

    /// Change a note's title, text or tags.
    pub async fn update_note(&self, id: &NoteId, edit: &NoteEdit) -> Result<Note> {
        self.ensure_open()?;
        if edit.is_empty() {
            return self.note(id).await;
        }

        let note = self
            .shared
            .workspace
            .lock()
            .await
            .edit(id, |note| note.edit(edit))?;
        tracing::debug!(parent: &self.shared.span, note_id = %id, "Updated note");
        self.request_sync()?;
        Ok(note)
    }

    /// Delete a note.
    ///
    /// A soft delete flags the note and records a tombstone; it can be undone
    /// with [`NoteRepository::restore_note`] until the remote confirms it. A
    /// permanent delete drops the note locally at once and never tells the
    /// remote, which is only meant for full resync flows.
    pub async fn delete_note(&self, id: &NoteId, permanent: bool) -> Result<()> {
        self.ensure_open()?;
        let mut ws = self.shared.workspace.lock().await;
        if permanent {
            if !ws.purge(id)? {
                return Err(Error::NotFound(id.to_string()));
            }
            tracing::info!(parent: &self.shared.span, note_id = %id, "Purged note");
            return Ok(());
        }

        ws.soft_delete(id)?;
        drop(ws);
        tracing::debug!(parent: &self.shared.span, note_id = %id, "Deleted note");
        self.request_sync()
    }

    /// Undo a soft delete that is still pending.
    pub async fn restore_note(&self, id: &NoteId) -> Result<Note> {
        self.ensure_open()?;
        let note = self.shared.workspace.lock().await.restore(id)?;
        tracing::debug!(parent: &self.shared.span, note_id = %id, "Restored note");
        self.request_sync()?;
        Ok(note)
    }

    /// Turn a conflict note into a normal note so it gets uploaded.
    pub async fn resolve_conflict_note(&self, id: &NoteId) -> Result<Note> {
        self.ensure_open()?;
        let mut ws = self.shared.workspace.lock().await;
        if !ws.note(id).is_some_and(Note::is_conflict_note) {
            return Err(Error::InvalidInput(format!("note {id} is not a conflict note")));
        }
        let note = ws.edit(id, |note| {
            note.conflict_of = None;
            note.dirty = true;
        })?;
        drop(ws);
        self.request_sync()?;
        Ok(note)
    }

    /// Visible notes, most recently modified first.
    pub async fn notes(&self) -> Result<Vec<Note>> {
        self.ensure_open()?;
        let ws = self.shared.workspace.lock().await;
        let mut notes: Vec<Note> = ws.notes().filter(|note| !note.deleted).cloned().collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(notes)
    }

    /// Soft-deleted notes that can still be restored.
    pub async fn deleted_notes(&self) -> Result<Vec<Note>> {
        self.ensure_open()?;
        let ws = self.shared.workspace.lock().await;
        Ok(ws
            .notes()
            .filter(|note| note.deleted && ws.tombstone(&note.id).is_some_and(Tombstone::is_pending))
            .cloned()
            .collect())
    }

    pub async fn note(&self, id: &NoteId) -> Result<Note> {
        self.ensure_open()?;
        self.shared
            .workspace
            .lock()
            .await
            .note(id)
            .filter(|note| !note.deleted)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Write every edited note to the local store, without the remote.
    pub async fn save_all(&self) -> Result<usize> {
        self.ensure_open()?;
        self.shared.workspace.lock().await.flush()
    }

    /// Queue a coalesced sync pass. Returns immediately.
    pub fn sync_now(&self) -> Result<()> {
        self.ensure_open()?;
        self.request_sync()
    }

    /// Run one pass now and return its report. Waits for a pass already
    /// running in the background.
    ///
    /// The pass runs on its own task, so dropping the returned future does
    /// not cut it short.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        self.ensure_open()?;
        let shared = Arc::clone(&self.shared);
        let span = shared.span.clone();
        let pass = tokio::spawn(async move { shared.run_pass().await }.instrument(span));
        pass.await
            .map_err(|error| Error::Invariant(format!("sync pass ended abnormally: {error}")))
    }

    pub async fn sync_state(&self) -> Result<SyncState> {
        self.ensure_open()?;
        Ok(self.shared.workspace.lock().await.state)
    }

    pub async fn settings(&self) -> Result<RepositorySettings> {
        self.ensure_open()?;
        Ok(self.shared.workspace.lock().await.settings.clone())
    }

    /// Swap account-neutral settings, or credentials of the same account,
    /// keeping the note collection.
    ///
    /// A different account identity is refused with
    /// [`Error::AccountMismatch`]; the caller must open a new repository.
    pub async fn replace_settings(&self, settings: RepositorySettings) -> Result<()> {
        self.ensure_open()?;
        let mut ws = self.shared.workspace.lock().await;
        let current = &ws.settings.account;
        if current.storage_key() != settings.account.storage_key() {
            return Err(Error::AccountMismatch {
                current: current.display_identifier(),
                requested: settings.account.display_identifier(),
            });
        }

        let reconnect = !current.is_equal(&settings.account);
        self.dispatcher.set_timing(settings.timing);
        ws.settings = settings.clone();
        drop(ws);

        if reconnect {
            // Waits for a running pass to release the connection.
            let mut remote = self.shared.remote.lock().await;
            *remote = settings.account.connect(self.shared.http.clone());
            tracing::info!(parent: &self.shared.span, "Account credentials changed, reconnected");
        }
        Ok(())
    }

    /// Stop background activity.
    ///
    /// Graceful mode lets a running pass finish, waits for the worker and
    /// flushes edited notes. Otherwise behaves like
    /// [`NoteRepository::kill_thread`].
    pub async fn shutdown(&self, graceful: bool) -> Result<()> {
        if !graceful {
            self.kill_thread();
            return Ok(());
        }

        self.ensure_open()?;
        self.closed.store(true, Ordering::SeqCst);
        let stopped = self.dispatcher.shutdown().await;
        let flushed = self.shared.workspace.lock().await.flush();
        tracing::info!(parent: &self.shared.span, "Repository shut down");
        stopped?;
        flushed.map(|_| ())
    }

    /// Abandon the worker without waiting for it. Safe to call at any time,
    /// also after a failed graceful shutdown.
    pub fn kill_thread(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.dispatcher.kill();

        // Best effort: a pass may still hold the collection.
        if let Ok(mut ws) = self.shared.workspace.try_lock() {
            if ws.has_unsaved() {
                if let Err(error) = ws.flush() {
                    tracing::warn!(parent: &self.shared.span, %error, "Could not flush notes after kill");
                }
            }
        }
    }

    /// Shut down without a final pass and wipe the local store. Reopen the
    /// repository afterwards to download everything again.
    pub async fn full_resync(&self) -> Result<()> {
        self.shutdown(true).await?;
        self.shared.workspace.lock().await.clear()?;
        tracing::warn!(parent: &self.shared.span, "Local store cleared for a full resync");
        Ok(())
    }
}
