//! In-memory note collection shared by the repository and the sync worker.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::RepositorySettings;
use crate::conflict::{self, ConflictStrategy};
use crate::db::{LocalStore, SyncData};
use crate::error::{Error, Result};
use crate::models::{DeletionState, Note, NoteId, Tombstone};
use crate::state::SyncState;

/// Notes, tombstones and the store behind them.
///
/// Every note edit bumps the note's generation. Results of a sync pass are
/// applied in place only when the generation is the one the pass started
/// from, so edits made while a pass runs are never overwritten.
pub(crate) struct Workspace {
    notes: BTreeMap<NoteId, Note>,
    tombstones: BTreeMap<NoteId, Tombstone>,
    store: Box<dyn LocalStore>,
    /// Edited in memory, not flushed yet
    unsaved: BTreeSet<NoteId>,
    generations: HashMap<NoteId, u64>,
    pub(crate) settings: RepositorySettings,
    pub(crate) state: SyncState,
}

impl Workspace {
    pub(crate) fn load(store: Box<dyn LocalStore>, settings: RepositorySettings) -> Result<Self> {
        let notes = store
            .load_notes()?
            .into_iter()
            .map(|note| (note.id.clone(), note))
            .collect();
        let tombstones = store
            .load_tombstones()?
            .into_iter()
            .map(|tombstone| (tombstone.note_id.clone(), tombstone))
            .collect();

        Ok(Self {
            notes,
            tombstones,
            store,
            unsaved: BTreeSet::new(),
            generations: HashMap::new(),
            settings,
            state: SyncState::Offline,
        })
    }

    pub(crate) fn note(&self, id: &NoteId) -> Option<&Note> {
        self.notes.get(id)
    }

    pub(crate) fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub(crate) fn tombstone(&self, id: &NoteId) -> Option<&Tombstone> {
        self.tombstones.get(id)
    }

    pub(crate) fn tombstones(&self) -> impl Iterator<Item = &Tombstone> {
        self.tombstones.values()
    }

    pub(crate) fn generation(&self, id: &NoteId) -> u64 {
        self.generations.get(id).copied().unwrap_or_default()
    }

    pub(crate) fn generations(&self) -> HashMap<NoteId, u64> {
        self.generations.clone()
    }

    pub(crate) const fn strategy(&self) -> ConflictStrategy {
        self.settings.conflict_strategy
    }

    pub(crate) fn has_unsaved(&self) -> bool {
        !self.unsaved.is_empty()
    }

    /// Apply `change` to a live note as a local edit.
    pub(crate) fn edit<F>(&mut self, id: &NoteId, change: F) -> Result<Note>
    where
        F: FnOnce(&mut Note),
    {
        let note = self
            .notes
            .get_mut(id)
            .filter(|note| !note.deleted)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        change(note);
        let edited = note.clone();
        self.touch(id);
        Ok(edited)
    }

    /// Add a local note, kept in memory until flushed.
    pub(crate) fn add(&mut self, note: Note) {
        let id = note.id.clone();
        self.notes.insert(id.clone(), note);
        self.touch(&id);
    }

    fn touch(&mut self, id: &NoteId) {
        *self.generations.entry(id.clone()).or_default() += 1;
        self.unsaved.insert(id.clone());
    }

    /// Write one note to the store.
    fn persist(&mut self, id: &NoteId) -> Result<()> {
        if let Some(note) = self.notes.get(id) {
            self.store.save_note(note)?;
        }
        self.unsaved.remove(id);
        Ok(())
    }

    /// Write every note edited since the last flush. Returns how many were
    /// written.
    pub(crate) fn flush(&mut self) -> Result<usize> {
        let pending: Vec<NoteId> = self.unsaved.iter().cloned().collect();
        for id in &pending {
            self.persist(id)?;
        }
        if !pending.is_empty() {
            tracing::debug!(notes = pending.len(), "Flushed notes to the local store");
        }
        Ok(pending.len())
    }

    /// Soft delete: flag the note and open a tombstone, both persisted
    /// immediately.
    pub(crate) fn soft_delete(&mut self, id: &NoteId) -> Result<()> {
        let note = self
            .notes
            .get_mut(id)
            .filter(|note| !note.deleted)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        note.deleted = true;
        let tombstone = Tombstone::new(note);

        self.touch(id);
        self.persist(id)?;
        self.store.save_tombstone(&tombstone)?;
        self.tombstones.insert(id.clone(), tombstone);
        Ok(())
    }

    /// Undo a soft delete whose tombstone has not been confirmed yet.
    pub(crate) fn restore(&mut self, id: &NoteId) -> Result<Note> {
        match self.tombstones.get(id) {
            Some(tombstone) if tombstone.is_pending() => {}
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "note {id} was already deleted on the remote"
                )))
            }
            None => return Err(Error::NotFound(id.to_string())),
        }

        let note = self
            .notes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        note.deleted = false;
        let restored = note.clone();

        self.store.remove_tombstone(id)?;
        self.tombstones.remove(id);
        self.touch(id);
        self.persist(id)?;
        Ok(restored)
    }

    /// Drop a note and its tombstone locally, without the remote.
    pub(crate) fn purge(&mut self, id: &NoteId) -> Result<bool> {
        let known = self.notes.contains_key(id) || self.tombstones.contains_key(id);
        self.store.purge(id)?;
        self.notes.remove(id);
        self.tombstones.remove(id);
        self.unsaved.remove(id);
        self.generations.remove(id);
        Ok(known)
    }

    /// The remote confirmed the deletion of `id`: walk the tombstone through
    /// its remaining states and drop the rows. Returns whether anything was
    /// removed.
    pub(crate) fn complete_deletion(&mut self, id: &NoteId) -> Result<bool> {
        let Some(mut tombstone) = self.tombstones.get(id).cloned() else {
            // Restored while the remote deletion was in flight; upload again
            // as a new note.
            if let Some(note) = self.notes.get_mut(id) {
                tracing::info!(note_id = %id, "Note restored during deletion, uploading it again");
                note.remote_revision = None;
                note.dirty = true;
                self.persist(id)?;
            }
            return Ok(false);
        };

        if tombstone.is_pending() {
            tombstone.confirm()?;
            self.store.save_tombstone(&tombstone)?;
        }
        if tombstone.state == DeletionState::Confirmed {
            tombstone.purge()?;
        }
        tracing::debug!(note_id = %id, state = %tombstone.state, "Deletion completed");
        self.purge(id)
    }

    /// Take the server state of an uploaded note. The live note is replaced
    /// only when it was not edited since `generation`.
    pub(crate) fn apply_upload(&mut self, id: &NoteId, uploaded: Note, generation: u64) -> Result<()> {
        let unchanged = self.generation(id) == generation;
        let Some(live) = self.notes.get_mut(id) else {
            tracing::debug!(note_id = %id, "Uploaded note was purged meanwhile");
            return Ok(());
        };

        if live.deleted {
            live.remote_revision.clone_from(&uploaded.remote_revision);
            if let Some(tombstone) = self.tombstones.get_mut(id) {
                tombstone.remote_revision.clone_from(&uploaded.remote_revision);
                self.store.save_tombstone(tombstone)?;
            }
            return self.persist(id);
        }

        if unchanged {
            *live = uploaded;
        } else {
            tracing::debug!(note_id = %id, "Note edited during upload, keeping it dirty");
            live.id = uploaded.id.clone();
            live.remote_revision.clone_from(&uploaded.remote_revision);
        }

        if live.id == *id {
            self.persist(id)
        } else {
            let new_id = live.id.clone();
            self.rename(id, &new_id)
        }
    }

    fn rename(&mut self, previous: &NoteId, new_id: &NoteId) -> Result<()> {
        let Some(note) = self.notes.remove(previous) else {
            return Ok(());
        };
        tracing::debug!(from = %previous, to = %new_id, "Remote assigned a new note id");

        self.store.rename_note(previous, &note)?;
        self.notes.insert(new_id.clone(), note);
        if let Some(generation) = self.generations.remove(previous) {
            self.generations.insert(new_id.clone(), generation);
        }
        self.unsaved.remove(previous);
        for conflict in self
            .notes
            .values_mut()
            .filter(|note| note.conflict_of.as_ref() == Some(previous))
        {
            conflict.conflict_of = Some(new_id.clone());
            self.unsaved.insert(conflict.id.clone());
        }
        Ok(())
    }

    /// Take the result of `update_note_from_remote`. When the note was edited
    /// meanwhile the edit is reconciled with `remote` instead. Returns whether
    /// the contents diverged.
    pub(crate) fn apply_download(
        &mut self,
        id: &NoteId,
        updated: Note,
        generation: u64,
        remote: Option<&Note>,
    ) -> Result<bool> {
        if !self.notes.contains_key(id) {
            return Ok(false);
        }

        if self.generation(id) == generation {
            self.notes.insert(id.clone(), updated);
            self.persist(id)?;
            return Ok(false);
        }

        match remote {
            Some(remote) => self.resolve(id, remote),
            None => {
                if let Some(live) = self.notes.get_mut(id) {
                    live.remote_revision.clone_from(&updated.remote_revision);
                }
                self.persist(id)?;
                Ok(false)
            }
        }
    }

    /// Reconcile the live note with a diverged remote version. Returns whether
    /// the contents actually differed.
    pub(crate) fn resolve(&mut self, id: &NoteId, remote: &Note) -> Result<bool> {
        let Some(live) = self.notes.get(id).filter(|note| !note.deleted) else {
            return Ok(false);
        };

        let diverged = !live.content_equals(remote);
        let resolution = conflict::resolve(live, remote, self.strategy());
        if diverged {
            tracing::info!(
                note_id = %id,
                strategy = ?self.strategy(),
                conflict_note = resolution.conflict.is_some(),
                "Resolved diverged note"
            );
        }

        for note in resolution.into_notes() {
            let note_id = note.id.clone();
            self.notes.insert(note_id.clone(), note);
            self.persist(&note_id)?;
        }
        Ok(diverged)
    }

    /// The remote deleted `id`. A clean note goes away; local edits survive
    /// as a note that was never uploaded.
    pub(crate) fn apply_remote_deletion(&mut self, id: &NoteId) -> Result<bool> {
        let Some(live) = self.notes.get_mut(id) else {
            return Ok(false);
        };
        if live.deleted {
            return Ok(false);
        }

        if live.dirty {
            tracing::info!(note_id = %id, "Note deleted on the remote kept because of local edits");
            live.remote_revision = None;
            self.persist(id)?;
            return Ok(false);
        }

        self.purge(id)
    }

    /// Add a note downloaded from the remote. Ids already known are skipped.
    pub(crate) fn insert_downloaded(&mut self, mut note: Note) -> Result<bool> {
        if self.notes.contains_key(&note.id) || self.tombstones.contains_key(&note.id) {
            return Ok(false);
        }
        note.dirty = false;
        note.tags.mark_synced();
        let id = note.id.clone();
        self.notes.insert(id.clone(), note);
        self.persist(&id)?;
        Ok(true)
    }

    pub(crate) fn load_sync_data(&self) -> Result<SyncData> {
        self.store.load_sync_data(&self.settings.account.storage_key())
    }

    pub(crate) fn save_sync_data(&self, data: &SyncData) -> Result<()> {
        self.store
            .save_sync_data(&self.settings.account.storage_key(), data)
    }

    /// Wipe the store and the in-memory collection.
    pub(crate) fn clear(&mut self) -> Result<()> {
        self.store.clear()?;
        self.notes.clear();
        self.tombstones.clear();
        self.unsaved.clear();
        self.generations.clear();
        self.state = SyncState::Offline;
        Ok(())
    }
}
