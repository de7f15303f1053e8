//! Durable note persistence and the tombstone ledger

use rusqlite::{params, OptionalExtension};

use super::{Database, SyncData};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, Tombstone};

/// Trait for local note storage operations
pub trait LocalStore: Send {
    /// Load every stored note, soft-deleted ones included
    fn load_notes(&self) -> Result<Vec<Note>>;

    /// Insert or replace a note
    fn save_note(&self, note: &Note) -> Result<()>;

    /// Store `note` under its new id and drop the row stored under `previous`
    fn rename_note(&self, previous: &NoteId, note: &Note) -> Result<()>;

    /// Remove a note row
    fn remove_note(&self, id: &NoteId) -> Result<()>;

    /// Load every tombstone
    fn load_tombstones(&self) -> Result<Vec<Tombstone>>;

    /// Insert or replace a tombstone
    fn save_tombstone(&self, tombstone: &Tombstone) -> Result<()>;

    /// Remove a tombstone without touching the note (undo of a soft delete)
    fn remove_tombstone(&self, id: &NoteId) -> Result<()>;

    /// Remove the note row and its tombstone atomically
    fn purge(&self, id: &NoteId) -> Result<()>;

    /// Load the backend persistence data of an account
    fn load_sync_data(&self, account: &str) -> Result<SyncData>;

    /// Save the backend persistence data of an account
    fn save_sync_data(&self, account: &str, data: &SyncData) -> Result<()>;

    /// Delete every note, tombstone and sync state
    fn clear(&self) -> Result<()>;
}

/// Raw column values of the `notes` table
struct NoteRow {
    id: String,
    title: String,
    text: String,
    tags: String,
    created_at: i64,
    updated_at: i64,
    remote_revision: Option<String>,
    dirty: bool,
    deleted: bool,
    conflict_of: Option<String>,
}

impl NoteRow {
    fn into_note(self) -> Result<Note> {
        Ok(Note {
            id: self.id.parse()?,
            title: self.title,
            text: self.text,
            tags: serde_json::from_str(&self.tags)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            remote_revision: self.remote_revision,
            dirty: self.dirty,
            deleted: self.deleted,
            conflict_of: self.conflict_of.map(|id| id.parse()).transpose()?,
        })
    }
}

/// `SQLite` implementation of `LocalStore`
pub struct SqliteLocalStore {
    db: Database,
}

impl SqliteLocalStore {
    /// Create a store on top of an open database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Read the raw columns of a note row
    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteRow> {
        Ok(NoteRow {
            id: row.get(0)?,
            title: row.get(1)?,
            text: row.get(2)?,
            tags: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            remote_revision: row.get(6)?,
            dirty: row.get::<_, i32>(7)? != 0,
            deleted: row.get::<_, i32>(8)? != 0,
            conflict_of: row.get(9)?,
        })
    }

    fn write_note(conn: &rusqlite::Connection, note: &Note) -> Result<()> {
        let tags = serde_json::to_string(&note.tags)?;
        conn.execute(
            "INSERT OR REPLACE INTO notes
                (id, title, text, tags, created_at, updated_at, remote_revision, is_dirty, is_deleted, conflict_of)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                note.id.as_str(),
                note.title,
                note.text,
                tags,
                note.created_at,
                note.updated_at,
                note.remote_revision,
                i32::from(note.dirty),
                i32::from(note.deleted),
                note.conflict_of.as_ref().map(NoteId::as_str),
            ],
        )?;
        Ok(())
    }
}

impl LocalStore for SqliteLocalStore {
    fn load_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT id, title, text, tags, created_at, updated_at, remote_revision, is_dirty, is_deleted, conflict_of
             FROM notes
             ORDER BY updated_at DESC",
        )?;

        let rows = stmt
            .query_map([], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(NoteRow::into_note).collect()
    }

    fn save_note(&self, note: &Note) -> Result<()> {
        Self::write_note(self.db.connection(), note)
    }

    fn rename_note(&self, previous: &NoteId, note: &Note) -> Result<()> {
        let tx = self.db.connection().unchecked_transaction()?;
        tx.execute("DELETE FROM notes WHERE id = ?", params![previous.as_str()])?;
        Self::write_note(&tx, note)?;
        tx.commit()?;
        Ok(())
    }

    fn remove_note(&self, id: &NoteId) -> Result<()> {
        self.db
            .connection()
            .execute("DELETE FROM notes WHERE id = ?", params![id.as_str()])?;
        Ok(())
    }

    fn load_tombstones(&self) -> Result<Vec<Tombstone>> {
        let mut stmt = self.db.connection().prepare(
            "SELECT note_id, remote_revision, state, deleted_at
             FROM tombstones
             ORDER BY deleted_at ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(note_id, remote_revision, state, deleted_at)| {
                Ok(Tombstone {
                    note_id: note_id.parse()?,
                    remote_revision,
                    state: state.parse()?,
                    deleted_at,
                })
            })
            .collect()
    }

    fn save_tombstone(&self, tombstone: &Tombstone) -> Result<()> {
        self.db.connection().execute(
            "INSERT OR REPLACE INTO tombstones (note_id, remote_revision, state, deleted_at)
             VALUES (?, ?, ?, ?)",
            params![
                tombstone.note_id.as_str(),
                tombstone.remote_revision,
                tombstone.state.as_str(),
                tombstone.deleted_at,
            ],
        )?;
        Ok(())
    }

    fn remove_tombstone(&self, id: &NoteId) -> Result<()> {
        self.db.connection().execute(
            "DELETE FROM tombstones WHERE note_id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn purge(&self, id: &NoteId) -> Result<()> {
        let tx = self.db.connection().unchecked_transaction()?;
        tx.execute("DELETE FROM notes WHERE id = ?", params![id.as_str()])?;
        tx.execute(
            "DELETE FROM tombstones WHERE note_id = ?",
            params![id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_sync_data(&self, account: &str) -> Result<SyncData> {
        let raw: Option<String> = self
            .db
            .connection()
            .query_row(
                "SELECT data FROM sync_state WHERE account = ?",
                params![account],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(Error::from),
            None => Ok(SyncData::default()),
        }
    }

    fn save_sync_data(&self, account: &str, data: &SyncData) -> Result<()> {
        let raw = serde_json::to_string(data)?;
        self.db.connection().execute(
            "INSERT OR REPLACE INTO sync_state (account, data, updated_at) VALUES (?, ?, ?)",
            params![account, raw, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let tx = self.db.connection().unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM notes;
             DELETE FROM tombstones;
             DELETE FROM sync_state;",
        )?;
        tx.commit()?;
        tracing::info!("Cleared local store");
        Ok(())
    }
}
