//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::TagSet;
use crate::error::Error;

/// Identifier of a note.
///
/// Locally created notes get a UUID v7 string; once a backend confirms the
/// note the identifier it reports is kept verbatim, so any non-empty string
/// is valid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Create a new process-local note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidInput("note id must not be empty".into()));
        }
        Ok(Self(s.to_string()))
    }
}

/// A note in the local collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Note title
    pub title: String,
    /// Note body
    pub text: String,
    /// Tags, compared case-insensitively
    pub tags: TagSet,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Opaque version token of the backend, `None` until first sync
    pub remote_revision: Option<String>,
    /// Local edit not yet confirmed by the remote
    pub dirty: bool,
    /// Tombstone flag
    pub deleted: bool,
    /// Set on conflict notes: the note whose edit diverged
    pub conflict_of: Option<NoteId>,
}

impl Note {
    /// Create a new, empty, never uploaded note
    #[must_use]
    pub fn new_local() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: NoteId::new(),
            title: String::new(),
            text: String::new(),
            tags: TagSet::default(),
            created_at: now,
            updated_at: now,
            remote_revision: None,
            dirty: true,
            deleted: false,
            conflict_of: None,
        }
    }

    /// Create a clean note as reported by a backend
    #[must_use]
    pub fn remote(id: NoteId, revision: impl Into<String>) -> Self {
        Self {
            id,
            title: String::new(),
            text: String::new(),
            tags: TagSet::default(),
            created_at: 0,
            updated_at: 0,
            remote_revision: Some(revision.into()),
            dirty: false,
            deleted: false,
            conflict_of: None,
        }
    }

    /// Conflict notes are derived from a diverged edit and never uploaded
    /// until resolved.
    pub const fn is_conflict_note(&self) -> bool {
        self.conflict_of.is_some()
    }

    /// Whether the remote holds exactly this note's current content.
    pub const fn is_remote_saved(&self) -> bool {
        !self.dirty && self.remote_revision.is_some()
    }

    /// Compare title, text and tags, ignoring timestamps, revisions and
    /// whitespace-only differences.
    #[must_use]
    pub fn content_equals(&self, other: &Self) -> bool {
        normalize_content(&self.title) == normalize_content(&other.title)
            && normalize_content(&self.text) == normalize_content(&other.text)
            && self.tags.equivalent(&other.tags)
    }

    /// Apply server-confirmed state. Tags added locally since the last
    /// confirmed sync survive.
    pub fn apply_remote(&mut self, remote: &Self) {
        self.id = remote.id.clone();
        self.title.clone_from(&remote.title);
        self.text.clone_from(&remote.text);
        self.tags.synchronize(remote.tags.names());
        self.created_at = remote.created_at;
        self.updated_at = remote.updated_at;
        self.remote_revision.clone_from(&remote.remote_revision);
        self.deleted = remote.deleted;
        self.dirty = false;
    }

    /// Replace everything with the remote state, local tag edits included.
    pub fn adopt_remote(&mut self, remote: &Self) {
        self.apply_remote(remote);
        self.tags = TagSet::from_names(remote.tags.names());
    }

    /// Confirm that the remote now holds this note's content.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.tags.mark_synced();
    }

    /// Apply a local edit.
    pub fn edit(&mut self, edit: &NoteEdit) {
        if let Some(title) = &edit.title {
            self.title.clone_from(title);
        }
        if let Some(text) = &edit.text {
            self.text.clone_from(text);
        }
        for tag in &edit.remove_tags {
            self.tags.remove(tag);
        }
        for tag in &edit.add_tags {
            self.tags.insert(tag);
        }
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.dirty = true;
    }

    /// Title, or the first line of the text when the title is blank,
    /// truncated to `max_len` characters
    #[must_use]
    pub fn preview(&self, max_len: usize) -> String {
        let source = if self.title.trim().is_empty() {
            self.text.lines().next().unwrap_or("")
        } else {
            self.title.as_str()
        };
        source.chars().take(max_len).collect()
    }

    /// Check if note content is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.text.trim().is_empty()
    }
}

/// A local change to a note's title, text or tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteEdit {
    pub title: Option<String>,
    pub text: Option<String>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
}

impl NoteEdit {
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        self.add_tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn remove_tag(mut self, tag: impl Into<String>) -> Self {
        self.remove_tags.push(tag.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.text.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
    }
}

/// Strip trailing whitespace per line plus leading/trailing blank lines.
fn normalize_content(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
