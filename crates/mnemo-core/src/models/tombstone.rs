//! Pending local deletions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Note, NoteId};
use crate::error::{Error, Result};

/// Two-phase deletion: `PendingDelete → Confirmed → Purged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionState {
    /// Deleted locally, remote not told yet
    PendingDelete,
    /// Remote confirmed the deletion, local rows not removed yet
    Confirmed,
    /// Note and tombstone are gone from the local store
    Purged,
}

impl DeletionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingDelete => "pending_delete",
            Self::Confirmed => "confirmed",
            Self::Purged => "purged",
        }
    }
}

impl fmt::Display for DeletionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeletionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending_delete" => Ok(Self::PendingDelete),
            "confirmed" => Ok(Self::Confirmed),
            "purged" => Ok(Self::Purged),
            other => Err(Error::InvalidInput(format!("unknown deletion state '{other}'"))),
        }
    }
}

/// A locally deleted note awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Last known identifier of the deleted note
    pub note_id: NoteId,
    /// Last known remote revision
    pub remote_revision: Option<String>,
    /// Where the deletion stands
    pub state: DeletionState,
    /// Deletion timestamp (Unix ms)
    pub deleted_at: i64,
}

impl Tombstone {
    /// Record the deletion of `note`.
    #[must_use]
    pub fn new(note: &Note) -> Self {
        Self {
            note_id: note.id.clone(),
            remote_revision: note.remote_revision.clone(),
            state: DeletionState::PendingDelete,
            deleted_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self.state, DeletionState::PendingDelete)
    }

    /// The remote confirmed the deletion.
    pub fn confirm(&mut self) -> Result<()> {
        self.transition(DeletionState::PendingDelete, DeletionState::Confirmed)
    }

    /// Local rows were removed.
    pub fn purge(&mut self) -> Result<()> {
        self.transition(DeletionState::Confirmed, DeletionState::Purged)
    }

    fn transition(&mut self, from: DeletionState, to: DeletionState) -> Result<()> {
        if self.state != from {
            return Err(Error::Invariant(format!(
                "tombstone {} cannot move from {} to {}",
                self.note_id, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded_note() -> Note {
        Note::remote("n1".parse().unwrap(), "4")
    }

    #[test]
    fn new_tombstone_keeps_last_known_revision() {
        let tombstone = Tombstone::new(&uploaded_note());
        assert!(tombstone.is_pending());
        assert_eq!(tombstone.remote_revision.as_deref(), Some("4"));
    }

    #[test]
    fn follows_two_phase_order() {
        let mut tombstone = Tombstone::new(&uploaded_note());
        tombstone.confirm().unwrap();
        assert_eq!(tombstone.state, DeletionState::Confirmed);
        tombstone.purge().unwrap();
        assert_eq!(tombstone.state, DeletionState::Purged);
    }

    #[test]
    fn rejects_skipping_confirmation() {
        let mut tombstone = Tombstone::new(&uploaded_note());
        let error = tombstone.purge().unwrap_err();
        assert!(matches!(error, Error::Invariant(_)));
        assert!(tombstone.is_pending());
    }

    #[test]
    fn state_parses_from_storage_form() {
        for state in [
            DeletionState::PendingDelete,
            DeletionState::Confirmed,
            DeletionState::Purged,
        ] {
            assert_eq!(state.as_str().parse::<DeletionState>().unwrap(), state);
        }
        assert!("gone".parse::<DeletionState>().is_err());
    }
}
