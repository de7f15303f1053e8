//! Conflict resolution between a local edit and a diverged remote version.
//!
//! Resolution never merges text. Depending on the strategy one side wins, or
//! both versions are kept and the local edit is preserved in a separate
//! conflict note.

use serde::{Deserialize, Serialize};

use crate::models::Note;

/// Suffix appended to the title of conflict notes
pub const CONFLICT_TITLE_SUFFIX: &str = " (conflict)";

const LOCAL_MARKER: &str = "<<<<<<< local";
const SEPARATOR: &str = "=======";
const REMOTE_MARKER: &str = ">>>>>>> remote";

/// What to do when a dirty note diverged from the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Discard the remote change and upload the local edit again
    KeepLocal,
    /// Discard the local edit
    KeepRemote,
    /// Adopt the remote version and keep the local edit as a conflict note
    #[default]
    KeepBoth,
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The reconciled original note
    pub primary: Note,
    /// New conflict note, only produced by [`ConflictStrategy::KeepBoth`]
    pub conflict: Option<Note>,
}

impl Resolution {
    /// All notes of the resolution, original first.
    pub fn into_notes(self) -> Vec<Note> {
        std::iter::once(self.primary).chain(self.conflict).collect()
    }
}

/// Resolve a local note against its remote counterpart.
///
/// When both sides only differ in whitespace, timestamps or tag casing the
/// remote state is applied and no conflict is produced regardless of the
/// strategy.
#[must_use]
pub fn resolve(local: &Note, remote: &Note, strategy: ConflictStrategy) -> Resolution {
    let mut primary = local.clone();

    if local.content_equals(remote) {
        primary.apply_remote(remote);
        return Resolution {
            primary,
            conflict: None,
        };
    }

    match strategy {
        ConflictStrategy::KeepLocal => {
            primary.remote_revision.clone_from(&remote.remote_revision);
            primary.dirty = true;
            Resolution {
                primary,
                conflict: None,
            }
        }
        ConflictStrategy::KeepRemote => {
            primary.adopt_remote(remote);
            Resolution {
                primary,
                conflict: None,
            }
        }
        ConflictStrategy::KeepBoth => {
            let conflict = conflict_note(local, remote);
            primary.adopt_remote(remote);
            primary.tags.mark_synced();
            Resolution {
                primary,
                conflict: Some(conflict),
            }
        }
    }
}

fn conflict_note(local: &Note, remote: &Note) -> Note {
    let mut note = Note::new_local();
    note.title = format!("{}{CONFLICT_TITLE_SUFFIX}", local.title);
    note.text = format!(
        "{LOCAL_MARKER}\n{}\n{SEPARATOR}\n{}\n{REMOTE_MARKER}\n",
        local.text.trim_end(),
        remote.text.trim_end()
    );
    note.tags = local.tags.union(&remote.tags);
    note.dirty = true;
    note.conflict_of = Some(local.id.clone());
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagSet;
    use pretty_assertions::assert_eq;

    fn synced(text: &str, revision: &str) -> Note {
        let mut note = Note::remote("n1".parse().unwrap(), revision);
        note.title = "Shopping".to_string();
        note.text = text.to_string();
        note.tags = TagSet::from_names(["home"]);
        note
    }

    fn diverged() -> (Note, Note) {
        let mut local = synced("milk", "1");
        local.text = "milk\neggs".to_string();
        local.tags.insert("urgent");
        local.dirty = true;

        let mut remote = synced("milk\nbread", "2");
        remote.tags = TagSet::from_names(["home", "weekly"]);
        (local, remote)
    }

    #[test]
    fn keep_both_produces_exactly_one_conflict_note() {
        let (local, remote) = diverged();
        let resolution = resolve(&local, &remote, ConflictStrategy::KeepBoth);

        assert_eq!(resolution.primary.text, "milk\nbread");
        assert!(!resolution.primary.dirty);
        assert_eq!(resolution.primary.remote_revision.as_deref(), Some("2"));
        assert!(resolution.primary.tags.equivalent(&remote.tags));

        let conflict = resolution.conflict.expect("conflict note");
        assert!(conflict.is_conflict_note());
        assert!(conflict.dirty);
        assert_ne!(conflict.id, local.id);
        assert_eq!(conflict.conflict_of.as_ref(), Some(&local.id));
        assert_eq!(conflict.title, "Shopping (conflict)");
        assert!(conflict.text.contains("milk\neggs"));
        assert!(conflict.text.contains("milk\nbread"));
        assert!(conflict
            .tags
            .equivalent(&TagSet::from_names(["home", "urgent", "weekly"])));
    }

    #[test]
    fn keep_both_delimits_both_versions() {
        let (local, remote) = diverged();
        let conflict = resolve(&local, &remote, ConflictStrategy::KeepBoth)
            .conflict
            .unwrap();
        assert_eq!(
            conflict.text,
            "<<<<<<< local\nmilk\neggs\n=======\nmilk\nbread\n>>>>>>> remote\n"
        );
    }

    #[test]
    fn keep_local_requeues_local_edit_on_new_revision() {
        let (local, remote) = diverged();
        let resolution = resolve(&local, &remote, ConflictStrategy::KeepLocal);

        assert!(resolution.conflict.is_none());
        assert_eq!(resolution.primary.text, "milk\neggs");
        assert!(resolution.primary.dirty);
        assert_eq!(resolution.primary.remote_revision.as_deref(), Some("2"));
        assert!(resolution.primary.tags.contains("urgent"));
    }

    #[test]
    fn keep_remote_discards_local_edit() {
        let (local, remote) = diverged();
        let resolution = resolve(&local, &remote, ConflictStrategy::KeepRemote);

        assert!(resolution.conflict.is_none());
        assert_eq!(resolution.primary.text, "milk\nbread");
        assert!(!resolution.primary.dirty);
        assert!(!resolution.primary.tags.contains("urgent"));
    }

    #[test]
    fn whitespace_only_difference_is_not_a_conflict() {
        let (mut local, mut remote) = diverged();
        local.tags = remote.tags.clone();
        remote.text = "milk\neggs  \n".to_string();

        let resolution = resolve(&local, &remote, ConflictStrategy::KeepBoth);
        assert!(resolution.conflict.is_none());
        assert!(!resolution.primary.dirty);
        assert_eq!(resolution.into_notes().len(), 1);
    }

    #[test]
    fn default_strategy_is_keep_both() {
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::KeepBoth);
    }
}
