//! Data models for mnemo

mod note;
mod tags;
mod tombstone;

pub use note::{Note, NoteEdit, NoteId};
pub use tags::{TagEntry, TagSet};
pub use tombstone::{DeletionState, Tombstone};
