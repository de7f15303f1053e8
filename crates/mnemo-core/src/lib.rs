//! mnemo-core - note synchronization engine
//!
//! Keeps a local note collection reconciled with one of several remote note
//! services. The entry point is [`NoteRepository`]; backends implement
//! [`remote::RemoteConnection`].

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod repository;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{AccountConfig, AppConfig, RepositorySettings, SyncTiming};
pub use conflict::ConflictStrategy;
pub use error::{Error, Result};
pub use models::{Note, NoteEdit, NoteId};
pub use repository::NoteRepository;
pub use state::SyncState;
pub use sync::{NoFeedback, SyncFailure, SyncFeedback, SyncReport};
