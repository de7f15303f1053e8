//! Error types for mnemo-core

use thiserror::Error;

use crate::models::NoteId;

/// Result type alias using mnemo-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mnemo-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The remote rejected our credentials; aborts the whole sync pass
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A single note could not be synchronized; the rest of the pass continues
    #[error("Could not synchronize note {id}: {reason}")]
    NoteSync { id: NoteId, reason: String },

    /// The remote answered with data we could not decode
    #[error("Unexpected response while {context}: {source}")]
    ProtocolDecode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// A programming error, e.g. two sync sessions at once
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// The background worker has been stopped
    #[error("Repository is closed")]
    RepositoryClosed,

    /// Settings refer to a different account than the open repository
    #[error("Account changed from {current} to {requested}; reopen the repository")]
    AccountMismatch { current: String, requested: String },

    /// Remote API returned a non-success status
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },

    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a per-note failure.
    pub fn note_sync(id: &NoteId, reason: impl Into<String>) -> Self {
        Self::NoteSync {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    /// Wrap a decode failure with what we were doing at the time.
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::ProtocolDecode {
            context: context.into(),
            source,
        }
    }

    /// Whether this failure must stop the remaining steps of a sync pass.
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Invariant(_) | Self::RepositoryClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_is_session_fatal() {
        assert!(Error::Authentication("bad password".into()).is_session_fatal());
        assert!(Error::Invariant("two sessions".into()).is_session_fatal());
    }

    #[test]
    fn note_failures_are_isolated() {
        let id: NoteId = "abc".parse().unwrap();
        let error = Error::note_sync(&id, "rejected");
        assert!(!error.is_session_fatal());
        assert_eq!(error.to_string(), "Could not synchronize note abc: rejected");
    }
}
