//! Coarse sync status shown by front ends.

use std::fmt;

/// Where the repository's synchronization stands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    /// No pass completed yet, or the account has no server
    #[default]
    Offline,
    Syncing,
    /// The last pass completed without failures
    Synced,
    /// The last pass reported at least one failure
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
