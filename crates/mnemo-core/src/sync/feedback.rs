use chrono::{DateTime, Utc};

use super::SyncFailure;

/// Observer of the sync lifecycle, implemented by the front end.
///
/// Callbacks run on the task that drives the pass and must not block.
pub trait SyncFeedback: Send + Sync {
    /// A pass was requested and queued.
    fn on_sync_request(&self) {}

    /// A pass is starting.
    fn start_sync(&self) {}

    /// A pass finished without any failure.
    fn sync_success(&self, _finished_at: DateTime<Utc>) {}

    /// Every failure of one pass, in the order they happened.
    fn sync_error(&self, _failures: &[SyncFailure]) {}
}

/// Feedback that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeedback;

impl SyncFeedback for NoFeedback {}
