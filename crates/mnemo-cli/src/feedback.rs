use chrono::{DateTime, Local, Utc};
use mnemo_core::{SyncFailure, SyncFeedback};

/// Reports sync progress on the terminal.
pub struct ConsoleFeedback;

impl SyncFeedback for ConsoleFeedback {
    fn on_sync_request(&self) {
        tracing::debug!("Sync queued");
    }

    fn start_sync(&self) {
        tracing::info!("Synchronizing notes");
    }

    fn sync_success(&self, finished_at: DateTime<Utc>) {
        let local: DateTime<Local> = finished_at.into();
        tracing::info!("Last sync {}", local.format("%Y-%m-%d %H:%M:%S"));
    }

    fn sync_error(&self, failures: &[SyncFailure]) {
        for failure in failures {
            eprintln!("sync: {failure}");
        }
    }
}
