use std::fmt;

use crate::error::Error;

/// One failure collected during a pass.
#[derive(Debug)]
pub struct SyncFailure {
    /// What the engine was doing
    pub summary: String,
    pub error: Error,
}

impl SyncFailure {
    pub fn new(summary: impl Into<String>, error: Error) -> Self {
        Self {
            summary: summary.into(),
            error,
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.summary, self.error)
    }
}

/// Outcome of one synchronization pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Notes the remote accepted
    pub uploaded: usize,
    /// Notes created or changed from remote state
    pub downloaded: usize,
    /// Notes removed locally after a confirmed deletion
    pub deleted: usize,
    /// Diverged notes handed to the conflict resolver
    pub conflicts: usize,
    pub errors: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        self.uploaded + self.downloaded + self.deleted + self.conflicts > 0
    }

    /// Whether a failure cut the pass short.
    pub fn was_aborted(&self) -> bool {
        self.errors
            .iter()
            .any(|failure| failure.error.is_session_fatal())
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} downloaded, {} deleted, {} conflicts",
            self.uploaded, self.downloaded, self.deleted, self.conflicts
        )?;
        if !self.errors.is_empty() {
            write!(f, ", {} errors", self.errors.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_errors_only_when_present() {
        let mut report = SyncReport {
            uploaded: 2,
            ..SyncReport::default()
        };
        assert_eq!(
            report.to_string(),
            "2 uploaded, 0 downloaded, 0 deleted, 0 conflicts"
        );
        assert!(report.is_success());
        assert!(report.has_changes());

        report.errors.push(SyncFailure::new(
            "Could not start synchronization",
            Error::Authentication("bad token".to_string()),
        ));
        assert!(report.to_string().ends_with(", 1 errors"));
        assert!(report.was_aborted());
        assert_eq!(
            report.errors[0].to_string(),
            "Could not start synchronization: Authentication failed: bad token"
        );
    }
}
