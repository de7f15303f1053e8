use async_trait::async_trait;

use super::session::{self, SyncSession};
use super::{RemoteConnection, UploadResult};
use crate::db::SyncData;
use crate::error::Result;
use crate::models::{Note, Tombstone};

/// Headless account without a server. Every pass succeeds and nothing leaves
/// the machine.
#[derive(Debug, Default)]
pub struct OfflineConnection {
    session: Option<SyncSession>,
}

impl OfflineConnection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteConnection for OfflineConnection {
    fn backend(&self) -> &'static str {
        "offline"
    }

    async fn start_sync(
        &mut self,
        _data: &mut SyncData,
        _local_notes: &[Note],
        _local_deleted: &[Tombstone],
    ) -> Result<()> {
        session::begin(&mut self.session)?;
        Ok(())
    }

    fn session(&self) -> Option<&SyncSession> {
        self.session.as_ref()
    }

    fn finish_sync(&mut self) {
        self.session = None;
    }

    async fn upload_note_to_remote(&mut self, _note: &mut Note) -> Result<UploadResult> {
        Ok(UploadResult::UpToDate)
    }

    async fn delete_note(&mut self, _tombstone: &Tombstone) -> Result<()> {
        Ok(())
    }

    fn needs_upload(&self, _note: &Note) -> bool {
        false
    }
}
