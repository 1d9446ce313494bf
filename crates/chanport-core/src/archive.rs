//! Archived-channel unlock cycle.
//!
//! History cannot be fetched from an archived channel, so the pipeline
//! temporarily unarchives it, downloads, and re-archives. The restore
//! step is always attempted, even when the download in between failed.
//! If the restore itself fails the channel is reported so an operator
//! can re-archive it by hand.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::MigrateError;
use crate::model::Channel;

/// Archive state transitions, behind a trait so the cycle can be tested
/// without a live workspace. Both calls need an elevated user credential.
#[async_trait]
pub trait ArchiveOps {
    async fn unarchive(&self, channel_id: &str) -> Result<(), MigrateError>;
    async fn archive(&self, channel_id: &str) -> Result<(), MigrateError>;
}

#[async_trait]
impl ArchiveOps for ApiClient {
    async fn unarchive(&self, channel_id: &str) -> Result<(), MigrateError> {
        self.unarchive_channel(channel_id).await
    }

    async fn archive(&self, channel_id: &str) -> Result<(), MigrateError> {
        self.archive_channel(channel_id).await
    }
}

/// Where a channel is in its unlock cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockPhase {
    Archived,
    Unlocked,
    Downloading,
    Restored,
    /// Re-archiving failed; the channel is left unarchived.
    FailedRestore,
}

/// Guard driving one channel through unlock, download, restore.
#[derive(Debug)]
pub struct ArchiveUnlock<'a, O: ArchiveOps> {
    ops: &'a O,
    channel_id: String,
    channel_name: String,
    phase: UnlockPhase,
}

impl<'a, O: ArchiveOps> ArchiveUnlock<'a, O> {
    /// Build a guard for an archived channel. Returns `Ok(None)` when the
    /// channel is not archived and needs no unlock. Fails before any
    /// network call when no elevated credential is available, so an
    /// archived channel is never half-unlocked by an underprivileged run.
    pub fn acquire(ops: Option<&'a O>, channel: &Channel) -> Result<Option<Self>, MigrateError> {
        if !channel.is_archived {
            return Ok(None);
        }
        let ops = ops.ok_or_else(|| MigrateError::InsufficientPrivilege {
            channel: channel.name.clone(),
        })?;
        Ok(Some(Self {
            ops,
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            phase: UnlockPhase::Archived,
        }))
    }

    pub fn phase(&self) -> UnlockPhase {
        self.phase
    }

    pub async fn unlock(&mut self) -> Result<(), MigrateError> {
        info!(channel = %self.channel_name, "unarchiving for download");
        self.ops.unarchive(&self.channel_id).await?;
        self.phase = UnlockPhase::Unlocked;
        Ok(())
    }

    pub fn begin_download(&mut self) {
        self.phase = UnlockPhase::Downloading;
    }

    /// Re-archive the channel. Call this on every exit path once `unlock`
    /// has succeeded, including after a failed download.
    pub async fn restore(&mut self) -> Result<(), MigrateError> {
        match self.ops.archive(&self.channel_id).await {
            Ok(()) => {
                info!(channel = %self.channel_name, "archived state restored");
                self.phase = UnlockPhase::Restored;
                Ok(())
            }
            Err(e) => {
                warn!(channel = %self.channel_name, error = %e, "failed to re-archive channel");
                self.phase = UnlockPhase::FailedRestore;
                Err(MigrateError::ArchiveRestore {
                    channel: self.channel_name.clone(),
                    detail: e.to_string(),
                })
            }
        }
    }
}
