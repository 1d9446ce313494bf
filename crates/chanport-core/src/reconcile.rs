//! Reconciliation of incomplete file downloads.
//!
//! A crash or network outage can leave a channel with its messages fully
//! persisted but some attachments missing. The scanner walks the
//! persisted checkpoints read-only and reports such channels; the repair
//! pass re-runs the file phase for them. Both are idempotent: scanning a
//! healthy store reports nothing, repairing it changes nothing.

use tracing::info;

use crate::error::MigrateError;
use crate::files::{AttachmentFetch, FileDownloader};
use crate::model::Channel;
use crate::store::StateStore;

/// A channel whose message download finished but whose attachments did
/// not.
#[derive(Debug, Clone)]
pub struct PendingChannel {
    pub channel: Channel,
    pub message_count: usize,
    pub pending_files: usize,
}

/// Totals from one repair pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct RepairSummary {
    pub channels_repaired: usize,
    pub channels_still_pending: usize,
    pub files_downloaded: usize,
    pub files_failed: usize,
}

pub struct ReconcileScanner<'a> {
    store: &'a StateStore,
}

impl<'a> ReconcileScanner<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Find channels with pending attachments. Purely read-only.
    pub fn scan(&self) -> Result<Vec<PendingChannel>, MigrateError> {
        let mut pending = Vec::new();
        for state in self.store.list_channel_states()? {
            if !state.messages_downloaded || state.files_downloaded {
                continue;
            }
            let missing = state.pending_attachments();
            if missing > 0 {
                pending.push(PendingChannel {
                    message_count: state.messages.len(),
                    pending_files: missing,
                    channel: state.channel,
                });
            }
        }
        Ok(pending)
    }

    /// Re-run the file phase for every incompletely downloaded channel.
    /// Also heals the case where all files are present but the completion
    /// flag was never flipped.
    pub async fn repair<F: AttachmentFetch>(
        &self,
        fetch: &F,
    ) -> Result<RepairSummary, MigrateError> {
        let mut summary = RepairSummary::default();
        let downloader = FileDownloader::new(fetch, self.store);

        for state in self.store.list_channel_states()? {
            if !state.messages_downloaded || state.files_downloaded {
                continue;
            }
            let mut state = state;
            info!(channel = %state.channel.name, pending = state.pending_attachments(), "repairing file downloads");
            let report = downloader.sync_channel(&mut state).await?;
            summary.files_downloaded += report.downloaded;
            summary.files_failed += report.failed;
            if state.files_downloaded {
                summary.channels_repaired += 1;
            } else {
                summary.channels_still_pending += 1;
            }
        }
        Ok(summary)
    }
}
