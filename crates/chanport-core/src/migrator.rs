//! Pipeline orchestration.
//!
//! Drives the three phases over a set of channels: download (messages
//! then files), upload (replay into the destination), or both. Channels
//! are processed strictly one at a time; any failure in one channel is
//! recorded and the run moves on. Only the workspace-level fetches
//! (identity, rosters, channel listing) are run-fatal, since nothing
//! downstream can work without them.

use std::time::Duration;

use tracing::{info, warn};

use crate::archive::ArchiveUnlock;
use crate::client::ApiClient;
use crate::config::Config;
use crate::error::MigrateError;
use crate::files::FileDownloader;
use crate::identity::IdentityMap;
use crate::model::Channel;
use crate::pager::Pager;
use crate::reconcile::ReconcileScanner;
use crate::store::{Side, StateStore};
use crate::upload::UploadReplayer;

const BATCH_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone)]
pub struct DownloadOptions {
    /// Restrict the run to these channel names. `None` means every channel.
    pub channels: Option<Vec<String>>,
    /// Discard existing checkpoints and re-download from scratch.
    pub force: bool,
    /// Unlock archived channels (requires the elevated user token).
    pub unlock_archived: bool,
}

#[derive(Debug, Default, Clone)]
pub struct UploadOptions {
    pub channels: Option<Vec<String>>,
    /// Cap on messages replayed per channel.
    pub limit: Option<usize>,
}

/// Per-run outcome, channel by channel.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Channels whose messages are complete but attachments are not.
    pub pending_reconciliation: Vec<String>,
    /// Channels left unarchived because re-archiving failed.
    pub archive_restore_failures: Vec<String>,
}

/// Outcome of one channel's download. A failed re-archive is carried
/// separately from the download result so neither can mask the other.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub download: Result<(), MigrateError>,
    /// Present when the channel was unarchived but could not be
    /// re-archived; it is left unarchived.
    pub restore_failure: Option<MigrateError>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.archive_restore_failures.is_empty()
    }

    pub fn needs_reconciliation(&self) -> bool {
        !self.pending_reconciliation.is_empty()
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.pending_reconciliation.extend(other.pending_reconciliation);
        self.archive_restore_failures.extend(other.archive_restore_failures);
    }
}

pub struct Migrator {
    config: Config,
    source: ApiClient,
    dest: ApiClient,
    /// Elevated source-side client, present only when a user token was
    /// configured. Needed for archive transitions.
    elevated: Option<ApiClient>,
    store: StateStore,
}

impl Migrator {
    pub fn new(config: Config) -> Self {
        let source = ApiClient::new(&config.source_token, &config);
        let dest = ApiClient::new(&config.dest_token, &config);
        let elevated = config
            .source_user_token
            .as_deref()
            .map(|t| ApiClient::new(t, &config));
        let store = StateStore::new(config.data_dir.clone());
        Self {
            config,
            source,
            dest,
            elevated,
            store,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn source(&self) -> &ApiClient {
        &self.source
    }

    /// Download phase: workspace identity, user roster, then per-channel
    /// messages and files.
    pub async fn download(&self, opts: &DownloadOptions) -> Result<RunSummary, MigrateError> {
        self.store.ensure_layout()?;

        // Workspace-level fetches are run-fatal; nothing downstream can
        // work if these fail.
        let info = self.source.workspace_info().await?;
        info!(workspace = %info.name, "connected to source workspace");
        self.store.save_workspace(&info)?;

        let users = self.source.list_users().await?;
        info!(users = users.len(), "source roster fetched");
        self.store.save_users(Side::Source, &users)?;

        let all_channels = self.source.list_channels(false).await?;
        self.store.save_channels(&all_channels)?;

        let mut summary = RunSummary::default();
        let selected = select_channels(&all_channels, opts.channels.as_deref(), &mut summary);

        for channel in selected {
            if channel.is_archived && !opts.unlock_archived {
                info!(channel = %channel.name, "skipping archived channel");
                continue;
            }
            let outcome = self.download_channel(&channel, opts.force).await;
            record_outcome(&mut summary, &channel.name, outcome);
        }

        for pending in ReconcileScanner::new(&self.store).scan()? {
            summary.pending_reconciliation.push(pending.channel.name);
        }
        Ok(summary)
    }

    /// Download one channel, driving the archive unlock cycle around the
    /// fetch when needed. The restore is attempted on every exit path
    /// once the channel was unarchived, and a restore failure is returned
    /// alongside the download result, never in place of it.
    pub async fn download_channel(&self, channel: &Channel, force: bool) -> ChannelOutcome {
        let mut guard = match ArchiveUnlock::acquire(self.elevated.as_ref(), channel) {
            Ok(guard) => guard,
            Err(e) => {
                return ChannelOutcome {
                    download: Err(e),
                    restore_failure: None,
                }
            }
        };
        if let Some(g) = guard.as_mut() {
            if let Err(e) = g.unlock().await {
                return ChannelOutcome {
                    download: Err(e),
                    restore_failure: None,
                };
            }
            g.begin_download();
        }

        let download = self.fetch_channel_content(channel, force).await;

        let restore_failure = match guard.as_mut() {
            Some(g) => g.restore().await.err(),
            None => None,
        };
        ChannelOutcome {
            download,
            restore_failure,
        }
    }

    async fn fetch_channel_content(&self, channel: &Channel, force: bool) -> Result<(), MigrateError> {
        let mut state = if force {
            crate::model::ChannelDownloadState::empty(channel.clone())
        } else {
            self.store.load_channel_state(channel)?
        };
        if state.messages_downloaded && state.files_downloaded {
            info!(channel = %channel.name, "already downloaded");
            return Ok(());
        }

        if !channel.is_archived && !channel.is_member {
            if channel.is_private {
                return Err(MigrateError::ChannelInaccessible {
                    channel: channel.name.clone(),
                    reason: "private channel the app is not a member of".to_string(),
                });
            }
            self.source.join_channel(&channel.id).await?;
        }

        if !state.messages_downloaded {
            let oldest = state.newest_ts().map(str::to_string);
            if let Some(ts) = &oldest {
                info!(channel = %channel.name, resume_from = %ts, "resuming message download");
            }
            let mut pager = Pager::new(|cursor| {
                self.source.history_page(&channel.id, oldest.as_deref(), cursor)
            });
            let mut fetched = 0usize;
            while let Some(page) = pager.next_page().await? {
                fetched += page.len();
                self.store.append_messages(&mut state, page)?;
            }
            self.store.mark_messages_downloaded(&mut state)?;
            info!(channel = %channel.name, fetched, total = state.messages.len(), "messages downloaded");
        }

        let report = FileDownloader::new(&self.source, &self.store)
            .sync_channel(&mut state)
            .await?;
        if report.failed > 0 {
            warn!(channel = %channel.name, failed = report.failed, "some attachments not downloaded");
        }
        Ok(())
    }

    /// Upload phase: build the identity map, then replay each downloaded
    /// channel into the destination.
    pub async fn upload(&self, opts: &UploadOptions) -> Result<RunSummary, MigrateError> {
        self.store.ensure_layout()?;

        let mut source_users = self.store.load_users(Side::Source)?;
        if source_users.is_empty() {
            source_users = self.source.list_users().await?;
            self.store.save_users(Side::Source, &source_users)?;
        }
        let dest_users = self.dest.list_users().await?;
        self.store.save_users(Side::Dest, &dest_users)?;
        let identity = IdentityMap::build(&source_users, &dest_users);

        let replayer = UploadReplayer::new(
            &self.dest,
            &self.store,
            &identity,
            self.config.batch_size,
            BATCH_DELAY,
        );

        let mut summary = RunSummary::default();
        let states = self.store.list_channel_states()?;
        let channels: Vec<Channel> = states
            .iter()
            .filter(|s| s.messages_downloaded)
            .map(|s| s.channel.clone())
            .collect();
        let selected = select_channels(&channels, opts.channels.as_deref(), &mut summary);

        for channel in selected {
            let state = self.store.load_channel_state(&channel)?;
            match replayer.replay_channel(&state, opts.limit).await {
                Ok(report) => {
                    info!(channel = %channel.name, posted = report.posted, "channel replayed");
                    summary.succeeded.push(channel.name.clone());
                }
                Err(e) => {
                    warn!(channel = %channel.name, error = %e, "channel replay failed");
                    summary.failed.push((channel.name.clone(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Download then upload in one run.
    pub async fn migrate(
        &self,
        download: &DownloadOptions,
        upload: &UploadOptions,
    ) -> Result<RunSummary, MigrateError> {
        let mut summary = self.download(download).await?;
        summary.merge(self.upload(upload).await?);
        Ok(summary)
    }

    /// Repair incompletely downloaded channels.
    pub async fn reconcile(&self) -> Result<crate::reconcile::RepairSummary, MigrateError> {
        ReconcileScanner::new(&self.store).repair(&self.source).await
    }
}

/// Fold one channel's outcome into the run summary. A failed restore and
/// a failed download are recorded independently; neither stops the run.
fn record_outcome(summary: &mut RunSummary, name: &str, outcome: ChannelOutcome) {
    if let Some(e) = &outcome.restore_failure {
        warn!(channel = name, error = %e, "channel left unarchived");
        summary.archive_restore_failures.push(name.to_string());
    }
    match outcome.download {
        Ok(()) => summary.succeeded.push(name.to_string()),
        Err(e) => {
            warn!(channel = name, error = %e, "channel download failed");
            summary.failed.push((name.to_string(), e.to_string()));
        }
    }
}

/// Resolve a channel-name selection against the available set. Names with
/// no match are recorded as failures rather than silently dropped.
fn select_channels(
    available: &[Channel],
    requested: Option<&[String]>,
    summary: &mut RunSummary,
) -> Vec<Channel> {
    match requested {
        None => available.to_vec(),
        Some(names) => {
            let mut selected = Vec::new();
            for name in names {
                match available.iter().find(|c| &c.name == name) {
                    Some(c) => selected.push(c.clone()),
                    None => summary.failed.push((
                        name.clone(),
                        MigrateError::ChannelNotFound(name.clone()).to_string(),
                    )),
                }
            }
            selected
        }
    }
}
