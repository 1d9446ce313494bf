//! Core pipeline for migrating channel history between workspaces.
//!
//! The pipeline has two halves joined by an on-disk state directory:
//! `download` captures channels, messages and attachments from the
//! source workspace; `upload` replays them into the destination. Every
//! step checkpoints its progress, so any phase can be interrupted and
//! rerun without losing or duplicating data.

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod files;
pub mod identity;
pub mod migrator;
pub mod model;
pub mod pager;
pub mod reconcile;
pub mod store;
pub mod upload;

pub use archive::{ArchiveOps, ArchiveUnlock, UnlockPhase};
pub use client::ApiClient;
pub use config::{resolve_data_dir, Config, Overrides, DEFAULT_DATA_DIR};
pub use error::{ApiFailure, MigrateError};
pub use files::{AttachmentFetch, FileDownloadReport, FileDownloader};
pub use identity::{IdentityMap, MappedUser};
pub use migrator::{ChannelOutcome, DownloadOptions, Migrator, RunSummary, UploadOptions};
pub use model::{
    Channel, ChannelDownloadState, FileAttachment, Message, UploadState, UserRecord, WorkspaceInfo,
};
pub use pager::{Page, Pager};
pub use reconcile::{PendingChannel, ReconcileScanner, RepairSummary};
pub use store::{safe_filename, Side, StateStore};
pub use upload::{postable_messages, ReplayReport, ReplayTarget, UploadReplayer};
