//! Error taxonomy for the migration pipeline.
//!
//! `ApiFailure` classifies a single API response so the retry loop can
//! decide what to do with it; `MigrateError` is what the pipeline surfaces
//! once retries are spent or the failure is not retryable.

use std::time::Duration;

use thiserror::Error;

/// Classification of one failed API exchange.
///
/// Rate limiting is retried with the server-directed delay and never
/// consumes the retry budget. Transient failures consume one attempt each.
/// Auth failures are terminal for the call.
#[derive(Debug)]
pub enum ApiFailure {
    RateLimited { retry_after: Option<Duration> },
    Transient(String),
    Auth { scope: String, detail: String },
}

/// Errors surfaced by pipeline operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Permission or authentication failure. Never retried.
    #[error("authorization failed ({scope}): {detail}")]
    Authorization { scope: String, detail: String },

    /// A page or file fetch kept failing after the retry budget was spent.
    #[error("fetch failed after {attempts} attempts: {last}")]
    TransientFetch { attempts: u32, last: String },

    /// A post or file upload kept failing after the retry budget was spent.
    #[error("upload failed after {attempts} attempts: {last}")]
    TransientUpload { attempts: u32, last: String },

    /// Archive unlock was requested without an elevated user credential.
    #[error("unlocking archived channel #{channel} requires an elevated user token")]
    InsufficientPrivilege { channel: String },

    /// The channel could not be re-archived and is left unarchived.
    #[error("failed to restore archived state of #{channel}: {detail}")]
    ArchiveRestore { channel: String, detail: String },

    /// Persisted state disagrees with its completion flags.
    #[error("inconsistent state for #{channel}: {detail}")]
    DataInconsistency { channel: String, detail: String },

    #[error("channel #{0} not found")]
    ChannelNotFound(String),

    #[error("channel #{channel} is not accessible: {reason}")]
    ChannelInaccessible { channel: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
