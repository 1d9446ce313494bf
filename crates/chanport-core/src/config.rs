//! Run configuration.
//!
//! Built once at startup from an optional TOML file plus environment
//! variables, then passed by reference through every component. Nothing in
//! the pipeline reads ambient state after this point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_DATA_DIR: &str = "migration_data";

/// Immutable configuration for a migration run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bot token for the source workspace.
    pub source_token: String,
    /// Bot token for the destination workspace.
    pub dest_token: String,
    /// Elevated user token, required only for archive unlock.
    pub source_user_token: Option<String>,
    /// Messages posted per upload batch.
    pub batch_size: usize,
    /// Default inter-request delay for endpoints without a known tier.
    pub rate_limit_delay: Duration,
    /// Retry budget for transient failures.
    pub max_retries: u32,
    /// Root directory for all persisted migration state.
    pub data_dir: PathBuf,
}

/// On-disk TOML shape; every field optional so the file can carry just the
/// values that differ from defaults. Environment variables win over the
/// file, CLI overrides win over both.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    source_token: Option<String>,
    dest_token: Option<String>,
    source_user_token: Option<String>,
    batch_size: Option<usize>,
    rate_limit_delay_secs: Option<f64>,
    max_retries: Option<u32>,
    data_dir: Option<PathBuf>,
}

/// Per-invocation overrides from the CLI.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub batch_size: Option<usize>,
    pub rate_limit_delay_secs: Option<f64>,
    pub max_retries: Option<u32>,
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration: TOML file (if present), then environment, then
    /// CLI overrides. Fails if either workspace token is missing.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut raw = match file {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file: {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file: {}", path.display()))?
            }
            _ => RawConfig::default(),
        };

        apply_env(&mut raw)?;

        let source_token = match raw.source_token {
            Some(t) if !t.is_empty() => t,
            _ => bail!("SOURCE_SLACK_TOKEN is required (env or config file)"),
        };
        let dest_token = match raw.dest_token {
            Some(t) if !t.is_empty() => t,
            _ => bail!("DEST_SLACK_TOKEN is required (env or config file)"),
        };

        let delay_secs = overrides
            .rate_limit_delay_secs
            .or(raw.rate_limit_delay_secs)
            .unwrap_or(1.0);

        Ok(Config {
            source_token,
            dest_token,
            source_user_token: raw.source_user_token.filter(|t| !t.is_empty()),
            batch_size: overrides.batch_size.or(raw.batch_size).unwrap_or(100),
            rate_limit_delay: Duration::from_secs_f64(delay_secs),
            max_retries: overrides.max_retries.or(raw.max_retries).unwrap_or(3),
            data_dir: overrides
                .data_dir
                .clone()
                .or(raw.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
        })
    }
}

fn apply_env(raw: &mut RawConfig) -> Result<()> {
    if let Ok(v) = std::env::var("SOURCE_SLACK_TOKEN") {
        raw.source_token = Some(v);
    }
    if let Ok(v) = std::env::var("DEST_SLACK_TOKEN") {
        raw.dest_token = Some(v);
    }
    if let Ok(v) = std::env::var("SOURCE_USER_TOKEN") {
        raw.source_user_token = Some(v);
    }
    if let Ok(v) = std::env::var("BATCH_SIZE") {
        raw.batch_size = Some(v.parse().context("BATCH_SIZE must be an integer")?);
    }
    if let Ok(v) = std::env::var("RATE_LIMIT_DELAY") {
        raw.rate_limit_delay_secs = Some(v.parse().context("RATE_LIMIT_DELAY must be a number")?);
    }
    if let Ok(v) = std::env::var("MAX_RETRIES") {
        raw.max_retries = Some(v.parse().context("MAX_RETRIES must be an integer")?);
    }
    if let Ok(v) = std::env::var("OUTPUT_DIR") {
        raw.data_dir = Some(PathBuf::from(v));
    }
    Ok(())
}

/// Resolve the data directory for commands that only read persisted state
/// and must not require credentials (e.g. `status`).
pub fn resolve_data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(dir) = cli_override {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var("OUTPUT_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from(DEFAULT_DATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_config() {
        let raw: RawConfig = toml::from_str(
            r#"
source_token = "xoxb-src"
dest_token = "xoxb-dst"
batch_size = 25
rate_limit_delay_secs = 0.5
"#,
        )
        .unwrap();
        assert_eq!(raw.source_token.as_deref(), Some("xoxb-src"));
        assert_eq!(raw.batch_size, Some(25));
        assert_eq!(raw.rate_limit_delay_secs, Some(0.5));
        assert!(raw.source_user_token.is_none());
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            batch_size: Some(10),
            data_dir: Some(PathBuf::from("/tmp/mig")),
            ..Default::default()
        };
        // Build from parsed raw values directly to avoid touching process env.
        let raw: RawConfig = toml::from_str(
            r#"
source_token = "a"
dest_token = "b"
batch_size = 100
"#,
        )
        .unwrap();
        let batch = overrides.batch_size.or(raw.batch_size).unwrap();
        assert_eq!(batch, 10);
    }

    #[test]
    fn test_resolve_data_dir_default() {
        let dir = resolve_data_dir(Some(Path::new("/data/x")));
        assert_eq!(dir, PathBuf::from("/data/x"));
    }
}
