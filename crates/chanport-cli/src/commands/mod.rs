use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chanport_core::{Config, Overrides, RunSummary};

use crate::listfile;
use crate::ui;

pub mod download;
pub mod info;
pub mod migrate;
pub mod reconcile;
pub mod status;
pub mod upload;

/// Merge `--channel` flags and a `--channels-file` into one selection.
/// `None` means every channel.
pub fn resolve_selection(
    channels: Vec<String>,
    file: Option<&Path>,
) -> Result<Option<Vec<String>>> {
    let mut names = channels;
    if let Some(path) = file {
        for name in listfile::parse_channel_list(path)? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(if names.is_empty() { None } else { Some(names) })
}

pub fn load_config(file: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Config> {
    let overrides = Overrides {
        data_dir,
        ..Default::default()
    };
    Config::load(file, &overrides)
}

/// Print the per-channel outcome of a run.
pub fn print_summary(summary: &RunSummary) {
    if !summary.succeeded.is_empty() {
        ui::success(&format!("{} channel(s) completed", summary.succeeded.len()));
    }
    for (name, reason) in &summary.failed {
        ui::error(&format!("#{name}: {reason}"));
    }
    for name in &summary.archive_restore_failures {
        ui::warning(&format!("#{name} was left unarchived; re-archive it manually"));
    }
    if summary.needs_reconciliation() {
        ui::warning(&format!(
            "{} channel(s) have attachments still pending; run `chanport reconcile`",
            summary.pending_reconciliation.len()
        ));
    }
}

/// Exit contract: 0 clean, 2 completed with channels failed or pending
/// reconciliation. Fatal configuration/authorization errors take the
/// error path in main and exit 1.
pub fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.has_failures() || summary.needs_reconciliation() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
