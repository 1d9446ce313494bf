use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chanport_core::{Migrator, ReconcileScanner};

use crate::commands;
use crate::ui;

pub async fn run(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
    yes: bool,
) -> Result<ExitCode> {
    let config = commands::load_config(config_path, data_dir)?;
    let migrator = Migrator::new(config);

    let pending = ReconcileScanner::new(migrator.store()).scan()?;
    if pending.is_empty() {
        ui::success("all downloaded channels have their attachments");
        return Ok(ExitCode::SUCCESS);
    }

    ui::header("Channels with missing attachments");
    for p in &pending {
        ui::info(&format!(
            "#{}: {} of its attachments missing ({} messages)",
            p.channel.name, p.pending_files, p.message_count
        ));
    }

    if !yes && !ui::confirm("Download the missing attachments now?", true)? {
        return Ok(ExitCode::from(2));
    }

    let summary = migrator.reconcile().await?;
    ui::success(&format!(
        "{} attachment(s) downloaded, {} channel(s) repaired",
        summary.files_downloaded, summary.channels_repaired
    ));
    if summary.channels_still_pending > 0 {
        ui::warning(&format!(
            "{} channel(s) still have missing attachments ({} download failures)",
            summary.channels_still_pending, summary.files_failed
        ));
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}
