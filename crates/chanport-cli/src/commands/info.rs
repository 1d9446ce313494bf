use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chanport_core::{ApiClient, Migrator};

use crate::commands;
use crate::ui;

/// Verify both tokens by asking each workspace who it is.
pub async fn run(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<ExitCode> {
    let config = commands::load_config(config_path, data_dir)?;
    let dest = ApiClient::new(&config.dest_token, &config);
    let migrator = Migrator::new(config);

    let source_info = migrator.source().workspace_info().await?;
    ui::success(&format!(
        "source: {} ({}){}",
        source_info.name,
        source_info.id,
        source_info
            .domain
            .map(|d| format!(", {d}.slack.com"))
            .unwrap_or_default()
    ));

    let dest_info = dest.workspace_info().await?;
    ui::success(&format!(
        "destination: {} ({}){}",
        dest_info.name,
        dest_info.id,
        dest_info
            .domain
            .map(|d| format!(", {d}.slack.com"))
            .unwrap_or_default()
    ));

    let states = migrator.store().list_channel_states()?;
    ui::info(&format!("{} channel(s) in local state", states.len()));
    Ok(ExitCode::SUCCESS)
}
