use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chanport_core::{DownloadOptions, Migrator, UploadOptions};

use crate::commands;
use crate::ui;

pub async fn run(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
    selection: Option<Vec<String>>,
    unlock_archived: bool,
    limit: Option<usize>,
) -> Result<ExitCode> {
    let config = commands::load_config(config_path, data_dir)?;
    let migrator = Migrator::new(config);

    ui::header("Migrating channels");
    let summary = migrator
        .migrate(
            &DownloadOptions {
                channels: selection.clone(),
                force: false,
                unlock_archived,
            },
            &UploadOptions {
                channels: selection,
                limit,
            },
        )
        .await?;

    commands::print_summary(&summary);
    Ok(commands::exit_code(&summary))
}
