use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chanport_core::{DownloadOptions, Migrator};

use crate::commands;
use crate::ui;

pub async fn run(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
    selection: Option<Vec<String>>,
    force: bool,
    unlock_archived: bool,
) -> Result<ExitCode> {
    let config = commands::load_config(config_path, data_dir)?;
    let migrator = Migrator::new(config);

    ui::header("Downloading from source workspace");
    let pb = ui::spinner("fetching channels");
    let summary = migrator
        .download(&DownloadOptions {
            channels: selection,
            force,
            unlock_archived,
        })
        .await;
    pb.finish_and_clear();
    let summary = summary?;

    commands::print_summary(&summary);
    Ok(commands::exit_code(&summary))
}
