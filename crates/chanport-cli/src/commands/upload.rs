use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use chanport_core::{postable_messages, resolve_data_dir, Migrator, StateStore, UploadOptions};

use crate::commands;
use crate::ui;

pub async fn run(
    config_path: Option<&Path>,
    data_dir: Option<PathBuf>,
    selection: Option<Vec<String>>,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<ExitCode> {
    if dry_run {
        return plan(data_dir.as_deref(), selection.as_deref(), limit);
    }

    let config = commands::load_config(config_path, data_dir)?;
    let migrator = Migrator::new(config);

    ui::header("Replaying into destination workspace");
    let pb = ui::spinner("posting messages");
    let summary = migrator
        .upload(&UploadOptions {
            channels: selection,
            limit,
        })
        .await;
    pb.finish_and_clear();
    let summary = summary?;

    commands::print_summary(&summary);
    Ok(commands::exit_code(&summary))
}

/// Dry run: show what a real upload would post, from local state only.
/// Needs no credentials.
fn plan(
    data_dir: Option<&Path>,
    selection: Option<&[String]>,
    limit: Option<usize>,
) -> Result<ExitCode> {
    let store = StateStore::new(resolve_data_dir(data_dir));
    ui::header("Upload plan (dry run)");

    let mut total = 0usize;
    for state in store.list_channel_states()? {
        if !state.messages_downloaded {
            continue;
        }
        if let Some(names) = selection {
            if !names.iter().any(|n| n == &state.channel.name) {
                continue;
            }
        }
        let mut postable = postable_messages(&state.messages).len();
        if let Some(limit) = limit {
            postable = postable.min(limit);
        }
        let posted = store.load_upload_state(&state.channel)?.messages_posted;
        let remaining = postable.saturating_sub(posted);
        total += remaining;
        ui::info(&format!(
            "#{}: {} message(s) to post ({} already posted)",
            state.channel.name, remaining, posted
        ));
    }
    ui::success(&format!("{total} message(s) would be posted"));
    Ok(ExitCode::SUCCESS)
}
