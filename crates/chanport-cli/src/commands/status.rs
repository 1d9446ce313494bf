use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use chanport_core::{postable_messages, resolve_data_dir, StateStore};
use serde::Serialize;

use crate::ui;

#[derive(Serialize)]
struct Status {
    data_dir: String,
    workspace: Option<WorkspaceStatus>,
    channels: Vec<ChannelStatus>,
}

#[derive(Serialize)]
struct WorkspaceStatus {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct ChannelStatus {
    name: String,
    messages: usize,
    attachments: usize,
    pending_attachments: usize,
    messages_downloaded: bool,
    files_downloaded: bool,
    messages_posted: usize,
    postable: usize,
    last_update: Option<String>,
}

/// Read-only view of persisted progress. Works without credentials.
pub fn run(data_dir: Option<&Path>, json: bool) -> Result<ExitCode> {
    let root = resolve_data_dir(data_dir);
    let store = StateStore::new(&root);

    let mut channels = Vec::new();
    for state in store.list_channel_states()? {
        let posted = store.load_upload_state(&state.channel)?.messages_posted;
        channels.push(ChannelStatus {
            name: state.channel.name.clone(),
            messages: state.messages.len(),
            attachments: state.attachment_count(),
            pending_attachments: state.pending_attachments(),
            messages_downloaded: state.messages_downloaded,
            files_downloaded: state.files_downloaded,
            messages_posted: posted,
            postable: postable_messages(&state.messages).len(),
            last_update: state.last_update.map(|t| t.to_rfc3339()),
        });
    }

    let status = Status {
        data_dir: root.display().to_string(),
        workspace: store.load_workspace()?.map(|w| WorkspaceStatus {
            id: w.id,
            name: w.name,
        }),
        channels,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    ui::header("Migration status");
    match &status.workspace {
        Some(w) => ui::info(&format!("source workspace: {} ({})", w.name, w.id)),
        None => ui::info("no download has run yet"),
    }
    ui::info(&format!("state directory: {}", status.data_dir));
    println!();

    if status.channels.is_empty() {
        ui::info("no channels downloaded");
        return Ok(ExitCode::SUCCESS);
    }

    for ch in &status.channels {
        let download = match (ch.messages_downloaded, ch.files_downloaded) {
            (true, true) => "downloaded".to_string(),
            (true, false) => format!("{} attachment(s) pending", ch.pending_attachments),
            _ => "downloading".to_string(),
        };
        ui::info(&format!(
            "#{}: {} messages ({download}), {}/{} posted",
            ch.name, ch.messages, ch.messages_posted, ch.postable
        ));
    }
    Ok(ExitCode::SUCCESS)
}
