//! On-disk migration state.
//!
//! Everything the pipeline persists lives under one data directory:
//!
//! ```text
//! migration_data/
//!   workspace.json        source workspace identity
//!   channels.json         source channel listing
//!   users.json            source user roster
//!   users_dest.json       destination user roster
//!   messages/<name>_<id>.json   per-channel download checkpoint
//!   files/<name>_<id>/          downloaded attachments
//!   uploads/<name>_<id>.json    per-channel replay checkpoint
//! ```
//!
//! Every write goes through a temp-file-then-rename so that a crash
//! mid-write can never leave a torn checkpoint behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::MigrateError;
use crate::model::{Channel, ChannelDownloadState, Message, UploadState, UserRecord, WorkspaceInfo};

/// Which workspace a roster belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Dest,
}

/// File-backed store for all migration state.
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory layout if it does not exist yet.
    pub fn ensure_layout(&self) -> Result<(), MigrateError> {
        fs::create_dir_all(self.root.join("messages"))?;
        fs::create_dir_all(self.root.join("files"))?;
        fs::create_dir_all(self.root.join("uploads"))?;
        Ok(())
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), MigrateError> {
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, MigrateError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    // --- Workspace and rosters ---

    pub fn save_workspace(&self, info: &WorkspaceInfo) -> Result<(), MigrateError> {
        self.write_atomic(&self.root.join("workspace.json"), info)
    }

    pub fn load_workspace(&self) -> Result<Option<WorkspaceInfo>, MigrateError> {
        self.read_json(&self.root.join("workspace.json"))
    }

    pub fn save_channels(&self, channels: &[Channel]) -> Result<(), MigrateError> {
        self.write_atomic(&self.root.join("channels.json"), &channels)
    }

    pub fn load_channels(&self) -> Result<Vec<Channel>, MigrateError> {
        Ok(self.read_json(&self.root.join("channels.json"))?.unwrap_or_default())
    }

    fn users_path(&self, side: Side) -> PathBuf {
        match side {
            Side::Source => self.root.join("users.json"),
            Side::Dest => self.root.join("users_dest.json"),
        }
    }

    pub fn save_users(&self, side: Side, users: &[UserRecord]) -> Result<(), MigrateError> {
        self.write_atomic(&self.users_path(side), &users)
    }

    pub fn load_users(&self, side: Side) -> Result<Vec<UserRecord>, MigrateError> {
        Ok(self.read_json(&self.users_path(side))?.unwrap_or_default())
    }

    // --- Channel download checkpoints ---

    fn channel_state_path(&self, channel: &Channel) -> PathBuf {
        self.root
            .join("messages")
            .join(format!("{}_{}.json", safe_filename(&channel.name), channel.id))
    }

    /// Load the checkpoint for a channel, or a fresh empty one.
    pub fn load_channel_state(&self, channel: &Channel) -> Result<ChannelDownloadState, MigrateError> {
        Ok(self
            .read_json(&self.channel_state_path(channel))?
            .unwrap_or_else(|| ChannelDownloadState::empty(channel.clone())))
    }

    pub fn save_channel_state(&self, state: &ChannelDownloadState) -> Result<(), MigrateError> {
        self.write_atomic(&self.channel_state_path(&state.channel), state)
    }

    /// Merge a batch of fetched messages into the checkpoint and persist
    /// it. Messages already present (by timestamp) are skipped, so
    /// re-fetching an overlapping range is harmless. Returns the number of
    /// messages actually added.
    pub fn append_messages(
        &self,
        state: &mut ChannelDownloadState,
        fetched: Vec<Message>,
    ) -> Result<usize, MigrateError> {
        let before = state.messages.len();
        let mut seen: std::collections::HashSet<String> =
            state.messages.iter().map(|m| m.ts.clone()).collect();
        for msg in fetched {
            if seen.insert(msg.ts.clone()) {
                state.messages.push(msg);
            }
        }
        let added = state.messages.len() - before;
        if added > 0 {
            state
                .messages
                .sort_by(|a, b| a.ts_value().total_cmp(&b.ts_value()));
        }
        state.last_update = Some(chrono::Utc::now());
        self.save_channel_state(state)?;
        debug!(channel = %state.channel.name, added, total = state.messages.len(), "checkpoint saved");
        Ok(added)
    }

    pub fn mark_messages_downloaded(
        &self,
        state: &mut ChannelDownloadState,
    ) -> Result<(), MigrateError> {
        state.messages_downloaded = true;
        state.last_update = Some(chrono::Utc::now());
        self.save_channel_state(state)
    }

    /// Flip the file-completion flag. Refuses if any attachment still
    /// lacks a local path, since that flag is what the reconciliation
    /// scanner trusts.
    pub fn mark_files_downloaded(
        &self,
        state: &mut ChannelDownloadState,
    ) -> Result<(), MigrateError> {
        let pending = state.pending_attachments();
        if pending > 0 {
            return Err(MigrateError::DataInconsistency {
                channel: state.channel.name.clone(),
                detail: format!("{pending} attachments still pending download"),
            });
        }
        state.files_downloaded = true;
        state.last_update = Some(chrono::Utc::now());
        self.save_channel_state(state)
    }

    /// All persisted channel checkpoints, in name order.
    pub fn list_channel_states(&self) -> Result<Vec<ChannelDownloadState>, MigrateError> {
        let dir = self.root.join("messages");
        let mut states = Vec::new();
        if !dir.exists() {
            return Ok(states);
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(state) = self.read_json::<ChannelDownloadState>(&path)? {
                states.push(state);
            }
        }
        states.sort_by(|a, b| a.channel.name.cmp(&b.channel.name));
        Ok(states)
    }

    pub fn find_channel_state(
        &self,
        name: &str,
    ) -> Result<Option<ChannelDownloadState>, MigrateError> {
        Ok(self
            .list_channel_states()?
            .into_iter()
            .find(|s| s.channel.name == name))
    }

    // --- Attachments ---

    /// Directory that holds a channel's downloaded attachments.
    pub fn files_dir_for(&self, channel: &Channel) -> PathBuf {
        self.root
            .join("files")
            .join(format!("{}_{}", safe_filename(&channel.name), channel.id))
    }

    // --- Upload checkpoints ---

    fn upload_state_path(&self, channel: &Channel) -> PathBuf {
        self.root
            .join("uploads")
            .join(format!("{}_{}.json", safe_filename(&channel.name), channel.id))
    }

    pub fn load_upload_state(&self, channel: &Channel) -> Result<UploadState, MigrateError> {
        Ok(self
            .read_json(&self.upload_state_path(channel))?
            .unwrap_or_else(|| UploadState::new(channel)))
    }

    pub fn save_upload_state(
        &self,
        channel: &Channel,
        state: &UploadState,
    ) -> Result<(), MigrateError> {
        self.write_atomic(&self.upload_state_path(channel), state)
    }
}

/// Strip characters that are unsafe in filenames and cap the length so
/// long channel or attachment names cannot break the layout.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn channel(id: &str, name: &str) -> Channel {
        Channel {
            id: id.to_string(),
            name: name.to_string(),
            is_private: false,
            is_archived: false,
            is_member: true,
            created: None,
            topic: None,
            purpose: None,
        }
    }

    fn message(ts: &str, text: &str) -> Message {
        Message {
            ts: ts.to_string(),
            user: Some("U1".to_string()),
            text: text.to_string(),
            subtype: None,
            files: vec![],
        }
    }

    fn store() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_layout().unwrap();
        (dir, store)
    }

    #[test]
    fn test_channel_state_round_trip() {
        let (_dir, store) = store();
        let ch = channel("C1", "general");
        let mut state = store.load_channel_state(&ch).unwrap();
        assert!(state.messages.is_empty());

        store
            .append_messages(&mut state, vec![message("2.0", "b"), message("1.0", "a")])
            .unwrap();
        let loaded = store.load_channel_state(&ch).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].ts, "1.0");
        assert!(loaded.last_update.is_some());
    }

    #[test]
    fn test_append_deduplicates_by_timestamp() {
        let (_dir, store) = store();
        let ch = channel("C1", "general");
        let mut state = store.load_channel_state(&ch).unwrap();

        let added = store
            .append_messages(&mut state, vec![message("1.0", "a"), message("2.0", "b")])
            .unwrap();
        assert_eq!(added, 2);

        // Re-fetching an overlapping window must not duplicate anything.
        let added = store
            .append_messages(&mut state, vec![message("2.0", "b"), message("3.0", "c")])
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.newest_ts(), Some("3.0"));
    }

    #[test]
    fn test_mark_files_downloaded_refuses_pending() {
        let (_dir, store) = store();
        let ch = channel("C1", "general");
        let mut state = store.load_channel_state(&ch).unwrap();
        let mut msg = message("1.0", "see attached");
        msg.files.push(crate::model::FileAttachment {
            id: "F1".to_string(),
            name: Some("doc.pdf".to_string()),
            title: None,
            filetype: None,
            size: None,
            url_private_download: Some("https://files/F1".to_string()),
            url_private: None,
            permalink_public: None,
            local_path: None,
        });
        store.append_messages(&mut state, vec![msg]).unwrap();

        let err = store.mark_files_downloaded(&mut state).unwrap_err();
        assert!(matches!(err, MigrateError::DataInconsistency { .. }));
        assert!(!state.files_downloaded);

        state.messages[0].files[0].local_path = Some(PathBuf::from("/tmp/doc.pdf"));
        store.mark_files_downloaded(&mut state).unwrap();
        assert!(state.files_downloaded);
    }

    #[test]
    fn test_list_and_find_channel_states() {
        let (_dir, store) = store();
        for (id, name) in [("C1", "beta"), ("C2", "alpha")] {
            let ch = channel(id, name);
            let mut state = store.load_channel_state(&ch).unwrap();
            store.append_messages(&mut state, vec![message("1.0", "hi")]).unwrap();
        }
        let states = store.list_channel_states().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].channel.name, "alpha");

        assert!(store.find_channel_state("beta").unwrap().is_some());
        assert!(store.find_channel_state("missing").unwrap().is_none());
    }

    #[test]
    fn test_upload_state_round_trip() {
        let (_dir, store) = store();
        let ch = channel("C1", "general");
        let mut up = store.load_upload_state(&ch).unwrap();
        assert_eq!(up.messages_posted, 0);

        up.dest_channel_id = Some("D9".to_string());
        up.messages_posted = 42;
        store.save_upload_state(&ch, &up).unwrap();

        let loaded = store.load_upload_state(&ch).unwrap();
        assert_eq!(loaded.dest_channel_id.as_deref(), Some("D9"));
        assert_eq!(loaded.messages_posted, 42);
    }

    #[test]
    fn test_roster_round_trip() {
        let (_dir, store) = store();
        let users = vec![UserRecord {
            id: "U1".to_string(),
            name: Some("alice".to_string()),
            email: Some("alice@example.com".to_string()),
            display_name: None,
            real_name: None,
            image_url: None,
            deleted: false,
            is_bot: false,
        }];
        store.save_users(Side::Source, &users).unwrap();
        assert_eq!(store.load_users(Side::Source).unwrap().len(), 1);
        assert!(store.load_users(Side::Dest).unwrap().is_empty());
    }

    #[test]
    fn test_safe_filename_strips_separators() {
        assert_eq!(safe_filename("proj/2024:q1"), "proj_2024_q1");
        assert_eq!(safe_filename("normal-name_1"), "normal-name_1");
        let long = "x".repeat(400);
        assert_eq!(safe_filename(&long).len(), 200);
    }
}
