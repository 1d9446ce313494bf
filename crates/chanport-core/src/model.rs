//! Persisted data model.
//!
//! Channels, messages, attachments and user records are captured during
//! download and never mutated afterwards, with one exception: an
//! attachment's `local_path` transitions once from absent to present.
//! `ChannelDownloadState` and `UploadState` are the only mutable records,
//! each owned by its pipeline phase.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation container in either workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
    /// Archived flag as observed at fetch time, before any unlock cycle.
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// A single message within a channel. Timestamps are the wire-format
/// `"seconds.micros"` strings and are unique within a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

impl Message {
    /// Numeric timestamp for ordering. Malformed timestamps sort first.
    pub fn ts_value(&self) -> f64 {
        self.ts.parse().unwrap_or(0.0)
    }

    /// System messages (joins/leaves) are never replayed.
    pub fn is_system(&self) -> bool {
        matches!(
            self.subtype.as_deref(),
            Some("channel_join") | Some("channel_leave")
        )
    }
}

/// A file referenced by a message. `local_path` is set exactly once, when
/// the attachment has been fetched to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private_download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_private: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink_public: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl FileAttachment {
    /// Preferred download URL, in the order the API makes them usable.
    pub fn download_url(&self) -> Option<&str> {
        self.url_private_download
            .as_deref()
            .or(self.url_private.as_deref())
            .or(self.permalink_public.as_deref())
    }

    pub fn is_downloaded(&self) -> bool {
        self.local_path.is_some()
    }

    pub fn display_name(&self) -> &str {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Per-channel download checkpoint, persisted after every meaningful
/// state change. The two completion flags are independent: messages can
/// be complete while file downloads are still pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDownloadState {
    pub channel: Channel,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub messages_downloaded: bool,
    #[serde(default)]
    pub files_downloaded: bool,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl ChannelDownloadState {
    pub fn empty(channel: Channel) -> Self {
        Self {
            channel,
            messages: Vec::new(),
            messages_downloaded: false,
            files_downloaded: false,
            last_update: None,
        }
    }

    /// Timestamp of the newest persisted message, used as the resume
    /// point for an interrupted download.
    pub fn newest_ts(&self) -> Option<&str> {
        self.messages.last().map(|m| m.ts.as_str())
    }

    pub fn attachment_count(&self) -> usize {
        self.messages.iter().map(|m| m.files.len()).sum()
    }

    /// Attachments that still lack a local path.
    pub fn pending_attachments(&self) -> usize {
        self.messages
            .iter()
            .flat_map(|m| m.files.iter())
            .filter(|f| !f.is_downloaded())
            .count()
    }
}

/// A user in either workspace. Captured once per side, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
}

impl UserRecord {
    /// Best available human-readable name.
    pub fn best_name(&self) -> String {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.real_name.as_deref().filter(|s| !s.is_empty()))
            .or(self.name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("user_{}", self.id))
    }
}

/// Per-channel replay checkpoint for the upload phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadState {
    pub channel_id: String,
    pub channel_name: String,
    /// Destination channel, once created or found by name.
    #[serde(default)]
    pub dest_channel_id: Option<String>,
    /// Count of messages confirmed posted; replay resumes after this
    /// prefix of the ordered postable sequence.
    #[serde(default)]
    pub messages_posted: usize,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl UploadState {
    pub fn new(channel: &Channel) -> Self {
        Self {
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            dest_channel_id: None,
            messages_posted: 0,
            last_update: None,
        }
    }
}

/// Workspace identity snapshot, captured once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(id: &str, local: Option<&str>) -> FileAttachment {
        FileAttachment {
            id: id.to_string(),
            name: Some(format!("{id}.png")),
            title: None,
            filetype: Some("png".to_string()),
            size: Some(1024),
            url_private_download: Some(format!("https://files.example.com/{id}")),
            url_private: None,
            permalink_public: None,
            local_path: local.map(PathBuf::from),
        }
    }

    #[test]
    fn test_download_url_fallback_order() {
        let mut f = attachment("F1", None);
        assert_eq!(f.download_url(), Some("https://files.example.com/F1"));
        f.url_private_download = None;
        f.url_private = Some("https://private".to_string());
        f.permalink_public = Some("https://public".to_string());
        assert_eq!(f.download_url(), Some("https://private"));
        f.url_private = None;
        assert_eq!(f.download_url(), Some("https://public"));
    }

    #[test]
    fn test_pending_attachments() {
        let channel = Channel {
            id: "C1".to_string(),
            name: "general".to_string(),
            is_private: false,
            is_archived: false,
            is_member: true,
            created: None,
            topic: None,
            purpose: None,
        };
        let mut state = ChannelDownloadState::empty(channel);
        state.messages.push(Message {
            ts: "1700000000.000100".to_string(),
            user: Some("U1".to_string()),
            text: "see attached".to_string(),
            subtype: None,
            files: vec![attachment("F1", None), attachment("F2", Some("/tmp/f2.png"))],
        });
        assert_eq!(state.attachment_count(), 2);
        assert_eq!(state.pending_attachments(), 1);
        assert_eq!(state.newest_ts(), Some("1700000000.000100"));
    }

    #[test]
    fn test_system_messages_detected() {
        let msg = Message {
            ts: "1.0".to_string(),
            user: None,
            text: "joined".to_string(),
            subtype: Some("channel_join".to_string()),
            files: vec![],
        };
        assert!(msg.is_system());
    }
}
