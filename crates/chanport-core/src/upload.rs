//! Replay of downloaded history into the destination workspace.
//!
//! Messages are posted oldest first, attributed via a per-message
//! username of the form `name [2024/03/01 09:15:00 UTC]`, with user
//! mentions rewritten against the identity map and downloaded
//! attachments re-uploaded and linked from the message body. Progress is a count of
//! confirmed posts persisted after every message, so an interrupted
//! replay resumes exactly after the last confirmed one and never
//! duplicates.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::MigrateError;
use crate::identity::IdentityMap;
use crate::model::{Channel, ChannelDownloadState, Message, UploadState};
use crate::store::StateStore;

const MIGRATION_NOTE: &str = "Migrated from another workspace.";

/// Destination-side operations, behind a trait for testing.
#[async_trait]
pub trait ReplayTarget {
    async fn find_channel(&self, name: &str) -> Result<Option<Channel>, MigrateError>;
    async fn create_channel(&self, name: &str, is_private: bool) -> Result<Channel, MigrateError>;
    async fn join_channel(&self, channel_id: &str) -> Result<(), MigrateError>;
    async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<(), MigrateError>;
    async fn set_purpose(&self, channel_id: &str, purpose: &str) -> Result<(), MigrateError>;
    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        username: Option<&str>,
        icon_url: Option<&str>,
    ) -> Result<String, MigrateError>;
    async fn upload_file(
        &self,
        path: &Path,
        filename: &str,
        title: &str,
    ) -> Result<Option<String>, MigrateError>;
}

#[async_trait]
impl ReplayTarget for ApiClient {
    async fn find_channel(&self, name: &str) -> Result<Option<Channel>, MigrateError> {
        Ok(self
            .list_channels(false)
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }

    async fn create_channel(&self, name: &str, is_private: bool) -> Result<Channel, MigrateError> {
        ApiClient::create_channel(self, name, is_private).await
    }

    async fn join_channel(&self, channel_id: &str) -> Result<(), MigrateError> {
        ApiClient::join_channel(self, channel_id).await
    }

    async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<(), MigrateError> {
        ApiClient::set_topic(self, channel_id, topic).await
    }

    async fn set_purpose(&self, channel_id: &str, purpose: &str) -> Result<(), MigrateError> {
        ApiClient::set_purpose(self, channel_id, purpose).await
    }

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        username: Option<&str>,
        icon_url: Option<&str>,
    ) -> Result<String, MigrateError> {
        ApiClient::post_message(self, channel_id, text, username, icon_url).await
    }

    async fn upload_file(
        &self,
        path: &Path,
        filename: &str,
        title: &str,
    ) -> Result<Option<String>, MigrateError> {
        ApiClient::upload_file(self, path, filename, title).await
    }
}

/// Outcome of one channel's replay.
#[derive(Debug, Default, Clone)]
pub struct ReplayReport {
    pub posted: usize,
    pub resumed_after: usize,
    pub total_postable: usize,
    pub dest_channel_id: Option<String>,
}

/// Messages worth replaying: everything except system messages and
/// messages with neither text nor attachments.
pub fn postable_messages(messages: &[Message]) -> Vec<&Message> {
    messages
        .iter()
        .filter(|m| !m.is_system() && (!m.text.trim().is_empty() || !m.files.is_empty()))
        .collect()
}

pub struct UploadReplayer<'a, T: ReplayTarget> {
    target: &'a T,
    store: &'a StateStore,
    identity: &'a IdentityMap,
    batch_size: usize,
    batch_delay: Duration,
    mention_re: Regex,
}

impl<'a, T: ReplayTarget> UploadReplayer<'a, T> {
    pub fn new(
        target: &'a T,
        store: &'a StateStore,
        identity: &'a IdentityMap,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            target,
            store,
            identity,
            batch_size: batch_size.max(1),
            batch_delay,
            mention_re: Regex::new(r"<@([A-Z0-9]+)>").unwrap(),
        }
    }

    /// Find or create the destination channel and remember its id in the
    /// replay checkpoint. Safe to call repeatedly.
    async fn ensure_channel(
        &self,
        source: &Channel,
        up: &mut UploadState,
    ) -> Result<String, MigrateError> {
        if let Some(id) = &up.dest_channel_id {
            return Ok(id.clone());
        }

        let dest = match self.target.find_channel(&source.name).await? {
            Some(existing) => {
                if !existing.is_private && !existing.is_member {
                    self.target.join_channel(&existing.id).await?;
                }
                existing
            }
            None => {
                info!(channel = %source.name, private = source.is_private, "creating destination channel");
                let created = self
                    .target
                    .create_channel(&source.name, source.is_private)
                    .await?;
                if let Some(topic) = &source.topic {
                    self.target.set_topic(&created.id, topic).await?;
                }
                let purpose = match &source.purpose {
                    Some(p) => format!("{p} ({MIGRATION_NOTE})"),
                    None => MIGRATION_NOTE.to_string(),
                };
                self.target.set_purpose(&created.id, &purpose).await?;
                created
            }
        };

        up.dest_channel_id = Some(dest.id.clone());
        up.last_update = Some(Utc::now());
        self.store.save_upload_state(source, up)?;
        Ok(dest.id)
    }

    /// Replay one channel. Resumes after the confirmed-posted prefix and
    /// persists progress after every message. On a post failure the
    /// channel stops with its checkpoint intact; the error is returned
    /// for the caller to record.
    pub async fn replay_channel(
        &self,
        state: &ChannelDownloadState,
        limit: Option<usize>,
    ) -> Result<ReplayReport, MigrateError> {
        let mut up = self.store.load_upload_state(&state.channel)?;
        let dest_id = self.ensure_channel(&state.channel, &mut up).await?;

        let mut postable = postable_messages(&state.messages);
        if let Some(limit) = limit {
            postable.truncate(limit);
        }

        let mut report = ReplayReport {
            total_postable: postable.len(),
            resumed_after: up.messages_posted,
            dest_channel_id: Some(dest_id.clone()),
            ..Default::default()
        };
        if up.messages_posted >= postable.len() {
            info!(channel = %state.channel.name, "nothing left to replay");
            return Ok(report);
        }

        let remaining: Vec<&Message> = postable.split_off(up.messages_posted);
        info!(
            channel = %state.channel.name,
            remaining = remaining.len(),
            resumed_after = up.messages_posted,
            "replaying messages"
        );

        for (i, batch) in remaining.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                sleep(self.batch_delay).await;
            }
            for msg in batch {
                let text = self.render_message(msg).await?;
                let (username, icon) = self.attribution(msg);
                match self
                    .target
                    .post_message(&dest_id, &text, Some(&username), icon.as_deref())
                    .await
                {
                    Ok(_ts) => {
                        up.messages_posted += 1;
                        up.last_update = Some(Utc::now());
                        self.store.save_upload_state(&state.channel, &up)?;
                        report.posted += 1;
                    }
                    Err(e) => {
                        warn!(channel = %state.channel.name, error = %e, "stopping channel replay");
                        return Err(e);
                    }
                }
            }
        }
        Ok(report)
    }

    /// Message body as posted: mentions rewritten, attachment links
    /// appended for every re-uploaded file.
    async fn render_message(&self, msg: &Message) -> Result<String, MigrateError> {
        let mut text = self.rewrite_mentions(&msg.text);
        for file in &msg.files {
            let Some(local) = &file.local_path else {
                continue;
            };
            let filename = local
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file");
            match self
                .target
                .upload_file(local, filename, file.display_name())
                .await?
            {
                Some(permalink) => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&format!("<{permalink}|{}>", file.display_name()));
                }
                None => {
                    warn!(file = %file.display_name(), "re-upload returned no permalink");
                }
            }
        }
        Ok(text)
    }

    /// Rewrite source-side user mentions. Mapped users become real
    /// mentions of their destination identity; unmapped ones degrade to
    /// plain `@name` text.
    fn rewrite_mentions(&self, text: &str) -> String {
        self.mention_re
            .replace_all(text, |caps: &regex::Captures| {
                let source_id = &caps[1];
                match self.identity.dest_id(source_id) {
                    Some(dest) => format!("<@{dest}>"),
                    None => format!("@{}", self.identity.display_name_for(source_id)),
                }
            })
            .into_owned()
    }

    fn attribution(&self, msg: &Message) -> (String, Option<String>) {
        match msg.user.as_deref() {
            Some(uid) => {
                let name = self.identity.display_name_for(uid);
                let icon = self.identity.image_url_for(uid).map(str::to_string);
                (format!("{name} [{}]", format_ts(msg.ts_value())), icon)
            }
            None => (format!("unknown [{}]", format_ts(msg.ts_value())), None),
        }
    }
}

fn format_ts(ts: f64) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%Y/%m/%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}
