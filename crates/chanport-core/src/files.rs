//! Attachment download phase.
//!
//! Runs after a channel's messages are persisted. Each attachment is
//! fetched to `files/<channel>/<file_id>_<name>` and its `local_path`
//! is recorded in the checkpoint immediately, so an interruption loses
//! at most the file currently in flight. Individual failures, access
//! restricted files included, are counted and reported; they never
//! abort the channel. The channel's
//! file-completion flag is only set once every attachment has a local
//! path.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::MigrateError;
use crate::model::ChannelDownloadState;
use crate::store::{safe_filename, StateStore};

/// Fetching seam, so the phase logic is testable without a network.
#[async_trait]
pub trait AttachmentFetch {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MigrateError>;
}

#[async_trait]
impl AttachmentFetch for ApiClient {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MigrateError> {
        self.download_to(url, dest).await
    }
}

/// Outcome of one channel's file phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileDownloadReport {
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl FileDownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

pub struct FileDownloader<'a, F: AttachmentFetch> {
    fetch: &'a F,
    store: &'a StateStore,
}

impl<'a, F: AttachmentFetch> FileDownloader<'a, F> {
    pub fn new(fetch: &'a F, store: &'a StateStore) -> Self {
        Self { fetch, store }
    }

    /// Download every pending attachment in the channel. Already
    /// downloaded attachments are skipped, so calling this again after an
    /// interruption or partial failure only fetches what is missing.
    pub async fn sync_channel(
        &self,
        state: &mut ChannelDownloadState,
    ) -> Result<FileDownloadReport, MigrateError> {
        let dir = self.store.files_dir_for(&state.channel);
        fs::create_dir_all(&dir)?;

        // Index pass first; the download loop below mutates `state` and
        // persists it after each file.
        let mut pending: Vec<(usize, usize)> = Vec::new();
        let mut report = FileDownloadReport::default();
        for (mi, msg) in state.messages.iter().enumerate() {
            for (fi, file) in msg.files.iter().enumerate() {
                if file.is_downloaded() {
                    report.skipped += 1;
                } else {
                    pending.push((mi, fi));
                }
            }
        }

        for (mi, fi) in pending {
            let file = &state.messages[mi].files[fi];
            let Some(url) = file.download_url() else {
                warn!(channel = %state.channel.name, file = %file.display_name(), "attachment has no downloadable URL");
                report.failed += 1;
                continue;
            };
            let target = attachment_path(&dir, &file.id, file.name.as_deref());
            match self.fetch.fetch(&url.to_string(), &target).await {
                Ok(bytes) => {
                    info!(channel = %state.channel.name, file = %file.display_name(), bytes, "attachment downloaded");
                    state.messages[mi].files[fi].local_path = Some(target);
                    self.store.save_channel_state(state)?;
                    report.downloaded += 1;
                }
                Err(e) => {
                    warn!(channel = %state.channel.name, file = %state.messages[mi].files[fi].display_name(), error = %e, "attachment download failed");
                    report.failed += 1;
                }
            }
        }

        if state.pending_attachments() == 0 && !state.files_downloaded {
            self.store.mark_files_downloaded(state)?;
        }
        Ok(report)
    }
}

/// Deterministic on-disk path for an attachment. The file id prefix keeps
/// same-named attachments apart and makes a re-download after a crash
/// land on the same path.
fn attachment_path(dir: &Path, file_id: &str, name: Option<&str>) -> PathBuf {
    let name = safe_filename(name.unwrap_or("file"));
    dir.join(format!("{file_id}_{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, FileAttachment, Message};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes a stub file for every URL except those listed as failing.
    #[derive(Default)]
    struct MockFetch {
        calls: AtomicUsize,
        failing: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AttachmentFetch for MockFetch {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MigrateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().iter().any(|f| f == url) {
                return Err(MigrateError::TransientFetch {
                    attempts: 3,
                    last: "HTTP 500".to_string(),
                });
            }
            fs::write(dest, b"data")?;
            Ok(4)
        }
    }

    fn attachment(id: &str) -> FileAttachment {
        FileAttachment {
            id: id.to_string(),
            name: Some(format!("{id}.png")),
            title: None,
            filetype: Some("png".to_string()),
            size: None,
            url_private_download: Some(format!("https://files/{id}")),
            url_private: None,
            permalink_public: None,
            local_path: None,
        }
    }

    fn state_with_files(files: Vec<FileAttachment>) -> ChannelDownloadState {
        let channel = Channel {
            id: "C1".to_string(),
            name: "design".to_string(),
            is_private: false,
            is_archived: false,
            is_member: true,
            created: None,
            topic: None,
            purpose: None,
        };
        let mut state = ChannelDownloadState::empty(channel);
        state.messages.push(Message {
            ts: "1.0".to_string(),
            user: Some("U1".to_string()),
            text: "mockups".to_string(),
            subtype: None,
            files,
        });
        state.messages_downloaded = true;
        state
    }

    #[tokio::test]
    async fn test_downloads_pending_and_marks_complete() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_layout().unwrap();
        let fetch = MockFetch::default();
        let mut state = state_with_files(vec![attachment("F1"), attachment("F2")]);

        let report = FileDownloader::new(&fetch, &store)
            .sync_channel(&mut state)
            .await
            .unwrap();

        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed, 0);
        assert!(state.files_downloaded);
        assert!(state.messages[0].files[0].local_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn test_partial_failure_leaves_channel_pending() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_layout().unwrap();
        let fetch = MockFetch::default();
        fetch
            .failing
            .lock()
            .unwrap()
            .push("https://files/F2".to_string());
        let mut state = state_with_files(vec![attachment("F1"), attachment("F2")]);

        let downloader = FileDownloader::new(&fetch, &store);
        let report = downloader.sync_channel(&mut state).await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.failed, 1);
        assert!(!state.files_downloaded);
        assert_eq!(state.pending_attachments(), 1);

        // A later pass retries only the missing attachment.
        fetch.failing.lock().unwrap().clear();
        fetch.calls.store(0, Ordering::SeqCst);
        let report = downloader.sync_channel(&mut state).await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
        assert!(state.files_downloaded);
    }

    #[tokio::test]
    async fn test_restricted_file_counts_as_failure_without_aborting() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_layout().unwrap();

        // One file denied with an authorization error, one fetchable.
        struct DenyFirst;
        #[async_trait]
        impl AttachmentFetch for DenyFirst {
            async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MigrateError> {
                if url.ends_with("F1") {
                    return Err(MigrateError::Authorization {
                        scope: "files:read".to_string(),
                        detail: "HTTP 403 fetching attachment".to_string(),
                    });
                }
                fs::write(dest, b"data")?;
                Ok(4)
            }
        }

        let mut state = state_with_files(vec![attachment("F1"), attachment("F2")]);
        let report = FileDownloader::new(&DenyFirst, &store)
            .sync_channel(&mut state)
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded, 1);
        assert!(!state.files_downloaded);
    }

    #[tokio::test]
    async fn test_missing_url_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        store.ensure_layout().unwrap();
        let fetch = MockFetch::default();
        let mut file = attachment("F1");
        file.url_private_download = None;
        let mut state = state_with_files(vec![file]);

        let report = FileDownloader::new(&fetch, &store)
            .sync_channel(&mut state)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 0);
        assert!(!state.files_downloaded);
    }

    #[test]
    fn test_attachment_path_is_deterministic() {
        let dir = PathBuf::from("/data/files/design_C1");
        let a = attachment_path(&dir, "F1", Some("mock.png"));
        let b = attachment_path(&dir, "F1", Some("mock.png"));
        assert_eq!(a, b);
        let other = attachment_path(&dir, "F2", Some("mock.png"));
        assert_ne!(a, other);
    }
}
