//! Rate-limited API client.
//!
//! Wraps reqwest with the retry policy every fetch and post in the
//! pipeline shares: a per-method pacing delay before each request,
//! rate-limit waits that honor `Retry-After` without consuming the retry
//! budget, exponential backoff for transient failures up to the
//! configured budget, and immediate non-retryable failure on
//! authorization errors.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ApiFailure, MigrateError};
use crate::model::{Channel, Message, UserRecord, WorkspaceInfo};
use crate::pager::{Page, Pager};

const API_BASE_URL: &str = "https://slack.com/api";
const PAGE_LIMIT: u32 = 200;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Wait applied to a rate-limit response that carries no Retry-After.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Client bound to one workspace token.
pub struct ApiClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
    default_delay: Duration,
    max_retries: u32,
}

impl ApiClient {
    pub fn new(token: &str, config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            base_url: API_BASE_URL.to_string(),
            default_delay: config.rate_limit_delay,
            max_retries: config.max_retries,
        }
    }

    /// Pacing delay applied before each request, from the documented
    /// per-method rate tiers. Unknown methods use the configured default.
    fn method_delay(&self, method: &str) -> Duration {
        match method {
            // Tier 1 for non-Marketplace apps.
            "conversations.history" | "conversations.replies" => Duration::from_secs_f64(1.2),
            // Tier 2.
            "conversations.list"
            | "conversations.info"
            | "conversations.create"
            | "conversations.join"
            | "users.list" => Duration::from_secs(3),
            // Tier 1.
            "team.info" => Duration::from_secs(60),
            // 1/sec per channel.
            "chat.postMessage" => Duration::from_secs(1),
            _ => self.default_delay,
        }
    }

    /// One API call with the shared retry policy. Returns the decoded
    /// envelope on `ok: true`.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, MigrateError> {
        let url = format!("{}/{}", self.base_url, method);
        retry_with_backoff(self.max_retries, RetryClass::Fetch, || {
            let url = url.clone();
            async move {
                sleep(self.method_delay(method)).await;
                let sent = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.token)
                    .form(params)
                    .send()
                    .await;
                decode_envelope(sent).await
            }
        })
        .await
    }

    pub async fn workspace_info(&self) -> Result<WorkspaceInfo, MigrateError> {
        let body = self.call("team.info", &[]).await?;
        let team: TeamPayload = extract(&body, "team")?;
        Ok(WorkspaceInfo {
            id: team.id,
            name: team.name,
            domain: team.domain,
        })
    }

    /// One page of the channel listing.
    pub async fn channels_page(
        &self,
        cursor: Option<String>,
        exclude_archived: bool,
    ) -> Result<Page<Channel>, MigrateError> {
        let mut params = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("types", "public_channel,private_channel".to_string()),
            ("exclude_archived", exclude_archived.to_string()),
        ];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        let body = self.call("conversations.list", &params).await?;
        let payloads: Vec<ChannelPayload> = extract(&body, "channels")?;
        Ok(Page {
            items: payloads.into_iter().map(ChannelPayload::into_channel).collect(),
            next_cursor: next_cursor(&body),
        })
    }

    /// Every channel in the workspace, archived ones included when
    /// `exclude_archived` is false.
    pub async fn list_channels(&self, exclude_archived: bool) -> Result<Vec<Channel>, MigrateError> {
        Pager::new(move |cursor| self.channels_page(cursor, exclude_archived))
            .collect_all()
            .await
    }

    pub async fn users_page(&self, cursor: Option<String>) -> Result<Page<UserRecord>, MigrateError> {
        let mut params = vec![("limit", PAGE_LIMIT.to_string())];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        let body = self.call("users.list", &params).await?;
        let payloads: Vec<UserPayload> = extract(&body, "members")?;
        Ok(Page {
            items: payloads.into_iter().map(UserPayload::into_record).collect(),
            next_cursor: next_cursor(&body),
        })
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, MigrateError> {
        Pager::new(move |cursor| self.users_page(cursor)).collect_all().await
    }

    /// One page of channel history. `oldest` bounds the fetch to messages
    /// strictly newer than the given timestamp, which is how interrupted
    /// downloads resume without re-fetching what is already persisted.
    pub async fn history_page(
        &self,
        channel_id: &str,
        oldest: Option<&str>,
        cursor: Option<String>,
    ) -> Result<Page<Message>, MigrateError> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(ts) = oldest {
            params.push(("oldest", ts.to_string()));
        }
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        let body = self.call("conversations.history", &params).await?;
        let messages: Vec<Message> = extract(&body, "messages")?;
        Ok(Page {
            items: messages,
            next_cursor: next_cursor(&body),
        })
    }

    pub async fn join_channel(&self, channel_id: &str) -> Result<(), MigrateError> {
        self.call("conversations.join", &[("channel", channel_id.to_string())])
            .await?;
        Ok(())
    }

    pub async fn create_channel(&self, name: &str, is_private: bool) -> Result<Channel, MigrateError> {
        let body = self
            .call(
                "conversations.create",
                &[
                    ("name", name.to_string()),
                    ("is_private", is_private.to_string()),
                ],
            )
            .await?;
        let payload: ChannelPayload = extract(&body, "channel")?;
        Ok(payload.into_channel())
    }

    pub async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<(), MigrateError> {
        self.call(
            "conversations.setTopic",
            &[
                ("channel", channel_id.to_string()),
                ("topic", topic.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn set_purpose(&self, channel_id: &str, purpose: &str) -> Result<(), MigrateError> {
        self.call(
            "conversations.setPurpose",
            &[
                ("channel", channel_id.to_string()),
                ("purpose", purpose.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn archive_channel(&self, channel_id: &str) -> Result<(), MigrateError> {
        self.call("conversations.archive", &[("channel", channel_id.to_string())])
            .await?;
        Ok(())
    }

    pub async fn unarchive_channel(&self, channel_id: &str) -> Result<(), MigrateError> {
        self.call("conversations.unarchive", &[("channel", channel_id.to_string())])
            .await?;
        Ok(())
    }

    /// Post a message, returning the timestamp assigned by the
    /// destination. The caller treats a returned `Ok` as confirmation.
    pub async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        username: Option<&str>,
        icon_url: Option<&str>,
    ) -> Result<String, MigrateError> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("text", text.to_string()),
        ];
        if let Some(u) = username {
            params.push(("username", u.to_string()));
        }
        if let Some(i) = icon_url {
            params.push(("icon_url", i.to_string()));
        }
        let body = self
            .call("chat.postMessage", &params)
            .await
            .map_err(as_upload_error)?;
        Ok(body
            .get("ts")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Upload a local file without attaching it to a channel, returning
    /// its permalink so the replayer can link it from message text.
    pub async fn upload_file(
        &self,
        path: &Path,
        filename: &str,
        title: &str,
    ) -> Result<Option<String>, MigrateError> {
        let bytes = std::fs::read(path)?;
        let url = format!("{}/files.upload", self.base_url);
        // File uploads can be slow; pace them at least a second apart.
        let pace = std::cmp::max(self.default_delay, Duration::from_secs(1));

        let body = retry_with_backoff(self.max_retries, RetryClass::Upload, || {
            let url = url.clone();
            let bytes = bytes.clone();
            async move {
                sleep(pace).await;
                let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
                let form = reqwest::multipart::Form::new()
                    .text("filename", filename.to_string())
                    .text("title", title.to_string())
                    .part("file", part);
                let sent = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.token)
                    .multipart(form)
                    .send()
                    .await;
                decode_envelope(sent).await
            }
        })
        .await?;

        Ok(body
            .get("file")
            .and_then(|f| f.get("permalink").or_else(|| f.get("url_private")))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Fetch a file attachment to `dest`. The body is buffered before the
    /// first byte is written, so no partial file can survive a failure.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, MigrateError> {
        retry_with_backoff(self.max_retries, RetryClass::Fetch, || async move {
            sleep(Duration::from_secs(1)).await;
            let resp = self
                .http
                .get(url)
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(|e| ApiFailure::Transient(e.to_string()))?;

            let status = resp.status();
            if status.as_u16() == 429 {
                return Err(ApiFailure::RateLimited {
                    retry_after: retry_after_header(&resp),
                });
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ApiFailure::Auth {
                    scope: "files:read".to_string(),
                    detail: format!("HTTP {status} fetching attachment"),
                });
            }
            if !status.is_success() {
                return Err(ApiFailure::Transient(format!("HTTP {status}")));
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| ApiFailure::Transient(e.to_string()))?;
            std::fs::write(dest, &bytes).map_err(|e| ApiFailure::Transient(e.to_string()))?;
            debug!(url, bytes = bytes.len(), "downloaded attachment");
            Ok(bytes.len() as u64)
        })
        .await
    }
}

/// Which error a spent retry budget surfaces as.
#[derive(Debug, Clone, Copy)]
enum RetryClass {
    Fetch,
    Upload,
}

/// Drive one operation through the shared retry policy. Rate-limit
/// responses wait out the server-directed delay (or the default) and
/// never consume the retry budget; transient failures back off
/// exponentially up to `max_retries`; authorization failures end the
/// call immediately.
async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    class: RetryClass,
    mut op: F,
) -> Result<T, MigrateError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiFailure>>,
{
    let mut attempts = 0u32;
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(ApiFailure::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
                warn!(wait_secs = wait.as_secs(), "rate limited, waiting");
                sleep(wait).await;
            }
            Err(ApiFailure::Auth { scope, detail }) => {
                return Err(MigrateError::Authorization { scope, detail });
            }
            Err(ApiFailure::Transient(last)) => {
                attempts += 1;
                if attempts >= max_retries {
                    return Err(match class {
                        RetryClass::Fetch => MigrateError::TransientFetch { attempts, last },
                        RetryClass::Upload => MigrateError::TransientUpload { attempts, last },
                    });
                }
                warn!(attempt = attempts, error = %last, "transient failure, retrying");
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
        }
    }
}

/// Decode an HTTP exchange into the API envelope or a failure class.
async fn decode_envelope(
    sent: Result<reqwest::Response, reqwest::Error>,
) -> Result<Value, ApiFailure> {
    let resp = sent.map_err(|e| ApiFailure::Transient(e.to_string()))?;

    if resp.status().as_u16() == 429 {
        return Err(ApiFailure::RateLimited {
            retry_after: retry_after_header(&resp),
        });
    }
    if resp.status().is_server_error() {
        return Err(ApiFailure::Transient(format!("HTTP {}", resp.status())));
    }

    let body: Value = resp
        .json()
        .await
        .map_err(|e| ApiFailure::Transient(e.to_string()))?;

    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }

    let code = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let needed = body.get("needed").and_then(Value::as_str);
    Err(classify_api_error(code, needed))
}

/// Map an API error code to its retry class.
fn classify_api_error(code: &str, needed_scope: Option<&str>) -> ApiFailure {
    match code {
        "ratelimited" | "rate_limited" => ApiFailure::RateLimited { retry_after: None },
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked"
        | "missing_scope" | "not_allowed_token_type" => ApiFailure::Auth {
            scope: needed_scope.unwrap_or(code).to_string(),
            detail: format!("API returned {code}"),
        },
        other => ApiFailure::Transient(other.to_string()),
    }
}

fn retry_after_header(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn next_cursor(body: &Value) -> Option<String> {
    body.get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn extract<T: serde::de::DeserializeOwned>(body: &Value, field: &str) -> Result<T, MigrateError> {
    let value = body.get(field).cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(value)?)
}

fn as_upload_error(err: MigrateError) -> MigrateError {
    match err {
        MigrateError::TransientFetch { attempts, last } => {
            MigrateError::TransientUpload { attempts, last }
        }
        other => other,
    }
}

// --- Wire payloads ---

#[derive(Debug, Deserialize)]
struct TeamPayload {
    id: String,
    name: String,
    #[serde(default)]
    domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TopicPayload {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    name_normalized: Option<String>,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    is_member: bool,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    topic: Option<TopicPayload>,
    #[serde(default)]
    purpose: Option<TopicPayload>,
}

impl ChannelPayload {
    fn into_channel(self) -> Channel {
        let name = self
            .name
            .or(self.name_normalized)
            .unwrap_or_else(|| self.id.clone());
        Channel {
            id: self.id,
            name,
            is_private: self.is_private,
            is_archived: self.is_archived,
            is_member: self.is_member,
            created: self.created,
            topic: self.topic.map(|t| t.value).filter(|v| !v.is_empty()),
            purpose: self.purpose.map(|p| p.value).filter(|v| !v.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    profile: UserProfilePayload,
}

#[derive(Debug, Default, Deserialize)]
struct UserProfilePayload {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    image_72: Option<String>,
    #[serde(default)]
    image_48: Option<String>,
}

impl UserPayload {
    fn into_record(self) -> UserRecord {
        UserRecord {
            id: self.id,
            name: self.name,
            email: self.profile.email,
            display_name: self.profile.display_name.filter(|s| !s.is_empty()),
            real_name: self.profile.real_name.filter(|s| !s.is_empty()),
            image_url: self.profile.image_72.or(self.profile.image_48),
            deleted: self.deleted,
            is_bot: self.is_bot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_server_delay_without_spending_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = tokio::time::Instant::now();
        let c = calls.clone();
        let value = retry_with_backoff(3, RetryClass::Fetch, move || {
            let c = c.clone();
            async move {
                match c.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(ApiFailure::RateLimited {
                        retry_after: Some(Duration::from_secs(30)),
                    }),
                    _ => Ok(7u32),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // The retried request goes out no earlier than the directed delay.
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limits_interleaved_with_transients_keep_budget() {
        // With a budget of 3, two transients plus three rate limits still
        // succeed: only transients count against the budget.
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result = retry_with_backoff(3, RetryClass::Fetch, move || {
            let c = c.clone();
            async move {
                match c.fetch_add(1, Ordering::SeqCst) {
                    0 | 2 => Err(ApiFailure::RateLimited { retry_after: None }),
                    1 | 3 => Err(ApiFailure::Transient("HTTP 502".to_string())),
                    4 => Err(ApiFailure::RateLimited {
                        retry_after: Some(Duration::from_secs(1)),
                    }),
                    _ => Ok("ok"),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_reports_attempts() {
        let result: Result<(), _> = retry_with_backoff(3, RetryClass::Fetch, || async {
            Err(ApiFailure::Transient("HTTP 500".to_string()))
        })
        .await;

        match result.unwrap_err() {
            MigrateError::TransientFetch { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "HTTP 500");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_class_maps_exhaustion_to_upload_error() {
        let result: Result<(), _> = retry_with_backoff(2, RetryClass::Upload, || async {
            Err(ApiFailure::Transient("HTTP 503".to_string()))
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            MigrateError::TransientUpload { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_ends_the_call_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_backoff(3, RetryClass::Fetch, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ApiFailure::Auth {
                    scope: "channels:history".to_string(),
                    detail: "API returned missing_scope".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), MigrateError::Authorization { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_auth_errors_are_not_retryable() {
        for code in ["invalid_auth", "not_authed", "token_revoked", "missing_scope"] {
            assert!(matches!(
                classify_api_error(code, None),
                ApiFailure::Auth { .. }
            ));
        }
    }

    #[test]
    fn test_missing_scope_carries_needed_scope() {
        match classify_api_error("missing_scope", Some("channels:history")) {
            ApiFailure::Auth { scope, .. } => assert_eq!(scope, "channels:history"),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_codes() {
        assert!(matches!(
            classify_api_error("ratelimited", None),
            ApiFailure::RateLimited { .. }
        ));
        assert!(matches!(
            classify_api_error("rate_limited", None),
            ApiFailure::RateLimited { .. }
        ));
    }

    #[test]
    fn test_unknown_errors_are_transient() {
        assert!(matches!(
            classify_api_error("fatal_error", None),
            ApiFailure::Transient(_)
        ));
    }

    #[test]
    fn test_channel_payload_conversion() {
        let payload: ChannelPayload = serde_json::from_value(serde_json::json!({
            "id": "C123",
            "name": "general",
            "is_private": false,
            "is_archived": true,
            "created": 1700000000,
            "topic": {"value": "daily standup"},
            "purpose": {"value": ""}
        }))
        .unwrap();
        let channel = payload.into_channel();
        assert_eq!(channel.name, "general");
        assert!(channel.is_archived);
        assert_eq!(channel.topic.as_deref(), Some("daily standup"));
        assert!(channel.purpose.is_none());
    }

    #[test]
    fn test_user_payload_conversion() {
        let payload: UserPayload = serde_json::from_value(serde_json::json!({
            "id": "U1",
            "name": "alice",
            "profile": {
                "email": "A@Co.com",
                "display_name": "",
                "real_name": "Alice Ames",
                "image_72": "https://img/72.png"
            }
        }))
        .unwrap();
        let user = payload.into_record();
        assert_eq!(user.email.as_deref(), Some("A@Co.com"));
        assert!(user.display_name.is_none());
        assert_eq!(user.best_name(), "Alice Ames");
        assert_eq!(user.image_url.as_deref(), Some("https://img/72.png"));
    }

    #[test]
    fn test_next_cursor_filters_empty() {
        let body = serde_json::json!({
            "ok": true,
            "response_metadata": {"next_cursor": ""}
        });
        assert_eq!(next_cursor(&body), None);
        let body = serde_json::json!({
            "ok": true,
            "response_metadata": {"next_cursor": "abc"}
        });
        assert_eq!(next_cursor(&body), Some("abc".to_string()));
    }
}
