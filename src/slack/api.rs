//! Slack Web API access: the outbound gateway trait and its HTTP client.
//!
//! The router and scheduler talk to Slack through [`ChatGateway`], which
//! keeps them testable against an in-memory fake. [`SlackApiClient`] is the
//! production implementation over `reqwest`, posting form-encoded calls to
//! the Web API and honoring rate-limit backoff.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

const API_BASE: &str = "https://slack.com/api";
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const HISTORY_PAGE_LIMIT: u32 = 200;

/// One reaction aggregate on a message.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageReaction {
    /// Emoji name.
    pub name: String,
    /// How many users applied it.
    pub count: u32,
}

/// One message as returned by history and replies endpoints.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelMessage {
    /// Message timestamp.
    pub ts: String,
    /// Thread parent timestamp; equals `ts` on thread roots.
    pub thread_ts: Option<String>,
    /// Set when the message was posted by a bot.
    pub bot_id: Option<String>,
    /// Posting user.
    pub user: Option<String>,
    /// Message text.
    pub text: Option<String>,
    /// Timestamp of the newest reply, present on threads with replies.
    pub latest_reply: Option<String>,
    /// Reply count, present on thread roots.
    pub reply_count: Option<u32>,
    /// Reactions currently applied.
    pub reactions: Vec<MessageReaction>,
    /// Block Kit content.
    pub blocks: Option<serde_json::Value>,
}

impl ChannelMessage {
    /// Whether this message starts a thread (or stands alone as one).
    #[must_use]
    pub fn is_thread_root(&self) -> bool {
        match self.thread_ts.as_deref() {
            None => true,
            Some(parent) => parent == self.ts,
        }
    }

    /// Whether any of the given reaction names is applied to the message.
    #[must_use]
    pub fn has_reaction_of(&self, names: &[String]) -> bool {
        self.reactions
            .iter()
            .any(|reaction| names.iter().any(|name| *name == reaction.name))
    }
}

/// One page of channel history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    /// Messages in this page, newest first.
    pub messages: Vec<ChannelMessage>,
    /// Continuation cursor; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// User profile fields the router needs.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserProfile {
    /// Email address, when the workspace exposes it.
    pub email: Option<String>,
    /// Workspace team ID.
    pub team: Option<String>,
}

/// Outbound chat operations used by the router and scheduled jobs.
#[allow(clippy::missing_errors_doc)]
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Post a plain-text reply into a thread.
    async fn send_reply(&self, channel_id: &str, thread_ts: &str, text: &str) -> Result<()>;

    /// Post a Block Kit reply into a thread.
    async fn send_reply_blocks(
        &self,
        channel_id: &str,
        thread_ts: &str,
        blocks: &serde_json::Value,
        fallback_text: &str,
    ) -> Result<()>;

    /// Post a Block Kit message to a channel.
    async fn post_message(
        &self,
        channel_id: &str,
        blocks: &serde_json::Value,
        fallback_text: &str,
    ) -> Result<()>;

    /// Add a reaction to a message.
    async fn add_reaction(&self, channel_id: &str, ts: &str, name: &str) -> Result<()>;

    /// Fetch one page of channel history no older than `oldest`.
    async fn fetch_history(
        &self,
        channel_id: &str,
        oldest: f64,
        cursor: Option<&str>,
    ) -> Result<HistoryPage>;

    /// Fetch every message of a thread, root included.
    async fn fetch_replies(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<ChannelMessage>>;

    /// Look up profile fields for a user.
    async fn user_profile(&self, user_id: &str) -> Result<UserProfile>;

    /// Identify the bot user the token authenticates as.
    async fn auth_test(&self) -> Result<String>;
}

/// Production [`ChatGateway`] over the Slack Web API.
pub struct SlackApiClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

impl SlackApiClient {
    /// Build a client for the given bot token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTP client cannot be constructed.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: API_BASE.to_owned(),
        })
    }

    /// Point the client at a different API base, for local test servers.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// POST one Web API method with form-encoded parameters, retrying on
    /// rate-limit responses, and unwrap the `ok` envelope.
    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let url = format!("{}/{method}", self.base_url);
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .form(params)
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                && attempt < MAX_RATE_LIMIT_RETRIES
            {
                let delay = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(method, delay, "rate limited; backing off");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
                continue;
            }

            let envelope: ApiEnvelope = response.json().await?;
            if envelope.ok {
                return Ok(envelope.rest);
            }
            let reason = envelope.error.unwrap_or_else(|| "unknown error".into());
            return Err(AppError::Slack(format!("{method} failed: {reason}")));
        }
    }
}

#[async_trait]
impl ChatGateway for SlackApiClient {
    async fn send_reply(&self, channel_id: &str, thread_ts: &str, text: &str) -> Result<()> {
        self.call(
            "chat.postMessage",
            &[
                ("channel", channel_id),
                ("thread_ts", thread_ts),
                ("text", text),
            ],
        )
        .await?;
        Ok(())
    }

    async fn send_reply_blocks(
        &self,
        channel_id: &str,
        thread_ts: &str,
        blocks: &serde_json::Value,
        fallback_text: &str,
    ) -> Result<()> {
        let blocks_json = serde_json::to_string(blocks)?;
        self.call(
            "chat.postMessage",
            &[
                ("channel", channel_id),
                ("thread_ts", thread_ts),
                ("blocks", blocks_json.as_str()),
                ("text", fallback_text),
            ],
        )
        .await?;
        Ok(())
    }

    async fn post_message(
        &self,
        channel_id: &str,
        blocks: &serde_json::Value,
        fallback_text: &str,
    ) -> Result<()> {
        let blocks_json = serde_json::to_string(blocks)?;
        self.call(
            "chat.postMessage",
            &[
                ("channel", channel_id),
                ("blocks", blocks_json.as_str()),
                ("text", fallback_text),
            ],
        )
        .await?;
        Ok(())
    }

    async fn add_reaction(&self, channel_id: &str, ts: &str, name: &str) -> Result<()> {
        self.call(
            "reactions.add",
            &[("channel", channel_id), ("timestamp", ts), ("name", name)],
        )
        .await?;
        Ok(())
    }

    async fn fetch_history(
        &self,
        channel_id: &str,
        oldest: f64,
        cursor: Option<&str>,
    ) -> Result<HistoryPage> {
        let oldest = format!("{oldest:.6}");
        let limit = HISTORY_PAGE_LIMIT.to_string();
        let mut params = vec![
            ("channel", channel_id),
            ("oldest", oldest.as_str()),
            ("limit", limit.as_str()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        let body = self.call("conversations.history", &params).await?;

        let messages: Vec<ChannelMessage> = body
            .get("messages")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let next_cursor = body
            .get("response_metadata")
            .and_then(|m| m.get("next_cursor"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_owned);
        Ok(HistoryPage {
            messages,
            next_cursor,
        })
    }

    async fn fetch_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<ChannelMessage>> {
        let body = self
            .call(
                "conversations.replies",
                &[("channel", channel_id), ("ts", thread_ts)],
            )
            .await?;
        let messages: Vec<ChannelMessage> = body
            .get("messages")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(messages)
    }

    async fn user_profile(&self, user_id: &str) -> Result<UserProfile> {
        let body = self.call("users.info", &[("user", user_id)]).await?;
        let profile = body
            .get("user")
            .and_then(|u| u.get("profile"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(profile)
    }

    async fn auth_test(&self) -> Result<String> {
        let body = self.call("auth.test", &[]).await?;
        body.get("user_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| AppError::Slack("auth.test returned no user_id".into()))
    }
}
