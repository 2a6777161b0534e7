//! Idle-thread scanner: reminds on quiet threads, then closes them.
//!
//! Per thread the scanner drives `untouched → reminder → closed`. Whether a
//! reminder was already posted is inferred by comparing the latest reply's
//! text against the configured reminder text, so a human reply after a
//! reminder makes the thread eligible for another reminder instead of
//! closure. Reopening a closed thread happens only through reaction
//! removal, never here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::channel::{ChannelRecord, IdleCutoffs, IdleThreadPolicy};
use crate::models::request::{datetime_to_ts, AutocloseStatus};
use crate::persistence::channel_repo::ChannelRepo;
use crate::persistence::request_repo::RequestRepo;
use crate::slack::api::{ChannelMessage, ChatGateway};
use crate::slack::blocks::first_block_text;
use crate::{AppError, Result};

/// Walks active channels and applies the idle-thread policy.
pub struct AutocloseScanner {
    requests: RequestRepo,
    channels: ChannelRepo,
    gateway: Arc<dyn ChatGateway>,
    send_pause: Duration,
}

impl AutocloseScanner {
    /// Build a scanner over the given stores and gateway.
    #[must_use]
    pub fn new(
        requests: RequestRepo,
        channels: ChannelRepo,
        gateway: Arc<dyn ChatGateway>,
        send_pause: Duration,
    ) -> Self {
        Self {
            requests,
            channels,
            gateway,
            send_pause,
        }
    }

    /// Run one full scan over all active channels.
    ///
    /// Per-channel failures are logged and skipped so one broken channel
    /// never blocks the rest.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` when the channel listing itself fails.
    pub async fn run(&self) -> Result<()> {
        for channel in self.channels.list_active().await? {
            let channel_id = channel.channel_id.clone();
            if let Err(err) = self.scan_channel(&channel).await {
                warn!(channel_id, error = %err, "idle scan failed for channel");
            }
        }
        Ok(())
    }

    /// Scan one channel's recent history for idle threads.
    async fn scan_channel(&self, channel: &ChannelRecord) -> Result<()> {
        let completion = channel.settings.active_completion_reactions();
        let Some(policy) = channel.settings.idle_policy() else {
            debug!(channel_id = %channel.channel_id, "no idle policy; skipping");
            return Ok(());
        };
        if completion.is_empty() {
            debug!(channel_id = %channel.channel_id, "no completion reactions; skipping");
            return Ok(());
        }

        let cutoffs = policy.cutoffs(Utc::now());
        let messages = self
            .fetch_all_history(&channel.channel_id, cutoffs.time_filter)
            .await?;
        info!(
            channel_id = %channel.channel_id,
            count = messages.len(),
            "scanning channel history for idle threads"
        );

        for message in &messages {
            if !message.is_thread_root() || message.bot_id.is_some() {
                continue;
            }
            self.inspect_thread(channel, policy, &cutoffs, completion, message)
                .await?;
        }
        Ok(())
    }

    /// Drain all history pages at or after the fetch floor.
    async fn fetch_all_history(
        &self,
        channel_id: &str,
        oldest: f64,
    ) -> Result<Vec<ChannelMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .gateway
                .fetch_history(channel_id, oldest, cursor.as_deref())
                .await?;
            messages.extend(page.messages);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(messages),
            }
        }
    }

    /// Decide per thread root: leave alone, remind, or close.
    async fn inspect_thread(
        &self,
        channel: &ChannelRecord,
        policy: &IdleThreadPolicy,
        cutoffs: &IdleCutoffs,
        completion: &[String],
        message: &ChannelMessage,
    ) -> Result<()> {
        if message.has_reaction_of(completion) {
            return Ok(());
        }
        let Ok(message_ts) = message.ts.parse::<f64>() else {
            warn!(ts = %message.ts, "unparseable message timestamp; skipping");
            return Ok(());
        };
        if message_ts >= cutoffs.close_before {
            return Ok(());
        }

        let Some(latest_reply_ts) = message.latest_reply.as_deref() else {
            self.remind(channel, policy, &message.ts).await?;
            return Ok(());
        };
        let latest_ts: f64 = latest_reply_ts
            .parse()
            .map_err(|_| AppError::Slack(format!("bad latest_reply ts: {latest_reply_ts}")))?;

        let thread = self
            .gateway
            .fetch_replies(&channel.channel_id, &message.ts)
            .await?;
        let latest_text = thread.last().map(reply_text).unwrap_or_default();

        if latest_text != policy.reminder_message && latest_ts < cutoffs.reminder_grace_period {
            self.remind(channel, policy, &message.ts).await?;
        } else if latest_text == policy.reminder_message && latest_ts < cutoffs.close_grace_period {
            self.close(channel, policy, completion, &message.ts).await?;
        }
        Ok(())
    }

    /// Post the reminder reply and record the reminder marker.
    async fn remind(
        &self,
        channel: &ChannelRecord,
        policy: &IdleThreadPolicy,
        thread_ts: &str,
    ) -> Result<()> {
        info!(channel_id = %channel.channel_id, thread_ts, "posting idle reminder");
        self.gateway
            .send_reply(&channel.channel_id, thread_ts, &policy.reminder_message)
            .await?;
        self.mark(&channel.channel_id, thread_ts, AutocloseStatus::Reminder)
            .await;
        tokio::time::sleep(self.send_pause).await;
        Ok(())
    }

    /// Apply the primary completion reaction, post the close reply, and
    /// record closure on the request.
    async fn close(
        &self,
        channel: &ChannelRecord,
        policy: &IdleThreadPolicy,
        completion: &[String],
        thread_ts: &str,
    ) -> Result<()> {
        let Some(primary) = completion.first() else {
            return Ok(());
        };
        info!(channel_id = %channel.channel_id, thread_ts, "closing idle thread");
        self.gateway
            .add_reaction(&channel.channel_id, thread_ts, primary)
            .await?;
        self.gateway
            .send_reply(&channel.channel_id, thread_ts, &policy.close_message)
            .await?;

        let close_ts = datetime_to_ts(Utc::now());
        if let Err(err) = self
            .requests
            .close(&channel.channel_id, thread_ts, &close_ts, primary)
            .await
        {
            warn!(
                channel_id = %channel.channel_id,
                thread_ts,
                error = %err,
                "idle thread closed in chat but not tracked in store"
            );
        }
        self.mark(&channel.channel_id, thread_ts, AutocloseStatus::Closed)
            .await;
        tokio::time::sleep(self.send_pause).await;
        Ok(())
    }

    /// Best-effort autoclose-status update. Untracked threads are expected.
    async fn mark(&self, channel_id: &str, thread_ts: &str, status: AutocloseStatus) {
        if let Err(err) = self
            .requests
            .set_autoclose_status(channel_id, thread_ts, status)
            .await
        {
            debug!(channel_id, thread_ts, error = %err, "autoclose marker not stored");
        }
    }
}

/// Comparable text of one reply: the plain text when present, otherwise the
/// leading section of its blocks.
fn reply_text(reply: &ChannelMessage) -> String {
    reply
        .text
        .clone()
        .or_else(|| reply.blocks.as_ref().and_then(first_block_text))
        .unwrap_or_default()
}
