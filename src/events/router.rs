//! Event routing: classified events → request-store mutations.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::models::request::NewRequest;
use crate::persistence::channel_repo::ChannelRepo;
use crate::persistence::request_repo::RequestRepo;
use crate::slack::api::ChatGateway;
use crate::slack::{blocks, permalink};
use crate::{AppError, Result};

use super::classifier::{classify, emoji_names_in_blocks, EventKind, RawEvent};

/// Platform system user; its messages are ignored except deletion events.
pub const SYSTEM_USER: &str = "USLACKBOT";

/// Dispatches classified events to the request store and the chat gateway.
pub struct EventRouter {
    requests: RequestRepo,
    channels: ChannelRepo,
    gateway: Arc<dyn ChatGateway>,
    bot_user_id: String,
    workspace: String,
}

impl EventRouter {
    /// Build a router over the given stores and gateway.
    #[must_use]
    pub fn new(
        requests: RequestRepo,
        channels: ChannelRepo,
        gateway: Arc<dyn ChatGateway>,
        bot_user_id: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Self {
        Self {
            requests,
            channels,
            gateway,
            bot_user_id: bot_user_id.into(),
            workspace: workspace.into(),
        }
    }

    /// Classify and handle one inbound event.
    ///
    /// Events from unregistered or deactivated channels are silently
    /// skipped, as are events authored by the bot itself. System-user
    /// events are skipped too, except that a system-authored deletion of a
    /// tracked root message still removes the request.
    ///
    /// # Errors
    ///
    /// Returns classification, store, or gateway errors; the caller logs
    /// and drops the event.
    pub async fn handle(&self, event: &RawEvent) -> Result<()> {
        let kind = classify(event, &self.requests).await?;
        let channel_id = event.channel_id()?.to_owned();

        let Some(settings) = self.channels.settings(&channel_id).await? else {
            debug!(channel_id, "event for untracked channel; skipping");
            return Ok(());
        };

        match event.author() {
            Some(author) if author == self.bot_user_id => {
                debug!(channel_id, "own event; skipping");
                return Ok(());
            }
            Some(SYSTEM_USER) if kind != EventKind::MainRemove => {
                debug!(channel_id, "system-user event; skipping");
                return Ok(());
            }
            _ => {}
        }

        match kind {
            EventKind::MainNew | EventKind::MainNewFile | EventKind::MainEdit => {
                self.handle_root_message(event, kind, &channel_id, &settings)
                    .await
            }
            EventKind::MainRemove => {
                let root_ts = event.root_ts(kind)?;
                info!(channel_id, root_ts, "root message deleted; dropping request");
                self.requests.delete(&channel_id, root_ts).await
            }
            EventKind::ThreadNew | EventKind::ThreadNewFile => {
                self.handle_thread_message(event, kind, &channel_id).await
            }
            EventKind::ThreadEdit => self.handle_thread_edit(event, kind, &channel_id).await,
            EventKind::ReactionAdd => {
                self.handle_reaction_added(event, kind, &channel_id, &settings)
                    .await
            }
            EventKind::ReactionRemove => {
                self.handle_reaction_removed(event, kind, &channel_id, &settings)
                    .await
            }
        }
    }

    /// New or edited root message: upsert the request, nudge when no
    /// category emoji was used, start a form when a trigger emoji appears.
    async fn handle_root_message(
        &self,
        event: &RawEvent,
        kind: EventKind,
        channel_id: &str,
        settings: &crate::models::channel::ChannelSettings,
    ) -> Result<()> {
        let root_ts = event.root_ts(kind)?.to_owned();
        let author = event
            .author()
            .ok_or_else(|| AppError::Classify("root message without author".into()))?
            .to_owned();

        let channel_name = self
            .channels
            .get_or_not_found(channel_id)
            .await?
            .channel_name;

        let blocks = event.content_blocks();
        let emoji_names = emoji_names_in_blocks(&blocks);
        let catalog = settings.type_catalog();
        let message_types = catalog.resolve_types(&emoji_names);

        let profile = match self.gateway.user_profile(&author).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(user = %author, error = %err, "profile lookup failed");
                crate::slack::api::UserProfile::default()
            }
        };

        let record = NewRequest {
            channel_id: channel_id.to_owned(),
            channel_name,
            event_ts: root_ts.clone(),
            requestor_id: author,
            requestor_email: profile.email,
            requestor_team_id: profile.team,
            blocks,
            message_types: message_types.clone(),
            permalink: permalink(&self.workspace, channel_id, &root_ts),
        };
        self.requests.upsert(&record).await?;

        let is_new = matches!(kind, EventKind::MainNew | EventKind::MainNewFile);
        if is_new && !catalog.emojis.is_empty() && message_types.is_empty() {
            let nudge = &catalog.not_selected_response;
            if !nudge.is_empty() {
                let payload = serde_json::Value::Array(vec![
                    blocks::section(nudge),
                    blocks::emoji_legend(&catalog),
                ]);
                self.gateway
                    .send_reply_blocks(channel_id, &root_ts, &payload, nudge)
                    .await?;
            }
        }

        if emoji_names.iter().any(|name| settings.is_form_trigger(name))
            && self
                .requests
                .get_form_answers(channel_id, &root_ts)
                .await?
                .is_none()
        {
            self.requests.init_form_answers(channel_id, &root_ts).await?;
        }
        Ok(())
    }

    /// New thread reply: store it and move the parent to working when the
    /// replier differs from the requestor.
    async fn handle_thread_message(
        &self,
        event: &RawEvent,
        kind: EventKind,
        channel_id: &str,
    ) -> Result<()> {
        let root_ts = event.root_ts(kind)?;
        let reply_ts = event
            .ts
            .as_deref()
            .ok_or_else(|| AppError::Classify("thread reply without own ts".into()))?;
        let author = event
            .author()
            .ok_or_else(|| AppError::Classify("thread reply without author".into()))?;

        let parent = self.requests.get_or_not_found(channel_id, root_ts).await?;
        match self
            .requests
            .add_reply(&parent, reply_ts, author, &event.content_blocks())
            .await
        {
            Ok(()) => {}
            Err(AppError::AlreadyExists(_)) => {
                debug!(channel_id, reply_ts, "reply already stored; redelivery");
            }
            Err(err) => return Err(err),
        }

        if author != parent.requestor_id {
            self.requests
                .start_work(channel_id, root_ts, reply_ts)
                .await?;
        }
        Ok(())
    }

    /// Edited thread reply: refresh the stored content. Replies that
    /// predate tracking are ignored.
    async fn handle_thread_edit(
        &self,
        event: &RawEvent,
        _kind: EventKind,
        channel_id: &str,
    ) -> Result<()> {
        let reply_ts = event
            .message
            .as_ref()
            .and_then(|m| m.ts.as_deref())
            .ok_or_else(|| AppError::Classify("reply edit without nested ts".into()))?;
        match self
            .requests
            .update_reply(channel_id, reply_ts, &event.content_blocks())
            .await
        {
            Ok(()) => Ok(()),
            Err(AppError::NotFound(_)) => {
                debug!(channel_id, reply_ts, "edited reply not tracked; ignoring");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Reaction added to a tracked root message.
    async fn handle_reaction_added(
        &self,
        event: &RawEvent,
        kind: EventKind,
        channel_id: &str,
        settings: &crate::models::channel::ChannelSettings,
    ) -> Result<()> {
        let root_ts = event.root_ts(kind)?;
        let Some(request) = self.requests.get(channel_id, root_ts).await? else {
            debug!(channel_id, root_ts, "reaction on untracked message; ignoring");
            return Ok(());
        };
        let reaction = event
            .reaction
            .as_deref()
            .ok_or_else(|| AppError::Classify("reaction event without reaction name".into()))?;
        let reaction_ts = event.event_ts.as_deref().unwrap_or(root_ts);
        let reactor = event.author().unwrap_or_default();

        if settings
            .active_start_work_reactions()
            .iter()
            .any(|name| name == reaction)
            && reactor != request.requestor_id
        {
            self.requests
                .start_work(channel_id, root_ts, reaction_ts)
                .await?;
        }

        if settings.is_recognized_reaction(reaction) {
            if settings
                .active_completion_reactions()
                .iter()
                .any(|name| name == reaction)
            {
                self.requests
                    .close(channel_id, root_ts, reaction_ts, reaction)
                    .await?;
            }
            if let Some(label) = settings.type_catalog().canonical_key(reaction) {
                self.requests
                    .add_reaction_type(channel_id, root_ts, &label)
                    .await?;
            }
        }

        if settings.is_form_trigger(reaction) && request.form_answers.is_none() {
            self.requests.init_form_answers(channel_id, root_ts).await?;
        }
        Ok(())
    }

    /// Reaction removed from a tracked root message; mirrors addition.
    async fn handle_reaction_removed(
        &self,
        event: &RawEvent,
        kind: EventKind,
        channel_id: &str,
        settings: &crate::models::channel::ChannelSettings,
    ) -> Result<()> {
        let root_ts = event.root_ts(kind)?;
        if self.requests.get(channel_id, root_ts).await?.is_none() {
            debug!(channel_id, root_ts, "reaction on untracked message; ignoring");
            return Ok(());
        }
        let reaction = event
            .reaction
            .as_deref()
            .ok_or_else(|| AppError::Classify("reaction event without reaction name".into()))?;

        if settings.is_recognized_reaction(reaction) {
            if settings
                .active_completion_reactions()
                .iter()
                .any(|name| name == reaction)
            {
                self.requests
                    .remove_completion_reaction(channel_id, root_ts, reaction)
                    .await?;
            }
            if let Some(label) = settings.type_catalog().canonical_key(reaction) {
                self.requests
                    .remove_reaction_type(channel_id, root_ts, &label)
                    .await?;
            }
        }
        Ok(())
    }
}
