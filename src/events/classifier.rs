//! Event classification: raw webhook payload → semantic event kind.
//!
//! Decodes the loosely shaped event object once at the boundary and maps it
//! onto one of nine concrete kinds. Everything unrecognized is rejected with
//! an error instead of being guessed at. Classification of `message_changed`
//! events consults the request store, so it is fallible on I/O as well.

use serde::Deserialize;

use crate::persistence::request_repo::RequestRepo;
use crate::{AppError, Result};

/// Placeholder text the chat platform substitutes for a deleted message.
pub const DELETED_MESSAGE_TEXT: &str = "This message was deleted.";

/// Semantic kind of one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// New root message in a channel.
    MainNew,
    /// New root message carrying a file.
    MainNewFile,
    /// Root message edited.
    MainEdit,
    /// Root message deleted (edit to the deletion placeholder).
    MainRemove,
    /// New reply inside a thread.
    ThreadNew,
    /// New reply carrying a file.
    ThreadNewFile,
    /// Reply edited.
    ThreadEdit,
    /// Reaction added.
    ReactionAdd,
    /// Reaction removed.
    ReactionRemove,
}

impl EventKind {
    /// Whether the kind addresses the root message of a thread.
    #[must_use]
    pub fn is_root(self) -> bool {
        matches!(
            self,
            Self::MainNew | Self::MainNewFile | Self::MainEdit | Self::MainRemove
        )
    }
}

/// Reaction target reference as delivered inside reaction events.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventItem {
    /// Channel of the reacted-to message.
    pub channel: Option<String>,
    /// Timestamp of the reacted-to message.
    pub ts: Option<String>,
}

/// Nested edited-message payload of `message_changed` events.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventMessage {
    /// Timestamp of the edited message.
    pub ts: Option<String>,
    /// Thread parent of the edited message, when it is a reply.
    pub thread_ts: Option<String>,
    /// Author of the edited message.
    pub user: Option<String>,
    /// Current text after the edit.
    pub text: Option<String>,
    /// Current blocks after the edit.
    pub blocks: Option<serde_json::Value>,
}

/// Raw inbound event, decoded field-for-field from the webhook payload.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawEvent {
    /// Event type ("message", "reaction_added", "reaction_removed").
    #[serde(rename = "type")]
    pub kind: String,
    /// Message subtype, when present.
    pub subtype: Option<String>,
    /// Channel for message-shaped events.
    pub channel: Option<String>,
    /// Own timestamp for message-shaped events.
    pub ts: Option<String>,
    /// Thread parent timestamp, present on replies.
    pub thread_ts: Option<String>,
    /// Acting user.
    pub user: Option<String>,
    /// Reaction name for reaction events.
    pub reaction: Option<String>,
    /// Delivery timestamp of the event itself.
    pub event_ts: Option<String>,
    /// Reaction target.
    pub item: EventItem,
    /// Edited-message payload for `message_changed`.
    pub message: Option<EventMessage>,
    /// Message blocks for plain message events.
    pub blocks: Option<serde_json::Value>,
    /// Message text for plain message events.
    pub text: Option<String>,
}

impl RawEvent {
    /// Channel the event applies to, per event shape.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Classify` when no channel field is present.
    pub fn channel_id(&self) -> Result<&str> {
        self.channel
            .as_deref()
            .or(self.item.channel.as_deref())
            .ok_or_else(|| AppError::Classify("event carries no channel".into()))
    }

    /// User who triggered the event, per event shape.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        if self.subtype.as_deref() == Some("message_changed") {
            self.message.as_ref().and_then(|m| m.user.as_deref())
        } else {
            self.user.as_deref()
        }
    }

    /// Timestamp identifying the request root this event belongs to.
    ///
    /// The field holding the canonical timestamp differs per kind: own `ts`
    /// for new root messages, `thread_ts` for replies, the edited message's
    /// own or parent `ts` for edits, the reacted item's `ts` for reactions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Classify` when the expected field is missing.
    pub fn root_ts(&self, kind: EventKind) -> Result<&str> {
        let ts = match kind {
            EventKind::MainNew | EventKind::MainNewFile => self.ts.as_deref(),
            EventKind::MainEdit | EventKind::MainRemove => {
                self.message.as_ref().and_then(|m| m.ts.as_deref())
            }
            EventKind::ThreadNew | EventKind::ThreadNewFile => self.thread_ts.as_deref(),
            EventKind::ThreadEdit => self
                .message
                .as_ref()
                .and_then(|m| m.thread_ts.as_deref().or(m.ts.as_deref())),
            EventKind::ReactionAdd | EventKind::ReactionRemove => self.item.ts.as_deref(),
        };
        ts.ok_or_else(|| AppError::Classify("event carries no identifying timestamp".into()))
    }

    /// Blocks of the message content this event delivers.
    #[must_use]
    pub fn content_blocks(&self) -> serde_json::Value {
        if self.subtype.as_deref() == Some("message_changed") {
            self.message
                .as_ref()
                .and_then(|m| m.blocks.clone())
                .unwrap_or(serde_json::Value::Null)
        } else {
            self.blocks.clone().unwrap_or(serde_json::Value::Null)
        }
    }

    /// Plain text of the message content this event delivers.
    #[must_use]
    pub fn content_text(&self) -> Option<&str> {
        if self.subtype.as_deref() == Some("message_changed") {
            self.message.as_ref().and_then(|m| m.text.as_deref())
        } else {
            self.text.as_deref()
        }
    }
}

/// Classify an inbound event into its semantic kind.
///
/// `message_changed` events are disambiguated through a request-store
/// lookup: an edit to a tracked root message is a root edit (or a removal
/// when the text is the deletion placeholder), anything else is a reply
/// edit.
///
/// # Errors
///
/// Returns `AppError::Classify` for unrecognized shapes and `AppError::Db`
/// when the disambiguation lookup fails.
pub async fn classify(event: &RawEvent, requests: &RequestRepo) -> Result<EventKind> {
    match event.kind.as_str() {
        "reaction_added" => return Ok(EventKind::ReactionAdd),
        "reaction_removed" => return Ok(EventKind::ReactionRemove),
        "message" => {}
        other => {
            return Err(AppError::Classify(format!("unrecognized event type: {other}")));
        }
    }

    match event.subtype.as_deref() {
        None => {
            if event.thread_ts.is_some() {
                Ok(EventKind::ThreadNew)
            } else {
                Ok(EventKind::MainNew)
            }
        }
        Some("file_share") => {
            if event.thread_ts.is_some() {
                Ok(EventKind::ThreadNewFile)
            } else {
                Ok(EventKind::MainNewFile)
            }
        }
        Some("message_changed") => {
            let channel = event.channel_id()?;
            let edited_ts = event
                .message
                .as_ref()
                .and_then(|m| m.ts.as_deref())
                .ok_or_else(|| {
                    AppError::Classify("message_changed without nested message ts".into())
                })?;
            if requests.get(channel, edited_ts).await?.is_some() {
                let text = event.content_text().unwrap_or_default();
                if text == DELETED_MESSAGE_TEXT {
                    Ok(EventKind::MainRemove)
                } else {
                    Ok(EventKind::MainEdit)
                }
            } else {
                Ok(EventKind::ThreadEdit)
            }
        }
        Some(other) => Err(AppError::Classify(format!(
            "unrecognized message subtype: {other}"
        ))),
    }
}

/// Extract emoji names appearing in rich-text message blocks.
///
/// Walks every rich-text section of every block and collects the names of
/// emoji elements, in order of appearance, without deduplication.
#[must_use]
pub fn emoji_names_in_blocks(blocks: &serde_json::Value) -> Vec<String> {
    let mut names = Vec::new();
    let Some(blocks) = blocks.as_array() else {
        return names;
    };
    for block in blocks {
        let Some(sections) = block.get("elements").and_then(|v| v.as_array()) else {
            continue;
        };
        for section in sections {
            let Some(elements) = section.get("elements").and_then(|v| v.as_array()) else {
                continue;
            };
            for element in elements {
                if element.get("type").and_then(|v| v.as_str()) == Some("emoji") {
                    if let Some(name) = element.get("name").and_then(|v| v.as_str()) {
                        names.push(name.to_owned());
                    }
                }
            }
        }
    }
    names
}
