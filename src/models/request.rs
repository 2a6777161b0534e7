//! Request entity, lifecycle enums, and thread-reply model.
//!
//! A [`Request`] is one tracked root channel message, identified by the
//! (`channel_id`, `event_ts`) pair. Its lifecycle runs new → working →
//! completed, where "completed" holds exactly while at least one completion
//! reaction is applied to the root message.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Lifecycle status for a tracked request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Request registered, nobody has picked it up yet.
    New,
    /// Someone other than the requestor engaged with the thread.
    Working,
    /// A completion reaction is currently applied.
    Completed,
}

/// Scanner-owned marker tracking where a thread stands in the
/// idle-closure pipeline. Distinct from [`RequestStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutocloseStatus {
    /// A reminder reply has been posted into the thread.
    Reminder,
    /// The scanner closed the thread.
    Closed,
}

/// Two independent category label sets for one request.
///
/// `message` labels are inferred from emoji in the message body at
/// creation/edit time; `reaction` labels are added and removed through emoji
/// reactions. The union of both is the request's effective type set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestTypes {
    /// Labels derived from the message body.
    pub message: Vec<String>,
    /// Labels derived from reactions on the root message.
    pub reaction: Vec<String>,
}

impl RequestTypes {
    /// Union of message- and reaction-derived labels, deduplicated.
    #[must_use]
    pub fn all(&self) -> BTreeSet<&str> {
        self.message
            .iter()
            .chain(self.reaction.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Persisted record of a root chat message being tracked through a
/// completion lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Database row identifier.
    pub id: i64,
    /// Slack channel the root message lives in.
    pub channel_id: String,
    /// Human-readable channel name, denormalized for reporting.
    pub channel_name: String,
    /// Root message timestamp; with `channel_id` forms the identity.
    pub event_ts: String,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// User who posted the root message.
    pub requestor_id: String,
    /// Requestor email, when the profile exposes one.
    pub requestor_email: Option<String>,
    /// Requestor workspace team ID.
    pub requestor_team_id: Option<String>,
    /// When work started (first non-requestor engagement).
    pub started_at: Option<DateTime<Utc>>,
    /// When the request was completed; set iff status is `Completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Category labels.
    pub request_types: RequestTypes,
    /// Completion reactions currently applied to the root message.
    pub completion_reactions: Vec<String>,
    /// Guided-form answers keyed by question ID; `Some` once a form started.
    pub form_answers: Option<BTreeMap<String, Vec<String>>>,
    /// Stored message blocks (raw Block Kit JSON).
    pub blocks: serde_json::Value,
    /// Permalink to the root message.
    pub permalink: String,
    /// Idle-closure pipeline marker; `None` until the scanner touches it.
    pub autoclose_status: Option<AutocloseStatus>,
}

impl Request {
    /// Whether the completed-status invariant holds:
    /// status is `Completed` iff the completion-reaction set is non-empty.
    #[must_use]
    pub fn completion_invariant_holds(&self) -> bool {
        (self.status == RequestStatus::Completed) == !self.completion_reactions.is_empty()
    }
}

/// Payload for creating or updating a request from a root message event.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Channel the root message was posted in.
    pub channel_id: String,
    /// Channel name at event time.
    pub channel_name: String,
    /// Root message timestamp.
    pub event_ts: String,
    /// Author of the root message.
    pub requestor_id: String,
    /// Author email, when known.
    pub requestor_email: Option<String>,
    /// Author workspace team ID, when known.
    pub requestor_team_id: Option<String>,
    /// Message blocks as delivered by the event.
    pub blocks: serde_json::Value,
    /// Category labels extracted from the message body.
    pub message_types: Vec<String>,
    /// Permalink to the root message.
    pub permalink: String,
}

/// One reply inside a tracked request's thread.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    /// Database row identifier.
    pub id: i64,
    /// Owning request row.
    pub request_id: i64,
    /// User who posted the reply.
    pub author_id: String,
    /// Reply timestamp, unique within the thread.
    pub event_ts: String,
    /// Stored reply blocks.
    pub blocks: serde_json::Value,
}

/// Convert an opaque Slack timestamp string ("1700000000.000100") into UTC.
///
/// # Errors
///
/// Returns `AppError::Classify` when the string is not a decimal timestamp.
pub fn ts_to_datetime(ts: &str) -> Result<DateTime<Utc>> {
    let seconds: f64 = ts
        .parse()
        .map_err(|_| AppError::Classify(format!("invalid timestamp string: {ts}")))?;
    ts_f64_to_datetime(seconds)
        .ok_or_else(|| AppError::Classify(format!("timestamp out of range: {ts}")))
}

/// Convert an epoch-seconds float into UTC, `None` when out of range.
#[must_use]
pub fn ts_f64_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    #[allow(clippy::cast_possible_truncation)]
    let whole = seconds.trunc() as i64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = (seconds.fract() * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(whole, nanos)
}

/// Render a UTC instant as a Slack-style timestamp string.
#[must_use]
pub fn datetime_to_ts(at: DateTime<Utc>) -> String {
    #[allow(clippy::cast_precision_loss)]
    let seconds = at.timestamp_micros() as f64 / 1_000_000.0;
    format!("{seconds:.6}")
}
