//! Request and thread-reply repository for `SQLite` persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::info;

use crate::models::request::{
    ts_to_datetime, AutocloseStatus, NewRequest, Request, RequestStatus, RequestTypes,
    ThreadMessage,
};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for request and reply records.
#[derive(Clone)]
pub struct RequestRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(FromRow)]
struct RequestRow {
    id: i64,
    channel_id: String,
    channel_name: String,
    event_ts: String,
    status: String,
    requestor_id: String,
    requestor_email: Option<String>,
    requestor_team_id: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    request_types: String,
    completion_reactions: String,
    form_answers: Option<String>,
    blocks: String,
    permalink: String,
    autoclose_status: Option<String>,
}

const REQUEST_COLUMNS: &str = "id, channel_id, channel_name, event_ts, status, requestor_id, \
     requestor_email, requestor_team_id, started_at, completed_at, request_types, \
     completion_reactions, form_answers, blocks, permalink, autoclose_status";

impl RequestRow {
    /// Convert a database row into the domain model.
    fn into_request(self) -> Result<Request> {
        let status = parse_status(&self.status)?;
        let autoclose_status = self
            .autoclose_status
            .as_deref()
            .map(parse_autoclose_status)
            .transpose()?;
        let request_types: RequestTypes = serde_json::from_str(&self.request_types)?;
        let completion_reactions: Vec<String> = serde_json::from_str(&self.completion_reactions)?;
        let form_answers: Option<BTreeMap<String, Vec<String>>> = self
            .form_answers
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let blocks: serde_json::Value = serde_json::from_str(&self.blocks)?;

        Ok(Request {
            id: self.id,
            channel_id: self.channel_id,
            channel_name: self.channel_name,
            event_ts: self.event_ts,
            status,
            requestor_id: self.requestor_id,
            requestor_email: self.requestor_email,
            requestor_team_id: self.requestor_team_id,
            started_at: parse_opt_datetime(self.started_at.as_deref())?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
            request_types,
            completion_reactions,
            form_answers,
            blocks,
            permalink: self.permalink,
            autoclose_status,
        })
    }
}

fn parse_status(s: &str) -> Result<RequestStatus> {
    match s {
        "new" => Ok(RequestStatus::New),
        "working" => Ok(RequestStatus::Working),
        "completed" => Ok(RequestStatus::Completed),
        other => Err(AppError::Db(format!("invalid request status: {other}"))),
    }
}

fn status_str(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::New => "new",
        RequestStatus::Working => "working",
        RequestStatus::Completed => "completed",
    }
}

fn parse_autoclose_status(s: &str) -> Result<AutocloseStatus> {
    match s {
        "reminder" => Ok(AutocloseStatus::Reminder),
        "closed" => Ok(AutocloseStatus::Closed),
        other => Err(AppError::Db(format!("invalid autoclose status: {other}"))),
    }
}

fn autoclose_status_str(status: AutocloseStatus) -> &'static str {
    match status {
        AutocloseStatus::Reminder => "reminder",
        AutocloseStatus::Closed => "closed",
    }
}

fn parse_opt_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| AppError::Db(format!("invalid stored datetime: {err}")))
    })
    .transpose()
}

impl RequestRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Retrieve a request by its (channel, root timestamp) identity.
    ///
    /// Returns `Ok(None)` if no such request is tracked.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, channel_id: &str, event_ts: &str) -> Result<Option<Request>> {
        let query =
            format!("SELECT {REQUEST_COLUMNS} FROM request WHERE channel_id = ?1 AND event_ts = ?2");
        let row: Option<RequestRow> = sqlx::query_as(&query)
            .bind(channel_id)
            .bind(event_ts)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(RequestRow::into_request).transpose()
    }

    /// Retrieve a request or fail with a distinct not-found error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn get_or_not_found(&self, channel_id: &str, event_ts: &str) -> Result<Request> {
        self.get(channel_id, event_ts).await?.ok_or_else(|| {
            AppError::NotFound(format!("request for {channel_id} and {event_ts} not found"))
        })
    }

    /// Create a request on first sight, or update it on a root-message edit.
    ///
    /// Creation stores status `new`, the message-derived type labels, and
    /// empty reaction/completion sets. An update replaces the stored blocks,
    /// requestor email, and the message-derived type set while leaving the
    /// reaction-derived set untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn upsert(&self, new_record: &NewRequest) -> Result<()> {
        match self.get(&new_record.channel_id, &new_record.event_ts).await? {
            None => {
                info!(
                    event_ts = %new_record.event_ts,
                    channel = %new_record.channel_name,
                    permalink = %new_record.permalink,
                    "creating new request record"
                );
                let request_types = RequestTypes {
                    message: new_record.message_types.clone(),
                    reaction: Vec::new(),
                };
                sqlx::query(
                    "INSERT INTO request (channel_id, channel_name, event_ts, status, \
                     requestor_id, requestor_email, requestor_team_id, request_types, \
                     completion_reactions, blocks, permalink)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )
                .bind(&new_record.channel_id)
                .bind(&new_record.channel_name)
                .bind(&new_record.event_ts)
                .bind(status_str(RequestStatus::New))
                .bind(&new_record.requestor_id)
                .bind(&new_record.requestor_email)
                .bind(&new_record.requestor_team_id)
                .bind(serde_json::to_string(&request_types)?)
                .bind(serde_json::to_string::<Vec<String>>(&Vec::new())?)
                .bind(serde_json::to_string(&new_record.blocks)?)
                .bind(&new_record.permalink)
                .execute(self.db.as_ref())
                .await?;
            }
            Some(existing) => {
                info!(
                    event_ts = %new_record.event_ts,
                    channel = %new_record.channel_name,
                    permalink = %new_record.permalink,
                    "updating existing request record"
                );
                let request_types = RequestTypes {
                    message: new_record.message_types.clone(),
                    reaction: existing.request_types.reaction,
                };
                sqlx::query(
                    "UPDATE request SET blocks = ?1, request_types = ?2, requestor_email = ?3
                     WHERE channel_id = ?4 AND event_ts = ?5",
                )
                .bind(serde_json::to_string(&new_record.blocks)?)
                .bind(serde_json::to_string(&request_types)?)
                .bind(&new_record.requestor_email)
                .bind(&new_record.channel_id)
                .bind(&new_record.event_ts)
                .execute(self.db.as_ref())
                .await?;
            }
        }
        Ok(())
    }

    /// Delete a request; its thread replies cascade-delete with it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn delete(&self, channel_id: &str, event_ts: &str) -> Result<()> {
        let record = self.get_or_not_found(channel_id, event_ts).await?;
        sqlx::query("DELETE FROM request WHERE id = ?1")
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Transition a request from `new` to `working` and stamp the start time.
    ///
    /// No-op when the request already left `new` or already has a start
    /// time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked, or
    /// `AppError::Classify` when the trigger timestamp is malformed.
    pub async fn start_work(
        &self,
        channel_id: &str,
        event_ts: &str,
        trigger_ts: &str,
    ) -> Result<()> {
        let record = self.get_or_not_found(channel_id, event_ts).await?;
        if record.status != RequestStatus::New || record.started_at.is_some() {
            return Ok(());
        }
        let started_at = ts_to_datetime(trigger_ts)?;
        sqlx::query("UPDATE request SET status = ?1, started_at = ?2 WHERE id = ?3")
            .bind(status_str(RequestStatus::Working))
            .bind(started_at.to_rfc3339())
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        info!(channel_id, event_ts, "request status changed to working");
        Ok(())
    }

    /// Mark a request completed: stamp the completion time from the reaction
    /// timestamp and add the reaction to the completion set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn close(
        &self,
        channel_id: &str,
        request_ts: &str,
        reaction_ts: &str,
        reaction: &str,
    ) -> Result<()> {
        let record = self.get_or_not_found(channel_id, request_ts).await?;
        let mut completion = record.completion_reactions;
        if !completion.iter().any(|name| name == reaction) {
            completion.push(reaction.to_owned());
        }
        let completed_at = ts_to_datetime(reaction_ts)?;
        sqlx::query(
            "UPDATE request SET status = ?1, completed_at = ?2, completion_reactions = ?3
             WHERE id = ?4",
        )
        .bind(status_str(RequestStatus::Completed))
        .bind(completed_at.to_rfc3339())
        .bind(serde_json::to_string(&completion)?)
        .bind(record.id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Remove one completion reaction. Emptying the set reopens the request:
    /// status reverts to `working` and the completion time is cleared.
    ///
    /// Silently ignores untracked requests.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn remove_completion_reaction(
        &self,
        channel_id: &str,
        request_ts: &str,
        reaction: &str,
    ) -> Result<()> {
        let Some(record) = self.get(channel_id, request_ts).await? else {
            return Ok(());
        };
        let mut completion = record.completion_reactions;
        completion.retain(|name| name != reaction);
        if completion.is_empty() {
            sqlx::query(
                "UPDATE request SET status = ?1, completed_at = NULL, completion_reactions = ?2
                 WHERE id = ?3",
            )
            .bind(status_str(RequestStatus::Working))
            .bind(serde_json::to_string(&completion)?)
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        } else {
            sqlx::query("UPDATE request SET completion_reactions = ?1 WHERE id = ?2")
                .bind(serde_json::to_string(&completion)?)
                .bind(record.id)
                .execute(self.db.as_ref())
                .await?;
        }
        Ok(())
    }

    /// Add a canonical category label to the reaction-derived type set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn add_reaction_type(
        &self,
        channel_id: &str,
        request_ts: &str,
        label: &str,
    ) -> Result<()> {
        let record = self.get_or_not_found(channel_id, request_ts).await?;
        let mut types = record.request_types;
        if !types.reaction.iter().any(|name| name == label) {
            types.reaction.push(label.to_owned());
        }
        self.store_request_types(record.id, &types).await
    }

    /// Remove a canonical category label from the reaction-derived type set.
    ///
    /// Silently ignores untracked requests.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn remove_reaction_type(
        &self,
        channel_id: &str,
        request_ts: &str,
        label: &str,
    ) -> Result<()> {
        let Some(record) = self.get(channel_id, request_ts).await? else {
            return Ok(());
        };
        let mut types = record.request_types;
        types.reaction.retain(|name| name != label);
        self.store_request_types(record.id, &types).await
    }

    async fn store_request_types(&self, id: i64, types: &RequestTypes) -> Result<()> {
        sqlx::query("UPDATE request SET request_types = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(types)?)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Record where the autoclose scanner left this thread.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn set_autoclose_status(
        &self,
        channel_id: &str,
        request_ts: &str,
        status: AutocloseStatus,
    ) -> Result<()> {
        let record = self.get_or_not_found(channel_id, request_ts).await?;
        sqlx::query("UPDATE request SET autoclose_status = ?1 WHERE id = ?2")
            .bind(autoclose_status_str(status))
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Initialize (or reset) the guided-form answer map.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn init_form_answers(&self, channel_id: &str, request_ts: &str) -> Result<()> {
        let record = self.get_or_not_found(channel_id, request_ts).await?;
        let empty: BTreeMap<String, Vec<String>> = BTreeMap::new();
        sqlx::query("UPDATE request SET form_answers = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(&empty)?)
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Store the selected options for one form question.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked or no
    /// form was started on it.
    pub async fn save_form_answer(
        &self,
        channel_id: &str,
        request_ts: &str,
        question_id: &str,
        answers: &[String],
    ) -> Result<()> {
        let record = self.get_or_not_found(channel_id, request_ts).await?;
        let mut form_answers = record.form_answers.ok_or_else(|| {
            AppError::NotFound(format!(
                "no form started for {channel_id} and {request_ts}"
            ))
        })?;
        form_answers.insert(question_id.to_owned(), answers.to_vec());
        sqlx::query("UPDATE request SET form_answers = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(&form_answers)?)
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Discard all recorded form answers, leaving an empty started form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn clear_form_answers(&self, channel_id: &str, request_ts: &str) -> Result<()> {
        self.init_form_answers(channel_id, request_ts).await
    }

    /// Retrieve the form answers for a request, `None` if no form started.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the request is not tracked.
    pub async fn get_form_answers(
        &self,
        channel_id: &str,
        request_ts: &str,
    ) -> Result<Option<BTreeMap<String, Vec<String>>>> {
        let record = self.get_or_not_found(channel_id, request_ts).await?;
        Ok(record.form_answers)
    }

    /// List a channel's requests whose root timestamp falls in the given
    /// epoch-second range, newest first. Used by the daily report.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_in_range(
        &self,
        channel_id: &str,
        start_ts: f64,
        end_ts: f64,
    ) -> Result<Vec<Request>> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM request \
             WHERE channel_id = ?1 \
               AND CAST(event_ts AS REAL) >= ?2 AND CAST(event_ts AS REAL) <= ?3 \
             ORDER BY CAST(event_ts AS REAL) DESC"
        );
        let rows: Vec<RequestRow> = sqlx::query_as(&query)
            .bind(channel_id)
            .bind(start_ts)
            .bind(end_ts)
            .fetch_all(self.db.as_ref())
            .await?;
        rows.into_iter().map(RequestRow::into_request).collect()
    }

    // ── Thread replies ───────────────────────────────────────────────

    /// Store a new reply under a tracked request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` when a reply with the same
    /// timestamp is already stored for the channel.
    pub async fn add_reply(
        &self,
        request: &Request,
        event_ts: &str,
        author_id: &str,
        blocks: &serde_json::Value,
    ) -> Result<()> {
        if self.get_reply(&request.channel_id, event_ts).await?.is_some() {
            return Err(AppError::AlreadyExists(format!(
                "reply for channel {} and ts {event_ts} exists already",
                request.channel_id
            )));
        }
        info!(
            channel_id = %request.channel_id,
            event_ts,
            "creating new thread reply"
        );
        sqlx::query(
            "INSERT INTO thread_message (request_id, author_id, event_ts, blocks)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(request.id)
        .bind(author_id)
        .bind(event_ts)
        .bind(serde_json::to_string(blocks)?)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Replace the stored blocks of an existing reply.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when no such reply is stored.
    pub async fn update_reply(
        &self,
        channel_id: &str,
        event_ts: &str,
        blocks: &serde_json::Value,
    ) -> Result<()> {
        let reply = self.get_reply(channel_id, event_ts).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "reply for channel {channel_id} and ts {event_ts} not found"
            ))
        })?;
        sqlx::query("UPDATE thread_message SET blocks = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(blocks)?)
            .bind(reply.id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Look up a stored reply by channel and reply timestamp.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_reply(
        &self,
        channel_id: &str,
        event_ts: &str,
    ) -> Result<Option<ThreadMessage>> {
        #[derive(FromRow)]
        struct ReplyRow {
            id: i64,
            request_id: i64,
            author_id: String,
            event_ts: String,
            blocks: String,
        }

        let row: Option<ReplyRow> = sqlx::query_as(
            "SELECT tm.id, tm.request_id, tm.author_id, tm.event_ts, tm.blocks
             FROM thread_message tm JOIN request r ON r.id = tm.request_id
             WHERE r.channel_id = ?1 AND tm.event_ts = ?2",
        )
        .bind(channel_id)
        .bind(event_ts)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(|row| {
            Ok(ThreadMessage {
                id: row.id,
                request_id: row.request_id,
                author_id: row.author_id,
                event_ts: row.event_ts,
                blocks: serde_json::from_str(&row.blocks)?,
            })
        })
        .transpose()
    }

    /// Count stored replies under a request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_replies(&self, request_id: i64) -> Result<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM thread_message WHERE request_id = ?1")
                .bind(request_id)
                .fetch_one(self.db.as_ref())
                .await?;
        #[allow(clippy::cast_sign_loss)]
        Ok(row.0 as u64)
    }
}
