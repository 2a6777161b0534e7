//! Channel registration and settings repository.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use tracing::info;

use crate::models::channel::{ChannelRecord, ChannelSettings};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper for tracked-channel rows.
#[derive(Clone)]
pub struct ChannelRepo {
    db: Arc<Database>,
}

#[derive(FromRow)]
struct ChannelRow {
    id: i64,
    channel_id: String,
    channel_name: String,
    settings: String,
    created_at: String,
    deactivated_at: Option<String>,
}

impl ChannelRow {
    fn into_record(self) -> Result<ChannelRecord> {
        let settings: ChannelSettings = serde_json::from_str(&self.settings)?;
        Ok(ChannelRecord {
            id: self.id,
            channel_id: self.channel_id,
            channel_name: self.channel_name,
            settings,
            created_at: parse_datetime(&self.created_at)?,
            deactivated_at: self.deactivated_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid stored datetime: {err}")))
}

impl ChannelRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Look up a channel by its Slack channel ID.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        let row: Option<ChannelRow> = sqlx::query_as(
            "SELECT id, channel_id, channel_name, settings, created_at, deactivated_at
             FROM channel WHERE channel_id = ?1",
        )
        .bind(channel_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(ChannelRow::into_record).transpose()
    }

    /// Look up a channel or fail with a distinct not-found error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the channel is not registered.
    pub async fn get_or_not_found(&self, channel_id: &str) -> Result<ChannelRecord> {
        self.get(channel_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("channel {channel_id} not registered")))
    }

    /// Settings document for an active channel.
    ///
    /// Returns `Ok(None)` when the channel is unregistered or deactivated,
    /// so callers can silently skip untracked channels.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn settings(&self, channel_id: &str) -> Result<Option<ChannelSettings>> {
        Ok(self
            .get(channel_id)
            .await?
            .filter(|record| record.deactivated_at.is_none())
            .map(|record| record.settings))
    }

    /// All channels that are registered and not deactivated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active(&self) -> Result<Vec<ChannelRecord>> {
        let rows: Vec<ChannelRow> = sqlx::query_as(
            "SELECT id, channel_id, channel_name, settings, created_at, deactivated_at
             FROM channel WHERE deactivated_at IS NULL ORDER BY channel_name",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(ChannelRow::into_record).collect()
    }

    /// Register a channel, or reactivate and rename it if already known.
    ///
    /// Reactivation keeps the previously stored settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn register(
        &self,
        channel_id: &str,
        channel_name: &str,
        settings: &ChannelSettings,
    ) -> Result<()> {
        match self.get(channel_id).await? {
            None => {
                info!(channel_id, channel_name, "registering channel");
                sqlx::query(
                    "INSERT INTO channel (channel_id, channel_name, settings, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(channel_id)
                .bind(channel_name)
                .bind(serde_json::to_string(settings)?)
                .bind(Utc::now().to_rfc3339())
                .execute(self.db.as_ref())
                .await?;
            }
            Some(_) => {
                info!(channel_id, channel_name, "reactivating channel");
                sqlx::query(
                    "UPDATE channel SET channel_name = ?1, deactivated_at = NULL
                     WHERE channel_id = ?2",
                )
                .bind(channel_name)
                .bind(channel_id)
                .execute(self.db.as_ref())
                .await?;
            }
        }
        Ok(())
    }

    /// Replace the settings document of a registered channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the channel is not registered.
    pub async fn update_settings(
        &self,
        channel_id: &str,
        settings: &ChannelSettings,
    ) -> Result<()> {
        let record = self.get_or_not_found(channel_id).await?;
        sqlx::query("UPDATE channel SET settings = ?1 WHERE id = ?2")
            .bind(serde_json::to_string(settings)?)
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Deactivate a channel; its history stays queryable but events and
    /// scheduled jobs skip it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the channel is not registered.
    pub async fn deactivate(&self, channel_id: &str) -> Result<()> {
        let record = self.get_or_not_found(channel_id).await?;
        info!(channel_id, "deactivating channel");
        sqlx::query("UPDATE channel SET deactivated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(record.id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Stamp a report schedule as sent for the given date.
    ///
    /// `schedule_index` addresses into the channel's daily-report schedule
    /// list; out-of-range indexes are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the channel is not registered.
    pub async fn mark_reported(
        &self,
        channel_id: &str,
        schedule_index: usize,
        date: NaiveDate,
    ) -> Result<()> {
        let record = self.get_or_not_found(channel_id).await?;
        let mut settings = record.settings;
        if let Some(report) = settings.daily_report.as_mut() {
            if let Some(schedule) = report.schedules.get_mut(schedule_index) {
                schedule.last_report_date = Some(date);
            }
        }
        self.update_settings(channel_id, &settings).await
    }
}
