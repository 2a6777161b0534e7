//! Database-row advisory lock for scheduled-job mutual exclusion.
//!
//! One row per lock type; "no row" means unlocked. Each instance re-asserts
//! the lock on a fixed cadence so ownership is continuously renewed, and a
//! crashed holder is taken over within one stale window. All row access runs
//! inside a single write transaction; `SQLite` serializes write
//! transactions, which gives the acquire/renew/release sequence the
//! atomicity of a row-level select-for-update.
//!
//! The lock guards scheduled jobs only. Webhook-driven request mutations are
//! never taken under it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use tracing::debug;

use crate::Result;

use super::db::Database;

/// Lock type guarding the scheduler jobs.
pub const SCHEDULER_LOCK: &str = "scheduler";

/// Default heartbeat age after which a lock is eligible for takeover.
pub const DEFAULT_STALE_AFTER_SECONDS: i64 = 60;

#[derive(FromRow)]
struct LockRow {
    bot_instance: String,
    last_heartbeat_utc: String,
}

/// Advisory scheduler lock bound to one process instance.
///
/// Constructed once at process start and shared via `Arc`; the `acquired`
/// flag always reflects the latest acquisition outcome.
pub struct SchedulerLock {
    db: Arc<Database>,
    instance_id: String,
    stale_after: Duration,
    acquired: AtomicBool,
}

impl SchedulerLock {
    /// Create a lock handle with the default stale window.
    #[must_use]
    pub fn new(db: Arc<Database>, instance_id: impl Into<String>) -> Self {
        Self {
            db,
            instance_id: instance_id.into(),
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECONDS),
            acquired: AtomicBool::new(false),
        }
    }

    /// Override the stale window.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Identity this process asserts as lock owner.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether the last acquisition attempt succeeded.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Try to acquire or renew the scheduler lock.
    ///
    /// Succeeds when the row is absent, owned by this instance, stale, or
    /// when `force` is set. Returns `Some(new_state)` only when the
    /// held/not-held state toggled, `None` when unchanged, so the caller
    /// can log transitions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on transaction failure; the acquisition state
    /// is left unchanged so the caller must not assume the lock is held.
    pub async fn try_acquire(&self, force: bool) -> Result<Option<bool>> {
        let previous = self.acquired.load(Ordering::SeqCst);
        let outcome = self.acquire_inner(SCHEDULER_LOCK, force, Utc::now()).await?;
        self.acquired.store(outcome, Ordering::SeqCst);
        if previous == outcome {
            Ok(None)
        } else {
            Ok(Some(outcome))
        }
    }

    async fn acquire_inner(
        &self,
        lock_type: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        let row: Option<LockRow> = sqlx::query_as(
            "SELECT bot_instance, last_heartbeat_utc FROM distributed_lock WHERE lock_type = ?1",
        )
        .bind(lock_type)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            debug!(lock_type, "no lock row found; inserting with self as owner");
            sqlx::query(
                "INSERT INTO distributed_lock (lock_type, bot_instance, last_heartbeat_utc)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(lock_type)
            .bind(&self.instance_id)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(true);
        };

        let heartbeat = DateTime::parse_from_rfc3339(&row.last_heartbeat_utc)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let owned = row.bot_instance == self.instance_id;
        let stale = heartbeat < now - self.stale_after;

        if owned || stale || force {
            debug!(lock_type, owned, stale, force, "refreshing lock row");
            sqlx::query(
                "UPDATE distributed_lock SET bot_instance = ?1, last_heartbeat_utc = ?2
                 WHERE lock_type = ?3",
            )
            .bind(&self.instance_id)
            .bind(now.to_rfc3339())
            .bind(lock_type)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(true);
        }

        debug!(
            lock_type,
            owner = %row.bot_instance,
            "lock owned by another instance and not stale; not acquiring"
        );
        tx.commit().await?;
        Ok(false)
    }

    /// Release the scheduler lock if this instance owns it; no-op otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on transaction failure.
    pub async fn release(&self) -> Result<()> {
        let mut tx = self.db.begin().await?;
        let deleted = sqlx::query(
            "DELETE FROM distributed_lock WHERE lock_type = ?1 AND bot_instance = ?2",
        )
        .bind(SCHEDULER_LOCK)
        .bind(&self.instance_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!(released = deleted.rows_affected() > 0, "scheduler lock release");
        self.acquired.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Build this process's lock-owner identity: host name plus random suffix.
#[must_use]
pub fn instance_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".into());
    let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();
    format!("{host}-{suffix}")
}
