//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, safe to
//! re-run on every server startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS channel (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id      TEXT NOT NULL UNIQUE,
    channel_name    TEXT NOT NULL,
    settings        TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    deactivated_at  TEXT
);

CREATE TABLE IF NOT EXISTS request (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id           TEXT NOT NULL,
    channel_name         TEXT NOT NULL,
    event_ts             TEXT NOT NULL,
    status               TEXT NOT NULL CHECK(status IN ('new','working','completed')),
    requestor_id         TEXT NOT NULL,
    requestor_email      TEXT,
    requestor_team_id    TEXT,
    started_at           TEXT,
    completed_at         TEXT,
    request_types        TEXT NOT NULL,
    completion_reactions TEXT NOT NULL,
    form_answers         TEXT,
    blocks               TEXT NOT NULL,
    permalink            TEXT NOT NULL,
    autoclose_status     TEXT CHECK(autoclose_status IN ('reminder','closed')),
    UNIQUE(channel_id, event_ts)
);

CREATE TABLE IF NOT EXISTS thread_message (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id  INTEGER NOT NULL REFERENCES request(id) ON DELETE CASCADE,
    author_id   TEXT NOT NULL,
    event_ts    TEXT NOT NULL,
    blocks      TEXT NOT NULL,
    UNIQUE(request_id, event_ts)
);

CREATE TABLE IF NOT EXISTS distributed_lock (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    lock_type          TEXT NOT NULL UNIQUE,
    bot_instance       TEXT NOT NULL,
    last_heartbeat_utc TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_request_channel_ts ON request(channel_id, event_ts);
CREATE INDEX IF NOT EXISTS idx_thread_request ON thread_message(request_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
