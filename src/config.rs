//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Nested Slack configuration.
///
/// The bot token is loaded at runtime from the `SLACK_BOT_TOKEN`
/// environment variable, not from the TOML config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// Workspace name used when building message permalinks.
    pub workspace_name: String,
    /// Bot user ID; resolved via `auth.test` at startup when absent.
    #[serde(default)]
    pub bot_user_id: Option<String>,
    /// Bot user token used for Web API calls (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// Distributed scheduler-lock tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// Cadence at which each instance re-asserts the lock.
    #[serde(default = "default_lock_check_interval")]
    pub check_interval_seconds: u64,
    /// Heartbeat age after which a lock becomes eligible for takeover.
    #[serde(default = "default_lock_stale_after")]
    pub stale_after_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_lock_check_interval(),
            stale_after_seconds: default_lock_stale_after(),
        }
    }
}

fn default_lock_check_interval() -> u64 {
    5
}

fn default_lock_stale_after() -> u64 {
    60
}

/// Scheduled-job intervals and pacing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Whether the idle-thread autoclose job runs at all.
    #[serde(default)]
    pub autoclose_enabled: bool,
    /// Seconds between autoclose scans.
    #[serde(default = "default_autoclose_interval")]
    pub autoclose_interval_seconds: u64,
    /// Seconds between daily-report schedule checks.
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
    /// Pause after each outbound scanner message, for rate limiting.
    #[serde(default = "default_send_pause")]
    pub send_pause_millis: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            autoclose_enabled: false,
            autoclose_interval_seconds: default_autoclose_interval(),
            report_interval_seconds: default_report_interval(),
            send_pause_millis: default_send_pause(),
        }
    }
}

fn default_autoclose_interval() -> u64 {
    3600
}

fn default_report_interval() -> u64 {
    600
}

fn default_send_pause() -> u64 {
    1000
}

fn default_http_port() -> u16 {
    3000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,
    /// HTTP port for the event webhook.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Slack connectivity settings.
    pub slack: SlackConfig,
    /// Scheduler-lock tuning.
    #[serde(default)]
    pub lock: LockConfig,
    /// Scheduled-job intervals.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the Slack bot token from the `SLACK_BOT_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the variable is unset or empty.
    pub fn load_credentials(&mut self) -> Result<()> {
        let token = env::var("SLACK_BOT_TOKEN")
            .map_err(|_| AppError::Config("SLACK_BOT_TOKEN env var is required".into()))?;
        if token.is_empty() {
            return Err(AppError::Config("SLACK_BOT_TOKEN env var is empty".into()));
        }
        self.slack.bot_token = token;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.slack.workspace_name.is_empty() {
            return Err(AppError::Config("slack.workspace_name must not be empty".into()));
        }
        if self.lock.check_interval_seconds == 0 {
            return Err(AppError::Config(
                "lock.check_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.lock.stale_after_seconds <= self.lock.check_interval_seconds {
            return Err(AppError::Config(
                "lock.stale_after_seconds must exceed lock.check_interval_seconds".into(),
            ));
        }
        Ok(())
    }
}
