#![forbid(unsafe_code)]

//! `threadkeeper` — Slack request tracker.
//!
//! Tracks root channel messages ("requests") through a
//! new → working → completed lifecycle driven by chat events, reminds and
//! closes idle threads on a schedule, and posts daily summary reports.
//! A database-row advisory lock ensures only one running instance executes
//! the scheduled jobs.

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod persistence;
pub mod scheduler;
pub mod server;
pub mod slack;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
