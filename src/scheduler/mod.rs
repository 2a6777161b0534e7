//! Scheduled background jobs: lock upkeep, idle-thread scanning, reports.

pub mod autoclose;
pub mod report;
pub mod runner;
