//! Background-job runner: lock upkeep plus the scheduled jobs it gates.
//!
//! The lock tick re-asserts the advisory lock on a short cadence; the
//! scanner and reporter ticks run on their own intervals but act only while
//! the lock is held, so a fleet of instances runs each job exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{LockConfig, SchedulerConfig};
use crate::persistence::lock::SchedulerLock;

use super::autoclose::AutocloseScanner;
use super::report::DailyReporter;

/// Owns the scheduled background tasks for one process instance.
pub struct JobRunner {
    lock: Arc<SchedulerLock>,
    scanner: Arc<AutocloseScanner>,
    reporter: Arc<DailyReporter>,
    lock_config: LockConfig,
    scheduler_config: SchedulerConfig,
}

impl JobRunner {
    /// Assemble the runner from its jobs and tuning.
    #[must_use]
    pub fn new(
        lock: Arc<SchedulerLock>,
        scanner: Arc<AutocloseScanner>,
        reporter: Arc<DailyReporter>,
        lock_config: LockConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self {
            lock,
            scanner,
            reporter,
            lock_config,
            scheduler_config,
        }
    }

    /// Spawn the background tasks; each stops when the token is cancelled.
    #[must_use]
    pub fn spawn(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.spawn_lock_tick(cancel.clone())];
        if self.scheduler_config.autoclose_enabled {
            handles.push(self.spawn_autoclose(cancel.clone()));
        }
        handles.push(self.spawn_report(cancel.clone()));
        handles
    }

    fn spawn_lock_tick(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let lock = Arc::clone(&self.lock);
        let period = Duration::from_secs(self.lock_config.check_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match lock.try_acquire(false).await {
                            Ok(Some(true)) => {
                                info!(instance = lock.instance_id(), "scheduler lock acquired");
                            }
                            Ok(Some(false)) => {
                                info!(instance = lock.instance_id(), "scheduler lock lost");
                            }
                            Ok(None) => {}
                            Err(err) => {
                                warn!(error = %err, "scheduler lock check failed");
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_autoclose(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let lock = Arc::clone(&self.lock);
        let scanner = Arc::clone(&self.scanner);
        let period = Duration::from_secs(self.scheduler_config.autoclose_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if !lock.is_held() {
                            continue;
                        }
                        if let Err(err) = scanner.run().await {
                            warn!(error = %err, "idle-thread scan failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_report(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let lock = Arc::clone(&self.lock);
        let reporter = Arc::clone(&self.reporter);
        let period = Duration::from_secs(self.scheduler_config.report_interval_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if !lock.is_held() {
                            continue;
                        }
                        if let Err(err) = reporter.run(Utc::now()).await {
                            warn!(error = %err, "daily-report check failed");
                        }
                    }
                }
            }
        })
    }
}
