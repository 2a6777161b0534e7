#![forbid(unsafe_code)]

//! `threadkeeper` — request lifecycle tracker and idle-thread reclaimer.
//!
//! Bootstraps configuration, connects the database, starts the Slack event
//! webhook, and spawns the lock-gated scheduled jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use threadkeeper::config::GlobalConfig;
use threadkeeper::events::router::EventRouter;
use threadkeeper::persistence::channel_repo::ChannelRepo;
use threadkeeper::persistence::db;
use threadkeeper::persistence::lock::{instance_identity, SchedulerLock};
use threadkeeper::persistence::request_repo::RequestRepo;
use threadkeeper::scheduler::autoclose::AutocloseScanner;
use threadkeeper::scheduler::report::DailyReporter;
use threadkeeper::scheduler::runner::JobRunner;
use threadkeeper::slack::api::{ChatGateway, SlackApiClient};
use threadkeeper::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "threadkeeper", about = "Slack request lifecycle tracker", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("threadkeeper bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials()?;
    info!("configuration loaded");

    let db = Arc::new(db::connect(&config.db_path).await?);
    info!("database connected");

    let gateway: Arc<dyn ChatGateway> = Arc::new(SlackApiClient::new(&config.slack.bot_token)?);
    let bot_user_id = match config.slack.bot_user_id.clone() {
        Some(id) => id,
        None => {
            let id = gateway.auth_test().await?;
            info!(bot_user_id = %id, "resolved bot identity via auth.test");
            id
        }
    };

    let requests = RequestRepo::new(Arc::clone(&db));
    let channels = ChannelRepo::new(Arc::clone(&db));
    let router = Arc::new(EventRouter::new(
        requests.clone(),
        channels.clone(),
        Arc::clone(&gateway),
        bot_user_id,
        config.slack.workspace_name.clone(),
    ));

    let lock = Arc::new(
        SchedulerLock::new(Arc::clone(&db), instance_identity())
            .with_stale_after(chrono::Duration::seconds(
                i64::try_from(config.lock.stale_after_seconds).unwrap_or(60),
            )),
    );
    let scanner = Arc::new(AutocloseScanner::new(
        requests.clone(),
        channels.clone(),
        Arc::clone(&gateway),
        Duration::from_millis(config.scheduler.send_pause_millis),
    ));
    let reporter = Arc::new(DailyReporter::new(
        requests,
        channels,
        Arc::clone(&gateway),
    ));
    let runner = JobRunner::new(
        Arc::clone(&lock),
        scanner,
        reporter,
        config.lock.clone(),
        config.scheduler.clone(),
    );

    let ct = CancellationToken::new();
    let job_handles = runner.spawn(&ct);
    info!("scheduled jobs started");

    let server_ct = ct.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = threadkeeper::server::serve(config.http_port, router, server_ct).await {
            error!(%err, "event webhook failed");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = lock.release().await {
        error!(%err, "failed to release scheduler lock on shutdown");
    }

    for handle in job_handles {
        let _ = handle.await;
    }
    let _ = server_handle.await;
    info!("threadkeeper shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
