//! Daily summary report for tracked channels.
//!
//! Each channel may carry one or more report schedules, each a local
//! wall-clock trigger time. On business days, once the local time passes a
//! schedule's trigger and nothing was sent for that date yet, the reporter
//! posts a summary of the previous business day's requests and stamps the
//! schedule as sent.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use tracing::{info, warn};

use crate::models::channel::{ChannelRecord, DailyReportSettings, ReportSchedule};
use crate::models::request::{Request, RequestStatus};
use crate::persistence::channel_repo::ChannelRepo;
use crate::persistence::request_repo::RequestRepo;
use crate::slack::api::ChatGateway;
use crate::slack::blocks;
use crate::Result;

/// Generates and posts the per-channel daily summaries.
pub struct DailyReporter {
    requests: RequestRepo,
    channels: ChannelRepo,
    gateway: Arc<dyn ChatGateway>,
}

impl DailyReporter {
    /// Build a reporter over the given stores and gateway.
    #[must_use]
    pub fn new(requests: RequestRepo, channels: ChannelRepo, gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            requests,
            channels,
            gateway,
        }
    }

    /// Check every active channel's schedules against `now` and send the
    /// reports that are due. Per-channel failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` when the channel listing itself fails.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        for channel in self.channels.list_active().await? {
            let channel_id = channel.channel_id.clone();
            if let Err(err) = self.run_channel(&channel, now).await {
                warn!(channel_id, error = %err, "daily report failed for channel");
            }
        }
        Ok(())
    }

    async fn run_channel(&self, channel: &ChannelRecord, now: DateTime<Utc>) -> Result<()> {
        let Some(report) = channel.settings.report_settings() else {
            return Ok(());
        };
        let Some(offset) = parse_utc_offset(&report.utc_offset).or_else(|| FixedOffset::east_opt(0))
        else {
            return Ok(());
        };
        let local_now = now.with_timezone(&offset);
        if !is_business_day(local_now.date_naive()) {
            return Ok(());
        }

        for (index, schedule) in report.schedules.iter().enumerate() {
            if !schedule_due(schedule, local_now.time(), local_now.date_naive()) {
                continue;
            }
            self.send_report(channel, report, offset, local_now.date_naive())
                .await?;
            self.channels
                .mark_reported(&channel.channel_id, index, local_now.date_naive())
                .await?;
        }
        Ok(())
    }

    /// Build and post the summary of the previous business day.
    async fn send_report(
        &self,
        channel: &ChannelRecord,
        report: &DailyReportSettings,
        offset: FixedOffset,
        today: NaiveDate,
    ) -> Result<()> {
        let day = previous_business_day(today);
        let (start, end) = day_bounds(day, offset);
        let requests = self
            .requests
            .list_in_range(&channel.channel_id, start, end)
            .await?;

        let completed: Vec<&Request> = requests
            .iter()
            .filter(|r| r.status == RequestStatus::Completed)
            .collect();
        let open: Vec<&Request> = requests
            .iter()
            .filter(|r| r.status != RequestStatus::Completed)
            .collect();

        let title = format!("Daily report for #{} ({day})", channel.channel_name);
        let summary = format!(
            "{} requests tracked: {} completed, {} still open.",
            requests.len(),
            completed.len(),
            open.len()
        );

        let mut payload = vec![blocks::header(&title), blocks::section(&summary)];
        if !open.is_empty() {
            payload.push(blocks::divider());
            let lines: Vec<String> = open.iter().map(|r| open_item_line(r)).collect();
            payload.extend(blocks::sections_for_lines(&lines));
        }

        let output_channel = if report.output_channel_id.is_empty() {
            &channel.channel_id
        } else {
            &report.output_channel_id
        };
        info!(
            channel_id = %channel.channel_id,
            output_channel = %output_channel,
            day = %day,
            "posting daily report"
        );
        self.gateway
            .post_message(output_channel, &serde_json::Value::Array(payload), &title)
            .await
    }
}

/// One report line for a still-open request.
fn open_item_line(request: &Request) -> String {
    let types: Vec<&str> = request.request_types.all().into_iter().collect();
    let labels = if types.is_empty() {
        "untyped".to_owned()
    } else {
        types.join(", ")
    };
    let status = match request.status {
        RequestStatus::New => "new",
        RequestStatus::Working => "in progress",
        RequestStatus::Completed => "completed",
    };
    format!("<{}|request> from <@{}> [{labels}] {status}", request.permalink, request.requestor_id)
}

/// Whether a schedule should fire now: its trigger time has passed and it
/// was not already sent today.
#[must_use]
pub fn schedule_due(schedule: &ReportSchedule, local_time: NaiveTime, today: NaiveDate) -> bool {
    let Some(trigger) = parse_local_time(&schedule.local_time) else {
        return false;
    };
    local_time >= trigger && schedule.last_report_date != Some(today)
}

/// Parse a "H:MM" wall-clock string.
#[must_use]
pub fn parse_local_time(s: &str) -> Option<NaiveTime> {
    let (hours, minutes) = s.split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Parse a "+HH:MM" / "-HH:MM" offset string; empty means UTC.
#[must_use]
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    if s.is_empty() {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = if let Some(rest) = s.strip_prefix('+') {
        (1i32, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (-1i32, rest)
    } else {
        return None;
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Monday through Friday.
#[must_use]
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The closest business day strictly before `date`.
#[must_use]
pub fn previous_business_day(date: NaiveDate) -> NaiveDate {
    let mut day = date - Duration::days(1);
    while !is_business_day(day) {
        day -= Duration::days(1);
    }
    day
}

/// Epoch-second bounds of a local calendar day.
#[must_use]
pub fn day_bounds(day: NaiveDate, offset: FixedOffset) -> (f64, f64) {
    let start = day
        .and_time(NaiveTime::MIN)
        .and_local_timezone(offset)
        .single()
        .map_or(0, |dt| dt.timestamp());
    let end = start + 86_400;
    #[allow(clippy::cast_precision_loss)]
    (start as f64, end as f64 - 0.000_001)
}
