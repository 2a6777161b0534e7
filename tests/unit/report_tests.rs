//! Unit tests for daily-report scheduling helpers.
//!
//! Validates:
//! - Wall-clock and UTC-offset parsing
//! - Business-day arithmetic across weekends
//! - Schedule due checks against trigger time and last-sent date
//! - Local-day epoch bounds

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use threadkeeper::models::channel::ReportSchedule;
use threadkeeper::scheduler::report::{
    day_bounds, is_business_day, parse_local_time, parse_utc_offset, previous_business_day,
    schedule_due,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("time")
}

#[test]
fn local_time_parsing() {
    assert_eq!(parse_local_time("7:00"), Some(time(7, 0)));
    assert_eq!(parse_local_time("18:30"), Some(time(18, 30)));
    assert_eq!(parse_local_time("25:00"), None);
    assert_eq!(parse_local_time("noon"), None);
    assert_eq!(parse_local_time(""), None);
}

#[test]
fn utc_offset_parsing() {
    assert_eq!(parse_utc_offset(""), FixedOffset::east_opt(0));
    assert_eq!(parse_utc_offset("+02:00"), FixedOffset::east_opt(2 * 3600));
    assert_eq!(
        parse_utc_offset("-05:30"),
        FixedOffset::east_opt(-(5 * 3600 + 30 * 60))
    );
    assert_eq!(parse_utc_offset("02:00"), None);
    assert_eq!(parse_utc_offset("+0200"), None);
}

#[test]
fn weekends_are_not_business_days() {
    assert!(is_business_day(date(2026, 8, 28))); // Friday
    assert!(!is_business_day(date(2026, 8, 29))); // Saturday
    assert!(!is_business_day(date(2026, 8, 30))); // Sunday
    assert!(is_business_day(date(2026, 8, 31))); // Monday
}

#[test]
fn previous_business_day_skips_the_weekend() {
    assert_eq!(previous_business_day(date(2026, 8, 31)), date(2026, 8, 28));
    assert_eq!(previous_business_day(date(2026, 8, 27)), date(2026, 8, 26));
    // From a Sunday, the previous business day is Friday.
    assert_eq!(previous_business_day(date(2026, 8, 30)), date(2026, 8, 28));
}

#[test]
fn schedule_fires_after_trigger_and_only_once_per_day() {
    let today = date(2026, 8, 31);
    let schedule = ReportSchedule {
        local_time: "7:00".to_owned(),
        last_report_date: None,
    };

    assert!(!schedule_due(&schedule, time(6, 59), today));
    assert!(schedule_due(&schedule, time(7, 0), today));
    assert!(schedule_due(&schedule, time(23, 0), today));

    let sent = ReportSchedule {
        local_time: "7:00".to_owned(),
        last_report_date: Some(today),
    };
    assert!(!schedule_due(&sent, time(8, 0), today));
    // A stamp from a prior day does not suppress today's report.
    let stale = ReportSchedule {
        local_time: "7:00".to_owned(),
        last_report_date: Some(date(2026, 8, 28)),
    };
    assert!(schedule_due(&stale, time(8, 0), today));
}

#[test]
fn unparseable_trigger_never_fires() {
    let schedule = ReportSchedule {
        local_time: "sometime".to_owned(),
        last_report_date: None,
    };
    assert!(!schedule_due(&schedule, time(12, 0), date(2026, 8, 31)));
}

#[test]
fn day_bounds_span_one_local_day() {
    let offset = FixedOffset::east_opt(2 * 3600).expect("offset");
    let (start, end) = day_bounds(date(2026, 8, 31), offset);
    assert!((end - start - 86_400.0).abs() < 0.001);

    // Midnight local at +02:00 is 22:00 UTC the night before.
    let utc = FixedOffset::east_opt(0).expect("utc");
    let (utc_start, _) = day_bounds(date(2026, 8, 31), utc);
    assert!((utc_start - start - 7200.0).abs() < 0.001);
}
