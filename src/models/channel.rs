//! Per-channel settings document and feature gating.
//!
//! Each tracked channel carries one JSON settings document: feature flags,
//! the category-emoji vocabulary (with aliases), start-work and completion
//! reaction lists, the idle-thread policy, the question-form definition,
//! and daily-report schedules. Accessors are feature-gated the same way the
//! settings are consumed: a disabled feature reads as an empty default.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Single on/off feature switch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlag {
    /// Whether the feature is active for the channel.
    pub enabled: bool,
}

/// All per-channel feature switches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    /// Category-emoji tagging of requests.
    pub types: FeatureFlag,
    /// Start-work reaction handling.
    pub start_work_reactions: FeatureFlag,
    /// Guided question forms.
    pub question_form: FeatureFlag,
    /// Completion-reaction handling.
    pub completion_reactions: FeatureFlag,
    /// Idle-thread reminder/close scanning.
    pub close_idle_threads: FeatureFlag,
    /// Daily summary report.
    pub daily_report: FeatureFlag,
}

/// One category emoji entry: optional alias emoji and display meaning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TypeEmoji {
    /// Alternate emoji name resolving to the same category.
    pub alias: Option<String>,
    /// Human-readable description shown in the emoji legend.
    pub meaning: Option<String>,
}

/// Category-emoji vocabulary for a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TypeCatalog {
    /// Canonical emoji name → entry.
    pub emojis: BTreeMap<String, TypeEmoji>,
    /// Reply text posted when a new message carries no category emoji.
    pub not_selected_response: String,
}

impl TypeCatalog {
    /// Resolve an emoji name (canonical key or alias) to its canonical key.
    #[must_use]
    pub fn canonical_key(&self, name: &str) -> Option<String> {
        if self.emojis.contains_key(name) {
            return Some(name.to_owned());
        }
        self.emojis
            .iter()
            .find(|(_, entry)| entry.alias.as_deref() == Some(name))
            .map(|(key, _)| key.clone())
    }

    /// Whether the name is part of the vocabulary (key or alias).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.canonical_key(name).is_some()
    }

    /// Map a list of raw emoji names to deduplicated canonical keys.
    #[must_use]
    pub fn resolve_types(&self, names: &[String]) -> Vec<String> {
        let mut resolved: Vec<String> = Vec::new();
        for name in names {
            if let Some(key) = self.canonical_key(name) {
                if !resolved.contains(&key) {
                    resolved.push(key);
                }
            }
        }
        resolved
    }
}

/// Idle-thread reminder/close policy parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdleThreadPolicy {
    /// Text posted as the reminder reply.
    pub reminder_message: String,
    /// Text posted as the closing reply.
    pub close_message: String,
    /// History fetch floor, in days before "now".
    #[serde(default = "default_scan_limit_days")]
    pub scan_limit_days: u32,
    /// Minimum thread age before the scanner considers it at all.
    #[serde(default = "default_close_after_creation_hours")]
    pub close_after_creation_hours: u32,
    /// How stale the latest reply must be before (re-)reminding.
    #[serde(default = "default_reminder_grace_period_hours")]
    pub reminder_grace_period_hours: u32,
    /// How stale a posted reminder must be before closing.
    #[serde(default = "default_close_grace_period_hours")]
    pub close_grace_period_hours: u32,
}

fn default_scan_limit_days() -> u32 {
    7
}

fn default_close_after_creation_hours() -> u32 {
    24
}

fn default_reminder_grace_period_hours() -> u32 {
    12
}

fn default_close_grace_period_hours() -> u32 {
    24
}

/// Absolute epoch-second cutoffs derived from an [`IdleThreadPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleCutoffs {
    /// History fetch floor.
    pub time_filter: f64,
    /// Threads younger than this are not eligible.
    pub close_before: f64,
    /// Latest-reply staleness bound for reminding.
    pub reminder_grace_period: f64,
    /// Reminder staleness bound for closing.
    pub close_grace_period: f64,
}

impl IdleThreadPolicy {
    /// Derive the four absolute cutoff timestamps from a point in time.
    #[must_use]
    pub fn cutoffs(&self, now: DateTime<Utc>) -> IdleCutoffs {
        let epoch = |at: DateTime<Utc>| {
            #[allow(clippy::cast_precision_loss)]
            let seconds = at.timestamp_micros() as f64 / 1_000_000.0;
            seconds
        };
        IdleCutoffs {
            time_filter: epoch(now - Duration::days(i64::from(self.scan_limit_days))),
            close_before: epoch(now - Duration::hours(i64::from(self.close_after_creation_hours))),
            reminder_grace_period: epoch(
                now - Duration::hours(i64::from(self.reminder_grace_period_hours)),
            ),
            close_grace_period: epoch(
                now - Duration::hours(i64::from(self.close_grace_period_hours)),
            ),
        }
    }
}

/// One daily-report trigger: local wall-clock time plus last-sent marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportSchedule {
    /// Wall-clock trigger time, "HH:MM".
    pub local_time: String,
    /// Date the report was last sent for this schedule.
    pub last_report_date: Option<NaiveDate>,
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self {
            local_time: "7:00".into(),
            last_report_date: None,
        }
    }
}

/// Daily-report settings for a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DailyReportSettings {
    /// Channel the report is posted to; empty means the source channel.
    pub output_channel_id: String,
    /// Trigger schedules.
    pub schedules: Vec<ReportSchedule>,
    /// UTC offset for `local_time`, e.g. "+02:00"; empty means UTC.
    pub utc_offset: String,
}

/// One guided-form question definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Question {
    /// Question identifier.
    pub name: String,
    /// Title shown above the question.
    pub question_title: String,
    /// Interaction action identifier.
    pub action_id: String,
    /// Title shown above the options.
    pub options_title: String,
    /// Option label → follow-up labels.
    pub options: BTreeMap<String, Vec<String>>,
}

/// Guided question-form definition for a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuestionFormSettings {
    /// Form title.
    pub form_title: String,
    /// Emoji names that start a form when present on a message or reaction.
    pub triggers: Vec<String>,
    /// Ordered question list.
    pub questions: Vec<Question>,
}

/// Full per-channel settings document, stored as one JSON column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelSettings {
    /// Feature switches.
    pub features: FeatureFlags,
    /// Category-emoji vocabulary.
    pub types: TypeCatalog,
    /// Reactions that signal "I started working on this".
    pub start_work_reactions: Vec<String>,
    /// Question-form definition.
    pub question_form: QuestionFormSettings,
    /// Reactions that mark a request completed.
    pub completion_reactions: Vec<String>,
    /// Idle-thread policy; `None` when never configured.
    pub close_idle_threads: Option<IdleThreadPolicy>,
    /// Daily-report settings; `None` when never configured.
    pub daily_report: Option<DailyReportSettings>,
}

impl ChannelSettings {
    /// Category vocabulary, empty unless the types feature is enabled.
    #[must_use]
    pub fn type_catalog(&self) -> TypeCatalog {
        if self.features.types.enabled {
            self.types.clone()
        } else {
            TypeCatalog::default()
        }
    }

    /// Start-work reactions, empty unless the feature is enabled.
    #[must_use]
    pub fn active_start_work_reactions(&self) -> &[String] {
        if self.features.start_work_reactions.enabled {
            &self.start_work_reactions
        } else {
            &[]
        }
    }

    /// Completion reactions, empty unless the feature is enabled.
    ///
    /// List order is the configured order; the first element is treated as
    /// the primary completion emoji by the autoclose scanner.
    #[must_use]
    pub fn active_completion_reactions(&self) -> &[String] {
        if self.features.completion_reactions.enabled {
            &self.completion_reactions
        } else {
            &[]
        }
    }

    /// Idle-thread policy, `None` unless the feature is enabled and configured.
    #[must_use]
    pub fn idle_policy(&self) -> Option<&IdleThreadPolicy> {
        if self.features.close_idle_threads.enabled {
            self.close_idle_threads.as_ref()
        } else {
            None
        }
    }

    /// Daily-report settings, `None` unless the feature is enabled and configured.
    #[must_use]
    pub fn report_settings(&self) -> Option<&DailyReportSettings> {
        if self.features.daily_report.enabled {
            self.daily_report.as_ref()
        } else {
            None
        }
    }

    /// Whether a reaction belongs to the channel's recognized vocabulary:
    /// completion reactions plus category emoji keys and aliases.
    #[must_use]
    pub fn is_recognized_reaction(&self, name: &str) -> bool {
        self.active_completion_reactions()
            .iter()
            .any(|reaction| reaction == name)
            || self.type_catalog().contains(name)
    }

    /// Whether the emoji starts a guided form for this channel.
    #[must_use]
    pub fn is_form_trigger(&self, name: &str) -> bool {
        self.features.question_form.enabled
            && self.question_form.triggers.iter().any(|trigger| trigger == name)
    }
}

/// Persisted channel row: identity plus the settings document.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    /// Database row identifier.
    pub id: i64,
    /// Slack channel ID.
    pub channel_id: String,
    /// Human-readable channel name.
    pub channel_name: String,
    /// Settings document.
    pub settings: ChannelSettings,
    /// When the channel was registered.
    pub created_at: DateTime<Utc>,
    /// When the channel was deactivated; `None` while active.
    pub deactivated_at: Option<DateTime<Utc>>,
}
