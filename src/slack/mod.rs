//! Slack Web API client and Block Kit payload builders.

pub mod api;
pub mod blocks;

/// Build a message permalink from the workspace name, channel, and timestamp.
#[must_use]
pub fn permalink(workspace: &str, channel_id: &str, ts: &str) -> String {
    let compact_ts = ts.replace('.', "");
    format!("https://{workspace}.slack.com/archives/{channel_id}/p{compact_ts}")
}
