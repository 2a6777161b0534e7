//! Block Kit payload builders for outbound messages.

use serde_json::{json, Value};

use crate::models::channel::TypeCatalog;

/// Longest text a single section block may carry.
pub const SECTION_TEXT_LIMIT: usize = 3000;

/// Plain mrkdwn section block.
#[must_use]
pub fn section(text: &str) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text }
    })
}

/// Header block.
#[must_use]
pub fn header(text: &str) -> Value {
    json!({
        "type": "header",
        "text": { "type": "plain_text", "text": text, "emoji": true }
    })
}

/// Divider block.
#[must_use]
pub fn divider() -> Value {
    json!({ "type": "divider" })
}

/// Legend of a channel's category emojis and their meanings, one per line.
#[must_use]
pub fn emoji_legend(catalog: &TypeCatalog) -> Value {
    let mut lines = Vec::new();
    for (name, entry) in &catalog.emojis {
        let meaning = entry.meaning.as_deref().unwrap_or("");
        lines.push(format!(":{name}: {meaning}"));
    }
    section(&lines.join("\n"))
}

/// Split lines into section blocks, each within the section text limit.
///
/// Lines themselves are never split; a line longer than the limit becomes a
/// section of its own (the API truncates it).
#[must_use]
pub fn sections_for_lines(lines: &[String]) -> Vec<Value> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in lines {
        if !current.is_empty() && current.len() + 1 + line.len() > SECTION_TEXT_LIMIT {
            blocks.push(section(&current));
            current.clear();
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        blocks.push(section(&current));
    }
    blocks
}

/// Text of the first section-like block, used to compare stored replies
/// against configured template texts.
#[must_use]
pub fn first_block_text(blocks: &Value) -> Option<String> {
    let first = blocks.as_array()?.first()?;
    first
        .get("text")
        .and_then(|t| t.get("text"))
        .and_then(|t| t.as_str())
        .map(str::to_owned)
}
