//! Unit tests for Block Kit payload builders.

use std::collections::BTreeMap;

use serde_json::json;
use threadkeeper::models::channel::{TypeCatalog, TypeEmoji};
use threadkeeper::slack::blocks::{
    emoji_legend, first_block_text, header, section, sections_for_lines, SECTION_TEXT_LIMIT,
};
use threadkeeper::slack::permalink;

#[test]
fn section_and_header_shapes() {
    let section = section("hello *there*");
    assert_eq!(section["type"], "section");
    assert_eq!(section["text"]["type"], "mrkdwn");
    assert_eq!(section["text"]["text"], "hello *there*");

    let header = header("Daily report");
    assert_eq!(header["type"], "header");
    assert_eq!(header["text"]["type"], "plain_text");
}

#[test]
fn legend_lists_each_emoji_with_its_meaning() {
    let mut emojis = BTreeMap::new();
    emojis.insert(
        "bug".to_owned(),
        TypeEmoji {
            alias: None,
            meaning: Some("defect report".to_owned()),
        },
    );
    emojis.insert(
        "question".to_owned(),
        TypeEmoji {
            alias: None,
            meaning: Some("open question".to_owned()),
        },
    );
    let catalog = TypeCatalog {
        emojis,
        not_selected_response: String::new(),
    };

    let legend = emoji_legend(&catalog);
    let text = legend["text"]["text"].as_str().expect("text");
    assert_eq!(text, ":bug: defect report\n:question: open question");
}

#[test]
fn long_line_lists_split_into_multiple_sections() {
    let lines: Vec<String> = (0..5).map(|i| format!("{i}{}", "x".repeat(1200))).collect();
    let sections = sections_for_lines(&lines);

    assert!(sections.len() > 1);
    for block in &sections {
        let text = block["text"]["text"].as_str().expect("text");
        assert!(text.len() <= SECTION_TEXT_LIMIT);
    }
    let combined: Vec<String> = sections
        .iter()
        .flat_map(|b| {
            b["text"]["text"]
                .as_str()
                .expect("text")
                .lines()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(combined, lines);
}

#[test]
fn empty_line_list_produces_no_sections() {
    assert!(sections_for_lines(&[]).is_empty());
}

#[test]
fn first_block_text_reads_the_leading_section() {
    let blocks = json!([
        {"type": "section", "text": {"type": "mrkdwn", "text": "still needed?"}},
        {"type": "divider"}
    ]);
    assert_eq!(first_block_text(&blocks).as_deref(), Some("still needed?"));
    assert_eq!(first_block_text(&json!([])), None);
    assert_eq!(first_block_text(&json!({"not": "an array"})), None);
}

#[test]
fn permalinks_drop_the_timestamp_dot() {
    assert_eq!(
        permalink("acme", "C042", "1700000000.000100"),
        "https://acme.slack.com/archives/C042/p1700000000000100"
    );
}
