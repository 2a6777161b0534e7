//! End-to-end router flows: webhook-shaped events through classification,
//! routing, and persistence.
//!
//! Validates:
//! - Request creation with message-derived types and the no-category nudge
//! - Reply-driven new → working transitions
//! - Completion-reaction close/reopen round trips
//! - Start-work reactions and alias-resolved category reactions
//! - Bot/system-user filtering and untracked-channel/message skips

use std::sync::Arc;

use serde_json::json;
use threadkeeper::events::classifier::{RawEvent, DELETED_MESSAGE_TEXT};
use threadkeeper::events::router::EventRouter;
use threadkeeper::models::request::RequestStatus;
use threadkeeper::persistence::channel_repo::ChannelRepo;
use threadkeeper::persistence::request_repo::RequestRepo;

use super::support::{seeded_stores, MockGateway};

struct Fixture {
    requests: RequestRepo,
    #[allow(dead_code)]
    channels: ChannelRepo,
    gateway: Arc<MockGateway>,
    router: EventRouter,
}

async fn fixture() -> Fixture {
    let (requests, channels) = seeded_stores().await;
    let gateway = Arc::new(MockGateway::default());
    let router = EventRouter::new(
        requests.clone(),
        channels.clone(),
        Arc::clone(&gateway) as Arc<dyn threadkeeper::slack::api::ChatGateway>,
        "UBOT",
        "acme",
    );
    Fixture {
        requests,
        channels,
        gateway,
        router,
    }
}

fn event(value: serde_json::Value) -> RawEvent {
    serde_json::from_value(value).expect("event decodes")
}

fn root_message(ts: &str, user: &str, emoji: Option<&str>) -> RawEvent {
    let elements = match emoji {
        Some(name) => json!([
            {"type": "emoji", "name": name},
            {"type": "text", "text": " prod is broken"}
        ]),
        None => json!([{"type": "text", "text": "prod is broken"}]),
    };
    event(json!({
        "type": "message",
        "channel": "C1",
        "ts": ts,
        "user": user,
        "blocks": [{
            "type": "rich_text",
            "elements": [{"type": "rich_text_section", "elements": elements}]
        }]
    }))
}

fn reaction(kind: &str, ts: &str, user: &str, name: &str) -> RawEvent {
    event(json!({
        "type": kind,
        "user": user,
        "reaction": name,
        "event_ts": "500.000000",
        "item": {"channel": "C1", "ts": ts}
    }))
}

#[tokio::test]
async fn new_message_with_category_creates_request_without_nudge() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("beetle")))
        .await
        .expect("handle");

    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("created");
    assert_eq!(request.status, RequestStatus::New);
    assert_eq!(request.request_types.message, vec!["bug"]);
    assert_eq!(request.requestor_id, "U100");
    assert_eq!(request.requestor_email.as_deref(), Some("dev@example.com"));
    assert_eq!(
        request.permalink,
        "https://acme.slack.com/archives/C1/p100000000"
    );
    assert!(fx.gateway.sent_replies().is_empty());
    assert!(fx.gateway.sent_block_replies().is_empty());
}

#[tokio::test]
async fn new_message_without_category_gets_the_nudge_with_legend() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", None))
        .await
        .expect("handle");

    let replies = fx.gateway.sent_block_replies();
    assert_eq!(replies.len(), 1);
    let (channel, thread_ts, blocks, fallback) = &replies[0];
    assert_eq!(channel, "C1");
    assert_eq!(thread_ts, "100.000000");
    assert!(fallback.contains("category emoji"));

    // Nudge text first, then the legend of category emojis and meanings.
    let sections = blocks.as_array().expect("block array");
    assert_eq!(sections.len(), 2);
    assert_eq!(
        sections[0]["text"]["text"].as_str().expect("nudge text"),
        "Please tag your request with a category emoji."
    );
    let legend = sections[1]["text"]["text"].as_str().expect("legend text");
    assert!(legend.contains(":bug: defect report"));
    assert!(legend.contains(":question: open question"));
}

#[tokio::test]
async fn edit_keeps_reaction_types_and_skips_the_nudge() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");
    fx.router
        .handle(&reaction("reaction_added", "100.000000", "U200", "question"))
        .await
        .expect("type reaction");

    let edit = event(json!({
        "type": "message",
        "subtype": "message_changed",
        "channel": "C1",
        "message": {
            "ts": "100.000000",
            "user": "U100",
            "text": "now without any emoji",
            "blocks": [{
                "type": "rich_text",
                "elements": [{
                    "type": "rich_text_section",
                    "elements": [{"type": "text", "text": "now without any emoji"}]
                }]
            }]
        }
    }));
    fx.router.handle(&edit).await.expect("edit");

    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert!(request.request_types.message.is_empty());
    assert_eq!(request.request_types.reaction, vec!["question"]);
    // The nudge is reserved for brand-new messages.
    assert!(fx.gateway.sent_replies().is_empty());
    assert!(fx.gateway.sent_block_replies().is_empty());
}

#[tokio::test]
async fn reply_from_another_user_starts_work() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");

    let reply = event(json!({
        "type": "message",
        "channel": "C1",
        "ts": "150.000000",
        "thread_ts": "100.000000",
        "user": "U200",
        "blocks": [{"type": "rich_text", "elements": []}]
    }));
    fx.router.handle(&reply).await.expect("reply");

    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.status, RequestStatus::Working);
    assert!(request.started_at.is_some());
    assert!(fx
        .requests
        .get_reply("C1", "150.000000")
        .await
        .expect("reply stored")
        .is_some());
}

#[tokio::test]
async fn reply_from_the_requestor_does_not_start_work() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");

    let reply = event(json!({
        "type": "message",
        "channel": "C1",
        "ts": "150.000000",
        "thread_ts": "100.000000",
        "user": "U100",
        "blocks": []
    }));
    fx.router.handle(&reply).await.expect("reply");

    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.status, RequestStatus::New);
    assert!(request.started_at.is_none());
}

#[tokio::test]
async fn completion_reaction_round_trip_reopens_the_request() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");

    fx.router
        .handle(&reaction(
            "reaction_added",
            "100.000000",
            "U200",
            "white_check_mark",
        ))
        .await
        .expect("close");
    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.status, RequestStatus::Completed);
    assert!(request.completed_at.is_some());
    assert!(request.completion_invariant_holds());

    fx.router
        .handle(&reaction(
            "reaction_removed",
            "100.000000",
            "U200",
            "white_check_mark",
        ))
        .await
        .expect("reopen");
    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.status, RequestStatus::Working);
    assert!(request.completed_at.is_none());
    assert!(request.completion_reactions.is_empty());
    assert!(request.completion_invariant_holds());
}

#[tokio::test]
async fn start_work_reaction_respects_the_requestor_guard() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");

    fx.router
        .handle(&reaction("reaction_added", "100.000000", "U100", "eyes"))
        .await
        .expect("own reaction");
    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.status, RequestStatus::New);

    fx.router
        .handle(&reaction("reaction_added", "100.000000", "U200", "eyes"))
        .await
        .expect("other reaction");
    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.status, RequestStatus::Working);
}

#[tokio::test]
async fn alias_reactions_record_the_canonical_category() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", None))
        .await
        .expect("create");

    fx.router
        .handle(&reaction("reaction_added", "100.000000", "U200", "beetle"))
        .await
        .expect("alias add");
    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.request_types.reaction, vec!["bug"]);

    fx.router
        .handle(&reaction("reaction_removed", "100.000000", "U200", "beetle"))
        .await
        .expect("alias remove");
    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert!(request.request_types.reaction.is_empty());
}

#[tokio::test]
async fn unrecognized_reactions_change_nothing() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");

    fx.router
        .handle(&reaction("reaction_added", "100.000000", "U200", "tada"))
        .await
        .expect("unknown reaction");
    let request = fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.status, RequestStatus::New);
    assert!(request.request_types.reaction.is_empty());
    assert!(request.completion_reactions.is_empty());
}

#[tokio::test]
async fn reactions_on_untracked_messages_are_ignored() {
    let fx = fixture().await;
    fx.router
        .handle(&reaction(
            "reaction_added",
            "777.000000",
            "U200",
            "white_check_mark",
        ))
        .await
        .expect("ignored");
    assert!(fx
        .requests
        .get("C1", "777.000000")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn bot_authored_messages_are_skipped() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "UBOT", Some("bug")))
        .await
        .expect("skip");
    assert!(fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn system_deletion_still_removes_the_request() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");

    // A system-authored plain message is ignored.
    fx.router
        .handle(&root_message("200.000000", "USLACKBOT", None))
        .await
        .expect("system message skipped");
    assert!(fx
        .requests
        .get("C1", "200.000000")
        .await
        .expect("get")
        .is_none());

    // But a system-authored removal of a tracked root still deletes it.
    let removal = event(json!({
        "type": "message",
        "subtype": "message_changed",
        "channel": "C1",
        "message": {"ts": "100.000000", "user": "USLACKBOT", "text": DELETED_MESSAGE_TEXT}
    }));
    fx.router.handle(&removal).await.expect("removal");
    assert!(fx
        .requests
        .get("C1", "100.000000")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn events_for_unregistered_channels_are_skipped() {
    let fx = fixture().await;
    let foreign = event(json!({
        "type": "message",
        "channel": "C9",
        "ts": "100.000000",
        "user": "U100",
        "blocks": []
    }));
    fx.router.handle(&foreign).await.expect("skip");
    assert!(fx
        .requests
        .get("C9", "100.000000")
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn form_trigger_emoji_starts_a_form() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("memo")))
        .await
        .expect("create");

    let answers = fx
        .requests
        .get_form_answers("C1", "100.000000")
        .await
        .expect("get");
    assert_eq!(answers, Some(std::collections::BTreeMap::new()));
}

#[tokio::test]
async fn form_trigger_reaction_starts_a_form_once() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("bug")))
        .await
        .expect("create");

    fx.router
        .handle(&reaction("reaction_added", "100.000000", "U200", "memo"))
        .await
        .expect("trigger");
    fx.requests
        .save_form_answer("C1", "100.000000", "q1", &["yes".to_owned()])
        .await
        .expect("answer");

    // A repeated trigger must not wipe recorded answers.
    fx.router
        .handle(&reaction("reaction_added", "100.000000", "U300", "memo"))
        .await
        .expect("repeat trigger");
    let answers = fx
        .requests
        .get_form_answers("C1", "100.000000")
        .await
        .expect("get")
        .expect("started");
    assert_eq!(answers.get("q1"), Some(&vec!["yes".to_owned()]));
}

#[tokio::test]
async fn edit_with_trigger_emoji_keeps_recorded_answers() {
    let fx = fixture().await;
    fx.router
        .handle(&root_message("100.000000", "U100", Some("memo")))
        .await
        .expect("create");
    fx.requests
        .save_form_answer("C1", "100.000000", "q1", &["yes".to_owned()])
        .await
        .expect("answer");

    // Editing the root message while the trigger emoji is still present
    // must not reset the form.
    let edit = event(json!({
        "type": "message",
        "subtype": "message_changed",
        "channel": "C1",
        "message": {
            "ts": "100.000000",
            "user": "U100",
            "text": "updated text",
            "blocks": [{
                "type": "rich_text",
                "elements": [{
                    "type": "rich_text_section",
                    "elements": [
                        {"type": "emoji", "name": "memo"},
                        {"type": "text", "text": " updated text"}
                    ]
                }]
            }]
        }
    }));
    fx.router.handle(&edit).await.expect("edit");

    let answers = fx
        .requests
        .get_form_answers("C1", "100.000000")
        .await
        .expect("get")
        .expect("started");
    assert_eq!(answers.get("q1"), Some(&vec!["yes".to_owned()]));
}
