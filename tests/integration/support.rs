//! Shared fixtures: an in-memory chat gateway and channel setup helpers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use threadkeeper::models::channel::{
    ChannelSettings, FeatureFlag, IdleThreadPolicy, TypeCatalog, TypeEmoji,
};
use threadkeeper::persistence::channel_repo::ChannelRepo;
use threadkeeper::persistence::db;
use threadkeeper::persistence::request_repo::RequestRepo;
use threadkeeper::slack::api::{ChannelMessage, ChatGateway, HistoryPage, UserProfile};
use threadkeeper::Result;

pub const REMINDER_TEXT: &str = "Is this still needed? Reply or it will be closed.";
pub const CLOSE_TEXT: &str = "Closing this thread as idle.";

/// Records outbound calls and serves canned history, for asserting on
/// router and scanner behavior without a network.
#[derive(Default)]
pub struct MockGateway {
    pub replies: Mutex<Vec<(String, String, String)>>,
    pub block_replies: Mutex<Vec<(String, String, serde_json::Value, String)>>,
    pub reactions: Mutex<Vec<(String, String, String)>>,
    pub posts: Mutex<Vec<(String, serde_json::Value, String)>>,
    pub history_pages: Mutex<VecDeque<HistoryPage>>,
    pub thread_replies: Mutex<HashMap<String, Vec<ChannelMessage>>>,
}

impl MockGateway {
    pub fn with_history(pages: Vec<HistoryPage>) -> Self {
        Self {
            history_pages: Mutex::new(pages.into()),
            ..Self::default()
        }
    }

    pub fn set_thread(&self, thread_ts: &str, messages: Vec<ChannelMessage>) {
        self.thread_replies
            .lock()
            .expect("lock")
            .insert(thread_ts.to_owned(), messages);
    }

    pub fn sent_replies(&self) -> Vec<(String, String, String)> {
        self.replies.lock().expect("lock").clone()
    }

    pub fn sent_block_replies(&self) -> Vec<(String, String, serde_json::Value, String)> {
        self.block_replies.lock().expect("lock").clone()
    }

    pub fn added_reactions(&self) -> Vec<(String, String, String)> {
        self.reactions.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChatGateway for MockGateway {
    async fn send_reply(&self, channel_id: &str, thread_ts: &str, text: &str) -> Result<()> {
        self.replies.lock().expect("lock").push((
            channel_id.to_owned(),
            thread_ts.to_owned(),
            text.to_owned(),
        ));
        Ok(())
    }

    async fn send_reply_blocks(
        &self,
        channel_id: &str,
        thread_ts: &str,
        blocks: &serde_json::Value,
        fallback_text: &str,
    ) -> Result<()> {
        self.block_replies.lock().expect("lock").push((
            channel_id.to_owned(),
            thread_ts.to_owned(),
            blocks.clone(),
            fallback_text.to_owned(),
        ));
        Ok(())
    }

    async fn post_message(
        &self,
        channel_id: &str,
        blocks: &serde_json::Value,
        fallback_text: &str,
    ) -> Result<()> {
        self.posts.lock().expect("lock").push((
            channel_id.to_owned(),
            blocks.clone(),
            fallback_text.to_owned(),
        ));
        Ok(())
    }

    async fn add_reaction(&self, channel_id: &str, ts: &str, name: &str) -> Result<()> {
        self.reactions.lock().expect("lock").push((
            channel_id.to_owned(),
            ts.to_owned(),
            name.to_owned(),
        ));
        Ok(())
    }

    async fn fetch_history(
        &self,
        _channel_id: &str,
        _oldest: f64,
        _cursor: Option<&str>,
    ) -> Result<HistoryPage> {
        Ok(self
            .history_pages
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_default())
    }

    async fn fetch_replies(
        &self,
        _channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<ChannelMessage>> {
        Ok(self
            .thread_replies
            .lock()
            .expect("lock")
            .get(thread_ts)
            .cloned()
            .unwrap_or_default())
    }

    async fn user_profile(&self, _user_id: &str) -> Result<UserProfile> {
        Ok(UserProfile {
            email: Some("dev@example.com".to_owned()),
            team: Some("T1".to_owned()),
        })
    }

    async fn auth_test(&self) -> Result<String> {
        Ok("UBOT".to_owned())
    }
}

/// Fully-featured settings: category catalog with an alias, start-work and
/// completion reactions, a form trigger, and an idle policy.
pub fn full_settings() -> ChannelSettings {
    let mut emojis = BTreeMap::new();
    emojis.insert(
        "bug".to_owned(),
        TypeEmoji {
            alias: Some("beetle".to_owned()),
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

    let mut settings = ChannelSettings {
        types: TypeCatalog {
            emojis,
            not_selected_response: "Please tag your request with a category emoji.".to_owned(),
        },
        start_work_reactions: vec!["eyes".to_owned()],
        completion_reactions: vec!["white_check_mark".to_owned()],
        close_idle_threads: Some(IdleThreadPolicy {
            reminder_message: REMINDER_TEXT.to_owned(),
            close_message: CLOSE_TEXT.to_owned(),
            scan_limit_days: 7,
            close_after_creation_hours: 24,
            reminder_grace_period_hours: 12,
            close_grace_period_hours: 24,
        }),
        ..ChannelSettings::default()
    };
    settings.features.types = FeatureFlag { enabled: true };
    settings.features.start_work_reactions = FeatureFlag { enabled: true };
    settings.features.completion_reactions = FeatureFlag { enabled: true };
    settings.features.close_idle_threads = FeatureFlag { enabled: true };
    settings.features.question_form = FeatureFlag { enabled: true };
    settings.question_form.triggers = vec!["memo".to_owned()];
    settings
}

/// In-memory database with one registered channel `C1` named `help`.
pub async fn seeded_stores() -> (RequestRepo, ChannelRepo) {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let requests = RequestRepo::new(Arc::clone(&db));
    let channels = ChannelRepo::new(db);
    channels
        .register("C1", "help", &full_settings())
        .await
        .expect("register");
    (requests, channels)
}
