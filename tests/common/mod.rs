//! Shared test harness: a temp-file database plus in-memory stub
//! implementations of the external collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::TempDir;

use topic_engine::db::{Archetype, NewTopic, Post, Topic};
use topic_engine::external::{
    IdentityService, JobScheduler, ModeratorPoster, NotificationSender, RateLimiter, ResolvedUser,
    TextProcessor,
};
use topic_engine::{Collaborators, Database, EngineConfig, TopicEngine};

// ========== Identity ==========

#[derive(Default)]
pub struct StubIdentity {
    users: Mutex<HashMap<String, ResolvedUser>>,
    emails: Mutex<HashMap<String, ResolvedUser>>,
    staff: Mutex<HashSet<i64>>,
    hidden_topics: Mutex<HashSet<(i64, i64)>>,
}

impl StubIdentity {
    pub fn add_user(&self, identifier: &str, user: ResolvedUser) {
        if let Some(email) = &user.email {
            self.emails.lock().unwrap().insert(email.clone(), user.clone());
        }
        self.users.lock().unwrap().insert(identifier.to_string(), user);
    }

    pub fn make_staff(&self, user_id: i64) {
        self.staff.lock().unwrap().insert(user_id);
    }

    pub fn hide_topic_from(&self, user_id: i64, topic_id: i64) {
        self.hidden_topics.lock().unwrap().insert((user_id, topic_id));
    }
}

#[async_trait]
impl IdentityService for StubIdentity {
    async fn resolve_user(&self, identifier: &str) -> Result<Option<ResolvedUser>> {
        Ok(self.users.lock().unwrap().get(identifier).cloned())
    }

    async fn user_for_email(&self, email: &str) -> Result<Option<ResolvedUser>> {
        Ok(self.emails.lock().unwrap().get(email).cloned())
    }

    async fn can_see_topic(&self, user_id: i64, topic_id: i64) -> Result<bool> {
        Ok(!self.hidden_topics.lock().unwrap().contains(&(user_id, topic_id)))
    }

    async fn is_staff(&self, user_id: i64) -> Result<bool> {
        Ok(self.staff.lock().unwrap().contains(&user_id))
    }
}

// ========== Rate limiter ==========

/// Counts credits per (user, action); `balance` is the net acquired count.
#[derive(Default)]
pub struct CountingLimiter {
    credits: Mutex<HashMap<(i64, String), i64>>,
}

impl CountingLimiter {
    pub fn balance(&self, user_id: i64, action: &str) -> i64 {
        self.credits
            .lock()
            .unwrap()
            .get(&(user_id, action.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for CountingLimiter {
    async fn acquire(&self, user_id: i64, action: &str, max_per_day: u32) -> Result<()> {
        let mut credits = self.credits.lock().unwrap();
        let entry = credits.entry((user_id, action.to_string())).or_insert(0);
        if *entry >= i64::from(max_per_day) {
            bail!("daily limit of {max_per_day} reached for {action}");
        }
        *entry += 1;
        Ok(())
    }

    async fn rollback(&self, user_id: i64, action: &str) -> Result<()> {
        let mut credits = self.credits.lock().unwrap();
        let entry = credits.entry((user_id, action.to_string())).or_insert(0);
        *entry -= 1;
        Ok(())
    }
}

// ========== Job scheduler ==========

#[derive(Default)]
pub struct RecordingScheduler {
    pub scheduled: Mutex<Vec<(String, DateTime<Utc>, Value)>>,
    pub cancelled: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn schedule(&self, job: &str, run_at: DateTime<Utc>, payload: Value) -> Result<()> {
        self.scheduled.lock().unwrap().push((job.to_string(), run_at, payload));
        Ok(())
    }

    async fn cancel(&self, job: &str, key: Value) -> Result<()> {
        self.cancelled.lock().unwrap().push((job.to_string(), key));
        Ok(())
    }
}

// ========== Notifications ==========

#[derive(Default)]
pub struct RecordingNotifier {
    pub invite_emails: Mutex<Vec<(i64, i64)>>,
    pub moved_posts: Mutex<Vec<(Vec<i64>, i64, i64)>>,
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn enqueue_invite_email(&self, invite_id: i64, topic_id: i64) -> Result<()> {
        self.invite_emails.lock().unwrap().push((invite_id, topic_id));
        Ok(())
    }

    async fn notify_moved_posts(
        &self,
        user_ids: &[i64],
        source_topic_id: i64,
        destination_topic_id: i64,
    ) -> Result<()> {
        self.moved_posts
            .lock()
            .unwrap()
            .push((user_ids.to_vec(), source_topic_id, destination_topic_id));
        Ok(())
    }
}

// ========== Text processing ==========

pub struct PlainText;

impl TextProcessor for PlainText {
    fn sanitize_title(&self, raw: &str) -> String {
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn slug_for(&self, title: &str) -> String {
        title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect()
    }

    fn message(&self, key: &str, params: &[(&str, String)]) -> String {
        let mut out = key.to_string();
        for (name, value) in params {
            out.push_str(&format!(" {name}={value}"));
        }
        out
    }
}

// ========== Moderator posts ==========

#[derive(Default)]
pub struct RecordingModerator {
    pub posts: Mutex<Vec<(i64, i64, String, Option<i64>)>>,
}

#[async_trait]
impl ModeratorPoster for RecordingModerator {
    async fn create_action_post(
        &self,
        topic_id: i64,
        acting_user_id: i64,
        raw: &str,
        position: Option<i64>,
    ) -> Result<()> {
        self.posts
            .lock()
            .unwrap()
            .push((topic_id, acting_user_id, raw.to_string(), position));
        Ok(())
    }
}

// ========== Harness ==========

pub struct TestHarness {
    pub engine: Arc<TopicEngine>,
    pub identity: Arc<StubIdentity>,
    pub limiter: Arc<CountingLimiter>,
    pub scheduler: Arc<RecordingScheduler>,
    pub notifier: Arc<RecordingNotifier>,
    pub moderator: Arc<RecordingModerator>,
    _temp_dir: TempDir,
}

pub async fn setup() -> TestHarness {
    setup_with_config(EngineConfig::default()).await
}

pub async fn setup_with_config(config: EngineConfig) -> TestHarness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path).await.expect("Failed to create database");

    let identity = Arc::new(StubIdentity::default());
    let limiter = Arc::new(CountingLimiter::default());
    let scheduler = Arc::new(RecordingScheduler::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let moderator = Arc::new(RecordingModerator::default());

    let engine = Arc::new(TopicEngine::new(
        db,
        config,
        Collaborators {
            identity: identity.clone(),
            limiter: limiter.clone(),
            scheduler: scheduler.clone(),
            notifier: notifier.clone(),
            text: Arc::new(PlainText),
            moderator: moderator.clone(),
        },
    ));

    TestHarness {
        engine,
        identity,
        limiter,
        scheduler,
        notifier,
        moderator,
        _temp_dir: temp_dir,
    }
}

/// Create a regular topic owned by `user_id`.
pub async fn seed_topic(engine: &TopicEngine, user_id: i64, title: &str) -> Topic {
    engine
        .create_topic(&NewTopic {
            title: title.to_string(),
            user_id,
            category_id: None,
            archetype: Archetype::Regular,
        })
        .await
        .expect("Failed to create topic")
}

/// Create a private-message topic owned by `user_id`.
pub async fn seed_private_message(engine: &TopicEngine, user_id: i64, title: &str) -> Topic {
    engine
        .create_topic(&NewTopic {
            title: title.to_string(),
            user_id,
            category_id: None,
            archetype: Archetype::PrivateMessage,
        })
        .await
        .expect("Failed to create topic")
}

/// Add a post authored by `user_id`.
pub async fn seed_post(engine: &TopicEngine, topic_id: i64, user_id: i64, raw: &str) -> Post {
    engine
        .create_post(topic_id, user_id, raw)
        .await
        .expect("Failed to create post")
}
