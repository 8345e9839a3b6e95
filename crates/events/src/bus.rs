//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`PlatformEvent`]s from the portal (content
//! publishing, assignments, feedback) to the notification router. It is
//! shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use herald_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const TRAINING_PUBLISHED: &str = "training.published";
pub const TRAINING_ASSIGNED: &str = "training.assigned";
pub const NEWS_PUBLISHED: &str = "news.published";
pub const FEEDBACK_SUBMITTED: &str = "feedback.submitted";

// ---------------------------------------------------------------------------
// PlatformEvent
// ---------------------------------------------------------------------------

/// Something that happened on the portal and may warrant notifications.
///
/// Built with [`PlatformEvent::new`] plus [`with_source`](Self::with_source),
/// [`with_actor`](Self::with_actor) and [`with_payload`](Self::with_payload),
/// or with one of the typed constructors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// Dot-separated event name, e.g. `"training.published"`.
    pub event_type: String,

    #[serde(default)]
    pub source_entity_type: Option<String>,

    #[serde(default)]
    pub source_entity_id: Option<DbId>,

    #[serde(default)]
    pub actor_user_id: Option<DbId>,

    /// Event-specific fields.
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl PlatformEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_entity_type: None,
            source_entity_id: None,
            actor_user_id: None,
            payload: empty_payload(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, entity_type: impl Into<String>, entity_id: DbId) -> Self {
        self.source_entity_type = Some(entity_type.into());
        self.source_entity_id = Some(entity_id);
        self
    }

    pub fn with_actor(mut self, user_id: DbId) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn training_published(training_id: DbId, title: &str, mandatory: bool) -> Self {
        Self::new(TRAINING_PUBLISHED)
            .with_source("training", training_id)
            .with_payload(serde_json::json!({ "title": title, "mandatory": mandatory }))
    }

    pub fn training_assigned(training_id: DbId, title: &str, user_ids: &[DbId]) -> Self {
        Self::new(TRAINING_ASSIGNED)
            .with_source("training", training_id)
            .with_payload(serde_json::json!({ "title": title, "user_ids": user_ids }))
    }

    pub fn news_published(article_id: DbId, title: &str) -> Self {
        Self::new(NEWS_PUBLISHED)
            .with_source("news", article_id)
            .with_payload(serde_json::json!({ "title": title }))
    }

    pub fn feedback_submitted(feedback_id: DbId, author_id: DbId, category: &str) -> Self {
        Self::new(FEEDBACK_SUBMITTED)
            .with_source("feedback", feedback_id)
            .with_actor(author_id)
            .with_payload(serde_json::json!({ "category": category }))
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

pub struct EventBus {
    sender: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    /// Receivers more than `capacity` events behind observe
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Events published with no subscriber are dropped.
    pub fn publish(&self, event: PlatformEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
