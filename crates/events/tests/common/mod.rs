//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use herald_core::pacing::PacingConfig;
use herald_core::rate_limit::RateLimitConfig;
use herald_core::retry::RetryPolicy;
use herald_events::analytics::{AnalyticsAggregator, AnalyticsConfig};
use herald_events::delivery::transport::{EmailTransport, OutgoingEmail, TransportError};
use herald_events::store::memory::{MemoryStore, MemoryUser};
use herald_events::{
    AudienceResolver, ChangeFeed, DispatcherConfig, EmailChannel, EmailRenderer,
    EngagementRecorder, NotificationDispatcher, RealtimeDispatcher,
};
use tokio::time::Instant;

/// Records every message; addresses containing "bounce" are rejected.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, Instant)>>,
}

impl RecordingTransport {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn instants(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to.clone(), Instant::now()));
        if email.to.contains("bounce") {
            return Err(TransportError::Rejected {
                status: 550,
                message: "mailbox unavailable".into(),
            });
        }
        Ok(format!("<{}@relay>", email.to))
    }
}

pub struct Pipeline {
    pub feed: ChangeFeed,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<RecordingTransport>,
    pub email: Arc<EmailChannel>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub realtime: RealtimeDispatcher,
    pub recorder: EngagementRecorder,
    pub analytics: AnalyticsAggregator,
}

/// Generous caps so only pacing shapes the timing.
pub fn open_limits() -> RateLimitConfig {
    RateLimitConfig {
        per_minute: 1_000,
        per_hour: 10_000,
        min_delay: Duration::ZERO,
    }
}

pub fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
    }
}

/// `users` active users with ids `1..=users`, each with an email address.
pub fn pipeline(users: i64) -> Pipeline {
    let feed = ChangeFeed::default();
    let store = Arc::new(MemoryStore::new(feed.clone()));
    for id in 1..=users {
        store.add_user(
            MemoryUser::new(id, format!("Learner {id}")).with_email(format!("learner{id}@example.com")),
        );
    }

    let transport = Arc::new(RecordingTransport::default());
    let email = Arc::new(EmailChannel::new(
        transport.clone(),
        store.clone(),
        EmailRenderer::default(),
        open_limits(),
        PacingConfig::default(),
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        AudienceResolver::new(store.clone()),
        store.clone(),
        Some(email.clone()),
        DispatcherConfig::default(),
    ));
    let realtime = RealtimeDispatcher::new(store.clone(), feed.clone());
    let recorder = EngagementRecorder::new(store.clone());
    let analytics = AnalyticsAggregator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        AnalyticsConfig::default(),
    );

    Pipeline {
        feed,
        store,
        transport,
        email,
        dispatcher,
        realtime,
        recorder,
        analytics,
    }
}
