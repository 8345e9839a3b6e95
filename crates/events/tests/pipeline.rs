//! End-to-end runs of the notification pipeline on the in-memory store.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use herald_core::audience::AudienceSpec;
use herald_core::engagement::EngagementAction;
use herald_core::error::CoreError;
use herald_core::notification::{NotificationPayload, NotificationTemplate, Priority};
use herald_core::pacing::PacingConfig;
use herald_core::rate_limit::RateLimitConfig;
use herald_core::scope::{DispatchScope, ScopeBasis};
use herald_events::store::memory::MemoryUser;
use herald_events::{
    ChangeEvent, DispatchOutcome, EmailChannel, EmailRenderer, InboxSession, RecordOutcome,
    SendOutcome,
};
use tokio::time::Instant;

use common::{fast_retries, pipeline};

fn announcement(title: &str, priority: Priority) -> NotificationTemplate {
    NotificationTemplate::new(
        title,
        "Please read before Monday",
        NotificationPayload::Announcement {
            action_url: Some("/announcements".into()),
        },
    )
    .with_priority(priority)
}

fn dispatched(outcome: DispatchOutcome) -> herald_events::DispatchReceipt {
    assert_matches!(outcome, DispatchOutcome::Dispatched(receipt) => receipt)
}

// ---------------------------------------------------------------------------
// Dispatch and scope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_to_everyone_is_classified_all_users() {
    let p = pipeline(50);
    let receipt = dispatched(
        p.dispatcher
            .dispatch(&AudienceSpec::All, &announcement("Office closed", Priority::Low))
            .await
            .unwrap(),
    );

    assert_eq!(receipt.notifications.len(), 50);
    assert!(receipt
        .notifications
        .iter()
        .all(|n| n.title == "Office closed" && n.message == "Please read before Monday"));

    let report = p
        .analytics
        .dispatch_scope(receipt.notifications[17].id)
        .await
        .unwrap();
    assert_eq!(report.recipients, 50);
    assert_eq!(report.active_users, 50);
    assert_eq!(report.scope, DispatchScope::AllUsers);
    assert_eq!(report.basis, ScopeBasis::DispatchId);
}

#[tokio::test]
async fn same_titled_dispatches_are_not_merged() {
    let p = pipeline(50);
    let template = announcement("Weekly digest", Priority::Low);
    let subset: Vec<i64> = (1..=10).collect();

    let small = dispatched(
        p.dispatcher
            .dispatch(&AudienceSpec::Explicit(subset), &template)
            .await
            .unwrap(),
    );
    p.dispatcher
        .dispatch(&AudienceSpec::All, &template)
        .await
        .unwrap();

    let report = p
        .analytics
        .dispatch_scope(small.notifications[0].id)
        .await
        .unwrap();
    assert_eq!(report.recipients, 10);
    assert_eq!(report.scope, DispatchScope::SpecificUsers);
}

#[tokio::test]
async fn legacy_rows_fall_back_to_sibling_inference() {
    let p = pipeline(10);
    let start = Utc::now();
    let mut first = None;
    for user in 1..=10 {
        let row = p.store.insert_legacy(
            user,
            "Welcome",
            "Glad to have you",
            NotificationPayload::Announcement { action_url: None },
            start + chrono::Duration::seconds(user * 3),
        );
        first.get_or_insert(row.id);
    }
    let stray = p.store.insert_legacy(
        4,
        "Welcome",
        "Glad to have you",
        NotificationPayload::Announcement { action_url: None },
        start + chrono::Duration::minutes(30),
    );

    let report = p.analytics.dispatch_scope(first.unwrap()).await.unwrap();
    assert_eq!(report.basis, ScopeBasis::InferredSiblings);
    assert_eq!(report.recipients, 10);
    assert_eq!(report.scope, DispatchScope::AllUsers);

    let report = p.analytics.dispatch_scope(stray.id).await.unwrap();
    assert_eq!(report.recipients, 1);
    assert_eq!(report.scope, DispatchScope::SpecificUsers);
}

#[tokio::test]
async fn explicit_audience_is_deduplicated_against_the_directory() {
    let p = pipeline(10);
    let spec = AudienceSpec::Explicit(vec![3, 3, 7, 999, 7]);

    let preview = p.dispatcher.preview(&spec).await.unwrap();
    let mut recipients = preview.recipients.clone();
    recipients.sort_unstable();
    assert_eq!(recipients, vec![3, 7]);

    let receipt = dispatched(
        p.dispatcher
            .dispatch_resolved(&preview, &announcement("Hello", Priority::Low))
            .await
            .unwrap(),
    );
    assert_eq!(receipt.notifications.len(), 2);
}

#[tokio::test]
async fn unmatched_audience_creates_no_rows() {
    let p = pipeline(3);
    let outcome = p
        .dispatcher
        .dispatch(
            &AudienceSpec::Explicit(vec![100, 200]),
            &announcement("Nobody", Priority::High),
        )
        .await
        .unwrap();
    assert_matches!(outcome, DispatchOutcome::NoRecipients(stats) if stats.total == 3);
    assert_eq!(p.store.write_attempts(), 0);
}

// ---------------------------------------------------------------------------
// Email relay
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn twelve_item_batch_is_paced_and_fully_reported() {
    let p = pipeline(11);
    p.store
        .add_user(MemoryUser::new(12, "Bounces").with_email("bounce@example.com"));

    let started = Instant::now();
    let receipt = dispatched(
        p.dispatcher
            .dispatch(&AudienceSpec::All, &announcement("Mandatory", Priority::High))
            .await
            .unwrap(),
    );
    let report = receipt.email.expect("high priority is relayed").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1500) * 11);
    assert_eq!(report.attempts.len(), 12);
    assert_eq!(report.sent, 11);
    assert_eq!(report.failed, 1);
    assert_eq!(p.transport.count(), 12);

    let bounced = report
        .attempts
        .iter()
        .find(|a| a.recipient_id == 12)
        .unwrap();
    assert!(!bounced.success());
    assert!(bounced.error().is_some());
    assert!(report
        .attempts
        .iter()
        .filter(|a| a.recipient_id != 12)
        .all(|a| a.success()));
}

#[tokio::test(start_paused = true)]
async fn relay_never_exceeds_per_minute_cap() {
    let p = pipeline(8);
    let channel = EmailChannel::new(
        p.transport.clone(),
        p.store.clone(),
        EmailRenderer::default(),
        RateLimitConfig {
            per_minute: 3,
            per_hour: 100,
            min_delay: Duration::from_millis(500),
        },
        PacingConfig::default(),
    );
    let rows = dispatched(
        p.dispatcher
            .dispatch(&AudienceSpec::All, &announcement("Quiet", Priority::Low))
            .await
            .unwrap(),
    )
    .notifications;

    let report = channel.send_batch(&rows).await;
    assert_eq!(report.sent, 8);
    assert!(report
        .attempts
        .iter()
        .all(|a| matches!(a.outcome, SendOutcome::Sent { .. })));

    let instants = p.transport.instants();
    assert_eq!(instants.len(), 8);
    for (i, start) in instants.iter().enumerate() {
        let in_window = instants[i..]
            .iter()
            .filter(|at| at.duration_since(*start) < Duration::from_secs(60))
            .count();
        assert!(in_window <= 3, "{in_window} sends within a minute of send {i}");
    }
}

// ---------------------------------------------------------------------------
// Realtime and inbox
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replayed_insert_is_shown_once() {
    let p = pipeline(2);
    let sub = p.realtime.subscribe(1).await.unwrap();
    let mut updates = sub.updates();

    let receipt = dispatched(
        p.dispatcher
            .dispatch(&AudienceSpec::Explicit(vec![1]), &announcement("Hi", Priority::Low))
            .await
            .unwrap(),
    );
    p.feed
        .publish(ChangeEvent::Inserted(receipt.notifications[0].clone()));

    updates.wait_for(|n| *n >= 2).await.unwrap();
    assert_eq!(sub.items().await.len(), 1);
    assert_eq!(sub.unread_count().await, 1);
}

async fn inbox_with_seven_unread(p: &common::Pipeline) -> InboxSession {
    for i in 0..7 {
        p.dispatcher
            .dispatch(
                &AudienceSpec::Explicit(vec![1]),
                &announcement(&format!("Item {i}"), Priority::Low),
            )
            .await
            .unwrap();
    }
    InboxSession::open(1, &p.realtime, p.recorder.clone(), fast_retries())
        .await
        .unwrap()
}

#[tokio::test]
async fn mark_all_read_on_seven_unread() {
    let p = pipeline(2);
    let inbox = inbox_with_seven_unread(&p).await;
    assert_eq!(inbox.unread_count().await, 7);

    assert_eq!(inbox.mark_all_read().await.unwrap(), 7);
    assert_eq!(inbox.unread_count().await, 0);
    assert!(inbox.items().await.iter().all(|n| n.read));
    assert!(p.store.notifications_for(1).iter().all(|n| n.read));
}

#[tokio::test(start_paused = true)]
async fn failed_mark_all_read_reverts_to_the_exact_prior_state() {
    let p = pipeline(2);
    let inbox = inbox_with_seven_unread(&p).await;
    let before = inbox.items().await;

    p.store
        .fail_next_writes(3, CoreError::Network("connection reset".into()));
    let err = inbox.mark_all_read().await.unwrap_err();
    assert!(err.is_transient());

    assert_eq!(inbox.unread_count().await, 7);
    assert_eq!(inbox.items().await, before);
    assert!(p.store.notifications_for(1).iter().all(|n| !n.read));
    assert!(!*inbox.retrying().borrow());
}

// ---------------------------------------------------------------------------
// Engagement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_duplicate_engagement_is_stored_once() {
    let p = pipeline(2);
    let receipt = dispatched(
        p.dispatcher
            .dispatch(&AudienceSpec::Explicit(vec![2]), &announcement("Poll", Priority::Low))
            .await
            .unwrap(),
    );
    let id = receipt.notifications[0].id;

    let outcomes = futures::future::join_all(
        (0..10).map(|_| p.recorder.record(id, 2, EngagementAction::Read)),
    )
    .await;

    let recorded = outcomes
        .iter()
        .filter(|o| **o == RecordOutcome::Recorded)
        .count();
    assert_eq!(recorded, 1);
    assert_eq!(p.store.engagement_count(), 1);

    let report = p.analytics.report().await.unwrap();
    assert_eq!(report.totals.read, 1);
    assert_eq!(report.totals.total(), 1);
}
