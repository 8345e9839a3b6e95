//! Event-to-notification routing.
//!
//! [`NotificationRouter`] subscribes to the platform event bus, maps each
//! known event to an audience and a notification template, and hands both
//! to the [`NotificationDispatcher`]. Unknown event types are ignored.

use std::sync::Arc;

use herald_core::audience::{AudienceFilter, AudienceSpec};
use herald_core::error::CoreError;
use herald_core::notification::{NotificationPayload, NotificationTemplate, Priority};
use herald_core::types::DbId;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::bus::{
    PlatformEvent, FEEDBACK_SUBMITTED, NEWS_PUBLISHED, TRAINING_ASSIGNED, TRAINING_PUBLISHED,
};
use crate::dispatch::{DispatchOutcome, NotificationDispatcher};

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid {event_type} payload: {source}")]
    Payload {
        event_type: String,
        source: serde_json::Error,
    },

    #[error("{0} event has no source entity id")]
    MissingSource(String),

    #[error(transparent)]
    Dispatch(#[from] CoreError),
}

/// Who to notify and with what.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub audience: AudienceSpec,
    pub template: NotificationTemplate,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TrainingPublished {
    title: String,
    #[serde(default)]
    mandatory: bool,
}

#[derive(Deserialize)]
struct TrainingAssigned {
    title: String,
    user_ids: Vec<DbId>,
}

#[derive(Deserialize)]
struct NewsPublished {
    title: String,
}

#[derive(Deserialize)]
struct FeedbackSubmitted {
    category: String,
}

fn payload<T: serde::de::DeserializeOwned>(event: &PlatformEvent) -> Result<T, RouteError> {
    serde_json::from_value(event.payload.clone()).map_err(|source| RouteError::Payload {
        event_type: event.event_type.clone(),
        source,
    })
}

fn source_id(event: &PlatformEvent) -> Result<DbId, RouteError> {
    event
        .source_entity_id
        .ok_or_else(|| RouteError::MissingSource(event.event_type.clone()))
}

/// Map an event to its route, or `None` for event types that notify nobody.
pub fn plan(event: &PlatformEvent) -> Result<Option<Route>, RouteError> {
    let route = match event.event_type.as_str() {
        TRAINING_PUBLISHED => {
            let training_id = source_id(event)?;
            let body: TrainingPublished = payload(event)?;
            let priority = if body.mandatory {
                Priority::High
            } else {
                Priority::Medium
            };
            Route {
                audience: AudienceSpec::ActiveOnly,
                template: NotificationTemplate::new(
                    "New training available",
                    format!("\"{}\" is now available.", body.title),
                    NotificationPayload::TrainingRequired {
                        training_id,
                        action_url: format!("/training/{training_id}"),
                    },
                )
                .with_priority(priority),
            }
        }
        TRAINING_ASSIGNED => {
            let training_id = source_id(event)?;
            let body: TrainingAssigned = payload(event)?;
            Route {
                audience: AudienceSpec::Explicit(body.user_ids),
                template: NotificationTemplate::new(
                    "Training assigned",
                    format!("You have been assigned \"{}\".", body.title),
                    NotificationPayload::TrainingRequired {
                        training_id,
                        action_url: format!("/training/{training_id}"),
                    },
                )
                .with_priority(Priority::High),
            }
        }
        NEWS_PUBLISHED => {
            let article_id = source_id(event)?;
            let body: NewsPublished = payload(event)?;
            Route {
                audience: AudienceSpec::ActiveOnly,
                template: NotificationTemplate::new(
                    "News published",
                    body.title,
                    NotificationPayload::NewsPublished {
                        article_id,
                        action_url: format!("/news/{article_id}"),
                    },
                ),
            }
        }
        FEEDBACK_SUBMITTED => {
            let feedback_id = source_id(event)?;
            let body: FeedbackSubmitted = payload(event)?;
            Route {
                audience: AudienceSpec::Filtered(vec![AudienceFilter::AdminsOnly]),
                template: NotificationTemplate::new(
                    "New feedback",
                    format!("Feedback was submitted in \"{}\".", body.category),
                    NotificationPayload::Feedback {
                        feedback_id,
                        category: body.category,
                    },
                )
                .with_priority(Priority::Low),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(route))
}

// ---------------------------------------------------------------------------
// NotificationRouter
// ---------------------------------------------------------------------------

pub struct NotificationRouter {
    dispatcher: Arc<NotificationDispatcher>,
}

impl NotificationRouter {
    pub fn new(dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Route events until the bus is dropped.
    pub async fn run(self, mut receiver: broadcast::Receiver<PlatformEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = self.route_event(&event).await {
                        tracing::error!(
                            error = %e,
                            event_type = %event.event_type,
                            "Failed to route event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification router shutting down");
                    break;
                }
            }
        }
    }

    pub async fn route_event(&self, event: &PlatformEvent) -> Result<Option<DispatchOutcome>, RouteError> {
        let Some(route) = plan(event)? else {
            tracing::debug!(event_type = %event.event_type, "No notifications for event type");
            return Ok(None);
        };
        let outcome = self
            .dispatcher
            .dispatch(&route.audience, &route.template)
            .await?;
        Ok(Some(outcome))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
