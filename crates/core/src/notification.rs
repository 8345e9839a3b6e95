//! Notification domain types.
//!
//! A [`Notification`] is immutable after creation except for its `read`
//! flag. Rows are created in batches from a shared [`NotificationTemplate`],
//! one per recipient, all carrying the same [`DispatchId`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::{DbId, DispatchId, Timestamp};

// ---------------------------------------------------------------------------
// NotificationType
// ---------------------------------------------------------------------------

/// Notification type, stored in `notifications.notification_type` and used as
/// the key for per-user email preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TrainingRequired,
    TrainingCompleted,
    NewsPublished,
    Feedback,
    CustomReminder,
    Announcement,
}

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        NotificationType::TrainingRequired,
        NotificationType::TrainingCompleted,
        NotificationType::NewsPublished,
        NotificationType::Feedback,
        NotificationType::CustomReminder,
        NotificationType::Announcement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TrainingRequired => "training_required",
            NotificationType::TrainingCompleted => "training_completed",
            NotificationType::NewsPublished => "news_published",
            NotificationType::Feedback => "feedback",
            NotificationType::CustomReminder => "custom_reminder",
            NotificationType::Announcement => "announcement",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("unknown notification type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Notification priority. Ordered so `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(CoreError::Validation(format!("unknown priority '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationPayload
// ---------------------------------------------------------------------------

/// Type-specific data attached to a notification.
///
/// Serialized with an internal `type` tag so the JSONB column is
/// self-describing; the variant determines [`NotificationType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
    TrainingRequired { training_id: DbId, action_url: String },
    TrainingCompleted { training_id: DbId },
    NewsPublished { article_id: DbId, action_url: String },
    Feedback { feedback_id: DbId, category: String },
    CustomReminder { reminder_id: DbId, schedule: String },
    Announcement { action_url: Option<String> },
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationType {
        match self {
            NotificationPayload::TrainingRequired { .. } => NotificationType::TrainingRequired,
            NotificationPayload::TrainingCompleted { .. } => NotificationType::TrainingCompleted,
            NotificationPayload::NewsPublished { .. } => NotificationType::NewsPublished,
            NotificationPayload::Feedback { .. } => NotificationType::Feedback,
            NotificationPayload::CustomReminder { .. } => NotificationType::CustomReminder,
            NotificationPayload::Announcement { .. } => NotificationType::Announcement,
        }
    }

    /// Link the recipient should follow, if the payload carries one.
    pub fn action_url(&self) -> Option<&str> {
        match self {
            NotificationPayload::TrainingRequired { action_url, .. }
            | NotificationPayload::NewsPublished { action_url, .. } => Some(action_url),
            NotificationPayload::Announcement { action_url } => action_url.as_deref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A persisted notification for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: DbId,
    pub recipient_id: DbId,
    /// `None` only for rows created before dispatch ids were recorded.
    pub dispatch_id: Option<DispatchId>,
    pub title: String,
    pub message: String,
    pub payload: NotificationPayload,
    pub priority: Priority,
    pub read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn kind(&self) -> NotificationType {
        self.payload.kind()
    }
}

/// A notification row that has not been inserted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: DbId,
    pub dispatch_id: DispatchId,
    pub title: String,
    pub message: String,
    pub payload: NotificationPayload,
    pub priority: Priority,
}

// ---------------------------------------------------------------------------
// NotificationTemplate
// ---------------------------------------------------------------------------

/// Shared content for every row of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NotificationTemplate {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    pub payload: NotificationPayload,
    pub priority: Priority,
}

impl NotificationTemplate {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        payload: NotificationPayload,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            payload,
            priority: Priority::Medium,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Reject templates with missing or oversized title/message.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()?;
        if self.title.trim().is_empty() {
            return Err(CoreError::Validation("title must not be blank".into()));
        }
        if self.message.trim().is_empty() {
            return Err(CoreError::Validation("message must not be blank".into()));
        }
        Ok(())
    }

    /// Build one row per recipient, all sharing `dispatch_id`.
    pub fn rows_for(&self, dispatch_id: DispatchId, recipients: &[DbId]) -> Vec<NewNotification> {
        recipients
            .iter()
            .map(|&recipient_id| NewNotification {
                recipient_id,
                dispatch_id,
                title: self.title.clone(),
                message: self.message.clone(),
                payload: self.payload.clone(),
                priority: self.priority,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn training_template() -> NotificationTemplate {
        NotificationTemplate::new(
            "Fire safety refresher",
            "Please complete the fire safety module by Friday.",
            NotificationPayload::TrainingRequired {
                training_id: 12,
                action_url: "/trainings/12".into(),
            },
        )
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let payload = NotificationPayload::Feedback {
            feedback_id: 3,
            category: "content".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "feedback");
        assert_eq!(json["feedback_id"], 3);

        let back: NotificationPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn payload_kind_matches_variant() {
        let payload = NotificationPayload::CustomReminder {
            reminder_id: 1,
            schedule: "weekly".into(),
        };
        assert_eq!(payload.kind(), NotificationType::CustomReminder);
        assert_eq!(payload.kind().as_str(), "custom_reminder");
    }

    #[test]
    fn notification_type_parses_every_variant() {
        for kind in NotificationType::ALL {
            assert_eq!(kind.as_str().parse::<NotificationType>().unwrap(), kind);
        }
        assert!("carrier_pigeon".parse::<NotificationType>().is_err());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
    }

    #[test]
    fn template_check_rejects_blank_title() {
        let mut template = training_template();
        template.title = "   ".into();
        assert!(matches!(template.check(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn template_check_rejects_empty_message() {
        let mut template = training_template();
        template.message = String::new();
        assert!(matches!(template.check(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn rows_for_builds_one_row_per_recipient() {
        let template = training_template().with_priority(Priority::High);
        let dispatch_id = crate::types::new_dispatch_id();
        let rows = template.rows_for(dispatch_id, &[1, 2, 3]);

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.dispatch_id == dispatch_id));
        assert!(rows.iter().all(|r| r.title == template.title));
        assert!(rows.iter().all(|r| r.priority == Priority::High));
        assert_eq!(
            rows.iter().map(|r| r.recipient_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn action_url_only_for_linkable_payloads() {
        let template = training_template();
        assert_eq!(template.payload.action_url(), Some("/trainings/12"));
        let completed = NotificationPayload::TrainingCompleted { training_id: 1 };
        assert_eq!(completed.action_url(), None);
    }
}
