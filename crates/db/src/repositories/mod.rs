//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod analytics_repo;
pub mod engagement_repo;
pub mod notification_preference_repo;
pub mod notification_repo;
pub mod reminder_repo;
pub mod user_repo;

pub use analytics_repo::AnalyticsRepo;
pub use engagement_repo::EngagementRepo;
pub use notification_preference_repo::NotificationPreferenceRepo;
pub use notification_repo::NotificationRepo;
pub use reminder_repo::ReminderRepo;
pub use user_repo::UserRepo;
