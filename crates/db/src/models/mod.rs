//! Row structs and insert DTOs.
//!
//! Each submodule holds the `FromRow` struct for its table plus the
//! conversions into `herald-core` domain types.

pub mod analytics;
pub mod engagement;
pub mod notification;
pub mod notification_preference;
pub mod reminder;
pub mod user;
