//! Herald domain core.
//!
//! Pure types and policies for notification targeting and delivery. Nothing
//! here performs I/O; the only runtime dependency is tokio's clock and sync
//! primitives.

pub mod audience;
pub mod engagement;
pub mod error;
pub mod notification;
pub mod optimistic;
pub mod pacing;
pub mod rate_limit;
pub mod retry;
pub mod scope;
pub mod types;
