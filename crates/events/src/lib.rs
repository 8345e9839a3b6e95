//! Notification targeting and delivery services.
//!
//! - [`AudienceResolver`] turns an audience spec into recipients plus stats.
//! - [`NotificationDispatcher`] persists one row per recipient and relays
//!   a copy of important dispatches by email.
//! - [`RealtimeDispatcher`] fans store changes out to live inbox views;
//!   [`InboxSession`] applies user mutations optimistically.
//! - [`EngagementRecorder`] and [`AnalyticsAggregator`] write and read the
//!   engagement ledger.
//! - [`EmailChannel`] sends through a rate-limited, paced transport.
//! - [`EventBus`], [`NotificationRouter`], [`ReminderScheduler`] and
//!   [`PgEventListener`] connect platform events to dispatches.
//!
//! Storage is reached through the traits in [`store`], implemented for
//! PostgreSQL ([`PgStore`]) and in memory ([`MemoryStore`]).

pub mod analytics;
pub mod audience;
pub mod bus;
pub mod delivery;
pub mod dispatch;
pub mod engagement;
pub mod feed;
pub mod inbox;
pub mod listener;
pub mod realtime;
pub mod reminder;
pub mod router;
pub mod store;

pub use analytics::{AnalyticsAggregator, AnalyticsConfig};
pub use audience::{AudienceError, AudienceResolver};
pub use bus::{EventBus, PlatformEvent};
pub use delivery::email::{BatchReport, EmailChannel, EmailDispatchAttempt, SendOutcome, SkipReason};
pub use delivery::render::{EmailRenderer, RenderConfig};
pub use delivery::transport::{
    EmailTransport, HttpTransport, HttpTransportConfig, SmtpConfig, SmtpTransport, TransportError,
};
pub use dispatch::{DispatchOutcome, DispatchReceipt, DispatcherConfig, NotificationDispatcher};
pub use engagement::{EngagementRecorder, RecordOutcome};
pub use feed::{ChangeEvent, ChangeFeed};
pub use inbox::InboxSession;
pub use listener::PgEventListener;
pub use realtime::{LiveInbox, RealtimeDispatcher, RealtimeSubscription};
pub use reminder::{ReminderSchedule, ReminderScheduler};
pub use router::NotificationRouter;
pub use store::memory::MemoryStore;
pub use store::pg::PgStore;
