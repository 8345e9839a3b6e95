//! PostgreSQL `LISTEN` bridge.
//!
//! The portal announces content changes with
//! `NOTIFY platform_events, '<json>'`. [`PgEventListener`] decodes each
//! payload into a [`PlatformEvent`] and publishes it on the [`EventBus`].
//! `sqlx`'s listener reconnects on its own after a dropped connection;
//! notifications sent while disconnected are lost.

use std::sync::Arc;
use std::time::Duration;

use herald_db::DbPool;
use sqlx::postgres::PgListener;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, PlatformEvent};

/// Default channel name.
pub const DEFAULT_CHANNEL: &str = "platform_events";

/// Pause after a receive error before trying again.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct PgEventListener {
    pool: DbPool,
    channel: String,
    bus: Arc<EventBus>,
}

impl PgEventListener {
    pub fn new(pool: DbPool, channel: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            pool,
            channel: channel.into(),
            bus,
        }
    }

    /// Forward notifications until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;
        tracing::info!(channel = %self.channel, "Listening for platform events");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Event listener cancelled");
                    break;
                }
                received = listener.recv() => match received {
                    Ok(notification) => self.forward(notification.payload()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Event listener receive failed, retrying");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn forward(&self, payload: &str) {
        match parse_event(payload) {
            Ok(event) => {
                tracing::debug!(event_type = %event.event_type, "Platform event received");
                self.bus.publish(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, payload, "Ignoring malformed platform event");
            }
        }
    }
}

pub fn parse_event(payload: &str) -> Result<PlatformEvent, serde_json::Error> {
    serde_json::from_str(payload)
}
