use std::time::Duration;

use anyhow::Context;
use herald_events::listener::DEFAULT_CHANNEL;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// How often due reminders are checked.
    pub reminder_interval: Duration,
    /// `LISTEN` channel carrying platform events.
    pub event_channel: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
    /// Grace period for background tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// | Env Var                         | Default           |
    /// |---------------------------------|-------------------|
    /// | `DATABASE_URL`                  | required          |
    /// | `REMINDER_CHECK_INTERVAL_SECS`  | `60`              |
    /// | `EVENT_CHANNEL`                 | `platform_events` |
    /// | `LOG_FORMAT`                    | `text` (`json`)   |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `10`              |
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let reminder_interval_secs: u64 = std::env::var("REMINDER_CHECK_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .context("REMINDER_CHECK_INTERVAL_SECS must be a valid u64")?;

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .context("SHUTDOWN_TIMEOUT_SECS must be a valid u64")?;

        Ok(Self {
            database_url,
            reminder_interval: Duration::from_secs(reminder_interval_secs.max(1)),
            event_channel: std::env::var("EVENT_CHANNEL")
                .unwrap_or_else(|_| DEFAULT_CHANNEL.to_string()),
            json_logs: std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        })
    }
}
