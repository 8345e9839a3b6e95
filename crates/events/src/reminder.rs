//! Scheduled reminders.
//!
//! [`ReminderScheduler`] runs as a background task, periodically fetching
//! reminders whose `next_run_at` has passed, dispatching each one to its
//! stored audience and moving it to its next run (or deactivating it).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use herald_core::audience::AudienceSpec;
use herald_core::error::CoreError;
use herald_core::notification::{NotificationPayload, NotificationTemplate, Priority};
use herald_core::types::{DbId, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchOutcome, NotificationDispatcher};
use crate::store::ReminderSource;

/// How often the scheduler polls for due reminders.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// ReminderSchedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderSchedule {
    Once,
    Daily,
    Weekly,
}

impl ReminderSchedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderSchedule::Once => "once",
            ReminderSchedule::Daily => "daily",
            ReminderSchedule::Weekly => "weekly",
        }
    }

    fn period_days(&self) -> Option<i64> {
        match self {
            ReminderSchedule::Once => None,
            ReminderSchedule::Daily => Some(1),
            ReminderSchedule::Weekly => Some(7),
        }
    }

    /// The first run strictly after `now`, stepping from `scheduled`.
    /// Runs missed while the scheduler was down are skipped, not replayed.
    /// `None` for one-off reminders, or when the next run is not representable.
    pub fn next_after(&self, scheduled: Timestamp, now: Timestamp) -> Option<Timestamp> {
        let days = self.period_days()?;
        let period = chrono::Duration::try_days(days)?;
        let elapsed = (now - scheduled).num_seconds();
        let steps = if elapsed < 0 {
            1
        } else {
            elapsed / period.num_seconds() + 1
        };
        let offset = chrono::Duration::try_days(steps.checked_mul(days)?)?;
        scheduled.checked_add_signed(offset)
    }
}

impl fmt::Display for ReminderSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderSchedule {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(ReminderSchedule::Once),
            "daily" => Ok(ReminderSchedule::Daily),
            "weekly" => Ok(ReminderSchedule::Weekly),
            other => Err(CoreError::Validation(format!(
                "unknown reminder schedule '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ReminderJob
// ---------------------------------------------------------------------------

/// A due reminder as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderJob {
    pub id: DbId,
    pub title: String,
    pub message: String,
    pub audience: AudienceSpec,
    pub schedule: ReminderSchedule,
    pub priority: Priority,
    pub next_run_at: Timestamp,
}

impl ReminderJob {
    pub fn template(&self) -> NotificationTemplate {
        NotificationTemplate::new(
            self.title.clone(),
            self.message.clone(),
            NotificationPayload::CustomReminder {
                reminder_id: self.id,
                schedule: self.schedule.as_str().to_string(),
            },
        )
        .with_priority(self.priority)
    }
}

// ---------------------------------------------------------------------------
// ReminderScheduler
// ---------------------------------------------------------------------------

pub struct ReminderScheduler {
    source: Arc<dyn ReminderSource>,
    dispatcher: Arc<NotificationDispatcher>,
    interval: Duration,
}

impl ReminderScheduler {
    pub fn new(source: Arc<dyn ReminderSource>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            source,
            dispatcher,
            interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the scheduler loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reminder scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_due(chrono::Utc::now()).await {
                        tracing::error!(error = %e, "Failed to process reminders");
                    }
                }
            }
        }
    }

    /// Fire every reminder due at `now`. Returns how many were handled.
    pub async fn run_due(&self, now: Timestamp) -> Result<usize, CoreError> {
        let due = self.source.due_reminders(now).await?;
        let mut handled = 0;

        for job in &due {
            match self.fire(job, now).await {
                Ok(()) => handled += 1,
                Err(e) => {
                    tracing::error!(reminder_id = job.id, error = %e, "Failed to fire reminder");
                }
            }
        }

        if !due.is_empty() {
            tracing::info!(due = due.len(), handled, "Processed due reminders");
        }
        Ok(handled)
    }

    /// Transient failures leave the reminder due for the next tick; any
    /// other dispatch failure deactivates it.
    async fn fire(&self, job: &ReminderJob, now: Timestamp) -> Result<(), CoreError> {
        match self.dispatcher.dispatch(&job.audience, &job.template()).await {
            Ok(DispatchOutcome::Dispatched(receipt)) => {
                tracing::info!(
                    reminder_id = job.id,
                    dispatch_id = %receipt.dispatch_id,
                    recipients = receipt.notifications.len(),
                    "Reminder dispatched"
                );
            }
            Ok(DispatchOutcome::NoRecipients(_)) => {
                tracing::info!(reminder_id = job.id, "Reminder audience is empty, skipping");
            }
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                tracing::error!(reminder_id = job.id, error = %e, "Reminder cannot be dispatched, deactivating");
                self.source.advance(job.id, None).await?;
                return Err(e);
            }
        }

        let next = job.schedule.next_after(job.next_run_at, now);
        self.source.advance(job.id, next).await?;
        if next.is_none() {
            tracing::debug!(reminder_id = job.id, "One-off reminder completed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
