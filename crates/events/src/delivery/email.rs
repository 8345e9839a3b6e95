//! Rate-limited email relay for notifications.
//!
//! [`EmailChannel`] owns the process's [`RateLimiter`]. Every transport
//! hand-off first acquires a limiter slot; when the limiter refuses, the
//! channel sleeps for the advertised `retry_after` and tries again, so a
//! batch defers instead of failing.
//!
//! Batches are additionally spaced by [`PacingConfig`] so sends do not
//! arrive at a perfectly regular cadence. One recipient's failure never
//! stops the batch: every item yields an [`EmailDispatchAttempt`].

use std::sync::Arc;
use std::time::Duration;

use herald_core::notification::Notification;
use herald_core::pacing::PacingConfig;
use herald_core::rate_limit::{RateLimitConfig, RateLimiter};
use herald_core::types::DbId;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::render::EmailRenderer;
use super::transport::{EmailTransport, OutgoingEmail};
use crate::store::MailRecipients;

/// Lower bound on a limiter back-off so a zero `retry_after` cannot spin.
const MIN_LIMITER_WAIT: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an item was not handed to the transport. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoEmail,
    OptedOut,
    UnknownRecipient,
    /// The batch was cancelled before this item was attempted.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent { message_id: String },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// Result of one batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailDispatchAttempt {
    pub notification_id: DbId,
    pub recipient_id: DbId,
    pub outcome: SendOutcome,
}

impl EmailDispatchAttempt {
    pub fn success(&self) -> bool {
        self.outcome.is_sent()
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            SendOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Summary of a batch run, one attempt per input item in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub attempts: Vec<EmailDispatchAttempt>,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchReport {
    fn push(&mut self, attempt: EmailDispatchAttempt) {
        match attempt.outcome {
            SendOutcome::Sent { .. } => self.sent += 1,
            SendOutcome::Skipped { .. } => self.skipped += 1,
            SendOutcome::Failed { .. } => self.failed += 1,
        }
        self.attempts.push(attempt);
    }
}

// ---------------------------------------------------------------------------
// EmailChannel
// ---------------------------------------------------------------------------

pub struct EmailChannel {
    transport: Arc<dyn EmailTransport>,
    recipients: Arc<dyn MailRecipients>,
    renderer: EmailRenderer,
    limiter: RateLimiter,
    pacing: PacingConfig,
}

impl EmailChannel {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        recipients: Arc<dyn MailRecipients>,
        renderer: EmailRenderer,
        limits: RateLimitConfig,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            transport,
            recipients,
            renderer,
            limiter: RateLimiter::new(limits),
            pacing,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Send one notification, waiting for the rate limiter if needed.
    ///
    /// Users without an address or who opted out of this type are skipped.
    pub async fn send_one(&self, notification: &Notification) -> SendOutcome {
        self.deliver(notification, &CancellationToken::new()).await
    }

    /// Send every item, running to completion.
    pub async fn send_batch(&self, notifications: &[Notification]) -> BatchReport {
        self.send_batch_until(notifications, CancellationToken::new())
            .await
    }

    /// Send every item until `cancel` fires. Items not yet attempted at
    /// cancellation are reported as skipped with [`SkipReason::Cancelled`].
    pub async fn send_batch_until(
        &self,
        notifications: &[Notification],
        cancel: CancellationToken,
    ) -> BatchReport {
        let total = notifications.len();
        let mut report = BatchReport::default();

        for (index, notification) in notifications.iter().enumerate() {
            if index > 0 && !cancel.is_cancelled() {
                let delay = self.pacing.next_delay(index, total);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = if cancel.is_cancelled() {
                SendOutcome::Skipped {
                    reason: SkipReason::Cancelled,
                }
            } else {
                self.deliver(notification, &cancel).await
            };

            report.push(EmailDispatchAttempt {
                notification_id: notification.id,
                recipient_id: notification.recipient_id,
                outcome,
            });
        }

        report.cancelled = cancel.is_cancelled();
        tracing::info!(
            total,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            "Email batch finished"
        );
        report
    }

    async fn deliver(&self, notification: &Notification, cancel: &CancellationToken) -> SendOutcome {
        let notification_id = notification.id;
        let recipient_id = notification.recipient_id;

        let contact = match self
            .recipients
            .contact(recipient_id, notification.kind())
            .await
        {
            Ok(Some(contact)) => contact,
            Ok(None) => return skipped(notification_id, recipient_id, SkipReason::UnknownRecipient),
            Err(e) => {
                tracing::error!(notification_id, recipient_id, error = %e, "Recipient lookup failed");
                return SendOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        if !contact.email_enabled {
            return skipped(notification_id, recipient_id, SkipReason::OptedOut);
        }
        let Some(address) = contact.email else {
            return skipped(notification_id, recipient_id, SkipReason::NoEmail);
        };

        if !self.acquire(cancel).await {
            return SendOutcome::Skipped {
                reason: SkipReason::Cancelled,
            };
        }

        let rendered = self.renderer.render(notification, &contact.display_name);
        let email = OutgoingEmail {
            to: address,
            to_name: contact.display_name,
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
        };

        match self.transport.send(&email).await {
            Ok(message_id) => {
                tracing::debug!(notification_id, recipient_id, %message_id, "Notification email sent");
                SendOutcome::Sent { message_id }
            }
            Err(e) => {
                tracing::warn!(notification_id, recipient_id, error = %e, "Notification email failed");
                SendOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Wait for a limiter slot. Returns `false` if cancelled first.
    async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            match self.limiter.try_acquire() {
                Ok(()) => return true,
                Err(limited) => {
                    tracing::debug!(
                        reason = %limited.reason,
                        retry_after_ms = limited.retry_after.as_millis() as u64,
                        "Rate limited, deferring send"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(limited.retry_after.max(MIN_LIMITER_WAIT)) => {}
                    }
                }
            }
        }
    }
}

fn skipped(notification_id: DbId, recipient_id: DbId, reason: SkipReason) -> SendOutcome {
    tracing::debug!(notification_id, recipient_id, ?reason, "Skipping notification email");
    SendOutcome::Skipped { reason }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
