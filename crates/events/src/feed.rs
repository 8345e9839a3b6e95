//! Per-recipient change feed over notification rows.
//!
//! Stores publish a [`ChangeEvent`] after every committed write. Each
//! live session subscribes with its recipient id and only sees its own
//! rows. Delivery is ordered per recipient by publish order; nothing is
//! guaranteed across recipients.

use herald_core::notification::Notification;
use herald_core::types::DbId;
use tokio::sync::broadcast;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// ChangeEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted(Notification),
    /// `previous_read` is the flag before the write.
    Updated {
        previous_read: bool,
        notification: Notification,
    },
    Deleted { recipient_id: DbId, id: DbId },
    /// Every read row of the recipient was deleted.
    Cleared { recipient_id: DbId },
}

impl ChangeEvent {
    pub fn recipient_id(&self) -> DbId {
        match self {
            ChangeEvent::Inserted(n) => n.recipient_id,
            ChangeEvent::Updated { notification, .. } => notification.recipient_id,
            ChangeEvent::Deleted { recipient_id, .. } | ChangeEvent::Cleared { recipient_id } => {
                *recipient_id
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeFeed
// ---------------------------------------------------------------------------

/// Cloneable handle to the broadcast channel carrying row changes.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Slow subscribers that fall more than `capacity` events behind
    /// observe [`FeedMessage::Lagged`] and must resync.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // A send error only means nobody is subscribed.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self, recipient_id: DbId) -> FeedSubscription {
        FeedSubscription {
            recipient_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// FeedSubscription
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(ChangeEvent),
    /// `n` events were dropped; local state may be stale.
    Lagged(u64),
}

/// Receiver filtered to one recipient.
pub struct FeedSubscription {
    recipient_id: DbId,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl FeedSubscription {
    pub fn recipient_id(&self) -> DbId {
        self.recipient_id
    }

    /// Next message for this recipient, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.recipient_id() == self.recipient_id => {
                    return Some(FeedMessage::Change(event));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(FeedMessage::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
