//! Live inbox views fed by the change feed.
//!
//! [`RealtimeDispatcher::subscribe`] loads a recipient's most recent rows and
//! unread count, then keeps them current from the [`ChangeFeed`] on a
//! background task. The returned [`RealtimeSubscription`] owns that task:
//! dropping it or calling [`unsubscribe`](RealtimeSubscription::unsubscribe)
//! stops it.
//!
//! [`LiveInbox`] is the state both the feed task and local optimistic
//! mutations write to. Feed deliveries may be replayed on reconnect, so
//! inserts are deduplicated by id and every unread→read transition is
//! counted at most once per row.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use herald_core::notification::Notification;
use herald_core::types::DbId;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::feed::{ChangeEvent, ChangeFeed, FeedMessage, FeedSubscription};
use crate::store::{NotificationStore, StoreResult};

/// Rows kept in a live view.
pub const DEFAULT_WINDOW: usize = 20;

// ---------------------------------------------------------------------------
// LiveInbox
// ---------------------------------------------------------------------------

/// Newest-first window over one recipient's notifications plus the
/// recipient's total unread count (which may include rows outside the
/// window).
#[derive(Debug, Clone)]
pub struct LiveInbox {
    window: usize,
    items: VecDeque<Notification>,
    /// Every id ever shown, including rows evicted from the window.
    seen: HashSet<DbId>,
    /// Ids whose read state is already reflected in `unread`.
    counted: HashSet<DbId>,
    /// Rows with an id at or below this were all marked read locally.
    read_through: DbId,
    newest_id: DbId,
    unread: u64,
}

/// Undo record for [`LiveInbox::mark_read_local`] and
/// [`LiveInbox::mark_all_read_local`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadUndo {
    ids: Vec<DbId>,
    decremented: u64,
    read_through: DbId,
}

/// Undo record for [`LiveInbox::remove_local`].
#[derive(Debug, Clone)]
pub struct RemoveUndo {
    index: usize,
    item: Notification,
    decremented: u64,
}

/// Undo record for [`LiveInbox::clear_local`].
#[derive(Debug, Clone)]
pub struct ClearUndo {
    items: Vec<Notification>,
}

impl LiveInbox {
    pub fn new(window: usize) -> Self {
        Self::load(window, Vec::new(), 0)
    }

    /// Build from `list_recent` output (newest first) and the stored unread
    /// count.
    pub fn load(window: usize, items: Vec<Notification>, unread: u64) -> Self {
        let mut inbox = Self {
            window: window.max(1),
            items: VecDeque::new(),
            seen: HashSet::new(),
            counted: HashSet::new(),
            read_through: 0,
            newest_id: 0,
            unread: 0,
        };
        inbox.reset(items, unread);
        inbox
    }

    pub fn items(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.items.iter().cloned().collect()
    }

    pub fn get(&self, id: DbId) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> u64 {
        self.unread
    }

    // -- feed deliveries ----------------------------------------------------

    /// Apply one feed event. Returns whether the view changed.
    pub fn apply(&mut self, event: ChangeEvent) -> bool {
        match event {
            ChangeEvent::Inserted(n) => self.insert(n),
            ChangeEvent::Updated {
                previous_read,
                notification,
            } => self.apply_update(previous_read, notification),
            ChangeEvent::Deleted { id, .. } => self.apply_delete(id),
            ChangeEvent::Cleared { .. } => !self.take_read().is_empty(),
        }
    }

    /// Prepend a new row. Replays of an id already seen are ignored.
    pub fn insert(&mut self, notification: Notification) -> bool {
        if !self.seen.insert(notification.id) {
            return false;
        }
        self.newest_id = self.newest_id.max(notification.id);
        if notification.read {
            self.counted.insert(notification.id);
        } else {
            self.unread += 1;
        }
        self.items.push_front(notification);
        self.items.truncate(self.window);
        true
    }

    /// Only an unread→read transition moves the counter, once per row.
    pub fn apply_update(&mut self, previous_read: bool, notification: Notification) -> bool {
        let id = notification.id;
        let became_read = !previous_read && notification.read;
        let mut changed = false;

        if let Some(slot) = self.items.iter_mut().find(|n| n.id == id) {
            changed = *slot != notification;
            *slot = notification;
        }

        if became_read && id > self.read_through && self.counted.insert(id) {
            self.unread = self.unread.saturating_sub(1);
            changed = true;
        }
        changed
    }

    /// Rows outside the window have an unknown read state and leave the
    /// counter untouched.
    pub fn apply_delete(&mut self, id: DbId) -> bool {
        let Some(index) = self.items.iter().position(|n| n.id == id) else {
            return false;
        };
        if let Some(item) = self.items.remove(index) {
            if !item.read && id > self.read_through && self.counted.insert(id) {
                self.unread = self.unread.saturating_sub(1);
            }
        }
        true
    }

    /// Replace the view after a lag or reconnect.
    pub fn reset(&mut self, items: Vec<Notification>, unread: u64) {
        self.items.clear();
        for n in items.into_iter().take(self.window) {
            self.seen.insert(n.id);
            self.newest_id = self.newest_id.max(n.id);
            if n.read {
                self.counted.insert(n.id);
            } else {
                self.counted.remove(&n.id);
            }
            self.items.push_back(n);
        }
        self.unread = unread;
    }

    // -- local optimistic mutations -----------------------------------------

    /// `None` if the row is not shown or already read.
    pub fn mark_read_local(&mut self, id: DbId) -> Option<ReadUndo> {
        let item = self.items.iter_mut().find(|n| n.id == id && !n.read)?;
        item.read = true;

        let decremented = if id > self.read_through && self.counted.insert(id) {
            self.unread = self.unread.saturating_sub(1);
            1
        } else {
            0
        };
        Some(ReadUndo {
            ids: vec![id],
            decremented,
            read_through: self.read_through,
        })
    }

    pub fn mark_all_read_local(&mut self) -> ReadUndo {
        let mut ids = Vec::new();
        for item in self.items.iter_mut().filter(|n| !n.read) {
            item.read = true;
            if self.counted.insert(item.id) {
                ids.push(item.id);
            }
        }
        let undo = ReadUndo {
            ids,
            decremented: self.unread,
            read_through: self.read_through,
        };
        self.unread = 0;
        self.read_through = self.read_through.max(self.newest_id);
        undo
    }

    pub fn rollback_read(&mut self, undo: ReadUndo) {
        for id in &undo.ids {
            if let Some(item) = self.items.iter_mut().find(|n| n.id == *id) {
                item.read = false;
            }
            self.counted.remove(id);
        }
        self.unread += undo.decremented;
        self.read_through = undo.read_through;
    }

    pub fn remove_local(&mut self, id: DbId) -> Option<RemoveUndo> {
        let index = self.items.iter().position(|n| n.id == id)?;
        let item = self.items.remove(index)?;
        let decremented = if !item.read && id > self.read_through && self.counted.insert(id) {
            self.unread = self.unread.saturating_sub(1);
            1
        } else {
            0
        };
        Some(RemoveUndo {
            index,
            item,
            decremented,
        })
    }

    pub fn rollback_remove(&mut self, undo: RemoveUndo) {
        if undo.decremented > 0 {
            self.counted.remove(&undo.item.id);
            self.unread += undo.decremented;
        }
        let index = undo.index.min(self.items.len());
        self.items.insert(index, undo.item);
        self.items.truncate(self.window);
    }

    /// Remove the read rows. Unread rows and the counter are left alone.
    pub fn clear_local(&mut self) -> ClearUndo {
        ClearUndo {
            items: self.take_read(),
        }
    }

    /// Ids grow with insertion, so newest-first is descending id.
    pub fn rollback_clear(&mut self, undo: ClearUndo) {
        self.items.extend(undo.items);
        self.items.make_contiguous().sort_by(|a, b| b.id.cmp(&a.id));
        self.items.truncate(self.window);
    }

    fn take_read(&mut self) -> Vec<Notification> {
        let (read, unread): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.items).into_iter().partition(|n| n.read);
        self.items = unread.into();
        read
    }
}

// ---------------------------------------------------------------------------
// RealtimeDispatcher
// ---------------------------------------------------------------------------

pub struct RealtimeDispatcher {
    store: Arc<dyn NotificationStore>,
    feed: ChangeFeed,
    window: usize,
}

impl RealtimeDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>, feed: ChangeFeed) -> Self {
        Self {
            store,
            feed,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Open a live view for one recipient.
    ///
    /// The feed is subscribed before the initial load so rows committed in
    /// between arrive twice and are deduplicated rather than lost.
    pub async fn subscribe(&self, recipient_id: DbId) -> StoreResult<RealtimeSubscription> {
        let feed = self.feed.subscribe(recipient_id);
        let inbox = load(self.store.as_ref(), recipient_id, self.window).await?;
        let inbox = Arc::new(RwLock::new(inbox));
        let (updates_tx, updates) = watch::channel(0u64);
        let cancel = CancellationToken::new();

        let relay = FeedRelay {
            feed,
            store: Arc::clone(&self.store),
            inbox: Arc::clone(&inbox),
            updates: updates_tx,
            cancel: cancel.clone(),
            window: self.window,
        };
        let handle = tokio::spawn(relay.run());

        tracing::debug!(recipient_id, "Realtime subscription opened");

        Ok(RealtimeSubscription {
            recipient_id,
            inbox,
            updates,
            cancel,
            handle: Some(handle),
        })
    }
}

async fn load(
    store: &dyn NotificationStore,
    recipient_id: DbId,
    window: usize,
) -> StoreResult<LiveInbox> {
    let (items, unread) = futures::try_join!(
        store.list_recent(recipient_id, window),
        store.unread_count(recipient_id)
    )?;
    Ok(LiveInbox::load(window, items, unread))
}

struct FeedRelay {
    feed: FeedSubscription,
    store: Arc<dyn NotificationStore>,
    inbox: Arc<RwLock<LiveInbox>>,
    updates: watch::Sender<u64>,
    cancel: CancellationToken,
    window: usize,
}

impl FeedRelay {
    async fn run(mut self) {
        let recipient_id = self.feed.recipient_id();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(recipient_id, "Realtime subscription cancelled");
                    break;
                }
                message = self.feed.next() => match message {
                    Some(FeedMessage::Change(event)) => {
                        self.inbox.write().await.apply(event);
                    }
                    Some(FeedMessage::Lagged(n)) => {
                        tracing::warn!(recipient_id, skipped = n, "Realtime feed lagged, resyncing inbox");
                        self.resync(recipient_id).await;
                    }
                    None => {
                        tracing::info!(recipient_id, "Change feed closed, realtime subscription ending");
                        break;
                    }
                }
            }
            self.updates.send_modify(|processed| *processed += 1);
        }
    }

    async fn resync(&self, recipient_id: DbId) {
        let loaded = futures::try_join!(
            self.store.list_recent(recipient_id, self.window),
            self.store.unread_count(recipient_id)
        );
        match loaded {
            Ok((items, unread)) => self.inbox.write().await.reset(items, unread),
            Err(e) => {
                tracing::error!(recipient_id, error = %e, "Failed to resync inbox");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RealtimeSubscription
// ---------------------------------------------------------------------------

/// Owned handle to a live view. The feed task stops when this is dropped.
pub struct RealtimeSubscription {
    recipient_id: DbId,
    inbox: Arc<RwLock<LiveInbox>>,
    updates: watch::Receiver<u64>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RealtimeSubscription {
    pub fn recipient_id(&self) -> DbId {
        self.recipient_id
    }

    /// Shared state; local mutations lock it too.
    pub fn inbox(&self) -> &Arc<RwLock<LiveInbox>> {
        &self.inbox
    }

    pub async fn items(&self) -> Vec<Notification> {
        self.inbox.read().await.to_vec()
    }

    pub async fn unread_count(&self) -> u64 {
        self.inbox.read().await.unread_count()
    }

    /// Counts feed messages processed so far; changes after each one.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates.clone()
    }

    /// Stop the feed task and wait for it to finish.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(recipient_id = self.recipient_id, error = %e, "Realtime task ended abnormally");
            }
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
