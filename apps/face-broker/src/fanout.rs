use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use face_protocol::{BroadcastNotification, TabEvent};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Delivers notifications to every attached tab.
///
/// Publishing never waits on a tab. A tab that falls more than `capacity`
/// notifications behind loses the overflow.
#[derive(Debug)]
pub struct FanoutHub {
    sender: broadcast::Sender<BroadcastNotification>,
    /// Last assigned seq. Held across the send so seq order is channel order.
    next_seq: Mutex<u64>,
    published: AtomicU64,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanoutMetrics {
    pub published: u64,
    pub tabs: usize,
    pub capacity: usize,
}

impl FanoutHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_seq: Mutex::new(0),
            published: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastNotification> {
        self.sender.subscribe()
    }

    /// Stamps the event with the next seq and the current time, then hands it
    /// to every subscriber. Returns the stamped notification.
    pub fn publish(&self, event: TabEvent) -> BroadcastNotification {
        let mut seq = self.next_seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq = seq.saturating_add(1);
        let notification = BroadcastNotification {
            seq: *seq,
            timestamp: Utc::now(),
            event,
        };
        // Err only means no tab is attached right now.
        let delivered = self.sender.send(notification.clone()).unwrap_or(0);
        drop(seq);

        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            seq = notification.seq,
            kind = notification.kind(),
            tabs = delivered,
            "notification published"
        );
        notification
    }

    pub fn tab_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn metrics(&self) -> FanoutMetrics {
        FanoutMetrics {
            published: self.published.load(Ordering::Relaxed),
            tabs: self.tab_count(),
            capacity: self.capacity,
        }
    }
}
