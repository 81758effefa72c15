//! # Message Queue
//!
//! Per-owner inbound buffer and delivery accounting.
//!
//! The queue hands its receiver out exactly once: whoever takes it is the
//! owner's single logical consumer. Senders reach the queue through
//! [`InboxDestination`](crate::routing::InboxDestination) handles.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use shared_types::{now_millis, Envelope};

use crate::DEFAULT_QUEUE_CAPACITY;

/// Counters of one owner's traffic, each with the time of its last event.
///
/// Timestamps are milliseconds since the Unix epoch; `0` means "never".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub sent: u64,
    pub failed_sending: u64,
    pub received: u64,
    pub failed_reception: u64,
    pub last_sent_ms: u64,
    pub last_failed_sending_ms: u64,
    pub last_received_ms: u64,
    pub last_failed_reception_ms: u64,
}

/// Thread-safe delivery counters.
///
/// All eight values live behind one lock, so `reset` and every increment are
/// atomic with respect to each other.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    inner: Mutex<DeliveryStatsSnapshot>,
}

impl DeliveryStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        let mut s = self.inner.lock();
        s.sent += 1;
        s.last_sent_ms = now_millis();
    }

    pub fn record_failed_sending(&self) {
        let mut s = self.inner.lock();
        s.failed_sending += 1;
        s.last_failed_sending_ms = now_millis();
    }

    pub fn record_received(&self) {
        let mut s = self.inner.lock();
        s.received += 1;
        s.last_received_ms = now_millis();
    }

    pub fn record_failed_reception(&self) {
        let mut s = self.inner.lock();
        s.failed_reception += 1;
        s.last_failed_reception_ms = now_millis();
    }

    /// Zero every counter and timestamp.
    pub fn reset(&self) {
        *self.inner.lock() = DeliveryStatsSnapshot::default();
    }

    #[must_use]
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        *self.inner.lock()
    }
}

/// Bounded inbound buffer of one owner.
pub struct MessageQueue {
    sender: mpsc::Sender<Envelope>,
    receiver: Mutex<Option<mpsc::Receiver<Envelope>>>,
    stats: Arc<DeliveryStats>,
    capacity: usize,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            stats: Arc::new(DeliveryStats::new()),
            capacity,
        }
    }

    /// Take the consuming end. Only the first call gets it.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.receiver.lock().take()
    }

    /// Producing end, for destinations.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.sender.clone()
    }

    /// Shared counters of this queue's owner.
    #[must_use]
    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero the delivery counters.
    pub fn reset(&self) {
        self.stats.reset();
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Message;

    #[test]
    fn test_receiver_taken_once() {
        let queue = MessageQueue::with_capacity(4);
        assert!(queue.take_receiver().is_some());
        assert!(queue.take_receiver().is_none());
    }

    #[test]
    fn test_counters_and_reset() {
        let stats = DeliveryStats::new();
        stats.record_sent();
        stats.record_sent();
        stats.record_failed_sending();
        stats.record_received();
        stats.record_failed_reception();

        let snap = stats.snapshot();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.failed_sending, 1);
        assert_eq!(snap.received, 1);
        assert_eq!(snap.failed_reception, 1);
        assert!(snap.last_sent_ms > 0);
        assert!(snap.last_failed_reception_ms > 0);

        stats.reset();
        assert_eq!(stats.snapshot(), DeliveryStatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_reset_under_concurrent_traffic() {
        let stats = Arc::new(DeliveryStats::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let s = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                for _ in 0..500 {
                    s.record_sent();
                    s.record_received();
                }
            }));
        }
        stats.reset();
        for h in handles {
            h.await.unwrap();
        }
        let snap = stats.snapshot();
        assert!(snap.sent <= 2000);
        assert_eq!(snap.failed_sending, 0);

        stats.reset();
        assert_eq!(stats.snapshot(), DeliveryStatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_len_tracks_buffered_messages() {
        let queue = MessageQueue::with_capacity(8);
        let sender = queue.sender();
        sender
            .send(Envelope::new("dm", "lamp", Message::CmdSendInstances))
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);

        let mut rx = queue.take_receiver().unwrap();
        rx.recv().await.unwrap();
        assert!(queue.is_empty());
    }
}
