//! The in-process work queue (C2): a bounded FIFO of conversation IDs
//! awaiting analysis.
//!
//! A bounded MPSC channel with a single consumer loop that watches a
//! [`CancellationToken`] and drains whatever remains in the channel once
//! cancellation is observed, rather than dropping in-flight work.

use crate::error::QueueError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Creates a bounded work queue with the given maximum depth. Returns a
/// [`QueueHandle`] for producers (admission) and a [`QueueConsumer`] for
/// the analyzer loop.
pub fn channel(capacity: usize) -> (QueueHandle, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    (
        QueueHandle {
            sender: tx,
            capacity,
            depth: depth.clone(),
            closed: closed.clone(),
        },
        QueueConsumer {
            receiver: rx,
            depth,
        },
    )
}

/// Producer-side handle to the work queue. Cheaply cloneable; admission
/// holds one per HTTP handler.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<String>,
    capacity: usize,
    depth: Arc<AtomicUsize>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl QueueHandle {
    /// Offers a conversation ID to the queue without blocking. Returns
    /// [`QueueError::Full`] immediately if the queue is at capacity, and
    /// [`QueueError::Closed`] if `close` has been called — the admission
    /// controller (C3) turns both into backpressure signals to the caller.
    pub fn offer(&self, conversation_id: String) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        match self.sender.try_send(conversation_id) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(QueueError::Full {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// The current number of items waiting in the queue.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// The queue's configured maximum depth.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks the queue closed. Subsequent `offer` calls fail with
    /// [`QueueError::Closed`]; items already queued remain available to
    /// `take` until the consumer drains them.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Consumer-side handle to the work queue, owned by the analyzer loop.
pub struct QueueConsumer {
    receiver: mpsc::Receiver<String>,
    depth: Arc<AtomicUsize>,
}

impl QueueConsumer {
    /// Awaits the next conversation ID, or returns `None` once the queue
    /// is closed and drained.
    pub async fn take(&mut self) -> Option<String> {
        let item = self.receiver.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// The current number of items waiting in the queue.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Drains whatever remains in the queue without blocking, used during
    /// the shutdown grace period once cancellation has been observed.
    pub fn drain_available(&mut self) -> Vec<String> {
        let mut items = Vec::new();
        while let Ok(item) = self.receiver.try_recv() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            items.push(item);
        }
        items
    }

    /// Awaits the next item or cancellation, whichever comes first. Used
    /// by the analyzer's main loop.
    pub async fn take_or_cancelled(&mut self, cancel: &CancellationToken) -> Option<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = self.take() => item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offer_then_take_round_trips() {
        let (handle, mut consumer) = channel(4);
        handle.offer("c1".to_string()).expect("offer");
        assert_eq!(handle.depth(), 1);

        let taken = consumer.take().await;
        assert_eq!(taken, Some("c1".to_string()));
        assert_eq!(consumer.depth(), 0);
    }

    #[tokio::test]
    async fn offer_past_capacity_returns_full() {
        let (handle, _consumer) = channel(1);
        handle.offer("c1".to_string()).expect("first offer fits");
        let err = handle.offer("c2".to_string()).unwrap_err();
        assert!(matches!(err, QueueError::Full { capacity: 1 }));
    }

    #[tokio::test]
    async fn close_rejects_further_offers_but_preserves_existing_items() {
        let (handle, mut consumer) = channel(4);
        handle.offer("c1".to_string()).expect("offer before close");
        handle.close();

        let err = handle.offer("c2".to_string()).unwrap_err();
        assert!(matches!(err, QueueError::Closed));

        let taken = consumer.take().await;
        assert_eq!(taken, Some("c1".to_string()), "closing must not drop queued items");
    }

    #[tokio::test]
    async fn take_or_cancelled_returns_none_on_cancellation() {
        let (_handle, mut consumer) = channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = consumer.take_or_cancelled(&cancel).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn drain_available_collects_remaining_items_without_blocking() {
        let (handle, mut consumer) = channel(4);
        handle.offer("c1".to_string()).expect("offer");
        handle.offer("c2".to_string()).expect("offer");

        let drained = consumer.drain_available();
        assert_eq!(drained, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(consumer.depth(), 0);
    }
}
