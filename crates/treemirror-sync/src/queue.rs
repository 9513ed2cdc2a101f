//! Bounded per-tree event queue
//!
//! Sits between the intake loop and the worker. Capacity is fixed; what
//! happens when it is full depends on the [`OverflowPolicy`]:
//!
//! - [`OverflowPolicy::Block`]: the sender waits, which in turn stalls the
//!   notify thread and leaves further events in the kernel queue
//! - [`OverflowPolicy::DropOldest`]: the oldest queued events are discarded
//!   and the receiver learns how many it missed. The underlying broadcast
//!   channel rounds its capacity up to the next power of two, so a
//!   capacity of 1000 actually buffers 1024 events.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use treemirror_core::config::{OverflowPolicy, MAX_QUEUE_CAPACITY};
use treemirror_core::domain::FileEvent;

/// The receiving side is gone; no further events can be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event queue is closed")]
pub struct QueueClosed;

/// One item taken from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Event(FileEvent),
    /// Events discarded because the queue overflowed
    Dropped(u64),
    /// Every sender is gone and the queue is drained
    Closed,
}

enum SenderInner {
    Block(mpsc::Sender<FileEvent>),
    DropOldest(broadcast::Sender<FileEvent>),
}

enum ReceiverInner {
    Block(mpsc::Receiver<FileEvent>),
    DropOldest(broadcast::Receiver<FileEvent>),
}

/// Producer half of an event queue
pub struct EventSender {
    inner: SenderInner,
}

/// Consumer half of an event queue
pub struct EventReceiver {
    inner: ReceiverInner,
}

/// Creates a bounded event queue.
///
/// Capacity is clamped to `1..=MAX_QUEUE_CAPACITY`.
pub fn event_queue(capacity: usize, policy: OverflowPolicy) -> (EventSender, EventReceiver) {
    let capacity = capacity.clamp(1, MAX_QUEUE_CAPACITY);
    match policy {
        OverflowPolicy::Block => {
            let (tx, rx) = mpsc::channel(capacity);
            (
                EventSender {
                    inner: SenderInner::Block(tx),
                },
                EventReceiver {
                    inner: ReceiverInner::Block(rx),
                },
            )
        }
        OverflowPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (
                EventSender {
                    inner: SenderInner::DropOldest(tx),
                },
                EventReceiver {
                    inner: ReceiverInner::DropOldest(rx),
                },
            )
        }
    }
}

impl EventSender {
    /// Queues an event, waiting for room under [`OverflowPolicy::Block`]
    pub async fn send(&self, event: FileEvent) -> Result<(), QueueClosed> {
        match &self.inner {
            SenderInner::Block(tx) => tx.send(event).await.map_err(|_| QueueClosed),
            SenderInner::DropOldest(tx) => tx.send(event).map(|_| ()).map_err(|_| QueueClosed),
        }
    }

    /// The policy this queue was created with
    pub fn policy(&self) -> OverflowPolicy {
        match self.inner {
            SenderInner::Block(_) => OverflowPolicy::Block,
            SenderInner::DropOldest(_) => OverflowPolicy::DropOldest,
        }
    }
}

impl EventReceiver {
    /// Takes the next item, blocking the current thread.
    ///
    /// Must not be called from inside an async context.
    pub fn blocking_recv(&mut self) -> Received {
        match &mut self.inner {
            ReceiverInner::Block(rx) => rx.blocking_recv().map_or(Received::Closed, Received::Event),
            ReceiverInner::DropOldest(rx) => Self::from_broadcast(rx.blocking_recv()),
        }
    }

    /// Takes the next item
    pub async fn recv(&mut self) -> Received {
        match &mut self.inner {
            ReceiverInner::Block(rx) => rx.recv().await.map_or(Received::Closed, Received::Event),
            ReceiverInner::DropOldest(rx) => Self::from_broadcast(rx.recv().await),
        }
    }

    fn from_broadcast(result: Result<FileEvent, broadcast::error::RecvError>) -> Received {
        match result {
            Ok(event) => Received::Event(event),
            Err(broadcast::error::RecvError::Lagged(n)) => Received::Dropped(n),
            Err(broadcast::error::RecvError::Closed) => Received::Closed,
        }
    }
}
