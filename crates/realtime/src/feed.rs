//! Change-event distribution (mechanics only).
//!
//! The feed is the transport layer between the record store and connected
//! clients. It is intentionally lightweight:
//!
//! - **Transport-agnostic**: in-memory channels here; a broker elsewhere.
//! - **At-least-once**: events may be delivered more than once; consumers
//!   are idempotent (the reconciler replaces by post-image).
//! - **Per-item ordering only**: the store publishes each item's changes in
//!   commit order, but nothing orders events across items.
//! - **No persistence**: the store and ledger remain the source of truth; a
//!   client that misses events re-snapshots instead of replaying.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

/// A subscription to a change stream.
///
/// Each subscription receives a copy of every event published to the feed
/// (broadcast semantics) and is consumed from a single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next event is available.
    pub fn recv(&self) -> Result<M, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Result<M, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Publish/subscribe abstraction for change events.
///
/// `publish()` is called by the record store strictly after commit, so a
/// publication failure can never un-commit a write; the caller may retry,
/// and duplicate delivery is safe for idempotent consumers.
pub trait ChangeFeed<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, F> ChangeFeed<M> for Arc<F>
where
    F: ChangeFeed<M> + ?Sized,
{
    type Error = F::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}

#[derive(Debug)]
pub enum InMemoryFeedError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

/// In-memory broadcast feed.
///
/// - No IO / no async
/// - Best-effort fan-out
/// - At-least-once acceptable (subscribers must be idempotent)
#[derive(Debug)]
pub struct InMemoryChangeFeed<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryChangeFeed<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryChangeFeed<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> ChangeFeed<M> for InMemoryChangeFeed<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryFeedError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryFeedError::Poisoned)?;

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}
