//! Session message queue.
//!
//! [`SessionQueue`] is what the orchestrator consumes; [`MessageQueue`] is
//! the in-process implementation fed by the terminal (or any transport).
//! Consecutive messages enqueued under the same mode are delivered as one
//! batch so a burst of input becomes a single turn.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::message::PendingMessage;

/// Boxed future returned by [`SessionQueue::wait_for_next_message`].
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of waiting on the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The next message (possibly a batch).
    Message(PendingMessage),
    /// The wait's cancellation token fired.
    Cancelled,
    /// Input has ended for good.
    Closed,
}

/// Source of user messages for one session.
pub trait SessionQueue: Send + Sync {
    /// Block until a message is available, the queue closes, or `cancel`
    /// fires.
    fn wait_for_next_message(&self, cancel: CancellationToken) -> QueueFuture<'_, WaitOutcome>;

    /// Drop every queued message.
    fn reset(&self);

    /// Number of queued messages.
    fn size(&self) -> usize;
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<PendingMessage>,
    closed: bool,
}

/// In-memory [`SessionQueue`] with same-mode batching.
#[derive(Debug, Default)]
pub struct MessageQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MessageQueue {
    /// Create an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message. Ignored once the queue is closed.
    pub fn push(&self, message: PendingMessage) {
        {
            let mut state = self.lock();
            if state.closed {
                debug!("message queue closed; dropping message");
                return;
            }
            state.items.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Mark end-of-input. Queued messages are still delivered first.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_take(&self) -> Option<WaitOutcome> {
        let mut state = self.lock();
        if let Some(batch) = take_batch(&mut state.items) {
            return Some(WaitOutcome::Message(batch));
        }
        state.closed.then_some(WaitOutcome::Closed)
    }
}

impl SessionQueue for MessageQueue {
    fn wait_for_next_message(&self, cancel: CancellationToken) -> QueueFuture<'_, WaitOutcome> {
        Box::pin(async move {
            loop {
                if cancel.is_cancelled() {
                    return WaitOutcome::Cancelled;
                }
                if let Some(outcome) = self.try_take() {
                    return outcome;
                }
                tokio::select! {
                    () = cancel.cancelled() => return WaitOutcome::Cancelled,
                    () = self.notify.notified() => {}
                }
            }
        })
    }

    fn reset(&self) {
        let dropped = {
            let mut state = self.lock();
            let n = state.items.len();
            state.items.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "message queue reset");
        }
    }

    fn size(&self) -> usize {
        self.lock().items.len()
    }
}

/// Pop the head message plus every directly following message that shares
/// its mode and is not isolated.
fn take_batch(items: &mut VecDeque<PendingMessage>) -> Option<PendingMessage> {
    let mut head = items.pop_front()?;
    if head.isolate {
        return Some(head);
    }
    while let Some(next) = items.front() {
        if next.isolate || next.mode_hash != head.mode_hash {
            break;
        }
        if let Some(next) = items.pop_front() {
            head.message.push('\n');
            head.message.push_str(&next.message);
        }
    }
    Some(head)
}
