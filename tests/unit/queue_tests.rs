//! Message queue batching, closing, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use agent_relay::models::message::{EnhancedMode, PendingMessage};
use agent_relay::orchestrator::queue::{MessageQueue, SessionQueue, WaitOutcome};

fn msg(text: &str, mode: &str) -> PendingMessage {
    PendingMessage::new(text, EnhancedMode::new(mode))
}

async fn next(queue: &MessageQueue) -> WaitOutcome {
    tokio::time::timeout(
        Duration::from_secs(1),
        queue.wait_for_next_message(CancellationToken::new()),
    )
    .await
    .expect("queue wait finished")
}

#[tokio::test]
async fn same_mode_messages_are_batched() {
    let queue = MessageQueue::new();
    queue.push(msg("first", "default"));
    queue.push(msg("second", "default"));
    queue.push(msg("third", "read-only"));

    let WaitOutcome::Message(batch) = next(&queue).await else {
        panic!("expected a message");
    };
    assert_eq!(batch.message, "first\nsecond");
    assert_eq!(queue.size(), 1);

    let WaitOutcome::Message(single) = next(&queue).await else {
        panic!("expected a message");
    };
    assert_eq!(single.message, "third");
    assert_eq!(single.mode.permission_mode, "read-only");
}

#[tokio::test]
async fn isolated_messages_are_never_batched() {
    let queue = MessageQueue::new();
    queue.push(msg("a", "default"));
    queue.push(msg("b", "default").isolated());
    queue.push(msg("c", "default"));

    for expected in ["a", "b", "c"] {
        let WaitOutcome::Message(m) = next(&queue).await else {
            panic!("expected a message");
        };
        assert_eq!(m.message, expected);
    }
}

#[tokio::test]
async fn waiter_wakes_on_push() {
    let queue = Arc::new(MessageQueue::new());
    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.wait_for_next_message(CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.push(msg("hello", "default"));

    let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter finished")
        .expect("join");
    assert!(matches!(outcome, WaitOutcome::Message(ref m) if m.message == "hello"));
}

#[tokio::test]
async fn cancellation_ends_the_wait() {
    let queue = MessageQueue::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(
        queue.wait_for_next_message(cancel).await,
        WaitOutcome::Cancelled
    );
}

#[tokio::test]
async fn close_drains_before_reporting_closed() {
    let queue = MessageQueue::new();
    queue.push(msg("last words", "default"));
    queue.close();
    assert!(queue.is_closed());

    queue.push(msg("too late", "default"));
    assert!(matches!(next(&queue).await, WaitOutcome::Message(ref m) if m.message == "last words"));
    assert_eq!(next(&queue).await, WaitOutcome::Closed);
}

#[tokio::test]
async fn close_wakes_a_blocked_waiter() {
    let queue = Arc::new(MessageQueue::new());
    let waiter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.wait_for_next_message(CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter finished")
        .expect("join");
    assert_eq!(outcome, WaitOutcome::Closed);
}

#[test]
fn reset_empties_the_queue() {
    let queue = MessageQueue::new();
    queue.push(msg("a", "default"));
    queue.push(msg("b", "yolo"));
    assert_eq!(queue.size(), 2);
    queue.reset();
    assert_eq!(queue.size(), 0);
}
