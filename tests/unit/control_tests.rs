use std::sync::Arc;

use agent_relay::models::message::{EnhancedMode, PendingMessage};
use agent_relay::models::permission::ApprovalDecision;
use agent_relay::orchestrator::control::{ControlCommand, OrchestratorHandle};
use agent_relay::orchestrator::queue::{MessageQueue, SessionQueue};

fn handle_with_queue() -> (
    OrchestratorHandle,
    tokio::sync::mpsc::UnboundedReceiver<ControlCommand>,
    Arc<MessageQueue>,
) {
    let queue = Arc::new(MessageQueue::new());
    queue.push(PendingMessage::new("queued", EnhancedMode::new("default")));
    let (handle, rx) = OrchestratorHandle::new(Arc::clone(&queue) as Arc<dyn SessionQueue>);
    (handle, rx, queue)
}

#[test]
fn abort_clears_queue_but_keeps_running() {
    let (handle, _rx, queue) = handle_with_queue();
    handle.abort();
    assert_eq!(queue.size(), 0);
    assert!(!handle.is_exiting());
    assert!(!handle.is_switch_requested());
}

#[test]
fn shutdown_marks_exiting_without_switch() {
    let (handle, _rx, queue) = handle_with_queue();
    handle.shutdown();
    assert!(handle.is_exiting());
    assert!(!handle.is_switch_requested());
    assert_eq!(queue.size(), 0);
}

#[test]
fn switch_marks_both_flags_and_is_idempotent() {
    let (handle, _rx, _queue) = handle_with_queue();
    handle.switch_to_local();
    handle.switch_to_local();
    assert!(handle.is_exiting());
    assert!(handle.is_switch_requested());
}

#[test]
fn clones_share_state() {
    let (handle, _rx, _queue) = handle_with_queue();
    let other = handle.clone();
    other.shutdown();
    assert!(handle.is_exiting());
}

#[test]
fn permission_decisions_are_forwarded_to_the_loop() {
    let (handle, mut rx, _queue) = handle_with_queue();
    handle.resolve_permission("approval-1", ApprovalDecision::Denied);
    assert_eq!(
        rx.try_recv().expect("command"),
        ControlCommand::ResolvePermission {
            id: "approval-1".into(),
            decision: ApprovalDecision::Denied,
        }
    );
}

#[test]
fn decisions_after_loop_exit_are_dropped_quietly() {
    let (handle, rx, _queue) = handle_with_queue();
    drop(rx);
    handle.resolve_permission("late", ApprovalDecision::Approved);
}
