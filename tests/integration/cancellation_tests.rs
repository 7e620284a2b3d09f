//! Cancellation and concurrent trigger races through `SessionHandle`.

use std::time::Duration;

use futures_util::StreamExt;

use framed_rpc::models::session::{CompletionReason, SessionState};
use framed_rpc::orchestrator::predicate::ResponseWithId;
use framed_rpc::orchestrator::{SessionHandle, SessionOptions, SessionOrchestrator};
use framed_rpc::sink::SessionEvent;

use super::test_helpers::{finished_count, initialize, sh, tool_result, wait_until_gone, FrameDir};

async fn wait_for_pid(handle: &mut SessionHandle) -> u32 {
    loop {
        match handle.next_event().await {
            Some(SessionEvent::Spawned { pid: Some(pid) }) => return pid,
            Some(_) => {}
            None => panic!("session ended before spawning"),
        }
    }
}

#[tokio::test]
async fn cancel_terminates_child() {
    let orchestrator = SessionOrchestrator::new(
        sh("sleep 30"),
        SessionOptions::with_timeout(Duration::from_secs(30)),
    );
    let mut handle = SessionHandle::spawn(orchestrator, vec![initialize()], ResponseWithId(1));

    let pid = wait_for_pid(&mut handle).await;
    handle.cancel();

    let events: Vec<SessionEvent> = (&mut handle).collect().await;
    assert_eq!(handle.state(), SessionState::Cancelled);

    let result = handle.finish().await.expect("cancellation is not an error");
    assert_eq!(result.state, SessionState::Cancelled);
    assert_eq!(result.reason, CompletionReason::Cancelled);
    assert!(result.elapsed < Duration::from_secs(5));
    assert_eq!(finished_count(&events), 1);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Finished {
            reason: CompletionReason::Cancelled
        })
    ));

    assert!(wait_until_gone(pid).await, "child is terminated after cancel");
}

#[tokio::test]
async fn cancellation_token_can_be_fired_elsewhere() {
    let orchestrator = SessionOrchestrator::new(
        sh("sleep 30"),
        SessionOptions::with_timeout(Duration::from_secs(30)),
    );
    let handle = SessionHandle::spawn(orchestrator, Vec::new(), ResponseWithId(1));
    let token = handle.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let result = handle.finish().await.expect("session runs");
    assert_eq!(result.state, SessionState::Cancelled);
}

/// Cancellation racing a response that completes the session: whichever wins,
/// exactly one terminal state is committed and reported once.
#[tokio::test]
async fn cancel_racing_completion_finishes_once() {
    let frames = FrameDir::new();
    let path = frames.frames("out", &[tool_result()]);
    let script = format!("cat '{}'; sleep 5", path.display());

    for _ in 0..10 {
        let orchestrator = SessionOrchestrator::new(
            sh(&script),
            SessionOptions::with_timeout(Duration::from_secs(5)),
        );
        let mut handle = SessionHandle::spawn(orchestrator, Vec::new(), ResponseWithId(2));
        let pid = wait_for_pid(&mut handle).await;
        handle.cancel();

        let events: Vec<SessionEvent> = (&mut handle).collect().await;
        let result = handle.finish().await.expect("session runs");

        assert!(
            matches!(
                result.state,
                SessionState::Completed | SessionState::Cancelled
            ),
            "unexpected state {}",
            result.state
        );
        assert_eq!(finished_count(&events), 1);
        let terminal_changes = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::StateChanged { to, .. } if to.is_terminal()))
            .count();
        assert_eq!(terminal_changes, 1);
        assert!(wait_until_gone(pid).await);
    }
}

/// Cancelling after the session already ended changes nothing.
#[tokio::test]
async fn cancel_after_finish_is_ignored() {
    let frames = FrameDir::new();
    let path = frames.frames("out", &[tool_result()]);
    let orchestrator = SessionOrchestrator::new(
        sh(&format!("cat '{}'; sleep 5", path.display())),
        SessionOptions::with_timeout(Duration::from_secs(5)),
    );
    let mut handle = SessionHandle::spawn(orchestrator, Vec::new(), ResponseWithId(2));

    while let Some(event) = handle.next_event().await {
        if matches!(event, SessionEvent::Finished { .. }) {
            break;
        }
    }
    handle.cancel();

    let result = handle.finish().await.expect("session runs");
    assert_eq!(result.state, SessionState::Completed);
}
