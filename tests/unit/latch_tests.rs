//! Terminal-state latch under contention.

use std::sync::{Arc, Barrier};
use std::thread;

use framed_rpc::models::session::SessionState;
use framed_rpc::orchestrator::SessionLatch;

const TERMINALS: [SessionState; 5] = [
    SessionState::Completed,
    SessionState::TimedOut,
    SessionState::ChildExited,
    SessionState::Cancelled,
    SessionState::Failed,
];

/// Racing triggers commit exactly one terminal state, and it is the one the
/// latch reports afterwards.
#[test]
fn concurrent_finish_has_one_winner() {
    for _ in 0..200 {
        let latch = Arc::new(SessionLatch::new());
        latch.start();
        let barrier = Arc::new(Barrier::new(TERMINALS.len()));

        let handles: Vec<_> = TERMINALS
            .iter()
            .map(|&terminal| {
                let latch = Arc::clone(&latch);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    latch.finish(terminal).map(|_| terminal)
                })
            })
            .collect();

        let winners: Vec<SessionState> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(winners.len(), 1, "exactly one trigger wins");
        assert_eq!(latch.state(), winners[0]);
        assert!(latch.is_finished());
    }
}

#[test]
fn non_terminal_finish_is_refused() {
    let latch = SessionLatch::new();
    assert_eq!(latch.finish(SessionState::Running), None);
    assert_eq!(latch.state(), SessionState::NotStarted);
}

#[test]
fn start_after_finish_is_refused() {
    let latch = SessionLatch::new();
    assert!(latch.finish(SessionState::Cancelled).is_some());
    assert!(!latch.start());
    assert_eq!(latch.state(), SessionState::Cancelled);
}
