//! Background session with a live event stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::latch::SessionLatch;
use super::predicate::CompletionPredicate;
use super::session_manager::SessionOrchestrator;
use crate::models::envelope::Envelope;
use crate::models::session::{SessionResult, SessionState};
use crate::sink::{ChannelSink, SessionEvent};
use crate::{AppError, Result};

/// A session running on its own task.
///
/// Events are delivered in order through [`next_event`](Self::next_event) or
/// the [`Stream`] impl. The stream ends after the session's last event.
///
/// Dropping the handle detaches the session; it still ends at its deadline.
#[derive(Debug)]
pub struct SessionHandle {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    latch: Arc<SessionLatch>,
    task: JoinHandle<Result<SessionResult>>,
}

impl SessionHandle {
    /// Start `requests` against a fresh child on a new task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn<P>(orchestrator: SessionOrchestrator, requests: Vec<Envelope>, predicate: P) -> Self
    where
        P: CompletionPredicate + 'static,
    {
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let latch = Arc::new(SessionLatch::new());

        let task = {
            let cancel = cancel.clone();
            let latch = Arc::clone(&latch);
            tokio::spawn(async move {
                let mut sink = ChannelSink::new(tx);
                orchestrator
                    .run_with_latch(&requests, &predicate, &mut sink, &cancel, &latch)
                    .await
            })
        };

        Self {
            events,
            cancel,
            latch,
            task,
        }
    }

    /// Ask the session to stop. The result reports
    /// [`SessionState::Cancelled`] unless another trigger won first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this session when fired.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.latch.state()
    }

    /// Next event, or `None` once the session has finished and every event
    /// has been delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Wait for the session to end.
    ///
    /// # Errors
    ///
    /// Returns the session's own error, or [`AppError::Session`] if the
    /// session task panicked or was aborted.
    pub async fn finish(self) -> Result<SessionResult> {
        self.task
            .await
            .map_err(|e| AppError::Session(format!("session task failed: {e}")))?
    }
}

impl Stream for SessionHandle {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}
