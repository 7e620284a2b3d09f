//! Session event sinks.
//!
//! A session reports every decoded envelope and every lifecycle transition
//! to a caller-supplied [`EventSink`] as it happens. The sink is borrowed for
//! the duration of one run only; the session keeps no reference to it after
//! teardown.
//!
//! Stock sinks:
//! - [`NullSink`] discards everything.
//! - `Vec<SessionEvent>` collects events in memory.
//! - [`ChannelSink`] forwards events into an unbounded [`mpsc`] channel.
//! - [`FnSink`] wraps a closure.
//! - [`transcript::JsonlTranscript`] appends events to a JSONL file.

pub mod transcript;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::envelope::Envelope;
use crate::models::session::{CompletionReason, SessionState};

/// One observable occurrence during a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SessionEvent {
    /// The child process started.
    Spawned {
        /// OS process id.
        pid: Option<u32>,
    },
    /// A request frame was fully written to the child.
    RequestSent {
        /// Request id.
        id: Option<i64>,
        /// Request method.
        method: Option<String>,
    },
    /// An envelope was decoded from the child's output.
    Response {
        /// The decoded envelope.
        envelope: Envelope,
    },
    /// The session moved between lifecycle states.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// The session reached its terminal state; always the last event of a
    /// session that was not aborted by a fatal error.
    Finished {
        /// Trigger that ended the session.
        reason: CompletionReason,
    },
}

/// Receiver of session events.
pub trait EventSink: Send {
    /// Handle one event for the session identified by `session_id`.
    fn emit(&mut self, session_id: &str, event: SessionEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _session_id: &str, _event: SessionEvent) {}
}

impl EventSink for Vec<SessionEvent> {
    fn emit(&mut self, _session_id: &str, event: SessionEvent) {
        self.push(event);
    }
}

/// Sink that forwards events into an unbounded channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::UnboundedSender<SessionEvent>);

impl ChannelSink {
    /// Wrap an existing sender.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self(tx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, _session_id: &str, event: SessionEvent) {
        let _ = self.0.send(event);
    }
}

/// Sink adapter for a closure.
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: FnMut(&str, SessionEvent) + Send,
{
    fn emit(&mut self, session_id: &str, event: SessionEvent) {
        (self.0)(session_id, event);
    }
}
