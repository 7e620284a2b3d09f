//! Session lifecycle model and final result.

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::envelope::Envelope;

/// Lifecycle state of one session.
///
/// `Cancelled` is a terminal state of its own so callers can tell a caller
/// abort from a timeout. Its teardown is identical to `TimedOut`: the child
/// is terminated, reading stops, and the collected responses are returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Child spawned, no request written yet.
    NotStarted = 0,
    /// At least one request written (or none were required).
    Running = 1,
    /// Completion predicate satisfied.
    Completed = 2,
    /// Timeout fired before completion.
    TimedOut = 3,
    /// Child exited before completion.
    ChildExited = 4,
    /// Caller cancelled the session.
    Cancelled = 5,
    /// Write failure, protocol error, or a child exit rejected by policy.
    Failed = 6,
}

impl SessionState {
    /// `true` for every state a session can end in.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::NotStarted, Self::Running) => true,
            (Self::NotStarted | Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Inverse of the `repr(u8)` discriminant.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::NotStarted),
            1 => Some(Self::Running),
            2 => Some(Self::Completed),
            3 => Some(Self::TimedOut),
            4 => Some(Self::ChildExited),
            5 => Some(Self::Cancelled),
            6 => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::ChildExited => "child_exited",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, absent when killed by a signal.
    pub code: Option<i32>,
    /// Terminating signal number (Unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// `true` for a clean zero exit.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a platform exit status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl Display for ExitInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {code}"),
            (None, Some(signal)) => write!(f, "terminated by signal {signal}"),
            (None, None) => f.write_str("exit status unknown"),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CompletionReason {
    /// The completion predicate was satisfied.
    Completed,
    /// The session timeout elapsed first.
    TimedOut,
    /// The child exited first.
    ChildExited {
        /// Recorded exit status.
        exit: ExitInfo,
    },
    /// The caller cancelled the session.
    Cancelled,
}

impl Display for CompletionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::TimedOut => f.write_str("timed out"),
            Self::ChildExited { exit } => write!(f, "child {exit}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Bookkeeping for a request written to the child.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Request id, if the envelope carried one.
    pub id: Option<i64>,
    /// Request method.
    pub method: Option<String>,
    /// When the frame finished writing.
    pub sent_at: Instant,
}

impl PendingRequest {
    /// Record that `envelope` was just written.
    #[must_use]
    pub fn sent(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id,
            method: envelope.method.clone(),
            sent_at: Instant::now(),
        }
    }
}

/// Final outcome of a session that did not fail fatally.
#[derive(Debug, Clone)]
pub struct SessionResult {
    /// Identifier used in logs and transcripts.
    pub session_id: String,
    /// Child process id at spawn time.
    pub pid: Option<u32>,
    /// Terminal state reached.
    pub state: SessionState,
    /// Trigger that ended the session.
    pub reason: CompletionReason,
    /// Decoded inbound envelopes in arrival order.
    pub responses: Vec<Envelope>,
    /// Requests with an id that never received a matching response.
    pub pending: Vec<PendingRequest>,
    /// Child exit status, when it was observed before teardown.
    pub exit: Option<ExitInfo>,
    /// Wall time from spawn to teardown.
    pub elapsed: Duration,
}

impl SessionResult {
    /// Last decoded envelope, if any arrived.
    #[must_use]
    pub fn last_response(&self) -> Option<&Envelope> {
        self.responses.last()
    }

    /// `true` only when the predicate was satisfied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// First response whose id matches `id`.
    #[must_use]
    pub fn response_for(&self, id: i64) -> Option<&Envelope> {
        self.responses
            .iter()
            .find(|env| env.is_response() && env.id == Some(id))
    }
}
