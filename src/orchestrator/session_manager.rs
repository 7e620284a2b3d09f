//! Single-shot framed RPC session driver.
//!
//! [`SessionOrchestrator::run`] spawns the peer, writes every request in
//! order, then races four triggers in one `select!` loop:
//!
//! | Trigger                        | Terminal state                       |
//! |--------------------------------|--------------------------------------|
//! | completion predicate satisfied | [`SessionState::Completed`]          |
//! | session deadline               | [`SessionState::TimedOut`]           |
//! | child exit                     | [`SessionState::ChildExited`]        |
//! | caller cancellation            | [`SessionState::Cancelled`]          |
//! | write or protocol error        | [`SessionState::Failed`] (+ `Err`)   |
//!
//! One deadline, fixed at spawn time, bounds both the write phase and the
//! read phase. The winning trigger commits its state through
//! [`SessionLatch`]; only that commit performs teardown.
//!
//! When the child exits, output it wrote before exiting may still sit in the
//! pipe. That tail is drained (bounded by [`SessionOptions::exit_drain_grace`]
//! and the deadline) and decoded before the exit is reported, so the
//! predicate can still complete the session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::latch::SessionLatch;
use super::predicate::CompletionPredicate;
use crate::models::envelope::Envelope;
use crate::models::session::{
    CompletionReason, ExitInfo, PendingRequest, SessionResult, SessionState,
};
use crate::rpc::codec::{self, FrameCodec, DEFAULT_MAX_FRAME_BYTES};
use crate::rpc::spawner::{ProcessHandle, SpawnSpec};
use crate::sink::{EventSink, SessionEvent};
use crate::{AppError, Result};

/// Default session budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed to drain stdout after the child exits.
pub const DEFAULT_EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How a child exit before completion is classified.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Any early exit ends in [`SessionState::ChildExited`]; a non-zero
    /// status is only logged.
    #[default]
    Tolerate,
    /// A non-zero exit code or a signal ends in [`SessionState::Failed`].
    FailOnError,
}

impl ExitPolicy {
    /// Terminal state for an early exit with status `exit`.
    #[must_use]
    pub fn classify(self, exit: &ExitInfo) -> SessionState {
        match self {
            Self::FailOnError if !exit.success() => SessionState::Failed,
            _ => SessionState::ChildExited,
        }
    }
}

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Budget from spawn to teardown.
    pub timeout: Duration,
    /// Classification of early child exits.
    pub exit_policy: ExitPolicy,
    /// Largest accepted frame body.
    pub max_frame_bytes: usize,
    /// How long buffered stdout is drained after the child exits.
    pub exit_drain_grace: Duration,
}

impl SessionOptions {
    /// Defaults with a custom timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            exit_policy: ExitPolicy::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            exit_drain_grace: DEFAULT_EXIT_DRAIN_GRACE,
        }
    }
}

/// Drives sessions against one spawn target.
///
/// Each call to [`run`](Self::run) spawns a fresh child; sessions share no
/// process, buffer, or lock.
#[derive(Debug, Clone)]
pub struct SessionOrchestrator {
    spawn: SpawnSpec,
    options: SessionOptions,
}

impl SessionOrchestrator {
    /// Create an orchestrator for `spawn` with `options`.
    #[must_use]
    pub fn new(spawn: SpawnSpec, options: SessionOptions) -> Self {
        Self { spawn, options }
    }

    /// Spawn target.
    #[must_use]
    pub fn spawn_spec(&self) -> &SpawnSpec {
        &self.spawn
    }

    /// Session tunables.
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Run one session to its terminal state.
    ///
    /// Returns `Ok` for [`Completed`](SessionState::Completed),
    /// [`TimedOut`](SessionState::TimedOut),
    /// [`ChildExited`](SessionState::ChildExited),
    /// [`Cancelled`](SessionState::Cancelled), and for an early exit that
    /// [`ExitPolicy::FailOnError`] classifies as `Failed`. Every `Ok` result
    /// carries the responses collected so far.
    ///
    /// # Errors
    ///
    /// - [`AppError::Spawn`]: the child could not be started.
    /// - [`AppError::Write`]: a request could not be written.
    /// - [`AppError::Protocol`]: the child produced a malformed frame.
    pub async fn run(
        &self,
        requests: &[Envelope],
        predicate: &dyn CompletionPredicate,
        sink: &mut dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<SessionResult> {
        let latch = SessionLatch::new();
        self.run_with_latch(requests, predicate, sink, cancel, &latch)
            .await
    }

    /// [`run`](Self::run) with a caller-owned latch, so the state can be
    /// observed from outside while the session is in flight.
    pub(crate) async fn run_with_latch(
        &self,
        requests: &[Envelope],
        predicate: &dyn CompletionPredicate,
        sink: &mut dyn EventSink,
        cancel: &CancellationToken,
        latch: &SessionLatch,
    ) -> Result<SessionResult> {
        let session_id = Uuid::new_v4().to_string();
        let process = ProcessHandle::spawn(&self.spawn)?;
        let deadline = Instant::now() + self.options.timeout;

        let mut session = ActiveSession {
            id: session_id,
            started: Instant::now(),
            process,
            codec: FrameCodec::with_max_frame_bytes(self.options.max_frame_bytes),
            latch,
            sink,
            predicate,
            responses: Vec::new(),
            sent: Vec::with_capacity(requests.len()),
        };
        let pid = session.process.pid();
        session.emit(SessionEvent::Spawned { pid });
        info!(session_id = %session.id, pid, requests = requests.len(), "session started");

        // ── Write phase ──────────────────────────────────────
        for request in requests {
            match session.send(request, deadline, cancel).await {
                WriteStep::Written => {}
                WriteStep::TimedOut => {
                    return Ok(session.finish(SessionState::TimedOut, CompletionReason::TimedOut));
                }
                WriteStep::Cancelled => {
                    return Ok(session.finish(SessionState::Cancelled, CompletionReason::Cancelled));
                }
                WriteStep::Failed(err) => return Err(session.fail(err)),
            }
        }
        session.enter_running();

        // ── Read phase ───────────────────────────────────────
        let mut exit_watch = session.process.exit_watch();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        let mut stdout_open = true;

        loop {
            let step = tokio::select! {
                biased;

                () = cancel.cancelled() => ReadStep::Cancelled,
                () = &mut sleep => ReadStep::TimedOut,
                chunk = session.process.next_chunk(), if stdout_open => ReadStep::Chunk(chunk),
                exit = exit_watch.wait() => ReadStep::Exited(exit),
            };

            match step {
                ReadStep::Cancelled => {
                    return Ok(session.finish(SessionState::Cancelled, CompletionReason::Cancelled));
                }
                ReadStep::TimedOut => {
                    return Ok(session.finish(SessionState::TimedOut, CompletionReason::TimedOut));
                }
                ReadStep::Chunk(Some(bytes)) => match session.ingest(&bytes) {
                    Ok(true) => {
                        return Ok(
                            session.finish(SessionState::Completed, CompletionReason::Completed)
                        );
                    }
                    Ok(false) => {}
                    Err(err) => return Err(session.fail(err)),
                },
                ReadStep::Chunk(None) => {
                    debug!(session_id = %session.id, "child stdout closed, waiting for exit");
                    stdout_open = false;
                }
                ReadStep::Exited(exit) => {
                    return session
                        .drain_after_exit(exit, deadline, &self.options, cancel)
                        .await;
                }
            }
        }
    }
}

/// Run one session with default options and no external cancellation.
///
/// # Errors
///
/// See [`SessionOrchestrator::run`].
pub async fn run_session(
    spawn: &SpawnSpec,
    requests: &[Envelope],
    predicate: &dyn CompletionPredicate,
    timeout: Duration,
    sink: &mut dyn EventSink,
) -> Result<SessionResult> {
    SessionOrchestrator::new(spawn.clone(), SessionOptions::with_timeout(timeout))
        .run(requests, predicate, sink, &CancellationToken::new())
        .await
}

// ── Private session state ─────────────────────────────────────────────────────

enum WriteStep {
    Written,
    TimedOut,
    Cancelled,
    Failed(AppError),
}

enum ReadStep {
    Cancelled,
    TimedOut,
    Chunk(Option<bytes::Bytes>),
    Exited(ExitInfo),
}

/// Everything one in-flight session owns.
struct ActiveSession<'a> {
    id: String,
    started: Instant,
    process: ProcessHandle,
    codec: FrameCodec,
    latch: &'a SessionLatch,
    sink: &'a mut dyn EventSink,
    predicate: &'a dyn CompletionPredicate,
    responses: Vec<Envelope>,
    sent: Vec<PendingRequest>,
}

impl ActiveSession<'_> {
    fn emit(&mut self, event: SessionEvent) {
        self.sink.emit(&self.id, event);
    }

    /// `NotStarted` → `Running`, at most once.
    fn enter_running(&mut self) {
        if self.latch.start() {
            self.emit(SessionEvent::StateChanged {
                from: SessionState::NotStarted,
                to: SessionState::Running,
            });
        }
    }

    /// Encode and write one request, racing the deadline and cancellation.
    async fn send(
        &mut self,
        request: &Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> WriteStep {
        let frame = match codec::encode(request) {
            Ok(frame) => frame,
            Err(err) => return WriteStep::Failed(err),
        };

        let step = tokio::select! {
            biased;

            () = cancel.cancelled() => WriteStep::Cancelled,
            () = tokio::time::sleep_until(deadline) => WriteStep::TimedOut,
            written = self.process.write(&frame) => match written {
                Ok(()) => WriteStep::Written,
                Err(err) => WriteStep::Failed(err),
            },
        };

        if matches!(step, WriteStep::Written) {
            debug!(
                session_id = %self.id,
                id = request.id,
                method = request.method.as_deref(),
                bytes = frame.len(),
                "request written"
            );
            self.sent.push(PendingRequest::sent(request));
            self.enter_running();
            self.emit(SessionEvent::RequestSent {
                id: request.id,
                method: request.method.clone(),
            });
        }
        step
    }

    /// Decode `chunk`, record and emit every envelope, and report whether the
    /// predicate is satisfied. Frames after the satisfying one are ignored.
    fn ingest(&mut self, chunk: &[u8]) -> Result<bool> {
        self.codec.extend(chunk);
        while let Some(envelope) = self.codec.next_frame()? {
            debug!(
                session_id = %self.id,
                id = envelope.id,
                method = envelope.method.as_deref(),
                "frame decoded"
            );
            self.responses.push(envelope.clone());
            self.emit(SessionEvent::Response { envelope });
            if self.predicate.is_complete(&self.responses) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Consume whatever the child wrote before exiting, then classify the exit.
    async fn drain_after_exit(
        mut self,
        exit: ExitInfo,
        deadline: Instant,
        options: &SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<SessionResult> {
        let drain_until = (Instant::now() + options.exit_drain_grace).min(deadline);

        loop {
            let chunk = tokio::select! {
                biased;

                () = cancel.cancelled() => None,
                chunk = tokio::time::timeout_at(drain_until, self.process.next_chunk()) => Some(chunk),
            };
            let Some(chunk) = chunk else {
                return Ok(self.finish(SessionState::Cancelled, CompletionReason::Cancelled));
            };

            match chunk {
                Ok(Some(bytes)) => match self.ingest(&bytes) {
                    Ok(true) => {
                        return Ok(self.finish(SessionState::Completed, CompletionReason::Completed));
                    }
                    Ok(false) => {}
                    Err(err) => return Err(self.fail(err)),
                },
                Ok(None) => break,
                Err(_elapsed) => {
                    debug!(session_id = %self.id, "stdout drain grace elapsed after exit");
                    break;
                }
            }
        }

        let state = options.exit_policy.classify(&exit);
        if !exit.success() {
            warn!(session_id = %self.id, %exit, "child exited before completion");
        }
        Ok(self.finish(state, CompletionReason::ChildExited { exit }))
    }

    /// Commit a non-fatal terminal state and build the result.
    fn finish(mut self, terminal: SessionState, reason: CompletionReason) -> SessionResult {
        let state = if self.teardown(terminal) {
            self.emit(SessionEvent::Finished { reason });
            terminal
        } else {
            self.latch.state()
        };

        let elapsed = self.started.elapsed();
        info!(
            session_id = %self.id,
            %state,
            %reason,
            responses = self.responses.len(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "session finished"
        );

        let pending = self
            .sent
            .into_iter()
            .filter(|req| {
                req.id.is_some_and(|id| {
                    !self
                        .responses
                        .iter()
                        .any(|env| env.is_response() && env.id == Some(id))
                })
            })
            .collect();

        SessionResult {
            session_id: self.id,
            pid: self.process.pid(),
            state,
            reason,
            exit: self.process.exit_status(),
            responses: self.responses,
            pending,
            elapsed,
        }
    }

    /// Commit [`SessionState::Failed`] for a fatal error and hand it back.
    fn fail(mut self, err: AppError) -> AppError {
        warn!(session_id = %self.id, error = %err, "session failed");
        self.teardown(SessionState::Failed);
        err
    }

    /// Commit `terminal` and, if this call won the latch, stop the child.
    ///
    /// Returns `true` for the winning call only.
    fn teardown(&mut self, terminal: SessionState) -> bool {
        let Some(previous) = self.latch.finish(terminal) else {
            debug!(session_id = %self.id, "terminal state already committed");
            return false;
        };

        self.process.terminate();
        self.process.close_stdin();
        self.emit(SessionEvent::StateChanged {
            from: previous,
            to: terminal,
        });
        true
    }
}
