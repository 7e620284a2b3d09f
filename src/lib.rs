#![forbid(unsafe_code)]

//! Single-shot JSON-RPC sessions over `Content-Length` framed child stdio.
//!
//! A session spawns a child, writes a fixed list of requests, collects every
//! envelope the child answers with, and ends on the first of: completion
//! predicate satisfied, timeout, child exit, or cancellation. Teardown runs
//! exactly once and the child is always terminated.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod rpc;
pub mod sink;

pub use config::SessionConfig;
pub use errors::{AppError, Result};
pub use models::envelope::Envelope;
pub use models::session::{CompletionReason, ExitInfo, SessionResult, SessionState};
pub use orchestrator::{
    run_session, CompletionPredicate, ExitPolicy, SessionHandle, SessionOptions,
    SessionOrchestrator,
};
pub use rpc::{FrameCodec, SpawnSpec};
pub use sink::{EventSink, SessionEvent};
