//! Session orchestration.
//!
//! Covers the single-shot session driver, its terminal-state latch,
//! completion predicates, and the background session handle.

pub mod handle;
pub mod latch;
pub mod predicate;
pub mod session_manager;

pub use handle::SessionHandle;
pub use latch::SessionLatch;
pub use predicate::{
    last_request_answered, AllResponded, CompletionPredicate, Never, ResponseWithId,
};
pub use session_manager::{run_session, ExitPolicy, SessionOptions, SessionOrchestrator};
