//! Framed JSON-RPC transport over child process stdio.
//!
//! - `codec`: `Content-Length` framing for [`Envelope`](crate::models::envelope::Envelope)s.
//! - `reader`: stdout chunk pump and stderr drain.
//! - `spawner`: process spawning, exit watching, and termination.

pub mod codec;
pub mod reader;
pub mod spawner;

pub use codec::FrameCodec;
pub use spawner::{ExitWatch, ProcessHandle, SpawnSpec};
