//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every fatal failure mode of a session.
///
/// Non-fatal session endings (timeout, child exit, cancellation) are not
/// errors; they are reported through
/// [`CompletionReason`](crate::models::session::CompletionReason).
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The child executable could not be found or started.
    Spawn(String),
    /// The child's stdin is closed or the write failed.
    Write(String),
    /// Malformed frame header, bad length, or malformed JSON body.
    Protocol(String),
    /// File-system or I/O operation failure outside the child pipes.
    Io(String),
    /// A session ended without satisfying its completion predicate.
    Session(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
