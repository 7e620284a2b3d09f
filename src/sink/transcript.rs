//! JSONL session transcript.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::{EventSink, SessionEvent};
use crate::{AppError, Result};

/// One transcript line.
#[derive(Debug, Serialize)]
struct TranscriptEntry<'a> {
    timestamp: DateTime<Utc>,
    session_id: &'a str,
    event: &'a SessionEvent,
}

/// Event sink appending one JSON object per event to a file.
///
/// Lines look like
/// `{"timestamp":"…","session_id":"…","event":{"type":"response",…}}`.
/// A failed write is logged and does not interrupt the session.
pub struct JsonlTranscript {
    path: PathBuf,
    writer: BufWriter<fs::File>,
}

impl JsonlTranscript {
    /// Open `path` for appending, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory or file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Io(format!(
                    "failed to create transcript directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AppError::Io(format!("failed to open transcript {}: {e}", path.display()))
            })?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Transcript file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, session_id: &str, event: &SessionEvent) -> Result<()> {
        let entry = TranscriptEntry {
            timestamp: Utc::now(),
            session_id,
            event,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Io(format!("failed to serialize transcript entry: {e}")))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl EventSink for JsonlTranscript {
    fn emit(&mut self, session_id: &str, event: SessionEvent) {
        if let Err(e) = self.append(session_id, &event) {
            warn!(path = %self.path.display(), error = %e, "failed to write transcript entry");
        }
    }
}
