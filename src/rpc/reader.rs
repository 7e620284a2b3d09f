//! Child output pumps.
//!
//! [`pump_stdout`] forwards raw stdout chunks, unparsed, to the session
//! through a bounded [`mpsc`] channel. Frame decoding happens on the session
//! side so that every byte passes through a single [`FrameCodec`] buffer.
//!
//! [`drain_stderr`] treats stderr as an opaque diagnostic stream: each line is
//! logged at `DEBUG` and otherwise discarded.
//!
//! [`FrameCodec`]: crate::rpc::codec::FrameCodec

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Read buffer size for one stdout chunk.
pub const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Longest stderr line logged in one piece; longer lines are dropped.
pub const MAX_STDERR_LINE_BYTES: usize = 64 * 1024;

/// Forward stdout chunks into `chunk_tx` until EOF, a read error, or the
/// receiving side going away.
///
/// Returns the number of bytes forwarded.
pub async fn pump_stdout<R>(pid: Option<u32>, stdout: R, chunk_tx: mpsc::Sender<Bytes>) -> usize
where
    R: AsyncRead + Unpin + Send,
{
    let mut stream = ReaderStream::with_capacity(stdout, READ_CHUNK_BYTES);
    let mut forwarded = 0usize;

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                forwarded += chunk.len();
                if chunk_tx.send(chunk).await.is_err() {
                    debug!(pid, "stdout pump: receiver dropped, stopping");
                    return forwarded;
                }
            }
            Err(err) => {
                warn!(pid, error = %err, "stdout pump: read failed, stopping");
                return forwarded;
            }
        }
    }

    debug!(pid, forwarded, "stdout pump: EOF");
    forwarded
}

/// Log every stderr line at `DEBUG` until EOF.
///
/// Returns the number of lines seen.
pub async fn drain_stderr<R>(pid: Option<u32>, stderr: R) -> usize
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = FramedRead::new(
        stderr,
        LinesCodec::new_with_max_length(MAX_STDERR_LINE_BYTES),
    );
    let mut seen = 0usize;

    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => {
                seen += 1;
                debug!(pid, line = %line, "child stderr");
            }
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                // The framed stream ends after any decode error; keep the pipe
                // empty so the child never blocks on a full stderr buffer.
                seen += 1;
                debug!(pid, "child stderr: overlong line, discarding the rest");
                let mut rest = lines.into_inner();
                if let Err(err) = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await {
                    debug!(pid, error = %err, "child stderr: read failed, stopping");
                }
                return seen;
            }
            Err(LinesCodecError::Io(err)) => {
                debug!(pid, error = %err, "child stderr: read failed, stopping");
                break;
            }
        }
    }

    seen
}
