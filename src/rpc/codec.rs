//! `Content-Length` frame codec for JSON-RPC envelopes.
//!
//! Wire format, one frame:
//!
//! ```text
//! Content-Length: N\r\n
//! \r\n
//! <N bytes of UTF-8 JSON>
//! ```
//!
//! Frames are written back-to-back and may be split at any byte boundary by
//! the pipe. [`FrameCodec`] buffers partial input and yields complete
//! [`Envelope`]s in the order their bytes arrived. It can be driven directly
//! with [`FrameCodec::push`] or used as the codec for
//! [`tokio_util::codec::FramedRead`] / [`tokio_util::codec::FramedWrite`].
//!
//! Encoding and decoding are synchronous and never suspend.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::models::envelope::Envelope;
use crate::{AppError, Result};

/// Separator between the header block and the body.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header name carrying the body length (matched case-insensitively).
const CONTENT_LENGTH: &str = "Content-Length";

/// Largest header block accepted before the terminator is seen: 8 KiB.
///
/// A peer that never emits `\r\n\r\n` would otherwise grow the buffer without
/// bound while we wait for the end of a header.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Default largest body accepted: 16 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Encode `envelope` as one complete frame.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the envelope cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(envelope)?;
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Append `chunk` to `leftover` and extract every complete frame.
///
/// Returns the decoded envelopes in stream order together with the bytes
/// that do not yet form a complete frame. An incomplete header or body is not
/// an error; the caller supplies more bytes on the next call.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] for a malformed header, a non-numeric or
/// oversized length, or a body that is not a JSON envelope. No envelope from
/// this call is returned in that case.
pub fn decode(mut leftover: BytesMut, chunk: &[u8]) -> Result<(Vec<Envelope>, BytesMut)> {
    leftover.extend_from_slice(chunk);
    let mut envelopes = Vec::new();
    while let Some(envelope) = extract_frame(&mut leftover, DEFAULT_MAX_FRAME_BYTES)? {
        envelopes.push(envelope);
    }
    Ok((envelopes, leftover))
}

/// Stateful incremental frame decoder and encoder.
///
/// After the first protocol error the codec is poisoned: the buffered bytes
/// can no longer be trusted to start on a frame boundary, so every later
/// decode attempt fails as well.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: BytesMut,
    max_frame_bytes: usize,
    poisoned: bool,
}

impl FrameCodec {
    /// Create a codec with the [`DEFAULT_MAX_FRAME_BYTES`] body limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec with a custom body limit.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_bytes,
            poisoned: false,
        }
    }

    /// Append inbound bytes to the internal buffer without decoding.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extract the next complete frame from the internal buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on malformed input or when the codec is
    /// already poisoned.
    pub fn next_frame(&mut self) -> Result<Option<Envelope>> {
        let mut buffer = std::mem::take(&mut self.buffer);
        let result = self.decode(&mut buffer);
        self.buffer = buffer;
        result
    }

    /// Append `chunk` and extract every complete frame, in order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on malformed input.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Envelope>> {
        self.extend(chunk);
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.next_frame()? {
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// Number of bytes held back waiting for the rest of a frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// `true` once a protocol error has been reported.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Envelope;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if self.poisoned {
            return Err(AppError::Protocol(
                "decoder poisoned by an earlier protocol error".into(),
            ));
        }
        extract_frame(src, self.max_frame_bytes).inspect_err(|_| self.poisoned = true)
    }

    /// A stream that ends in the middle of a frame is a protocol error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(envelope) = self.decode(src)? {
            return Ok(Some(envelope));
        }
        if src.iter().all(|b| matches!(b, b'\r' | b'\n')) {
            src.clear();
            Ok(None)
        } else {
            self.poisoned = true;
            Err(AppError::Protocol(format!(
                "stream ended inside a frame ({} bytes buffered)",
                src.len()
            )))
        }
    }
}

impl Encoder<&Envelope> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<()> {
        let frame = encode(item)?;
        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Try to pull exactly one frame off the front of `src`.
///
/// Bytes are only consumed when a whole frame is available and valid.
fn extract_frame(src: &mut BytesMut, max_frame_bytes: usize) -> Result<Option<Envelope>> {
    // Some peers terminate each body with CRLF; those bytes never start a header.
    let stray = src
        .iter()
        .take_while(|b| matches!(b, b'\r' | b'\n'))
        .count();
    src.advance(stray);

    let Some(header_len) = find_terminator(src) else {
        if src.len() > MAX_HEADER_BYTES {
            return Err(AppError::Protocol(format!(
                "header exceeds {MAX_HEADER_BYTES} bytes without terminator"
            )));
        }
        return Ok(None);
    };

    if header_len > MAX_HEADER_BYTES {
        return Err(AppError::Protocol(format!(
            "header exceeds {MAX_HEADER_BYTES} bytes"
        )));
    }

    let body_len = parse_header(&src[..header_len])?;
    if body_len > max_frame_bytes {
        return Err(AppError::Protocol(format!(
            "frame length {body_len} exceeds maximum {max_frame_bytes}"
        )));
    }

    let body_start = header_len + HEADER_TERMINATOR.len();
    let frame_len = body_start + body_len;
    if src.len() < frame_len {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_slice(&src[body_start..frame_len])
        .map_err(|e| AppError::Protocol(format!("malformed frame body: {e}")))?;
    src.advance(frame_len);
    Ok(Some(envelope))
}

/// Offset of the first `\r\n\r\n`, if present.
fn find_terminator(src: &[u8]) -> Option<usize> {
    src.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Parse the header block (without its terminator) into the body length.
fn parse_header(block: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(block)
        .ok()
        .filter(|text| text.is_ascii())
        .ok_or_else(|| AppError::Protocol("header is not ASCII".into()))?;

    let mut length = None;
    for line in text.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| AppError::Protocol(format!("malformed header line: {line:?}")))?;

        if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }

        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::Protocol(format!(
                "invalid {CONTENT_LENGTH} value: {value:?}"
            )));
        }
        let parsed = value.parse::<usize>().map_err(|e| {
            AppError::Protocol(format!("invalid {CONTENT_LENGTH} value {value:?}: {e}"))
        })?;
        length = Some(parsed);
    }

    length.ok_or_else(|| AppError::Protocol(format!("missing {CONTENT_LENGTH} header")))
}
