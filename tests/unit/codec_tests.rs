//! Unit tests for `Content-Length` framing.
//!
//! Covers:
//! - envelopes survive encode → decode unchanged
//! - decoding is independent of how the byte stream is chunked
//! - malformed headers and bodies are protocol errors that yield no frame
//! - header name case, extra headers, and inter-frame CRLF are tolerated
//! - the codec is poisoned after its first error
//! - `FramedRead` / `Encoder` integration

use bytes::BytesMut;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use framed_rpc::models::envelope::Envelope;
use framed_rpc::rpc::codec::{self, FrameCodec, MAX_HEADER_BYTES};
use framed_rpc::AppError;

fn sample_envelopes() -> Vec<Envelope> {
    vec![
        Envelope::response(1, json!({"server": {"name": "finder", "version": "1.0"}})),
        Envelope::notification("log", json!({"message": "héllo wörld"})),
        Envelope::error_response(2, json!({"code": -32601, "message": "no such tool"})),
    ]
}

fn stream_of(envelopes: &[Envelope]) -> Vec<u8> {
    envelopes
        .iter()
        .flat_map(|env| codec::encode(env).expect("encode"))
        .collect()
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// The header announces the byte length of the UTF-8 body, not its char count.
#[test]
fn encode_writes_byte_length_header() {
    let env = Envelope::notification("log", json!({"message": "ü"}));
    let frame = codec::encode(&env).expect("encode");
    let body = serde_json::to_vec(&env).unwrap();

    let expected_header = format!("Content-Length: {}\r\n\r\n", body.len());
    assert!(frame.starts_with(expected_header.as_bytes()));
    assert_eq!(&frame[expected_header.len()..], body.as_slice());
}

#[test]
fn encode_then_decode_round_trips() {
    for env in sample_envelopes() {
        let frame = codec::encode(&env).expect("encode");
        let (decoded, leftover) = codec::decode(BytesMut::new(), &frame).expect("decode");
        assert_eq!(decoded, vec![env]);
        assert!(leftover.is_empty());
    }
}

// ── Split invariance ─────────────────────────────────────────────────────────

/// Every chunk size from one byte up to the whole stream yields the same
/// envelopes in the same order.
#[test]
fn decoding_is_independent_of_chunk_boundaries() {
    let envelopes = sample_envelopes();
    let stream = stream_of(&envelopes);

    for size in 1..=stream.len() {
        let mut codec = FrameCodec::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(size) {
            decoded.extend(codec.push(chunk).expect("push"));
        }
        assert_eq!(decoded, envelopes, "chunk size {size}");
        assert_eq!(codec.buffered_len(), 0, "chunk size {size}");
    }
}

#[test]
fn free_decode_carries_leftover_between_calls() {
    let envelopes = sample_envelopes();
    let stream = stream_of(&envelopes);
    let (head, tail) = stream.split_at(stream.len() / 2);

    let (first, leftover) = codec::decode(BytesMut::new(), head).expect("first half");
    assert!(!leftover.is_empty(), "a frame straddles the split");
    let (second, leftover) = codec::decode(leftover, tail).expect("second half");

    let all: Vec<_> = first.into_iter().chain(second).collect();
    assert_eq!(all, envelopes);
    assert!(leftover.is_empty());
}

#[test]
fn incomplete_frame_is_not_an_error() {
    let frame = codec::encode(&Envelope::response(1, json!(true))).unwrap();
    let (decoded, leftover) =
        codec::decode(BytesMut::new(), &frame[..frame.len() - 1]).expect("partial");
    assert!(decoded.is_empty());
    assert_eq!(leftover.len(), frame.len() - 1);
}

// ── Malformed input ──────────────────────────────────────────────────────────

#[test]
fn non_numeric_length_is_protocol_error() {
    let result = codec::decode(BytesMut::new(), b"Content-Length: abc\r\n\r\n");
    assert!(matches!(result, Err(AppError::Protocol(_))));
}

#[test]
fn missing_content_length_is_protocol_error() {
    let result = codec::decode(BytesMut::new(), b"Content-Type: application/json\r\n\r\n{}");
    let err = result.expect_err("missing length");
    assert!(err.to_string().contains("Content-Length"));
}

#[test]
fn malformed_body_is_protocol_error() {
    let result = codec::decode(BytesMut::new(), b"Content-Length: 5\r\n\r\n{nope");
    assert!(matches!(result, Err(AppError::Protocol(msg)) if msg.contains("malformed frame body")));
}

/// A good frame decoded before the bad one is still delivered by `next_frame`.
#[test]
fn frame_before_malformed_header_is_delivered() {
    let mut bytes = codec::encode(&Envelope::response(1, json!("ok"))).unwrap();
    bytes.extend_from_slice(b"Content-Length: abc\r\n\r\n");

    let mut codec = FrameCodec::new();
    codec.extend(&bytes);
    let first = codec.next_frame().expect("first frame").expect("complete");
    assert_eq!(first.id, Some(1));
    assert!(codec.next_frame().is_err());
}

#[test]
fn oversized_frame_is_rejected_before_body_arrives() {
    let mut codec = FrameCodec::with_max_frame_bytes(10);
    let result = codec.push(b"Content-Length: 11\r\n\r\n");
    assert!(matches!(result, Err(AppError::Protocol(msg)) if msg.contains("exceeds maximum")));
}

#[test]
fn unterminated_header_is_bounded() {
    let junk = vec![b'x'; MAX_HEADER_BYTES + 1];
    let mut codec = FrameCodec::new();
    assert!(codec.push(&junk).is_err());
}

#[test]
fn codec_is_poisoned_after_error() {
    let mut codec = FrameCodec::new();
    assert!(codec.push(b"Content-Length: abc\r\n\r\n").is_err());
    assert!(codec.is_poisoned());

    let good = codec::encode(&Envelope::response(1, json!(null))).unwrap();
    assert!(codec.push(&good).is_err(), "poisoned codec must keep failing");
}

// ── Tolerated variations ─────────────────────────────────────────────────────

#[test]
fn header_name_is_case_insensitive_and_extra_headers_ignored() {
    let body = br#"{"jsonrpc":"2.0","id":4,"result":{}}"#;
    let mut bytes = format!(
        "content-type: application/vscode-jsonrpc\r\nCONTENT-LENGTH: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    bytes.extend_from_slice(body);

    let decoded = FrameCodec::new().push(&bytes).expect("decode");
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].id, Some(4));
}

#[test]
fn crlf_after_body_is_skipped() {
    let mut bytes = Vec::new();
    for env in sample_envelopes() {
        bytes.extend(codec::encode(&env).unwrap());
        bytes.extend_from_slice(b"\r\n");
    }
    let decoded = FrameCodec::new().push(&bytes).expect("decode");
    assert_eq!(decoded, sample_envelopes());
}

#[test]
fn explicit_null_result_is_preserved() {
    let body = br#"{"jsonrpc":"2.0","id":9,"result":null}"#;
    let mut bytes = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    bytes.extend_from_slice(body);

    let decoded = FrameCodec::new().push(&bytes).expect("decode");
    assert_eq!(decoded[0].result, Some(serde_json::Value::Null));
    assert!(decoded[0].is_response());
}

// ── tokio-util integration ───────────────────────────────────────────────────

#[tokio::test]
async fn framed_read_yields_envelopes_in_order() {
    let envelopes = sample_envelopes();
    let stream = stream_of(&envelopes);

    let decoded: Vec<Envelope> = FramedRead::new(stream.as_slice(), FrameCodec::new())
        .map(|item| item.expect("frame"))
        .collect()
        .await;
    assert_eq!(decoded, envelopes);
}

#[tokio::test]
async fn framed_read_reports_truncated_stream() {
    let stream = stream_of(&sample_envelopes());
    let truncated = &stream[..stream.len() - 3];

    let items: Vec<_> = FramedRead::new(truncated, FrameCodec::new()).collect().await;
    let last = items.last().expect("at least one item");
    assert!(matches!(last, Err(AppError::Protocol(msg)) if msg.contains("stream ended")));
}

#[test]
fn decoder_trait_leaves_partial_bytes_in_source() {
    let frame = codec::encode(&Envelope::response(3, json!([]))).unwrap();
    let mut src = BytesMut::from(&frame[..10]);
    let mut codec = FrameCodec::new();
    assert!(codec.decode(&mut src).expect("partial").is_none());
    assert_eq!(src.len(), 10);

    src.extend_from_slice(&frame[10..]);
    let env = codec.decode(&mut src).expect("complete").expect("frame");
    assert_eq!(env.id, Some(3));
    assert!(src.is_empty());
}

#[test]
fn encoder_trait_matches_free_encode() {
    let env = Envelope::request(5, "tools/call", json!({"name": "app.finder"}));
    let mut dst = BytesMut::new();
    FrameCodec::new().encode(&env, &mut dst).expect("encode");
    assert_eq!(dst.as_ref(), codec::encode(&env).unwrap().as_slice());
}
