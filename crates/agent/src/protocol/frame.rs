// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding: zlib-compressed JSON arrays prefixed with the protocol
//! version.

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::Value;

pub const PROTOCOL_VERSION: u64 = 1;

/// Upper bound on a decompressed frame. Anything larger is corrupt or
/// hostile and is dropped.
const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// A decoded frame with the version prefix stripped.
///
/// The operation code is kept as a raw [`Value`] because gateways of one
/// historical vintage emitted string codes; those decode as
/// [`GatewayMessage::Unknown`](crate::protocol::GatewayMessage::Unknown)
/// instead of failing the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub ts: f64,
    pub code: Value,
    pub payload: Vec<Value>,
}

impl Frame {
    /// The operation code, when it is the integer the protocol requires.
    pub fn code_u64(&self) -> Option<u64> {
        self.code.as_u64()
    }
}

/// Why a frame failed to decode.
#[derive(Debug)]
pub enum FrameError {
    /// Corrupt compression, malformed JSON, or a payload that is not an
    /// array of at least `[version, ts, op]`. Dropped without ending the
    /// session.
    Malformed(String),
    /// The peer speaks a different protocol version. Fatal for the session.
    VersionMismatch { expected: u64, got: u64 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed frame: {msg}"),
            Self::VersionMismatch { expected, got } => {
                write!(f, "protocol version mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode `[version, ts, code, ...payload]` into a compressed frame body.
pub fn encode_frame(ts: f64, code: u64, payload: &[Value]) -> anyhow::Result<Bytes> {
    let mut elements = Vec::with_capacity(payload.len() + 2);
    elements.push(Value::from(ts));
    elements.push(Value::from(code));
    elements.extend_from_slice(payload);
    encode_tail(&elements)
}

/// Encode `[version, ...tail]` for payloads that already carry their own
/// timestamp and code (command-socket relays).
pub fn encode_tail(tail: &[Value]) -> anyhow::Result<Bytes> {
    let mut elements = Vec::with_capacity(tail.len() + 1);
    elements.push(Value::from(PROTOCOL_VERSION));
    elements.extend_from_slice(tail);
    let json = serde_json::to_vec(&elements)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Decode a compressed frame body, verifying the version prefix.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let mut json = Vec::new();
    ZlibDecoder::new(bytes)
        .take(MAX_FRAME_LEN)
        .read_to_end(&mut json)
        .map_err(|e| FrameError::Malformed(format!("zlib: {e}")))?;
    let elements: Vec<Value> =
        serde_json::from_slice(&json).map_err(|e| FrameError::Malformed(format!("json: {e}")))?;
    if elements.len() < 3 {
        return Err(FrameError::Malformed(format!("frame too short: {} elements", elements.len())));
    }
    let version = elements[0]
        .as_u64()
        .ok_or_else(|| FrameError::Malformed("version is not an integer".to_owned()))?;
    if version != PROTOCOL_VERSION {
        return Err(FrameError::VersionMismatch { expected: PROTOCOL_VERSION, got: version });
    }
    let ts = elements[1]
        .as_f64()
        .ok_or_else(|| FrameError::Malformed("timestamp is not a number".to_owned()))?;
    Ok(Frame { ts, code: elements[2].clone(), payload: elements[3..].to_vec() })
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
