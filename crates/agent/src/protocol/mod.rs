// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol between the agent and the gateway.
//!
//! Every frame is a zlib-compressed JSON array
//! `[version, timestamp, op, ...payload]` carried in one length-delimited
//! message. Operation codes below 100 are shared with the gateway; the
//! 100-range is private to the command socket.

pub mod frame;

pub use frame::{decode_frame, encode_frame, encode_tail, Frame, FrameError, PROTOCOL_VERSION};

use serde_json::Value;

/// Operation codes shared with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCode {
    Heartbeat,
    Ok,
    ClientStatus,
    Action,
    ActionDone,
    Pi,
    PiReceivedOk,
    ClientStatusReply,
    ClusterStatus,
    ClusterStatusReply,
    Key,
    PiParameterMeta,
    ClientStop,
    WrongKey,
    BadMsg,
    NotAuth,
    ClusterNotConfigured,
    StartTuning,
    StartTuningFailed,
    StartTuningToClient,
    BadPiData,
    DuplicatePiData,
}

impl ProtocolCode {
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Heartbeat => 1,
            Self::Ok => 2,
            Self::ClientStatus => 3,
            Self::Action => 4,
            Self::ActionDone => 5,
            Self::Pi => 6,
            Self::PiReceivedOk => 7,
            Self::ClientStatusReply => 8,
            Self::ClusterStatus => 9,
            Self::ClusterStatusReply => 10,
            Self::Key => 11,
            Self::PiParameterMeta => 12,
            Self::ClientStop => 13,
            Self::WrongKey => 20,
            Self::BadMsg => 21,
            Self::NotAuth => 22,
            Self::ClusterNotConfigured => 23,
            Self::StartTuning => 24,
            Self::StartTuningFailed => 25,
            Self::StartTuningToClient => 26,
            Self::BadPiData => 27,
            Self::DuplicatePiData => 28,
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Ok),
            3 => Some(Self::ClientStatus),
            4 => Some(Self::Action),
            5 => Some(Self::ActionDone),
            6 => Some(Self::Pi),
            7 => Some(Self::PiReceivedOk),
            8 => Some(Self::ClientStatusReply),
            9 => Some(Self::ClusterStatus),
            10 => Some(Self::ClusterStatusReply),
            11 => Some(Self::Key),
            12 => Some(Self::PiParameterMeta),
            13 => Some(Self::ClientStop),
            20 => Some(Self::WrongKey),
            21 => Some(Self::BadMsg),
            22 => Some(Self::NotAuth),
            23 => Some(Self::ClusterNotConfigured),
            24 => Some(Self::StartTuning),
            25 => Some(Self::StartTuningFailed),
            26 => Some(Self::StartTuningToClient),
            27 => Some(Self::BadPiData),
            28 => Some(Self::DuplicatePiData),
            _ => None,
        }
    }
}

/// Command-socket-only codes. Kept at 100+ so they can never collide with
/// [`ProtocolCode`].
pub const CMD_SEND: u64 = 100;
pub const CMD_EXIT: u64 = 101;

/// A decoded inbound message, after applying the per-code payload schema.
///
/// `ClientStatusReq`, `ClusterStatusReq` and `StartTuningReq` only ever
/// originate from the command socket; the poller stamps them with the
/// requesting connection's identity.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayMessage {
    Ok,
    Heartbeat,
    PiReceivedOk,
    Action { actions: Vec<f64> },
    ClientStatusReq { requester: String },
    ClusterStatusReq { requester: String },
    StartTuningReq { desired_node_count: u64, requester: String },
    ClusterStatusReply { payload: Vec<Value> },
    StartTuningToClient { reply: Option<(String, u64)> },
    StartTuningFailed { requester: String, node_count: u64 },
    WrongKey,
    BadMsg { detail: Option<String> },
    NotAuth,
    BadPiData,
    DuplicatePiData,
    ClusterNotConfigured,
    Unknown { code: Value, payload: Vec<Value> },
}

impl GatewayMessage {
    /// Decode a frame received from the gateway connection.
    ///
    /// Payloads that do not match the schema for their code, and codes this
    /// agent does not speak (including legacy string codes), fold into
    /// [`GatewayMessage::Unknown`]; the session logs and continues.
    pub fn from_frame(frame: &Frame) -> Self {
        let code = match frame.code.as_u64().and_then(ProtocolCode::from_u64) {
            Some(code) => code,
            None => {
                return Self::Unknown { code: frame.code.clone(), payload: frame.payload.clone() }
            }
        };
        match code {
            ProtocolCode::Ok => Self::Ok,
            ProtocolCode::Heartbeat => Self::Heartbeat,
            ProtocolCode::PiReceivedOk => Self::PiReceivedOk,
            ProtocolCode::Action => match frame.payload.first().and_then(as_f64_vec) {
                Some(actions) => Self::Action { actions },
                None => unknown(frame),
            },
            ProtocolCode::ClientStatus => match frame.payload.first().and_then(Value::as_str) {
                Some(requester) => Self::ClientStatusReq { requester: requester.to_owned() },
                None => unknown(frame),
            },
            ProtocolCode::ClusterStatus => match frame.payload.first().and_then(Value::as_str) {
                Some(requester) => Self::ClusterStatusReq { requester: requester.to_owned() },
                None => unknown(frame),
            },
            ProtocolCode::ClusterStatusReply => {
                Self::ClusterStatusReply { payload: frame.payload.clone() }
            }
            // Accepted both with and without the (requester, node_count)
            // reply pair; older gateways send the short form on registration.
            ProtocolCode::StartTuningToClient => {
                let requester = frame.payload.first().and_then(Value::as_str);
                let node_count = frame.payload.get(1).and_then(Value::as_u64);
                match (requester, node_count) {
                    (Some(requester), Some(node_count)) => Self::StartTuningToClient {
                        reply: Some((requester.to_owned(), node_count)),
                    },
                    _ => Self::StartTuningToClient { reply: None },
                }
            }
            ProtocolCode::StartTuningFailed => {
                let requester = frame.payload.first().and_then(Value::as_str);
                let node_count = frame.payload.get(1).and_then(Value::as_u64);
                match (requester, node_count) {
                    (Some(requester), Some(node_count)) => Self::StartTuningFailed {
                        requester: requester.to_owned(),
                        node_count,
                    },
                    _ => unknown(frame),
                }
            }
            ProtocolCode::WrongKey => Self::WrongKey,
            ProtocolCode::BadMsg => Self::BadMsg {
                detail: frame.payload.first().and_then(Value::as_str).map(str::to_owned),
            },
            ProtocolCode::NotAuth => Self::NotAuth,
            ProtocolCode::BadPiData => Self::BadPiData,
            ProtocolCode::DuplicatePiData => Self::DuplicatePiData,
            ProtocolCode::ClusterNotConfigured => Self::ClusterNotConfigured,
            // Agent-originated codes are never expected inbound.
            ProtocolCode::ActionDone
            | ProtocolCode::Pi
            | ProtocolCode::ClientStatusReply
            | ProtocolCode::Key
            | ProtocolCode::PiParameterMeta
            | ProtocolCode::ClientStop
            | ProtocolCode::StartTuning => unknown(frame),
        }
    }
}

fn unknown(frame: &Frame) -> GatewayMessage {
    GatewayMessage::Unknown { code: frame.code.clone(), payload: frame.payload.clone() }
}

fn as_f64_vec(value: &Value) -> Option<Vec<f64>> {
    value.as_array().map(|arr| arr.iter().filter_map(Value::as_f64).collect::<Vec<f64>>()).and_then(
        |floats| {
            let len = value.as_array().map(Vec::len).unwrap_or_default();
            (floats.len() == len).then_some(floats)
        },
    )
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
