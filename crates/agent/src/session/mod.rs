// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The gateway session: handshake, steady-state collection, action
//! dispatch, and the pause/resume protocol.

pub mod message;
pub mod run;

pub use run::{Session, SessionConfig};

use uuid::Uuid;

/// Immutable identity of this agent process.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub id: Uuid,
    pub cluster_name: String,
    pub node_name: String,
    pub api_secret_key: String,
}
