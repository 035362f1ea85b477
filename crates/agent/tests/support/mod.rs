// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use tunerd::session::AgentIdentity;
use tunerd::transport::{Inbound, Poller, PollerHandle};

pub fn agent_identity(node: &str) -> AgentIdentity {
    AgentIdentity {
        id: Uuid::new_v4(),
        cluster_name: "test_cluster".to_owned(),
        node_name: node.to_owned(),
        api_secret_key: "mock key".to_owned(),
    }
}

/// Spawn a poller on an ephemeral command port, returning the handle and
/// the session side of the queue.
pub async fn spawn_poller(
    identity: &AgentIdentity,
    gateway_address: &str,
) -> anyhow::Result<(PollerHandle, mpsc::Receiver<Inbound>)> {
    let (queue_tx, queue_rx) = mpsc::channel(1024);
    let poller = Poller {
        agent_id: identity.id,
        gateway_address: gateway_address.to_owned(),
        command_address: "127.0.0.1:0".to_owned(),
    };
    let handle = poller.spawn(queue_tx).await?;
    Ok((handle, queue_rx))
}

/// Poll `cond` until it holds or five seconds pass. Callers assert on the
/// condition afterwards, so a timeout here shows up as a test failure with
/// context.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
