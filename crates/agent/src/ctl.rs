// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local control commands, talking to a running agent through its command
//! socket.
//!
//! Each command is one request/reply round trip; the reply-frame parsing
//! and formatting live in the `render_*` helpers so they can be tested
//! without a socket.

use std::time::Duration;

use clap::Args;
use serde_json::Value;

use crate::config::DEFAULT_COMMAND_SOCKET_ADDRESS;
use crate::protocol::{Frame, ProtocolCode};
use crate::status::{ClientStatus, ClusterStatus};
use crate::transport::CommandClient;

/// How long to wait for the agent (and, transitively, the gateway) to
/// answer a control query.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Args)]
pub struct CtlArgs {
    /// Command socket address of the local agent.
    #[arg(long, env = "TUNERD_COMMAND_SOCKET_ADDRESS",
          default_value = DEFAULT_COMMAND_SOCKET_ADDRESS)]
    pub command_socket_address: String,
}

/// `tunerd client-status`: print the local agent's status.
pub async fn client_status(args: &CtlArgs) -> anyhow::Result<()> {
    let client = CommandClient::new(args.command_socket_address.clone());
    let reply = client
        .request(&[Value::from(ProtocolCode::ClientStatus.as_u64())], REPLY_TIMEOUT)
        .await?;
    print!("{}", render_client_status(&reply)?);
    Ok(())
}

/// `tunerd cluster-status`: ask the gateway (through the agent) for the
/// cluster view.
pub async fn cluster_status(args: &CtlArgs) -> anyhow::Result<()> {
    let client = CommandClient::new(args.command_socket_address.clone());
    let reply = client
        .request(&[Value::from(ProtocolCode::ClusterStatus.as_u64())], REPLY_TIMEOUT)
        .await?;
    print!("{}", render_cluster_status(&reply)?);
    Ok(())
}

/// `tunerd start-tuning N`: ask the gateway to start tuning once N nodes
/// are online.
pub async fn start_tuning(args: &CtlArgs, desired_node_count: u64) -> anyhow::Result<()> {
    let client = CommandClient::new(args.command_socket_address.clone());
    let reply = client
        .request(
            &[
                Value::from(ProtocolCode::StartTuning.as_u64()),
                Value::from(desired_node_count),
            ],
            REPLY_TIMEOUT,
        )
        .await?;
    print!("{}", render_start_tuning(&reply, desired_node_count)?);
    Ok(())
}

/// Format a `CLIENT_STATUS_REPLY` payload: `[requester, cluster, node,
/// status]`.
fn render_client_status(frame: &Frame) -> anyhow::Result<String> {
    expect_code(frame, ProtocolCode::ClientStatusReply)?;
    let cluster = payload_str(frame, 1)?;
    let node = payload_str(frame, 2)?;
    let status = payload_u64(frame, 3)?;
    let status = ClientStatus::from_u64(status)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_owned());
    Ok(format!(
        "Cluster name: {cluster}\nClient node name: {node}\nLocal client status: {status}\n"
    ))
}

/// Format a `CLUSTER_STATUS_REPLY` payload: `[requester, cluster, status,
/// [[id, name, status], ...]]`.
fn render_cluster_status(frame: &Frame) -> anyhow::Result<String> {
    expect_code(frame, ProtocolCode::ClusterStatusReply)?;
    let cluster = payload_str(frame, 1)?;
    let status = payload_u64(frame, 2)?;
    let status = ClusterStatus::from_u64(status)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_owned());
    let nodes = frame
        .payload
        .get(3)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("malformed cluster status reply"))?;
    let mut out = format!("Cluster name: {cluster}\nCluster status: {status}\nNodes:\n");
    for node in nodes {
        let entry = node.as_array().cloned().unwrap_or_default();
        let id = entry.first().and_then(Value::as_str).unwrap_or("?");
        let name = entry.get(1).and_then(Value::as_str).unwrap_or("?");
        let node_status = entry
            .get(2)
            .and_then(Value::as_u64)
            .and_then(ClientStatus::from_u64)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        out.push_str(&format!("  {id}  {name}  {node_status}\n"));
    }
    Ok(out)
}

/// Interpret a start-tuning reply: `START_TUNING_TO_CLIENT` on success,
/// `START_TUNING_FAILED` with the node count the gateway has actually
/// seen otherwise.
fn render_start_tuning(frame: &Frame, desired_node_count: u64) -> anyhow::Result<String> {
    let node_count = payload_u64(frame, 1).unwrap_or(0);
    match frame.code_u64().and_then(ProtocolCode::from_u64) {
        Some(ProtocolCode::StartTuningToClient) => {
            Ok(format!("Tuning started with {node_count} node(s)\n"))
        }
        Some(ProtocolCode::StartTuningFailed) => {
            anyhow::bail!(
                "start tuning failed: gateway has seen {node_count} of {desired_node_count} \
                 desired node(s)"
            )
        }
        _ => anyhow::bail!("unexpected reply code {}", frame.code),
    }
}

fn expect_code(frame: &Frame, code: ProtocolCode) -> anyhow::Result<()> {
    if frame.code_u64() != Some(code.as_u64()) {
        anyhow::bail!("unexpected reply code {}", frame.code);
    }
    Ok(())
}

fn payload_str<'a>(frame: &'a Frame, index: usize) -> anyhow::Result<&'a str> {
    frame
        .payload
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("malformed reply payload"))
}

fn payload_u64(frame: &Frame, index: usize) -> anyhow::Result<u64> {
    frame
        .payload
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow::anyhow!("malformed reply payload"))
}

#[cfg(test)]
#[path = "ctl_tests.rs"]
mod tests;
