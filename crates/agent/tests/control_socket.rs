// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local command-socket queries: client status, cluster status, and the
//! start-tuning relay.

mod support;

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tunerd::protocol::ProtocolCode;
use tunerd::session::{Session, SessionConfig};
use tunerd::status::ClientStatus;
use tunerd::test_support::{MockGateway, MockGetter};
use tunerd::transport::CommandClient;

use support::{agent_identity, spawn_poller, wait_for};

/// Drive a session in the background and run `probe` against its command
/// socket.
async fn with_running_session<F, Fut>(probe: F) -> anyhow::Result<()>
where
    F: FnOnce(CommandClient) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let gateway = MockGateway::spawn().await?;
    let identity = agent_identity("n1");
    let (handle, queue_rx) = spawn_poller(&identity, gateway.address()).await?;

    let (getter, _) = MockGetter::new(&["n1/p/pi"], &[0.1]);
    let mut getters = vec![getter];
    let mut setters = Vec::new();
    let stop = CancellationToken::new();
    let mut session = Session::new(SessionConfig {
        identity: &identity,
        command: handle.command_client(),
        queue: queue_rx,
        getters: &mut getters,
        setters: &mut setters,
        goal: None,
        tuning_goal_name: String::new(),
        tick_len: 1,
        network_timeout: Duration::from_secs(5),
        sending_pi_right_away: true,
        notify_gateway_on_stop: false,
        stop: stop.clone(),
    });

    let command = handle.command_client();
    let run = tokio::join!(session.run(), async {
        // Probe only once the handshake is done, so the status is settled.
        wait_for(|| !gateway.frames_with_code(ProtocolCode::PiParameterMeta).is_empty()).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let result = probe(command).await;
        stop.cancel();
        result
    });
    run.0?;
    run.1?;

    let mut handle = handle;
    handle.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn client_status_reply_names_cluster_node_and_state() -> anyhow::Result<()> {
    with_running_session(|command| async move {
        let reply = command
            .request(
                &[Value::from(ProtocolCode::ClientStatus.as_u64())],
                Duration::from_secs(5),
            )
            .await?;
        assert_eq!(reply.code_u64(), Some(ProtocolCode::ClientStatusReply.as_u64()));
        // [requester, cluster, node, status]
        assert_eq!(reply.payload.get(1).and_then(Value::as_str), Some("test_cluster"));
        assert_eq!(reply.payload.get(2).and_then(Value::as_str), Some("n1"));
        let status = reply.payload.get(3).and_then(Value::as_u64);
        assert_eq!(status, Some(ClientStatus::Running.as_u64()));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn cluster_status_is_relayed_through_the_gateway() -> anyhow::Result<()> {
    with_running_session(|command| async move {
        let reply = command
            .request(
                &[Value::from(ProtocolCode::ClusterStatus.as_u64())],
                Duration::from_secs(5),
            )
            .await?;
        assert_eq!(reply.code_u64(), Some(ProtocolCode::ClusterStatusReply.as_u64()));
        // [requester, cluster, status, nodes]
        assert_eq!(reply.payload.get(1).and_then(Value::as_str), Some("test_cluster"));
        let nodes = reply.payload.get(3).and_then(Value::as_array).cloned().unwrap_or_default();
        assert_eq!(nodes.len(), 1);
        let entry = nodes[0].as_array().cloned().unwrap_or_default();
        assert_eq!(entry.get(1).and_then(Value::as_str), Some("n1"));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn start_tuning_succeeds_when_enough_nodes_are_online() -> anyhow::Result<()> {
    with_running_session(|command| async move {
        let reply = command
            .request(
                &[Value::from(ProtocolCode::StartTuning.as_u64()), Value::from(1u64)],
                Duration::from_secs(5),
            )
            .await?;
        assert_eq!(reply.code_u64(), Some(ProtocolCode::StartTuningToClient.as_u64()));
        assert_eq!(reply.payload.get(1).and_then(Value::as_u64), Some(1));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn start_tuning_fails_when_nodes_are_missing() -> anyhow::Result<()> {
    with_running_session(|command| async move {
        let reply = command
            .request(
                &[Value::from(ProtocolCode::StartTuning.as_u64()), Value::from(5u64)],
                Duration::from_secs(5),
            )
            .await?;
        assert_eq!(reply.code_u64(), Some(ProtocolCode::StartTuningFailed.as_u64()));
        // The gateway reports how many nodes it has actually seen.
        assert_eq!(reply.payload.get(1).and_then(Value::as_u64), Some(1));
        Ok(())
    })
    .await
}
