// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the handshake and steady-state collection,
//! exercising the full poller + session stack against an in-process mock
//! gateway.

mod support;

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tunerd::protocol::ProtocolCode;
use tunerd::session::{Session, SessionConfig};
use tunerd::test_support::{FirstPiGoal, MockGateway, MockGetter};

use support::{agent_identity, spawn_poller, wait_for};

#[tokio::test]
async fn handshake_reaches_running_without_premature_pi() -> anyhow::Result<()> {
    let gateway = MockGateway::spawn().await?;
    let identity = agent_identity("n1");
    let (handle, queue_rx) = spawn_poller(&identity, gateway.address()).await?;

    let (getter, _) = MockGetter::new(&["n1/p/pi"], &[0.2]);
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

    let stopper = stop.clone();
    let session_task = async move {
        let result = session.run().await;
        (result, session.status())
    };
    let stop_task = async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        stopper.cancel();
    };
    let ((result, _), ()) = tokio::join!(session_task, stop_task);
    result?;

    // KEY, then metadata, and no PI before the metadata was acknowledged.
    let state = gateway.state();
    let frames: Vec<u64> = state
        .lock()
        .map(|s| s.frames.iter().filter_map(|(_, f)| f.code_u64()).collect())
        .unwrap_or_default();
    let key_pos = frames.iter().position(|&c| c == ProtocolCode::Key.as_u64());
    let meta_pos = frames.iter().position(|&c| c == ProtocolCode::PiParameterMeta.as_u64());
    let first_pi = frames.iter().position(|&c| c == ProtocolCode::Pi.as_u64());
    assert!(key_pos.is_some(), "no KEY frame: {frames:?}");
    assert!(meta_pos.is_some(), "no metadata frame: {frames:?}");
    assert!(key_pos < meta_pos);
    if let Some(first_pi) = first_pi {
        assert!(first_pi > meta_pos.unwrap_or(usize::MAX), "PI before metadata ack");
    }

    let mut handle = handle;
    handle.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn metadata_lists_goal_then_pis_then_parameters() -> anyhow::Result<()> {
    let gateway = MockGateway::spawn().await?;
    let identity = agent_identity("n1");
    let (handle, queue_rx) = spawn_poller(&identity, gateway.address()).await?;

    let (g1, _) = MockGetter::new(&["n1/g1/a", "n1/g1/b"], &[0.1, 0.2]);
    let (g2, _) = MockGetter::new(&["n1/g2/c"], &[0.3]);
    let mut getters = vec![g1, g2];
    let mut setters = vec![tunerd::test_support::MockSetter::new(&["n1/param"]).0];
    let stop = CancellationToken::new();
    let mut session = Session::new(SessionConfig {
        identity: &identity,
        command: handle.command_client(),
        queue: queue_rx,
        getters: &mut getters,
        setters: &mut setters,
        goal: None,
        tuning_goal_name: "goal".to_owned(),
        tick_len: 1,
        network_timeout: Duration::from_secs(5),
        sending_pi_right_away: true,
        notify_gateway_on_stop: false,
        stop: stop.clone(),
    });

    let run = tokio::join!(session.run(), async {
        wait_for(|| !gateway.frames_with_code(ProtocolCode::PiParameterMeta).is_empty()).await;
        stop.cancel();
    });
    run.0?;

    let meta = gateway.frames_with_code(ProtocolCode::PiParameterMeta);
    let frame = meta.first().ok_or_else(|| anyhow::anyhow!("no metadata frame"))?;
    let pi_names: Vec<String> = frame
        .payload
        .first()
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();
    let param_names: Vec<String> = frame
        .payload
        .get(1)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();
    assert_eq!(pi_names, ["goal", "n1/g1/a", "n1/g1/b", "n1/g2/c"]);
    assert_eq!(param_names, ["n1/param"]);

    let mut handle = handle;
    handle.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn pi_frame_carries_reward_then_raw_pis() -> anyhow::Result<()> {
    let gateway = MockGateway::spawn().await?;
    let identity = agent_identity("n1");
    let (handle, queue_rx) = spawn_poller(&identity, gateway.address()).await?;

    let (getter, _) = MockGetter::new(&["n1/p/pi"], &[0.2]);
    let mut getters = vec![getter];
    let mut setters = Vec::new();
    let goal = FirstPiGoal;
    let stop = CancellationToken::new();
    let mut session = Session::new(SessionConfig {
        identity: &identity,
        command: handle.command_client(),
        queue: queue_rx,
        getters: &mut getters,
        setters: &mut setters,
        goal: Some(&goal),
        tuning_goal_name: "g".to_owned(),
        tick_len: 1,
        network_timeout: Duration::from_secs(5),
        sending_pi_right_away: true,
        notify_gateway_on_stop: false,
        stop: stop.clone(),
    });

    let run = tokio::join!(session.run(), async {
        wait_for(|| !gateway.frames_with_code(ProtocolCode::Pi).is_empty()).await;
        stop.cancel();
    });
    run.0?;

    let pi_frames = gateway.frames_with_code(ProtocolCode::Pi);
    let frame = pi_frames.first().ok_or_else(|| anyhow::anyhow!("no PI frame"))?;
    let values: Vec<f64> = frame
        .payload
        .first()
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    // Reward first (equal to the PI through FirstPiGoal), then the raw PI.
    assert_eq!(values, [0.2, 0.2]);

    let mut handle = handle;
    handle.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn paused_until_start_tuning_signal() -> anyhow::Result<()> {
    let gateway = MockGateway::spawn().await?;
    let identity = agent_identity("n1");
    let (handle, queue_rx) = spawn_poller(&identity, gateway.address()).await?;

    let (getter, _) = MockGetter::new(&["n1/p/pi"], &[0.4]);
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
        // Paused after the handshake until the gateway says go.
        sending_pi_right_away: false,
        notify_gateway_on_stop: false,
        stop: stop.clone(),
    });

    let run = tokio::join!(session.run(), async {
        // Let the handshake finish, then confirm no PI was sent while
        // paused.
        wait_for(|| !gateway.frames_with_code(ProtocolCode::PiParameterMeta).is_empty()).await;
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(gateway.frames_with_code(ProtocolCode::Pi).is_empty(), "PI while paused");

        // The registration-shaped (payload-less) start signal resumes.
        if let Some(client) = gateway.first_client() {
            gateway.send_to(client, ProtocolCode::StartTuningToClient, &[]);
        }
        wait_for(|| !gateway.frames_with_code(ProtocolCode::Pi).is_empty()).await;
        stop.cancel();
    });
    run.0?;

    assert!(!gateway.frames_with_code(ProtocolCode::Pi).is_empty());

    let mut handle = handle;
    handle.disconnect().await;
    Ok(())
}
