// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process doubles for integration tests: a mock gateway speaking the
//! wire protocol, programmable probes, and a trivial tuning goal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::SinkExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::goal::TuningGoal;
use crate::probes::{Getter, Setter};
use crate::protocol::{decode_frame, encode_frame, Frame, ProtocolCode};
use crate::status::{ClientStatus, ClusterStatus};
use crate::tick::epoch_secs;

/// Shared, lock-protected gateway state inspected by tests.
#[derive(Debug, Default)]
pub struct GatewayState {
    /// Every decoded inbound frame, tagged with the sending agent.
    pub frames: Vec<(Uuid, Frame)>,
    /// Known agents: identity → (node name, status).
    pub clients: HashMap<Uuid, (String, ClientStatus)>,
    pub cluster_name: Option<String>,
    /// Reply `WRONG_KEY` to authentication attempts.
    pub reject_key: bool,
    /// Stop replying to anything (simulated gateway death).
    pub silent: bool,
}

/// A mock gateway bound to an ephemeral local port.
///
/// Authenticates agents on `KEY`, acks metadata and PI frames, answers
/// cluster queries, and lets tests inject arbitrary frames toward a
/// connected agent.
pub struct MockGateway {
    address: String,
    state: Arc<Mutex<GatewayState>>,
    inject_tx: broadcast::Sender<(Uuid, Bytes)>,
    shutdown: CancellationToken,
}

impl MockGateway {
    pub async fn spawn() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        let state = Arc::new(Mutex::new(GatewayState::default()));
        let (inject_tx, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let accept_state = Arc::clone(&state);
        let accept_inject = inject_tx.clone();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let conn = Connection {
                            state: Arc::clone(&accept_state),
                            inject_rx: accept_inject.subscribe(),
                            shutdown: accept_shutdown.clone(),
                        };
                        tokio::spawn(conn.run(stream));
                    }
                }
            }
        });

        Ok(Self { address, state, inject_tx, shutdown })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> Arc<Mutex<GatewayState>> {
        Arc::clone(&self.state)
    }

    /// Frames of one operation code, oldest first.
    pub fn frames_with_code(&self, code: ProtocolCode) -> Vec<Frame> {
        self.state
            .lock()
            .map(|s| {
                s.frames
                    .iter()
                    .filter(|(_, f)| f.code_u64() == Some(code.as_u64()))
                    .map(|(_, f)| f.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The identity of the first authenticated agent, if any.
    pub fn first_client(&self) -> Option<Uuid> {
        self.state.lock().ok().and_then(|s| s.clients.keys().next().copied())
    }

    /// Inject a frame toward a connected agent.
    pub fn send_to(&self, client: Uuid, code: ProtocolCode, payload: &[Value]) {
        if let Ok(bytes) = encode_frame(epoch_secs(), code.as_u64(), payload) {
            let _ = self.inject_tx.send((client, bytes));
        }
    }

    /// Stop answering; the agent should hit its network timeout.
    pub fn set_silent(&self, silent: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.silent = silent;
        }
    }

    pub fn set_reject_key(&self, reject: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_key = reject;
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One agent connection on the gateway side.
struct Connection {
    state: Arc<Mutex<GatewayState>>,
    inject_rx: broadcast::Receiver<(Uuid, Bytes)>,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(mut self, stream: TcpStream) {
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        // Dealer identity announcement.
        let identity = match framed.next().await {
            Some(Ok(bytes)) => match Uuid::from_slice(&bytes) {
                Ok(identity) => identity,
                Err(_) => {
                    warn!("mock gateway: corrupted identity");
                    return;
                }
            },
            _ => return,
        };
        debug!(%identity, "mock gateway: agent connected");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                injected = self.inject_rx.recv() => {
                    if let Ok((target, bytes)) = injected {
                        if target == identity {
                            let _ = framed.send(bytes).await;
                        }
                    }
                }
                frame = framed.next() => {
                    match frame {
                        Some(Ok(bytes)) => {
                            if let Some(reply) = self.on_frame(identity, &bytes) {
                                let _ = framed.send(reply).await;
                            }
                        }
                        _ => break,
                    }
                }
            }
        }
        debug!(%identity, "mock gateway: agent disconnected");
    }

    /// Record and answer one frame. Returns the encoded reply, if any.
    fn on_frame(&self, identity: Uuid, bytes: &[u8]) -> Option<Bytes> {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("mock gateway: undecodable frame: {e}");
                return None;
            }
        };
        let mut state = self.state.lock().ok()?;
        state.frames.push((identity, frame.clone()));
        if state.silent {
            return None;
        }

        let code = frame.code_u64().and_then(ProtocolCode::from_u64)?;
        let reply = match code {
            ProtocolCode::Key => {
                if state.reject_key {
                    (ProtocolCode::WrongKey, vec![])
                } else {
                    let node_name = frame
                        .payload
                        .get(2)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                    let cluster =
                        frame.payload.get(1).and_then(Value::as_str).unwrap_or_default();
                    state.cluster_name.get_or_insert_with(|| cluster.to_owned());
                    state.clients.insert(identity, (node_name, ClientStatus::Authenticating));
                    (ProtocolCode::Ok, vec![])
                }
            }
            ProtocolCode::PiParameterMeta => {
                if let Some(client) = state.clients.get_mut(&identity) {
                    client.1 = ClientStatus::Running;
                    (ProtocolCode::Ok, vec![])
                } else {
                    (ProtocolCode::NotAuth, vec![])
                }
            }
            ProtocolCode::Pi => (ProtocolCode::PiReceivedOk, vec![]),
            ProtocolCode::ClusterStatus => {
                let requester = frame.payload.first().cloned().unwrap_or(Value::Null);
                let cluster =
                    state.cluster_name.clone().unwrap_or_else(|| "unknown".to_owned());
                let nodes: Vec<Value> = state
                    .clients
                    .iter()
                    .map(|(id, (name, status))| {
                        Value::from(vec![
                            Value::from(id.simple().to_string()),
                            Value::from(name.as_str()),
                            Value::from(status.as_u64()),
                        ])
                    })
                    .collect();
                (
                    ProtocolCode::ClusterStatusReply,
                    vec![
                        requester,
                        Value::from(cluster),
                        Value::from(ClusterStatus::TuningTargetNotReached.as_u64()),
                        Value::from(nodes),
                    ],
                )
            }
            ProtocolCode::StartTuning => {
                let desired = frame.payload.first().and_then(Value::as_u64).unwrap_or(0);
                let requester = frame.payload.get(1).cloned().unwrap_or(Value::Null);
                let online = state.clients.len() as u64;
                if desired <= online {
                    (
                        ProtocolCode::StartTuningToClient,
                        vec![requester, Value::from(desired)],
                    )
                } else {
                    (ProtocolCode::StartTuningFailed, vec![requester, Value::from(online)])
                }
            }
            // ACTION_DONE, CLIENT_STOP and everything else: record only.
            _ => return None,
        };
        drop(state);
        encode_frame(epoch_secs(), reply.0.as_u64(), &reply.1).ok()
    }
}

/// Getter returning a programmable vector.
pub struct MockGetter {
    names: Vec<String>,
    values: Arc<Mutex<Vec<f64>>>,
}

impl MockGetter {
    pub fn new(names: &[&str], values: &[f64]) -> (Box<dyn Getter>, Arc<Mutex<Vec<f64>>>) {
        let values = Arc::new(Mutex::new(values.to_vec()));
        let getter = Self {
            names: names.iter().map(|s| (*s).to_owned()).collect(),
            values: Arc::clone(&values),
        };
        (Box::new(getter), values)
    }
}

impl Getter for MockGetter {
    fn name(&self) -> &str {
        "mock"
    }

    fn pi_names(&self) -> &[String] {
        &self.names
    }

    fn collect(&mut self, _interval: i64, _requested_time: f64) -> anyhow::Result<Vec<f64>> {
        Ok(self.values.lock().map(|v| v.clone()).unwrap_or_default())
    }
}

/// Setter recording every action slice it receives.
pub struct MockSetter {
    names: Vec<String>,
    actions: Arc<Mutex<Vec<Vec<f64>>>>,
}

impl MockSetter {
    pub fn new(names: &[&str]) -> (Box<dyn Setter>, Arc<Mutex<Vec<Vec<f64>>>>) {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let setter = Self {
            names: names.iter().map(|s| (*s).to_owned()).collect(),
            actions: Arc::clone(&actions),
        };
        (Box::new(setter), actions)
    }
}

impl Setter for MockSetter {
    fn name(&self) -> &str {
        "mock"
    }

    fn parameter_names(&self) -> &[String] {
        &self.names
    }

    fn action(&mut self, _interval: i64, actions: &[f64]) -> anyhow::Result<()> {
        if let Ok(mut recorded) = self.actions.lock() {
            recorded.push(actions.to_vec());
        }
        Ok(())
    }
}

/// Returns the first PI as the reward, mirroring the simplest useful goal.
pub struct FirstPiGoal;

impl TuningGoal for FirstPiGoal {
    fn reward(&self, pis: &[f64]) -> f64 {
        pis.first().copied().unwrap_or_default()
    }
}
