// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The socket-owning poller task.
//!
//! One dealer-style outbound connection to the gateway (identified by the
//! agent id) and one router-style listener for local command connections.
//! Inbound gateway frames are decoded and enqueued for the session; command
//! frames are either forwarded to the gateway, enqueued as local requests,
//! or relayed to the local connection whose identity matches the hex id in
//! the payload. Stopping is always a `CMD_EXIT` message through the command
//! socket, never an abort, so in-flight frames are committed to the queue
//! before teardown.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::SinkExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::protocol::{
    decode_frame, encode_tail, Frame, FrameError, GatewayMessage, ProtocolCode, CMD_EXIT, CMD_SEND,
};
use crate::transport::{CommandClient, Inbound};

type CommandConn = Framed<TcpStream, LengthDelimitedCodec>;

/// Poller parameters.
pub struct Poller {
    pub agent_id: Uuid,
    pub gateway_address: String,
    pub command_address: String,
}

/// A running poller. Dropping the handle does not stop the task; call
/// [`PollerHandle::disconnect`].
pub struct PollerHandle {
    command_address: String,
    command: CommandClient,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    /// Connect to the gateway, bind the command socket, and spawn the
    /// poller task.
    ///
    /// A gateway connection failure is transient (the supervisor retries);
    /// failing to bind the command socket is fatal, since retrying cannot
    /// release the address.
    pub async fn spawn(self, queue: mpsc::Sender<Inbound>) -> Result<PollerHandle, SessionError> {
        let listener = TcpListener::bind(&self.command_address).await.map_err(|e| {
            SessionError::Fatal(format!("cannot bind command socket {}: {e}", self.command_address))
        })?;
        // Resolved so a ":0" bind reports the real port.
        let command_address = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.command_address.clone());
        info!("listening for commands on {command_address}");

        info!("connecting to gateway {}", self.gateway_address);
        let stream = TcpStream::connect(&self.gateway_address).await.map_err(|e| {
            SessionError::Timeout(format!(
                "cannot connect to gateway {}: {e}",
                self.gateway_address
            ))
        })?;
        let mut gateway = Framed::new(stream, LengthDelimitedCodec::new());
        gateway
            .send(Bytes::copy_from_slice(self.agent_id.as_bytes()))
            .await
            .map_err(|e| SessionError::Timeout(format!("gateway handshake failed: {e}")))?;

        let command = CommandClient::new(command_address.clone());
        let task = PollerTask {
            gateway,
            gateway_open: true,
            listener,
            conns: StreamMap::new(),
            identities: HashMap::new(),
            conn_seq: 0,
            queue,
        };
        let task = tokio::spawn(task.run());
        Ok(PollerHandle { command_address, command, task: Some(task) })
    }
}

impl PollerHandle {
    /// The resolved command socket address (useful when binding to port 0).
    pub fn command_address(&self) -> &str {
        &self.command_address
    }

    /// A client for the command socket this poller serves.
    pub fn command_client(&self) -> CommandClient {
        self.command.clone()
    }

    /// Ask the poller to stop and wait for it. Idempotent.
    pub async fn disconnect(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        info!("requesting poller to stop");
        if let Err(e) = self.command.send(&[Value::from(CMD_EXIT)]).await {
            warn!("could not deliver exit command to poller: {e}");
            task.abort();
            return;
        }
        match tokio::time::timeout(Duration::from_secs(5), task).await {
            Ok(_) => debug!("poller stopped"),
            Err(_) => warn!("poller did not stop in time"),
        }
    }
}

/// What one iteration of the poll loop observed.
enum Event {
    Gateway(Option<Result<BytesMut, io::Error>>),
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Command(Option<(u64, Result<BytesMut, io::Error>)>),
}

/// State owned by the poller task itself.
struct PollerTask {
    gateway: Framed<TcpStream, LengthDelimitedCodec>,
    gateway_open: bool,
    listener: TcpListener,
    conns: StreamMap<u64, CommandConn>,
    /// Announced identity per command connection. `None` until the first
    /// frame arrives.
    identities: HashMap<u64, Option<Uuid>>,
    conn_seq: u64,
    queue: mpsc::Sender<Inbound>,
}

impl PollerTask {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                frame = self.gateway.next(), if self.gateway_open => Event::Gateway(frame),
                accepted = self.listener.accept() => Event::Accepted(accepted),
                conn = self.conns.next(), if !self.conns.is_empty() => Event::Command(conn),
            };
            match event {
                Event::Gateway(Some(Ok(bytes))) => self.on_gateway_frame(&bytes).await,
                Event::Gateway(Some(Err(e))) => {
                    warn!("gateway receive error: {e}");
                    self.gateway_open = false;
                }
                Event::Gateway(None) => {
                    // The session notices through its network timeout; the
                    // command socket stays up so the exit command can still
                    // reach us.
                    warn!("gateway closed the connection");
                    self.gateway_open = false;
                }
                Event::Accepted(Ok((stream, addr))) => {
                    debug!("accepted command connection from {addr}");
                    self.conn_seq += 1;
                    self.identities.insert(self.conn_seq, None);
                    self.conns
                        .insert(self.conn_seq, Framed::new(stream, LengthDelimitedCodec::new()));
                }
                Event::Accepted(Err(e)) => debug!("command socket accept error: {e}"),
                Event::Command(Some((key, Ok(bytes)))) => {
                    if self.on_command_frame(key, &bytes).await {
                        return;
                    }
                }
                Event::Command(Some((key, Err(e)))) => {
                    debug!("command connection {key} error: {e}");
                    self.drop_conn(key);
                }
                Event::Command(None) => {}
            }
            self.prune_identities();
        }
    }

    async fn on_gateway_frame(&mut self, bytes: &[u8]) {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(FrameError::Malformed(detail)) => {
                // A bad frame is dropped without ending the session.
                error!("failed decoding a gateway message: {detail}");
                return;
            }
            Err(err @ FrameError::VersionMismatch { .. }) => {
                self.enqueue(Inbound::Fault { detail: err.to_string() }).await;
                return;
            }
        };
        debug!(ts = frame.ts, code = %frame.code, "received gateway message");
        let msg = GatewayMessage::from_frame(&frame);
        self.enqueue(Inbound::Frame { ts: frame.ts, msg }).await;
    }

    /// Handle one frame from a command connection. Returns `true` when the
    /// poller should exit.
    async fn on_command_frame(&mut self, key: u64, bytes: &[u8]) -> bool {
        // The first frame of every connection announces its identity.
        let Some(&announced) = self.identities.get(&key) else {
            return false;
        };
        let Some(requester) = announced else {
            match Uuid::from_slice(bytes) {
                Ok(identity) => {
                    self.identities.insert(key, Some(identity));
                }
                Err(_) => {
                    error!("received corrupted identity on command connection {key}");
                    self.drop_conn(key);
                }
            }
            return false;
        };

        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed decoding a command message: {e}");
                return false;
            }
        };
        let Some(code) = frame.code_u64() else {
            error!("corrupted command message: non-integer code {}", frame.code);
            return false;
        };

        if code == CMD_SEND {
            // Payload is already `[ts, code, ...]`; forward with only the
            // version prefix added.
            match encode_tail(&frame.payload) {
                Ok(encoded) => {
                    if self.gateway_open {
                        if let Err(e) = self.gateway.send(encoded).await {
                            warn!("gateway send error: {e}");
                            self.gateway_open = false;
                        }
                    } else {
                        debug!("dropping outbound frame, gateway is closed");
                    }
                }
                Err(e) => error!("cannot re-encode outbound frame: {e}"),
            }
            return false;
        }
        if code == CMD_EXIT {
            info!("received exit command, stopping poller loop");
            return true;
        }

        match ProtocolCode::from_u64(code) {
            Some(ProtocolCode::ClientStatus) => {
                debug!("status request received, queueing for the session");
                self.enqueue(Inbound::Frame {
                    ts: frame.ts,
                    msg: GatewayMessage::ClientStatusReq {
                        requester: requester.simple().to_string(),
                    },
                })
                .await;
            }
            Some(ProtocolCode::ClusterStatus) => {
                debug!("cluster status request received, queueing for the session");
                self.enqueue(Inbound::Frame {
                    ts: frame.ts,
                    msg: GatewayMessage::ClusterStatusReq {
                        requester: requester.simple().to_string(),
                    },
                })
                .await;
            }
            Some(ProtocolCode::StartTuning) => {
                match frame.payload.first().and_then(Value::as_u64) {
                    Some(desired_node_count) => {
                        self.enqueue(Inbound::Frame {
                            ts: frame.ts,
                            msg: GatewayMessage::StartTuningReq {
                                desired_node_count,
                                requester: requester.simple().to_string(),
                            },
                        })
                        .await;
                    }
                    None => error!("corrupted start-tuning command: {:?}", frame.payload),
                }
            }
            Some(
                ProtocolCode::ClientStatusReply
                | ProtocolCode::ClusterStatusReply
                | ProtocolCode::StartTuningToClient
                | ProtocolCode::StartTuningFailed,
            ) => self.relay_reply(&frame, bytes).await,
            _ => error!("corrupted command message with code {code}"),
        }
        false
    }

    /// Forward a reply frame to the local connection whose identity matches
    /// the hex id in the first payload element.
    async fn relay_reply(&mut self, frame: &Frame, bytes: &[u8]) {
        let Some(target) =
            frame.payload.first().and_then(Value::as_str).and_then(|s| Uuid::try_parse(s).ok())
        else {
            error!("reply frame without a requester id: {:?}", frame.payload);
            return;
        };
        let Some(key) = self
            .identities
            .iter()
            .find(|(_, identity)| **identity == Some(target))
            .map(|(key, _)| *key)
        else {
            warn!("no local connection for reply to {}", target.simple());
            return;
        };
        let mut failed = false;
        for (k, conn) in self.conns.iter_mut() {
            if *k == key {
                if let Err(e) = conn.send(Bytes::copy_from_slice(bytes)).await {
                    debug!("relay to local connection {key} failed: {e}");
                    failed = true;
                }
                break;
            }
        }
        if failed {
            self.drop_conn(key);
        }
    }

    async fn enqueue(&self, inbound: Inbound) {
        if self.queue.send(inbound).await.is_err() {
            debug!("session queue closed, dropping inbound message");
        }
    }

    fn drop_conn(&mut self, key: u64) {
        self.conns.remove(&key);
        self.identities.remove(&key);
    }

    /// Closed connections fall out of the stream map on their own; drop the
    /// identities they left behind.
    fn prune_identities(&mut self) {
        if self.identities.len() == self.conns.len() {
            return;
        }
        let live: Vec<u64> = self.conns.keys().copied().collect();
        self.identities.retain(|key, _| live.contains(key));
    }
}
