// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session struct and the collect/drain main loop.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::goal::TuningGoal;
use crate::probes::{collect_all, Getter, Setter};
use crate::protocol::{ProtocolCode, CMD_SEND};
use crate::status::ClientStatus;
use crate::tick::{epoch_secs, Tick, TickClock};
use crate::transport::{CommandClient, Inbound};

use super::AgentIdentity;

/// One handshake-to-teardown lifespan with the gateway.
///
/// The session is the single consumer of the inbound queue and the sole
/// owner of the agent status. Probes outlive it: the supervisor lends them
/// to each session across reconnects.
pub struct Session<'a> {
    pub(crate) identity: &'a AgentIdentity,
    pub(crate) command: CommandClient,
    pub(crate) queue: mpsc::Receiver<Inbound>,
    pub(crate) getters: &'a mut Vec<Box<dyn Getter>>,
    pub(crate) setters: &'a mut Vec<Box<dyn Setter>>,
    pub(crate) goal: Option<&'a dyn TuningGoal>,
    /// First element of the PI metadata; empty when no reward is derived.
    pub(crate) tuning_goal_name: String,
    pub(crate) clock: TickClock,
    pub(crate) network_timeout: Duration,
    pub(crate) sending_pi_right_away: bool,
    /// Suppressed by tests that shut the gateway down first.
    pub(crate) notify_gateway_on_stop: bool,
    pub(crate) stop: CancellationToken,
    pub(crate) status: ClientStatus,
    pub(crate) last_received: Instant,
    /// Context prefixed to timeout/communication errors, describing the
    /// step in flight.
    pub(crate) current_error: Option<String>,
}

/// Everything a [`Session`] borrows from the supervisor.
pub struct SessionConfig<'a> {
    pub identity: &'a AgentIdentity,
    pub command: CommandClient,
    pub queue: mpsc::Receiver<Inbound>,
    pub getters: &'a mut Vec<Box<dyn Getter>>,
    pub setters: &'a mut Vec<Box<dyn Setter>>,
    pub goal: Option<&'a dyn TuningGoal>,
    pub tuning_goal_name: String,
    pub tick_len: u64,
    pub network_timeout: Duration,
    pub sending_pi_right_away: bool,
    pub notify_gateway_on_stop: bool,
    pub stop: CancellationToken,
}

impl<'a> Session<'a> {
    pub fn new(config: SessionConfig<'a>) -> Self {
        Self {
            identity: config.identity,
            command: config.command,
            queue: config.queue,
            getters: config.getters,
            setters: config.setters,
            goal: config.goal,
            tuning_goal_name: config.tuning_goal_name,
            clock: TickClock::new(config.tick_len),
            network_timeout: config.network_timeout,
            sending_pi_right_away: config.sending_pi_right_away,
            notify_gateway_on_stop: config.notify_gateway_on_stop,
            stop: config.stop,
            status: ClientStatus::Offline,
            last_received: Instant::now(),
            current_error: None,
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// Run until stopped or a [`SessionError`] ends the session.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        if self.clock.tick_len() == 0 {
            // On-demand mode starts with one immediate collection.
            self.clock.force_collect();
        }
        info!(node = %self.identity.node_name, "session started");

        while !self.stop.is_cancelled() {
            if self.status == ClientStatus::Offline {
                self.status = ClientStatus::Authenticating;
                self.send_to_gateway(
                    ProtocolCode::Key,
                    &[
                        Value::from(self.identity.api_secret_key.as_str()),
                        Value::from(self.identity.cluster_name.as_str()),
                        Value::from(self.identity.node_name.as_str()),
                    ],
                )
                .await?;
                self.last_received = Instant::now();
                self.current_error = Some("failed to connect to the gateway".to_owned());
                info!("initiated handshake, authenticating");
            }

            let now = epoch_secs();
            if self.status == ClientStatus::Running && !self.getters.is_empty() {
                if let Some(tick) = self.clock.poll(now) {
                    self.collect_and_send(tick).await?;
                }
            }

            let budget = if self.status == ClientStatus::Running && !self.getters.is_empty() {
                self.clock.sleep_budget(epoch_secs())
            } else {
                Duration::from_secs(1)
            };
            // All pending messages are drained before the next collection;
            // a lengthy collection must not starve message processing.
            self.process_all_messages(budget).await?;
        }

        if self.notify_gateway_on_stop {
            if let Err(e) = self.send_to_gateway(ProtocolCode::ClientStop, &[]).await {
                warn!("could not notify gateway about stop: {e}");
            }
        }
        self.status = ClientStatus::Offline;
        info!(node = %self.identity.node_name, "session stopped");
        Ok(())
    }

    /// Collect from all getters, derive the reward, and send the PI frame
    /// keyed by the tick.
    async fn collect_and_send(&mut self, tick: Tick) -> Result<(), SessionError> {
        debug!(key = tick.key, "collection time reached");
        let interval = if self.clock.tick_len() > 0 { self.clock.tick_len() as i64 } else { -1 };
        let pi_data = match collect_all(self.getters, interval, tick.requested_time) {
            Ok(data) => data,
            Err(e) => {
                self.status = ClientStatus::GetterError;
                return Err(SessionError::Fatal(format!("getter failed: {e}")));
            }
        };
        if pi_data.is_empty() {
            info!("all getters returned no data, skipped sending");
            return Ok(());
        }

        let mut values = Vec::with_capacity(pi_data.len() + 1);
        if let Some(goal) = self.goal {
            let reward = goal.reward(&pi_data);
            debug_assert!((-1.0..=1.0).contains(&reward));
            debug!(reward, "derived tuning goal");
            values.push(reward);
        }
        values.extend_from_slice(&pi_data);

        self.send_to_gateway_at(tick.key, ProtocolCode::Pi, &[Value::from(values)]).await
        // No waiting for PI_RECEIVED_OK; acknowledgement only feeds the
        // timeout counter.
    }

    /// Drain the inbound queue, waiting at most `budget` for the first
    /// message, then handle everything that is already queued.
    pub(crate) async fn process_all_messages(
        &mut self,
        budget: Duration,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let inbound = if remaining > Duration::ZERO {
                match tokio::time::timeout(remaining, self.queue.recv()).await {
                    Ok(inbound) => inbound.map(Some),
                    Err(_) => Some(None),
                }
            } else {
                match self.queue.try_recv() {
                    Ok(inbound) => Some(Some(inbound)),
                    Err(mpsc::error::TryRecvError::Empty) => Some(None),
                    Err(mpsc::error::TryRecvError::Disconnected) => None,
                }
            };
            match inbound {
                // Queue idle: check the timeout discipline, then hand
                // control back to the scheduler loop.
                Some(None) => {
                    if self.last_received.elapsed() > self.network_timeout {
                        self.status = ClientStatus::ConnectionError;
                        let mut msg = format!(
                            "received no data in {} seconds, reconnecting",
                            self.network_timeout.as_secs()
                        );
                        if let Some(context) = self.current_error.take() {
                            msg = format!("{context}: {msg}");
                        }
                        return Err(SessionError::Timeout(msg));
                    }
                    return Ok(());
                }
                Some(Some(inbound)) => {
                    self.last_received = Instant::now();
                    self.handle(inbound).await?;
                }
                // The poller is gone; nothing more can arrive.
                None => {
                    self.status = ClientStatus::ConnectionError;
                    return Err(SessionError::Timeout("inbound queue closed".to_owned()));
                }
            }
        }
    }

    /// Send `[code, ...payload]` to the gateway, timestamped now.
    pub(crate) async fn send_to_gateway(
        &self,
        code: ProtocolCode,
        payload: &[Value],
    ) -> Result<(), SessionError> {
        self.send_to_gateway_at(epoch_secs(), code, payload).await
    }

    /// Send `[code, ...payload]` to the gateway with an explicit timestamp
    /// (the PI record key). Routed through the command socket so the poller
    /// stays the only task touching the gateway connection.
    pub(crate) async fn send_to_gateway_at(
        &self,
        ts: f64,
        code: ProtocolCode,
        payload: &[Value],
    ) -> Result<(), SessionError> {
        let mut tail = Vec::with_capacity(payload.len() + 3);
        tail.push(Value::from(CMD_SEND));
        tail.push(Value::from(ts));
        tail.push(Value::from(code.as_u64()));
        tail.extend_from_slice(payload);
        self.command
            .send(&tail)
            .await
            .map_err(|e| SessionError::Timeout(format!("command socket send failed: {e}")))
    }

    /// Send a reply frame addressed to a local command-socket requester.
    pub(crate) async fn send_local_reply(
        &self,
        code: ProtocolCode,
        payload: &[Value],
    ) -> Result<(), SessionError> {
        let mut tail = Vec::with_capacity(payload.len() + 1);
        tail.push(Value::from(code.as_u64()));
        tail.extend_from_slice(payload);
        self.command
            .send(&tail)
            .await
            .map_err(|e| SessionError::Timeout(format!("command socket send failed: {e}")))
    }
}
