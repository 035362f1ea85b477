// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound message handling for the session state machine.

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::probes::{apply_action, merged_parameter_names, merged_pi_names};
use crate::protocol::{GatewayMessage, ProtocolCode};
use crate::status::ClientStatus;
use crate::transport::Inbound;

use super::Session;

impl Session<'_> {
    /// Dispatch one inbound queue item.
    pub(crate) async fn handle(&mut self, inbound: Inbound) -> Result<(), SessionError> {
        let msg = match inbound {
            Inbound::Frame { msg, .. } => msg,
            Inbound::Fault { detail } => {
                return Err(SessionError::Communication(self.with_context(detail)));
            }
        };
        debug!(?msg, "received message");
        match msg {
            // Acknowledgements only feed the timeout counter, which the
            // caller already reset.
            GatewayMessage::Heartbeat | GatewayMessage::PiReceivedOk => Ok(()),
            GatewayMessage::Ok => self.on_ok().await,
            GatewayMessage::Action { actions } => self.on_action(&actions).await,
            GatewayMessage::ClientStatusReq { requester } => {
                self.send_local_reply(
                    ProtocolCode::ClientStatusReply,
                    &[
                        Value::from(requester),
                        Value::from(self.identity.cluster_name.as_str()),
                        Value::from(self.identity.node_name.as_str()),
                        Value::from(self.status.as_u64()),
                    ],
                )
                .await
            }
            GatewayMessage::ClusterStatusReq { requester } => {
                // Only the gateway has the cluster view; forward and relay
                // the reply when it comes back.
                self.send_to_gateway(ProtocolCode::ClusterStatus, &[Value::from(requester)]).await
            }
            GatewayMessage::StartTuningReq { desired_node_count, requester } => {
                self.send_to_gateway(
                    ProtocolCode::StartTuning,
                    &[Value::from(desired_node_count), Value::from(requester)],
                )
                .await
            }
            GatewayMessage::ClusterStatusReply { payload } => {
                self.send_local_reply(ProtocolCode::ClusterStatusReply, &payload).await
            }
            GatewayMessage::StartTuningToClient { reply } => {
                if let Some((requester, node_count)) = reply {
                    self.send_local_reply(
                        ProtocolCode::StartTuningToClient,
                        &[Value::from(requester), Value::from(node_count)],
                    )
                    .await?;
                }
                if self.status == ClientStatus::Paused {
                    self.status = ClientStatus::Running;
                    info!("tuning started");
                } else {
                    self.sending_pi_right_away = true;
                    warn!("received start-tuning signal while not paused");
                }
                Ok(())
            }
            GatewayMessage::StartTuningFailed { requester, node_count } => {
                self.send_local_reply(
                    ProtocolCode::StartTuningFailed,
                    &[Value::from(requester), Value::from(node_count)],
                )
                .await
            }
            GatewayMessage::BadMsg { detail } => {
                let mut msg = "gateway rejected a message".to_owned();
                if let Some(detail) = detail {
                    msg = format!("{msg}: {detail}");
                }
                Err(SessionError::Communication(self.with_context(msg)))
            }
            GatewayMessage::WrongKey => {
                if self.status == ClientStatus::Authenticating {
                    return Err(SessionError::Fatal(self.with_context(
                        "gateway rejected the key, please check the API secret key".to_owned(),
                    )));
                }
                warn!(status = %self.status, "received unexpected WRONG_KEY");
                Ok(())
            }
            GatewayMessage::NotAuth => {
                error!("not authenticated, reconnecting");
                Err(SessionError::Timeout("not authenticated".to_owned()))
            }
            GatewayMessage::BadPiData => {
                Err(SessionError::Fatal("gateway rejected the PI data".to_owned()))
            }
            GatewayMessage::DuplicatePiData => {
                error!("gateway reported duplicate PI data");
                Ok(())
            }
            GatewayMessage::ClusterNotConfigured => {
                info!("cluster not configured yet");
                Ok(())
            }
            GatewayMessage::Unknown { code, payload } => {
                warn!(
                    %code,
                    ?payload,
                    status = %self.status,
                    "received unexpected message"
                );
                Ok(())
            }
        }
    }

    /// `OK` advances the handshake; at any other time it is unexpected.
    async fn on_ok(&mut self) -> Result<(), SessionError> {
        match self.status {
            ClientStatus::Authenticating => {
                self.status = ClientStatus::UploadingMetadata;
                info!("authenticated with gateway, uploading PI and parameter metadata");
                let pi_names = merged_pi_names(&self.tuning_goal_name, self.getters);
                let param_names = merged_parameter_names(self.setters);
                self.send_to_gateway(
                    ProtocolCode::PiParameterMeta,
                    &[Value::from(pi_names), Value::from(param_names)],
                )
                .await?;
                self.last_received = tokio::time::Instant::now();
                self.current_error =
                    Some("failed to register PI and parameter metadata".to_owned());
                Ok(())
            }
            ClientStatus::UploadingMetadata => {
                info!("registered PI and parameter metadata");
                if self.sending_pi_right_away {
                    self.status = ClientStatus::Running;
                    info!("tuning started right away");
                } else {
                    self.status = ClientStatus::Paused;
                    info!("tuning is paused, waiting for the start-tuning signal");
                }
                self.current_error = None;
                Ok(())
            }
            _ => {
                warn!(status = %self.status, "received unexpected OK");
                Ok(())
            }
        }
    }

    async fn on_action(&mut self, actions: &[f64]) -> Result<(), SessionError> {
        debug!(?actions, "performing action");
        if let Err(e) = apply_action(self.setters, -1, actions) {
            self.status = ClientStatus::SetterError;
            return Err(SessionError::Fatal(format!("setter failed: {e}")));
        }
        debug!("finished performing action");
        self.send_to_gateway(ProtocolCode::ActionDone, &[]).await?;
        if self.clock.tick_len() == 0 {
            // One collection per completed action.
            self.clock.force_collect();
        }
        Ok(())
    }

    fn with_context(&mut self, msg: String) -> String {
        match self.current_error.take() {
            Some(context) => format!("{context}: {msg}"),
            None => msg,
        }
    }
}
