// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The outer loop that owns probes, (re)creates the poller and session
//! across failures, and enforces the retry-on-timeout policy.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::Config;
use crate::goal::{RegexTuningGoal, TuningGoal};
use crate::pidfile::PidLock;
use crate::probes::{build_getters, build_setters, Getter, ProbeConfig, Setter};
use crate::session::{AgentIdentity, Session, SessionConfig};
use crate::transport::{Inbound, Poller};

/// Depth of the poller → session queue. Bounded so a wedged session
/// eventually exerts backpressure instead of ballooning.
const QUEUE_DEPTH: usize = 1024;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / TUNERD_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("TUNERD_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the agent to completion: build probes, then loop poller + session
/// until stopped. Timeouts reconnect; anything else propagates.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    let _pid_lock = match config.pidfile {
        Some(ref path) => Some(PidLock::acquire(path)?),
        None => None,
    };

    let identity = AgentIdentity {
        id: Uuid::new_v4(),
        cluster_name: config.cluster_name.clone().unwrap_or_default(),
        node_name: config.node_name.clone().unwrap_or_default(),
        api_secret_key: config.api_secret_key.clone().unwrap_or_default(),
    };
    let gateway_address = config.gateway_address.clone().unwrap_or_default();
    let host = hostname(&identity.node_name);
    info!(
        node = %identity.node_name,
        cluster = %identity.cluster_name,
        host = %host,
        "agent created"
    );

    // Probes are built and started once; sessions borrow them across
    // reconnects.
    let probe_config = ProbeConfig { host: &host, extra: &config.extra };
    let mut getters = build_getters(config.getter_module.as_deref().unwrap_or(""), &probe_config)?;
    let mut setters = build_setters(config.setter_module.as_deref().unwrap_or(""), &probe_config)?;
    for getter in &mut getters {
        info!(getter = getter.name(), "starting getter");
        getter.start()?;
    }
    for setter in &mut setters {
        info!(setter = setter.name(), "starting setter");
        setter.start()?;
    }

    // The goal calculator sees the getters' PI layout, without the goal
    // name itself.
    let pi_names: Vec<String> =
        getters.iter().flat_map(|g| g.pi_names().iter().cloned()).collect();
    let goal = match config.tuning_goal_regex {
        Some(ref regex) if !regex.is_empty() => Some(RegexTuningGoal::new(&pi_names, regex)?),
        _ => None,
    };

    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone());

    let result = supervise(
        &config,
        &identity,
        &gateway_address,
        &mut getters,
        &mut setters,
        goal.as_ref().map(|g| g as &dyn TuningGoal),
        &stop,
    )
    .await;

    // Probes release their resources on every exit path.
    for getter in &mut getters {
        if let Err(e) = getter.stop() {
            warn!(getter = getter.name(), "getter stop failed: {e}");
        }
    }
    for setter in &mut setters {
        if let Err(e) = setter.stop() {
            warn!(setter = setter.name(), "setter stop failed: {e}");
        }
    }
    result
}

/// The poller/session restart loop.
async fn supervise(
    config: &Config,
    identity: &AgentIdentity,
    gateway_address: &str,
    getters: &mut Vec<Box<dyn Getter>>,
    setters: &mut Vec<Box<dyn Setter>>,
    goal: Option<&dyn TuningGoal>,
    stop: &CancellationToken,
) -> anyhow::Result<()> {
    while !stop.is_cancelled() {
        let (queue_tx, queue_rx) = mpsc::channel::<Inbound>(QUEUE_DEPTH);
        let poller = Poller {
            agent_id: identity.id,
            gateway_address: gateway_address.to_owned(),
            command_address: config.command_socket_address().to_owned(),
        };
        let mut handle = match poller.spawn(queue_tx).await {
            Ok(handle) => handle,
            Err(e) if e.is_timeout() => {
                error!("{e}");
                info!("retrying gateway connection");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut session = Session::new(SessionConfig {
            identity,
            command: handle.command_client(),
            queue: queue_rx,
            getters: &mut *getters,
            setters: &mut *setters,
            goal,
            tuning_goal_name: config.tuning_goal_name().to_owned(),
            tick_len: config.tick_len(),
            network_timeout: config.network_timeout(),
            sending_pi_right_away: true,
            notify_gateway_on_stop: true,
            stop: stop.clone(),
        });
        let outcome = session.run().await;
        handle.disconnect().await;

        match outcome {
            Ok(()) => {
                info!(node = %identity.node_name, "session ended");
                break;
            }
            Err(e) if e.is_timeout() => {
                error!(node = %identity.node_name, "session timeout: {e}");
                info!("network protocol disconnected, trying to reconnect");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// SIGTERM/SIGINT request a graceful stop; a second signal forces exit.
fn spawn_signal_handler(stop: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM, stopping");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT, stopping");
            }
        }
        stop.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

fn hostname(fallback: &str) -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| fallback.to_owned())
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
