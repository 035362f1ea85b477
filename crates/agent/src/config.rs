// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_COMMAND_SOCKET_ADDRESS: &str = "127.0.0.1:7778";

/// Auto-tuning agent for cluster nodes.
///
/// Flags override environment variables, which override the `--conf` file.
#[derive(Debug, Parser)]
#[command(name = "tunerd", version, about)]
pub struct Config {
    /// Path to a JSON configuration file.
    #[arg(long, env = "TUNERD_CONF")]
    pub conf: Option<PathBuf>,

    /// Name of this node, unique within the cluster.
    #[arg(long, env = "TUNERD_NODE_NAME")]
    pub node_name: Option<String>,

    /// Name of the cluster this node belongs to.
    #[arg(long, env = "TUNERD_CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// API secret key presented during the gateway handshake.
    #[arg(long, env = "TUNERD_API_SECRET_KEY")]
    pub api_secret_key: Option<String>,

    /// Gateway address as host:port.
    #[arg(long, env = "TUNERD_GATEWAY_ADDRESS")]
    pub gateway_address: Option<String>,

    /// Address the local command socket binds to.
    #[arg(long, env = "TUNERD_COMMAND_SOCKET_ADDRESS")]
    pub command_socket_address: Option<String>,

    /// Wire protocol (only "tcp" is supported).
    #[arg(long, env = "TUNERD_PROTOCOL")]
    pub protocol: Option<String>,

    /// Comma-separated getter modules (e.g. "file").
    #[arg(long, env = "TUNERD_GETTER_MODULE")]
    pub getter_module: Option<String>,

    /// Comma-separated setter modules (e.g. "conf_file").
    #[arg(long, env = "TUNERD_SETTER_MODULE")]
    pub setter_module: Option<String>,

    /// Collection interval in seconds; 0 collects once after each action.
    #[arg(long, env = "TUNERD_TICK_LEN")]
    pub tick_len: Option<u64>,

    /// Seconds without inbound traffic before the session reconnects.
    #[arg(long, env = "TUNERD_NETWORK_TIMEOUT")]
    pub network_timeout: Option<u64>,

    /// Regex selecting the PIs averaged into the tuning goal. Unset means
    /// this node submits no tuning goal.
    #[arg(long, env = "TUNERD_TUNING_GOAL_REGEX")]
    pub tuning_goal_regex: Option<String>,

    /// PID file path; when set, refuses to start while another instance
    /// holds the lock.
    #[arg(long, env = "TUNERD_PIDFILE")]
    pub pidfile: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "TUNERD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TUNERD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Probe-specific sub-keys from the config file.
    #[arg(skip)]
    pub extra: Map<String, Value>,
}

/// The `--conf` JSON file: the same keys as the flags, plus free-form
/// probe sub-keys.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub node_name: Option<String>,
    pub cluster_name: Option<String>,
    pub api_secret_key: Option<String>,
    pub gateway_address: Option<String>,
    pub command_socket_address: Option<String>,
    pub protocol: Option<String>,
    pub getter_module: Option<String>,
    pub setter_module: Option<String>,
    pub tick_len: Option<u64>,
    pub network_timeout: Option<u64>,
    pub tuning_goal_regex: Option<String>,
    pub pidfile: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Load the JSON config file.
pub fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read config file {}: {e}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("cannot parse config file {}: {e}", path.display()))
}

impl Config {
    /// Fill unset fields from the `--conf` file, if one was given.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        if let Some(ref path) = self.conf {
            let file = load_file_config(path)?;
            self.node_name = self.node_name.or(file.node_name);
            self.cluster_name = self.cluster_name.or(file.cluster_name);
            self.api_secret_key = self.api_secret_key.or(file.api_secret_key);
            self.gateway_address = self.gateway_address.or(file.gateway_address);
            self.command_socket_address =
                self.command_socket_address.or(file.command_socket_address);
            self.protocol = self.protocol.or(file.protocol);
            self.getter_module = self.getter_module.or(file.getter_module);
            self.setter_module = self.setter_module.or(file.setter_module);
            self.tick_len = self.tick_len.or(file.tick_len);
            self.network_timeout = self.network_timeout.or(file.network_timeout);
            self.tuning_goal_regex = self.tuning_goal_regex.or(file.tuning_goal_regex);
            self.pidfile = self.pidfile.or(file.pidfile);
            self.extra = file.extra;
        }
        Ok(self)
    }

    /// Check the required keys for running the daemon. Failures exit 2.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (key, value) in [
            ("node_name", &self.node_name),
            ("cluster_name", &self.cluster_name),
            ("api_secret_key", &self.api_secret_key),
            ("gateway_address", &self.gateway_address),
        ] {
            if value.as_deref().is_none_or(str::is_empty) {
                anyhow::bail!("required configuration '{key}' is not set");
            }
        }
        let protocol = self.protocol.as_deref().unwrap_or("tcp");
        if protocol != "tcp" {
            anyhow::bail!("unsupported protocol '{protocol}'");
        }
        if self.getter_module.as_deref().is_none_or(str::is_empty)
            && self.setter_module.as_deref().is_none_or(str::is_empty)
        {
            anyhow::bail!("getter_module and setter_module are both empty, set at least one");
        }
        Ok(())
    }

    pub fn command_socket_address(&self) -> &str {
        self.command_socket_address.as_deref().unwrap_or(DEFAULT_COMMAND_SOCKET_ADDRESS)
    }

    pub fn tick_len(&self) -> u64 {
        self.tick_len.unwrap_or(1)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout.unwrap_or(30))
    }

    /// The tuning-goal name advertised in the metadata: the goal regex, or
    /// empty when this node submits no goal.
    pub fn tuning_goal_name(&self) -> &str {
        self.tuning_goal_regex.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
