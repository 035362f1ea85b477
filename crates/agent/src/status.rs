// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent and cluster status codes shared between the session state machine,
//! the wire protocol, and the control CLI.

use std::fmt;

/// Lifecycle status of the agent, owned exclusively by the session state
/// machine and reported verbatim to status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Offline,
    Authenticating,
    UploadingMetadata,
    Running,
    Paused,
    ConnectionError,
    GetterError,
    SetterError,
}

impl ClientStatus {
    /// Integer representation used in status-reply payloads.
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Offline => 0,
            Self::Running => 1,
            Self::Authenticating => 3,
            Self::UploadingMetadata => 4,
            Self::ConnectionError => 5,
            Self::GetterError => 6,
            Self::SetterError => 7,
            Self::Paused => 8,
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Offline),
            1 => Some(Self::Running),
            3 => Some(Self::Authenticating),
            4 => Some(Self::UploadingMetadata),
            5 => Some(Self::ConnectionError),
            6 => Some(Self::GetterError),
            7 => Some(Self::SetterError),
            8 => Some(Self::Paused),
            _ => None,
        }
    }

    /// Human-readable form shown by the control CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Authenticating => "Authenticating",
            Self::UploadingMetadata => "Syncing metadata",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::ConnectionError => "Connection error",
            Self::GetterError => "Getter error",
            Self::SetterError => "Setter error",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster-wide status snapshot, produced by the gateway and forwarded to
/// local status queries without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Offline,
    TuningTargetReached,
    NotSetup,
    TuningTargetNotReached,
    ClientConnectionError,
    ClientError,
    InternalError,
}

impl ClusterStatus {
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Offline => 30,
            Self::TuningTargetReached => 31,
            Self::NotSetup => 32,
            Self::TuningTargetNotReached => 33,
            Self::ClientConnectionError => 34,
            Self::ClientError => 35,
            Self::InternalError => 36,
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            30 => Some(Self::Offline),
            31 => Some(Self::TuningTargetReached),
            32 => Some(Self::NotSetup),
            33 => Some(Self::TuningTargetNotReached),
            34 => Some(Self::ClientConnectionError),
            35 => Some(Self::ClientError),
            36 => Some(Self::InternalError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::TuningTargetReached => "Tuning; training finished",
            Self::NotSetup => "Not setup",
            Self::TuningTargetNotReached => "Tuning; training not finished",
            Self::ClientConnectionError => "Cannot connect to all nodes",
            Self::ClientError => "One or more node errors",
            Self::InternalError => "Internal error",
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
