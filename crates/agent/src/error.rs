// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed session outcomes the supervisor dispatches on.
//!
//! Timeouts and protocol violations are ordinary control flow here: the
//! supervisor reconnects on [`SessionError::Timeout`] and stops the agent on
//! everything else.

use std::fmt;

/// Why a session ended early.
#[derive(Debug)]
pub enum SessionError {
    /// No inbound traffic within the network timeout, or the gateway asked
    /// for a re-authentication. The supervisor tears down and reconnects.
    Timeout(String),
    /// The gateway rejected a message or spoke a different protocol
    /// version. Ends the current session.
    Communication(String),
    /// Unrecoverable: wrong API key, rejected PI data, or a failing probe.
    /// Stops the agent with a non-zero exit code.
    Fatal(String),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Communication(msg) => write!(f, "communication error: {msg}"),
            Self::Fatal(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
