// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Gateway error types

use std::time::Duration;
use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the correlator, connectors, adapters and stores
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No session marker, or one that failed verification
    #[error("Authentication required")]
    AuthRequired,

    /// Login attempt with unknown email or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Query type outside the allow-list of the route
    #[error("Invalid query type: {0}")]
    InvalidQueryType(String),

    /// The responder never posted a qualifying reply
    #[error("No response after waiting {0:?}")]
    NoResponseTimeout(Duration),

    /// Send/receive/HTTP fault, carrying the underlying cause
    #[error("{0}")]
    Transport(String),

    /// Registration with an email that is already stored
    #[error("User already exists: {0}")]
    AlreadyExists(String),

    /// Malformed caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        GatewayError::Transport(cause.to_string())
    }

    /// Send/receive/HTTP fault
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Transport(format!("invalid JSON: {}", e))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_keeps_cause() {
        let err = GatewayError::transport("connection reset by peer");
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "connection reset by peer");
    }

    #[test]
    fn test_timeout_display() {
        let err = GatewayError::NoResponseTimeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "No response after waiting 10s");
    }
}
