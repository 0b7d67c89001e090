//! Error types for the relay

use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection refused, handshake failure, or mid-stream socket error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed JSON on the local or remote channel
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Credential acquisition failure
    #[error("Auth error: {0}")]
    Auth(String),

    /// Send attempted while the connection is not open
    #[error("Connection not open: {0}")]
    Capacity(String),

    /// External tool helper failure
    #[error("Tool error: {0}")]
    Tool(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Protocol(err.to_string())
    }
}

/// JSON-RPC error codes used by the relay
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}
