//! # relay-core
//!
//! Core types for the MCP relay:
//! - JSON-RPC 2.0 envelope types used by the protocol runtime
//! - Error taxonomy shared across the transport, client, and server crates

pub mod error;
pub mod rpc;

pub use error::{RelayError, Result, error_codes};
pub use rpc::{Request, RequestId, Response, RpcError};
