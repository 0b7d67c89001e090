//! Reconnecting bridge between local stdio and a remote WebSocket
//!
//! Shuttles JSON-RPC messages line-per-message on the local side and
//! frame-per-message on the remote side, reconnecting with exponential
//! backoff when the socket drops. Lines produced while disconnected are
//! dropped and reported, never buffered.

pub mod bridge;
pub mod policy;
pub mod token;

pub use bridge::{BridgeClient, BridgeConfig, BridgeStats, ClientState, Connector, WsConnector};
pub use policy::ReconnectPolicy;
pub use token::{GcloudTokenProvider, TokenProvider};
