//! Transport infrastructure for the MCP relay
//!
//! This crate provides:
//! - `FrameReader`/`FrameWriter` traits over raw message sockets
//! - WebSocket (client and server side) and stdio frame implementations
//! - The `Transport` contract consumed by the protocol runtime
//! - `SocketTransport`, the adapter wrapping one physical connection
//! - `LineReader` for line-oriented JSON input streams

pub mod frame;
pub mod line;
pub mod stdio;
pub mod transport;
pub mod ws;

pub use frame::{FrameReader, FrameWriter};
pub use line::LineReader;
pub use transport::{ConnectionState, SocketTransport, Transport};
