//! Frame-level traits over raw message sockets
//!
//! Each transport medium (WebSocket, stdio) supplies one implementation per
//! half of the split connection. One JSON-RPC message per frame.

use async_trait::async_trait;
use relay_core::Result;

/// Trait for reading text frames from a connection
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next text frame. `Ok(None)` means the peer closed cleanly.
    async fn next_frame(&mut self) -> Result<Option<String>>;
}

/// Trait for writing text frames to a connection
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one complete text frame.
    async fn send_frame(&mut self, text: &str) -> Result<()>;

    /// Request shutdown of the underlying connection.
    async fn shutdown(&mut self) -> Result<()>;
}
