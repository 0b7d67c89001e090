//! stdio frame implementation
//!
//! One JSON-RPC message per line. Diagnostics go to stderr via `tracing`
//! and never mix into this stream.

use crate::frame::{FrameReader, FrameWriter};
use async_trait::async_trait;
use relay_core::{RelayError, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};

/// Line-per-message reader over stdin
pub struct StdinFrameReader {
    reader: BufReader<Stdin>,
    line: String,
}

/// Line-per-message writer over stdout
pub struct StdoutFrameWriter {
    out: Stdout,
}

/// Frame halves over the process's own stdio.
pub fn stdio() -> (StdinFrameReader, StdoutFrameWriter) {
    (
        StdinFrameReader {
            reader: BufReader::new(tokio::io::stdin()),
            line: String::new(),
        },
        StdoutFrameWriter {
            out: tokio::io::stdout(),
        },
    )
}

#[async_trait]
impl FrameReader for StdinFrameReader {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            self.line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(|e| RelayError::Transport(format!("Failed to read stdin: {e}")))?;
            if bytes_read == 0 {
                // EOF - client disconnected
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }
}

#[async_trait]
impl FrameWriter for StdoutFrameWriter {
    async fn send_frame(&mut self, text: &str) -> Result<()> {
        self.out
            .write_all(text.as_bytes())
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to write stdout: {e}")))?;
        self.out
            .write_all(b"\n")
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to write newline: {e}")))?;
        self.out
            .flush()
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to flush stdout: {e}")))?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.out
            .flush()
            .await
            .map_err(|e| RelayError::Transport(format!("Failed to flush stdout: {e}")))
    }
}
