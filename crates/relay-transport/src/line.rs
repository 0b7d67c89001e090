//! Line-oriented JSON reader for the local channel

use relay_core::{RelayError, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::error;

/// Hook invoked once per malformed line
pub type ParseErrorHook = Box<dyn Fn(&RelayError) + Send>;

/// Produces parsed JSON values from a line-oriented input stream.
///
/// Malformed lines yield no item and are reported through the error hook;
/// the sequence ends only at end of input and is not restartable. Blank
/// lines are skipped silently.
pub struct LineReader<R> {
    reader: BufReader<R>,
    line: String,
    on_parse_error: Option<ParseErrorHook>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            reader: BufReader::new(input),
            line: String::new(),
            on_parse_error: None,
        }
    }

    /// Install a hook for malformed-line reports.
    pub fn on_parse_error(mut self, hook: ParseErrorHook) -> Self {
        self.on_parse_error = Some(hook);
        self
    }

    /// Next parsed message, or `None` once the input is exhausted.
    pub async fn next_message(&mut self) -> Result<Option<Value>> {
        loop {
            self.line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(|e| RelayError::Transport(format!("Line read failed: {e}")))?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    let err = RelayError::Protocol(format!("Failed to parse line: {e}"));
                    match &self.on_parse_error {
                        Some(hook) => hook(&err),
                        None => error!("{err}"),
                    }
                }
            }
        }
    }
}
