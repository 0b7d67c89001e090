//! The reconnecting bridge client
//!
//! One event loop owns the connection, the reconnect policy, and the client
//! state; local lines arrive through a channel fed by a dedicated reader
//! task so every phase of the state machine keeps consuming them.

use crate::policy::ReconnectPolicy;
use crate::token::TokenProvider;
use async_trait::async_trait;
use relay_core::{RelayError, Result};
use relay_transport::frame::{FrameReader, FrameWriter};
use relay_transport::line::LineReader;
use relay_transport::ws;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Bridge client lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Open,
    Backoff,
    Closed,
    Failed,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Remote WebSocket endpoint
    pub url: String,
    /// Static bearer token; when absent the token provider is invoked
    pub token: Option<String>,
    pub policy: ReconnectPolicy,
}

impl BridgeConfig {
    /// Read configuration from `RELAY_URL` / `RELAY_TOKEN`.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("RELAY_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8080/ws".to_string()),
            token: std::env::var("RELAY_TOKEN").ok().filter(|t| !t.is_empty()),
            policy: ReconnectPolicy::default(),
        }
    }
}

/// Dials one physical connection. A seam so the reconnect machine can be
/// exercised without a network.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(
        &self,
        url: &str,
        token: &str,
    ) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)>;
}

/// Production dialer over `tokio-tungstenite`
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn dial(
        &self,
        url: &str,
        token: &str,
    ) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)> {
        let (reader, writer) = ws::connect(url, token).await?;
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Forwarding counters, visible for diagnostics and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct BridgeStats {
    /// Lines dropped because the connection was down
    pub dropped_lines: u64,
    pub forwarded_to_remote: u64,
    pub forwarded_to_local: u64,
}

/// Bridges local stdio to a remote WebSocket with bounded reconnection.
pub struct BridgeClient<C: Connector, P: TokenProvider> {
    config: BridgeConfig,
    connector: C,
    token_provider: P,
    policy: ReconnectPolicy,
    state: ClientState,
    stats: BridgeStats,
}

enum SessionEnd {
    LocalEof,
    ConnectionLost,
}

impl<C: Connector, P: TokenProvider> BridgeClient<C, P> {
    pub fn new(config: BridgeConfig, connector: C, token_provider: P) -> Self {
        let policy = config.policy.clone();
        Self {
            config,
            connector,
            token_provider,
            policy,
            state: ClientState::Idle,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Run the bridge until local EOF (normal shutdown) or attempt
    /// exhaustion (error). Diagnostics go to the tracing stream, never
    /// into `output`.
    pub async fn run<In, Out>(&mut self, input: In, output: Out) -> Result<()>
    where
        In: AsyncRead + Unpin + Send + 'static,
        Out: AsyncWrite + Unpin,
    {
        let token = match self.config.token.clone() {
            Some(token) => token,
            None => {
                info!("No static token configured, invoking token provider");
                // Failure here is fatal: no retry
                self.token_provider.get_token().await?
            }
        };

        let mut lines = spawn_line_reader(input);
        let mut output = output;

        loop {
            self.state = ClientState::Connecting;
            info!(url = %self.config.url, "Connecting to remote endpoint");

            let dialed = {
                let dial = self.connector.dial(&self.config.url, &token);
                tokio::pin!(dial);
                loop {
                    tokio::select! {
                        result = &mut dial => break Some(result),
                        line = lines.recv() => match line {
                            // Inlined `drop_line`: the pinned dial future
                            // borrows `self.connector`, so only the disjoint
                            // stats field may be borrowed mutably here.
                            Some(_) => {
                                self.stats.dropped_lines += 1;
                                error!("Not connected, dropping outbound message");
                            }
                            None => break None,
                        },
                    }
                }
            };
            let Some(dialed) = dialed else {
                info!("Local stream ended during connect, shutting down");
                self.state = ClientState::Closed;
                return Ok(());
            };

            match dialed {
                Ok((reader, writer)) => {
                    info!("Connected to remote endpoint");
                    self.state = ClientState::Open;
                    self.policy.reset();
                    match self.session(&mut lines, &mut output, reader, writer).await? {
                        SessionEnd::LocalEof => {
                            info!("Local stream ended, shutting down");
                            self.state = ClientState::Closed;
                            return Ok(());
                        }
                        SessionEnd::ConnectionLost => {}
                    }
                }
                Err(e) => warn!("Connect failed: {e}"),
            }

            self.state = ClientState::Backoff;
            let Some(delay) = self.policy.next_backoff() else {
                self.state = ClientState::Failed;
                error!("Max reconnection attempts reached, giving up");
                return Err(RelayError::Transport(
                    "Reconnect attempts exhausted".into(),
                ));
            };
            warn!(
                "Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                self.policy.attempt(),
                self.policy.max_attempts()
            );

            // Local EOF cancels the pending reconnect timer
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    () = &mut sleep => break,
                    line = lines.recv() => match line {
                        Some(_) => self.drop_line(),
                        None => {
                            info!("Local stream ended during backoff, shutting down");
                            self.state = ClientState::Closed;
                            return Ok(());
                        }
                    },
                }
            }
        }
    }

    /// One connected session; each direction forwards in arrival order.
    async fn session<Out>(
        &mut self,
        lines: &mut mpsc::Receiver<Value>,
        output: &mut Out,
        mut reader: Box<dyn FrameReader>,
        mut writer: Box<dyn FrameWriter>,
    ) -> Result<SessionEnd>
    where
        Out: AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(message) => {
                        let text = serde_json::to_string(&message)?;
                        if let Err(e) = writer.send_frame(&text).await {
                            warn!("Remote write failed: {e}");
                            return Ok(SessionEnd::ConnectionLost);
                        }
                        self.stats.forwarded_to_remote += 1;
                    }
                    None => {
                        let _ = writer.shutdown().await;
                        return Ok(SessionEnd::LocalEof);
                    }
                },
                frame = reader.next_frame() => match frame {
                    Ok(Some(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(message) => {
                            self.write_line(output, &message).await?;
                            self.stats.forwarded_to_local += 1;
                        }
                        Err(e) => error!("Failed to parse remote frame: {e}"),
                    },
                    Ok(None) => {
                        warn!("Remote connection closed");
                        return Ok(SessionEnd::ConnectionLost);
                    }
                    Err(e) => {
                        warn!("Remote read failed: {e}");
                        return Ok(SessionEnd::ConnectionLost);
                    }
                },
            }
        }
    }

    async fn write_line<Out>(&mut self, output: &mut Out, message: &Value) -> Result<()>
    where
        Out: AsyncWrite + Unpin,
    {
        let line = serde_json::to_string(message)?;
        output
            .write_all(line.as_bytes())
            .await
            .map_err(io_to_transport)?;
        output.write_all(b"\n").await.map_err(io_to_transport)?;
        output.flush().await.map_err(io_to_transport)?;
        Ok(())
    }

    fn drop_line(&mut self) {
        self.stats.dropped_lines += 1;
        error!("Not connected, dropping outbound message");
    }
}

/// Owns the local input; parsed lines flow out through the channel, which
/// closes at EOF.
fn spawn_line_reader<In>(input: In) -> mpsc::Receiver<Value>
where
    In: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut reader = LineReader::new(input).on_parse_error(Box::new(|e| {
            error!("{e}");
        }));
        loop {
            match reader.next_message().await {
                Ok(Some(message)) => {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Local input exhausted");
                    break;
                }
                Err(e) => {
                    error!("Local read failed: {e}");
                    break;
                }
            }
        }
    });
    rx
}

fn io_to_transport(e: std::io::Error) -> RelayError {
    RelayError::Transport(format!("Local write failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::{Notify, mpsc as tokio_mpsc};

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn get_token(&self) -> Result<String> {
            Ok("test-token-1234567890".into())
        }
    }

    struct FailingToken;

    #[async_trait]
    impl TokenProvider for FailingToken {
        async fn get_token(&self) -> Result<String> {
            Err(RelayError::Auth("helper exited with 1".into()))
        }
    }

    /// Reader whose peer closed immediately
    struct ClosedReader;

    #[async_trait]
    impl FrameReader for ClosedReader {
        async fn next_frame(&mut self) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct NullWriter;

    #[async_trait]
    impl FrameWriter for NullWriter {
        async fn send_frame(&mut self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Dials according to a script: `true` yields a session whose peer
    /// closes at once, `false` refuses the connection.
    struct ScriptedConnector {
        dials: Arc<AtomicU32>,
        script: Mutex<VecDeque<bool>>,
    }

    impl ScriptedConnector {
        fn new(script: Vec<bool>) -> Self {
            Self {
                dials: Arc::new(AtomicU32::new(0)),
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn dial(
            &self,
            _url: &str,
            _token: &str,
        ) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let open = self.script.lock().unwrap().pop_front().unwrap_or(false);
            if open {
                Ok((Box::new(ClosedReader), Box::new(NullWriter)))
            } else {
                Err(RelayError::Transport("Connection refused".into()))
            }
        }
    }

    /// Dial that never resolves
    struct PendingConnector {
        never: Notify,
    }

    #[async_trait]
    impl Connector for PendingConnector {
        async fn dial(
            &self,
            _url: &str,
            _token: &str,
        ) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)> {
            self.never.notified().await;
            Err(RelayError::Transport("unreachable".into()))
        }
    }

    struct ChanReader(tokio_mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl FrameReader for ChanReader {
        async fn next_frame(&mut self) -> Result<Option<String>> {
            Ok(self.0.recv().await)
        }
    }

    struct ChanWriter(tokio_mpsc::UnboundedSender<String>);

    #[async_trait]
    impl FrameWriter for ChanWriter {
        async fn send_frame(&mut self, text: &str) -> Result<()> {
            self.0
                .send(text.to_string())
                .map_err(|_| RelayError::Transport("Peer gone".into()))
        }

        async fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Single successful dial wired to test-held channels
    struct ChannelConnector {
        halves: Mutex<Option<(ChanReader, ChanWriter)>>,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn dial(
            &self,
            _url: &str,
            _token: &str,
        ) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>)> {
            let (reader, writer) = self
                .halves
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| RelayError::Transport("Connection refused".into()))?;
            Ok((Box::new(reader), Box::new(writer)))
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            url: "ws://test.invalid/ws".into(),
            token: Some("static-token-1234567890".into()),
            policy: ReconnectPolicy::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_follows_doubling_schedule_and_fails() {
        let connector = ScriptedConnector::new(vec![]);
        let dials = connector.dials.clone();
        let mut client = BridgeClient::new(config(), connector, StaticToken);

        // Keep the local stream open so only the reconnect machine runs
        let (_keep_alive, input) = tokio::io::duplex(64);
        let started = tokio::time::Instant::now();
        let result = client.run(input, tokio::io::sink()).await;

        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert_eq!(client.state(), ClientState::Failed);
        // Initial dial plus one per backoff slot
        assert_eq!(dials.load(Ordering::SeqCst), 6);
        // 1000 + 2000 + 4000 + 8000 + 16000
        assert_eq!(started.elapsed(), Duration::from_millis(31_000));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_the_backoff_schedule() {
        // Two refusals, one short-lived session, then refusals to exhaustion
        let connector = ScriptedConnector::new(vec![false, false, true]);
        let dials = connector.dials.clone();
        let mut client = BridgeClient::new(config(), connector, StaticToken);

        let (_keep_alive, input) = tokio::io::duplex(64);
        let started = tokio::time::Instant::now();
        let result = client.run(input, tokio::io::sink()).await;

        assert!(result.is_err());
        // 3 dials to reach the session, then a full fresh budget of 5
        assert_eq!(dials.load(Ordering::SeqCst), 8);
        // (1000 + 2000) before the open, then the full schedule again
        assert_eq!(started.elapsed(), Duration::from_millis(34_000));
    }

    #[tokio::test]
    async fn auth_failure_is_fatal_without_dialing() {
        let connector = ScriptedConnector::new(vec![true]);
        let dials = connector.dials.clone();
        let mut config = config();
        config.token = None;
        let mut client = BridgeClient::new(config, connector, FailingToken);

        let (_keep_alive, input) = tokio::io::duplex(64);
        let result = client.run(input, tokio::io::sink()).await;

        assert!(matches!(result, Err(RelayError::Auth(_))));
        assert_eq!(dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lines_while_disconnected_are_dropped_not_buffered() {
        let connector = PendingConnector {
            never: Notify::new(),
        };
        let mut client = BridgeClient::new(config(), connector, StaticToken);

        let (mut local, input) = tokio::io::duplex(1024);
        local.write_all(b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n").await.unwrap();
        drop(local); // EOF ends the run

        let result = client.run(input, tokio::io::sink()).await;
        assert!(result.is_ok());
        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(client.stats().dropped_lines, 3);
        assert_eq!(client.stats().forwarded_to_remote, 0);
    }

    #[tokio::test]
    async fn forwards_in_both_directions_in_order() {
        let (in_tx, in_rx) = tokio_mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = tokio_mpsc::unbounded_channel();
        let connector = ChannelConnector {
            halves: Mutex::new(Some((ChanReader(in_rx), ChanWriter(out_tx)))),
        };
        let mut client = BridgeClient::new(config(), connector, StaticToken);

        let (mut local_in, input) = tokio::io::duplex(1024);
        let (output, local_out) = tokio::io::duplex(1024);

        let driver = tokio::spawn(async move {
            // local -> remote
            local_in
                .write_all(b"{\"method\":\"ping\",\"id\":1}\n")
                .await
                .unwrap();
            let sent = out_rx.recv().await.unwrap();
            assert_eq!(
                serde_json::from_str::<Value>(&sent).unwrap(),
                serde_json::json!({"method": "ping", "id": 1})
            );

            // remote -> local, two frames stay in arrival order
            in_tx.send("{\"id\":1,\"result\":\"pong\"}".into()).unwrap();
            in_tx.send("{\"id\":2,\"result\":\"late\"}".into()).unwrap();
            let mut lines = BufReader::new(local_out);
            let mut line = String::new();
            lines.read_line(&mut line).await.unwrap();
            assert_eq!(
                serde_json::from_str::<Value>(&line).unwrap(),
                serde_json::json!({"id": 1, "result": "pong"})
            );
            line.clear();
            lines.read_line(&mut line).await.unwrap();
            assert_eq!(
                serde_json::from_str::<Value>(&line).unwrap(),
                serde_json::json!({"id": 2, "result": "late"})
            );

            // Local EOF is a normal shutdown
            drop(local_in);
        });

        let result = client.run(input, output).await;
        driver.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(client.stats().forwarded_to_remote, 1);
        assert_eq!(client.stats().forwarded_to_local, 2);
    }

    #[tokio::test]
    async fn malformed_remote_frame_is_dropped_and_stream_continues() {
        let (in_tx, in_rx) = tokio_mpsc::unbounded_channel();
        let (out_tx, _out_rx) = tokio_mpsc::unbounded_channel();
        let connector = ChannelConnector {
            halves: Mutex::new(Some((ChanReader(in_rx), ChanWriter(out_tx)))),
        };
        let mut client = BridgeClient::new(config(), connector, StaticToken);

        let (local_in, input) = tokio::io::duplex(1024);
        let (output, local_out) = tokio::io::duplex(1024);

        let driver = tokio::spawn(async move {
            in_tx.send("garbage".into()).unwrap();
            in_tx.send("{\"id\":9,\"result\":null}".into()).unwrap();
            let mut lines = BufReader::new(local_out);
            let mut line = String::new();
            lines.read_line(&mut line).await.unwrap();
            assert_eq!(
                serde_json::from_str::<Value>(&line).unwrap(),
                serde_json::json!({"id": 9, "result": null})
            );
            drop(local_in);
        });

        let result = client.run(input, output).await;
        driver.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(client.stats().forwarded_to_local, 1);
    }
}
