//! Socket transport adapter for the protocol runtime
//!
//! Wraps one physical connection behind the `Transport` contract: async
//! start/send/close plus ordered handler registration for inbound message,
//! close, and error events. One adapter per connection; the lifecycle is
//! one-way and an adapter cannot be reopened.

use crate::frame::{FrameReader, FrameWriter};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{RelayError, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback for inbound messages
pub type MessageHandler = Box<dyn Fn(&Value) + Send + Sync>;
/// Callback for connection closure
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;
/// Callback for transport and protocol errors
pub type ErrorHandler = Box<dyn Fn(&RelayError) + Send + Sync>;

/// Lifecycle of one physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Starting,
    Open,
    Closing,
    Closed,
}

/// The bidirectional message channel contract consumed by the protocol
/// runtime, independent of the physical medium.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin processing inbound frames. Idempotent once resolved.
    async fn start(&self) -> Result<()>;

    /// Serialize and write one message. Fails with `Capacity` unless Open;
    /// resolves once the underlying write completes.
    async fn send(&self, message: &Value) -> Result<()>;

    /// Register a handler for inbound messages. Handlers fire in
    /// registration order for every subsequent message.
    fn on_message(&self, handler: MessageHandler);

    /// Register a handler for connection closure. Fires exactly once.
    fn on_close(&self, handler: CloseHandler);

    /// Register a handler for transport and protocol errors.
    fn on_error(&self, handler: ErrorHandler);

    /// Request shutdown; resolves once closure is confirmed. Idempotent.
    async fn close(&self) -> Result<()>;
}

#[derive(Default)]
struct HandlerRegistry {
    message: Vec<MessageHandler>,
    close: Vec<CloseHandler>,
    error: Vec<ErrorHandler>,
}

impl HandlerRegistry {
    fn emit_message(&self, message: &Value) {
        for handler in &self.message {
            handler(message);
        }
    }

    fn emit_close(&self) {
        for handler in &self.close {
            handler();
        }
    }

    fn emit_error(&self, err: &RelayError) {
        for handler in &self.error {
            handler(err);
        }
    }
}

/// Adapter wrapping one socket connection.
///
/// All inbound frames and the close signal funnel through a single reader
/// pump task, so connection state never sees concurrent mutation.
pub struct SocketTransport {
    state: Arc<Mutex<ConnectionState>>,
    handlers: Arc<Mutex<HandlerRegistry>>,
    reader: Mutex<Option<Box<dyn FrameReader>>>,
    writer: tokio::sync::Mutex<Box<dyn FrameWriter>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl SocketTransport {
    pub fn new(
        reader: impl FrameReader + 'static,
        writer: impl FrameWriter + 'static,
    ) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Created)),
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
            reader: Mutex::new(Some(Box::new(reader))),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pump: Mutex::new(None),
            closed_tx,
            closed_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Created => *state = ConnectionState::Starting,
                ConnectionState::Starting | ConnectionState::Open => return Ok(()),
                ConnectionState::Closing | ConnectionState::Closed => {
                    return Err(RelayError::Transport("Transport already closed".into()));
                }
            }
        }

        let Some(mut reader) = self.reader.lock().take() else {
            return Ok(());
        };
        *self.state.lock() = ConnectionState::Open;

        let state = self.state.clone();
        let handlers = self.handlers.clone();
        let closed_tx = self.closed_tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match reader.next_frame().await {
                    Ok(Some(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(message) => handlers.lock().emit_message(&message),
                        Err(e) => handlers.lock().emit_error(&RelayError::Protocol(format!(
                            "Failed to parse frame: {e}"
                        ))),
                    },
                    Ok(None) => {
                        debug!("Peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        handlers.lock().emit_error(&e);
                        break;
                    }
                }
            }
            *state.lock() = ConnectionState::Closed;
            handlers.lock().emit_close();
            let _ = closed_tx.send(true);
        });
        *self.pump.lock() = Some(handle);
        Ok(())
    }

    async fn send(&self, message: &Value) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(RelayError::Capacity(format!("Connection is {state:?}")));
        }
        let text = serde_json::to_string(message)?;
        self.writer.lock().await.send_frame(&text).await
    }

    fn on_message(&self, handler: MessageHandler) {
        self.handlers.lock().message.push(handler);
    }

    fn on_close(&self, handler: CloseHandler) {
        self.handlers.lock().close.push(handler);
    }

    fn on_error(&self, handler: ErrorHandler) {
        self.handlers.lock().error.push(handler);
    }

    async fn close(&self) -> Result<()> {
        let started = {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Closed => return Ok(()),
                ConnectionState::Created => {
                    // Never started: nothing to confirm
                    *state = ConnectionState::Closed;
                    false
                }
                _ => {
                    *state = ConnectionState::Closing;
                    true
                }
            }
        };

        // The peer may already be gone; a failed close write is not an error
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Shutdown write failed: {e}");
        }

        if started {
            let mut closed = self.closed_rx.clone();
            while !*closed.borrow_and_update() {
                if closed.changed().await.is_err() {
                    break;
                }
            }
        } else {
            let _ = self.closed_tx.send(true);
        }
        *self.state.lock() = ConnectionState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, mpsc};

    struct ChanReader {
        rx: mpsc::UnboundedReceiver<String>,
        closed: Arc<Notify>,
    }

    #[async_trait]
    impl FrameReader for ChanReader {
        async fn next_frame(&mut self) -> Result<Option<String>> {
            tokio::select! {
                frame = self.rx.recv() => Ok(frame),
                () = self.closed.notified() => Ok(None),
            }
        }
    }

    struct ChanWriter {
        tx: mpsc::UnboundedSender<String>,
        closed: Arc<Notify>,
    }

    #[async_trait]
    impl FrameWriter for ChanWriter {
        async fn send_frame(&mut self, text: &str) -> Result<()> {
            self.tx
                .send(text.to_string())
                .map_err(|_| RelayError::Transport("Peer gone".into()))
        }

        async fn shutdown(&mut self) -> Result<()> {
            // Emulates the close echo ending our own read pump
            self.closed.notify_one();
            Ok(())
        }
    }

    struct FakePeer {
        in_tx: mpsc::UnboundedSender<String>,
        out_rx: mpsc::UnboundedReceiver<String>,
    }

    fn fake_transport() -> (Arc<SocketTransport>, FakePeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Notify::new());
        let transport = SocketTransport::new(
            ChanReader {
                rx: in_rx,
                closed: closed.clone(),
            },
            ChanWriter { tx: out_tx, closed },
        );
        (Arc::new(transport), FakePeer { in_tx, out_rx })
    }

    #[tokio::test]
    async fn send_before_start_is_capacity_error() {
        let (transport, _peer) = fake_transport();
        let err = transport.send(&json!({"a": 1})).await.unwrap_err();
        assert!(matches!(err, RelayError::Capacity(_)));
    }

    #[tokio::test]
    async fn send_writes_serialized_frame() {
        let (transport, mut peer) = fake_transport();
        transport.start().await.unwrap();
        transport.send(&json!({"id": 1, "method": "ping"})).await.unwrap();
        let frame = peer.out_rx.recv().await.unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&frame).unwrap(),
            json!({"id": 1, "method": "ping"})
        );
    }

    #[tokio::test]
    async fn inbound_frame_round_trips_deep_equal() {
        let (transport, peer) = fake_transport();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        transport.on_message(Box::new(move |message| {
            let _ = seen_tx.send(message.clone());
        }));
        transport.start().await.unwrap();

        let original = json!({"jsonrpc": "2.0", "id": 42, "result": {"nested": [1, 2, 3]}});
        peer.in_tx.send(original.to_string()).unwrap();
        let seen = seen_rx.recv().await.unwrap();
        assert_eq!(seen, original);
    }

    #[tokio::test]
    async fn malformed_frame_fires_error_not_message() {
        let (transport, peer) = fake_transport();
        let messages = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let message_count = messages.clone();
        let forward = seen_tx.clone();
        transport.on_message(Box::new(move |message| {
            message_count.fetch_add(1, Ordering::SeqCst);
            let _ = forward.send(message.clone());
        }));
        let error_count = errors.clone();
        transport.on_error(Box::new(move |_| {
            error_count.fetch_add(1, Ordering::SeqCst);
        }));
        transport.start().await.unwrap();

        peer.in_tx.send("not json".into()).unwrap();
        peer.in_tx.send(json!({"ok": true}).to_string()).unwrap();

        // The valid frame is still processed after the malformed one
        let seen = seen_rx.recv().await.unwrap();
        assert_eq!(seen, json!({"ok": true}));
        assert_eq!(messages.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handlers_fire_in_registration_order() {
        let (transport, peer) = fake_transport();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let first = order.clone();
        transport.on_message(Box::new(move |_| first.lock().push(1)));
        let second = order.clone();
        transport.on_message(Box::new(move |_| {
            second.lock().push(2);
            let _ = done_tx.send(());
        }));
        transport.start().await.unwrap();

        peer.in_tx.send(json!({}).to_string()).unwrap();
        done_rx.recv().await.unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (transport, _peer) = fake_transport();
        let closes = Arc::new(AtomicUsize::new(0));
        let close_count = closes.clone();
        transport.on_close(Box::new(move || {
            close_count.fetch_add(1, Ordering::SeqCst);
        }));
        transport.start().await.unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_without_start_resolves() {
        let (transport, _peer) = fake_transport();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn send_after_close_is_capacity_error() {
        let (transport, _peer) = fake_transport();
        transport.start().await.unwrap();
        transport.close().await.unwrap();
        let err = transport.send(&json!({"late": true})).await.unwrap_err();
        assert!(matches!(err, RelayError::Capacity(_)));
    }

    #[tokio::test]
    async fn peer_close_fires_close_handlers_once() {
        let (transport, peer) = fake_transport();
        let closes = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let close_count = closes.clone();
        transport.on_close(Box::new(move || {
            close_count.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        }));
        transport.start().await.unwrap();

        // Dropping the sender ends the inbound stream
        drop(peer.in_tx);
        done_rx.recv().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (transport, peer) = fake_transport();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        transport.on_message(Box::new(move |message| {
            let _ = seen_tx.send(message.clone());
        }));
        transport.start().await.unwrap();
        transport.start().await.unwrap();

        peer.in_tx.send(json!({"n": 1}).to_string()).unwrap();
        // Exactly one pump: one delivery per frame
        assert_eq!(seen_rx.recv().await.unwrap(), json!({"n": 1}));
        peer.in_tx.send(json!({"n": 2}).to_string()).unwrap();
        assert_eq!(seen_rx.recv().await.unwrap(), json!({"n": 2}));
    }
}
