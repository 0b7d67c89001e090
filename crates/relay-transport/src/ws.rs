//! WebSocket frame implementations
//!
//! The client side dials with `tokio-tungstenite`, attaching the bearer
//! token to the upgrade request. The server side wraps the socket handed
//! over by axum's upgrade handler. Both reduce to the same frame traits.

use crate::frame::{FrameReader, FrameWriter};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::{RelayError, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client-side reader half
pub struct WsFrameReader(SplitStream<WsStream>);

/// Client-side writer half
pub struct WsFrameWriter(SplitSink<WsStream, Message>);

/// Dial `url` with `Authorization: Bearer <token>` on the upgrade request.
///
/// Resolves once the handshake completes, so the returned halves are Open.
pub async fn connect(url: &str, token: &str) -> Result<(WsFrameReader, WsFrameWriter)> {
    let mut request = url
        .into_client_request()
        .map_err(|e| RelayError::Transport(format!("Invalid endpoint URL: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| RelayError::Auth(format!("Token is not a valid header value: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| RelayError::Transport(format!("WebSocket connect failed: {e}")))?;
    let (sink, stream) = stream.split();
    Ok((WsFrameReader(stream), WsFrameWriter(sink)))
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data.into())
                        .map(Some)
                        .map_err(|e| RelayError::Protocol(format!("Non-UTF-8 frame: {e}")));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong are answered by the library
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(RelayError::Transport(format!("WebSocket read failed: {e}")));
                }
            }
        }
    }
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn send_frame(&mut self, text: &str) -> Result<()> {
        self.0
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| RelayError::Transport(format!("WebSocket write failed: {e}")))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.0
            .send(Message::Close(None))
            .await
            .map_err(|e| RelayError::Transport(format!("WebSocket close failed: {e}")))
    }
}

/// Server-side reader half over an axum-upgraded socket
pub struct ServerFrameReader(SplitStream<axum::extract::ws::WebSocket>);

/// Server-side writer half over an axum-upgraded socket
pub struct ServerFrameWriter(
    SplitSink<axum::extract::ws::WebSocket, axum::extract::ws::Message>,
);

/// Split an accepted server socket into frame halves.
pub fn from_axum(
    socket: axum::extract::ws::WebSocket,
) -> (ServerFrameReader, ServerFrameWriter) {
    let (sink, stream) = socket.split();
    (ServerFrameReader(stream), ServerFrameWriter(sink))
}

#[async_trait]
impl FrameReader for ServerFrameReader {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        use axum::extract::ws::Message as WsMessage;
        loop {
            match self.0.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(WsMessage::Binary(data))) => {
                    return String::from_utf8(data.into())
                        .map(Some)
                        .map_err(|e| RelayError::Protocol(format!("Non-UTF-8 frame: {e}")));
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(RelayError::Transport(format!("WebSocket read failed: {e}")));
                }
            }
        }
    }
}

#[async_trait]
impl FrameWriter for ServerFrameWriter {
    async fn send_frame(&mut self, text: &str) -> Result<()> {
        use axum::extract::ws::Message as WsMessage;
        self.0
            .send(WsMessage::Text(text.to_owned().into()))
            .await
            .map_err(|e| RelayError::Transport(format!("WebSocket write failed: {e}")))
    }

    async fn shutdown(&mut self) -> Result<()> {
        use axum::extract::ws::Message as WsMessage;
        self.0
            .send(WsMessage::Close(None))
            .await
            .map_err(|e| RelayError::Transport(format!("WebSocket close failed: {e}")))
    }
}
