//! WebSocket adapter for the upload protocol.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::HeaderMap;
use axum::response::Response;

use photobackup_core::error::{Error, Result};
use photobackup_core::upload::{Frame, FrameTransport, Reply};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// One upgraded upload connection.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let message = match self.socket.recv().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(Error::Transport(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
                // Pings are answered by the socket itself.
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return None,
            }
        }
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        let json = reply.to_json()?;
        self.socket
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// `GET /upload`: authenticate, then hand the socket to the upload handler.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let mut ws = ws
        .max_message_size(state.max_frame_bytes)
        .max_frame_size(state.max_frame_bytes);

    if let Some(token) = state.upload_token.as_deref() {
        authorize(&headers, token)?;
        ws = ws.protocols([token.to_string()]);
    }

    let handler = state.backup.uploads().clone();
    Ok(ws.on_upgrade(move |socket| async move {
        tracing::info!("upload connection opened");
        let mut transport = WsTransport::new(socket);
        handler.run(&mut transport).await;
    }))
}

/// The client proves itself by offering the token as a subprotocol.
pub fn authorize(headers: &HeaderMap, token: &str) -> ApiResult<()> {
    let offered = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim() == token);
    if offered {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("missing or invalid upload token".to_string()))
    }
}
