//! Connecting client for the gateway protocol: authenticate once, then
//! submit prompts and consume the token streams.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::wire::{self, ServerMessage, STATUS_AUTHENTICATED, STATUS_DONE};
use crate::GatewayError;

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GatewayClient {
    ws: ClientWs,
}

impl GatewayClient {
    /// Opens the WebSocket. The connection is useless until
    /// [`authenticate`](Self::authenticate) succeeds.
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let (ws, _response) = connect_async(url).await?;
        debug!(%url, "connected");
        Ok(Self { ws })
    }

    /// Presents the credential as the first message and waits for the
    /// server's verdict.
    pub async fn authenticate(&mut self, token: &str) -> Result<(), GatewayError> {
        self.ws.send(Message::text(wire::credential_frame(token)?)).await?;

        match self.next_message().await? {
            Some(ServerMessage::Status { status }) if status == STATUS_AUTHENTICATED => Ok(()),
            Some(ServerMessage::Error { error }) => Err(GatewayError::ServerError(error)),
            Some(other) => Err(GatewayError::ConnectionError(format!(
                "unexpected handshake reply: {other:?}"
            ))),
            None => Err(GatewayError::ConnectionError(
                "connection closed during handshake".to_string(),
            )),
        }
    }

    /// Submits one prompt and collects the full token stream, in order,
    /// until the server reports completion.
    pub async fn request(&mut self, prompt: &str) -> Result<Vec<String>, GatewayError> {
        self.ws.send(Message::text(wire::prompt_frame(prompt)?)).await?;

        let mut fragments = Vec::new();
        loop {
            match self.next_message().await? {
                Some(ServerMessage::Token { token }) => fragments.push(token),
                Some(ServerMessage::Status { status }) if status == STATUS_DONE => {
                    return Ok(fragments)
                }
                Some(ServerMessage::Status { status }) => {
                    return Err(GatewayError::ConnectionError(format!(
                        "unexpected status mid-stream: {status}"
                    )))
                }
                Some(ServerMessage::Error { error }) => {
                    return Err(GatewayError::ServerError(error))
                }
                None => {
                    return Err(GatewayError::ConnectionError(
                        "connection closed mid-stream".to_string(),
                    ))
                }
            }
        }
    }

    pub async fn close(mut self) -> Result<(), GatewayError> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn next_message(&mut self) -> Result<Option<ServerMessage>, GatewayError> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let message: ServerMessage = serde_json::from_str(text.as_str())?;
                    return Ok(Some(message));
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return Ok(None),
                Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => {
                    return Ok(None)
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }
}
