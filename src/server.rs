//! Connection supervision: accept loop, WebSocket upgrade, and one isolated
//! session task per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::auth::TokenVerifier;
use crate::producer::{EchoProducer, FragmentProducer};
use crate::session::{CloseCode, MessageChannel, Session};
use crate::{GatewayConfig, GatewayError};

/// [`MessageChannel`] over a server-side WebSocket.
pub struct WsChannel<S> {
    inner: WebSocketStream<S>,
}

impl<S> WsChannel<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> MessageChannel for WsChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, text: String) -> Result<(), GatewayError> {
        Ok(self.inner.send(Message::text(text)).await?)
    }

    async fn receive(&mut self) -> Result<Option<String>, GatewayError> {
        while let Some(frame) = self.inner.next().await {
            match frame {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                // The protocol is text-based, but bytes that happen to be
                // UTF-8 JSON are accepted; anything else decodes as
                // malformed downstream.
                Ok(Message::Binary(bytes)) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) => return Ok(None),
                // Ping/pong are transport housekeeping, not messages.
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

    async fn close(&mut self, code: CloseCode) -> Result<(), GatewayError> {
        let frame = CloseFrame { code: ws_close_code(code), reason: "".into() };
        match self.inner.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn ws_close_code(code: CloseCode) -> WsCloseCode {
    match code {
        CloseCode::Normal => WsCloseCode::Normal,
        CloseCode::Policy => WsCloseCode::Policy,
        CloseCode::Internal => WsCloseCode::Error,
    }
}

/// Accepts transport connections and runs one [`Session`] per connection.
///
/// Sessions share nothing mutable: each task owns its socket, and the only
/// shared state is the read-only verifier secret and the producer. A failing
/// session is logged and discarded without touching its siblings.
pub struct GatewayServer {
    config: GatewayConfig,
    verifier: TokenVerifier,
    producer: Arc<dyn FragmentProducer>,
    local_addr: Option<SocketAddr>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        let verifier = TokenVerifier::new(config.secret.clone());
        Self {
            config,
            verifier,
            producer: Arc::new(EchoProducer::default()),
            local_addr: None,
        }
    }

    /// Swaps the generation engine. The default is the deterministic echo
    /// fallback; the session loop is indifferent to which one runs.
    pub fn with_producer(mut self, producer: Arc<dyn FragmentProducer>) -> Self {
        self.producer = producer;
        self
    }

    /// Binds the listener and records the resolved local address (useful
    /// with a `:0` port).
    pub async fn bind(&mut self) -> Result<TcpListener, GatewayError> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);
        info!(%addr, path = %self.config.endpoint_path, "gateway listening");
        Ok(listener)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "connection accepted");

            let verifier = self.verifier.clone();
            let producer = self.producer.clone();
            let auth_timeout = self.config.auth_timeout;
            let path = self.config.endpoint_path.clone();

            tokio::spawn(async move {
                match Self::handle_connection(stream, peer, path, verifier, producer, auth_timeout)
                    .await
                {
                    Ok(()) => {}
                    Err(err) => warn!(%peer, %err, "session ended with error"),
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        peer: SocketAddr,
        endpoint_path: String,
        verifier: TokenVerifier,
        producer: Arc<dyn FragmentProducer>,
        auth_timeout: Duration,
    ) -> Result<(), GatewayError> {
        let path_check = move |request: &Request, response: Response| {
            if request.uri().path() == endpoint_path {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("no such endpoint".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws = accept_hdr_async(stream, path_check).await?;
        let channel = WsChannel::new(ws);
        let session = Session::new(channel, verifier, producer, auth_timeout, peer.to_string());

        let outcome = session.run().await?;
        info!(%peer, ?outcome, "session closed");
        Ok(())
    }
}
