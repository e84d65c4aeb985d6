//! Per-connection lifecycle: handshake, authentication window, the prompt
//! loop, and the streaming relay.
//!
//! One [`Session`] owns one connection from accept to close. It is driven as
//! an explicit state machine (`AwaitingAuth -> Idle <-> Streaming -> Closed`)
//! so the authentication timeout boundary stays unambiguous: the only bounded
//! wait in the protocol is the single receive in `AwaitingAuth`. Everything
//! inside a session is strictly sequential; no prompt is processed before
//! authentication succeeds, and no two generation requests overlap on one
//! connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::TokenVerifier;
use crate::producer::FragmentProducer;
use crate::wire::{self, ClientMessage, ServerMessage};
use crate::GatewayError;

/// Close codes the session may put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Clean close (1000).
    Normal,
    /// The client violated a protocol precondition: bad or missing
    /// credential (1008).
    Policy,
    /// Generic runtime failure after best-effort notification (1011).
    Internal,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Policy => 1008,
            CloseCode::Internal => 1011,
        }
    }
}

/// The reliable ordered message channel a session runs over.
///
/// The real implementation is a WebSocket (see `server.rs`); tests drive the
/// state machine through an in-memory double instead.
#[async_trait]
pub trait MessageChannel: Send {
    /// Sends one structured-message frame.
    async fn send(&mut self, text: String) -> Result<(), GatewayError>;

    /// Receives the next inbound frame. `Ok(None)` means the peer closed or
    /// disconnected; an error means the transport itself failed.
    async fn receive(&mut self) -> Result<Option<String>, GatewayError>;

    /// Closes the channel with `code`. Closing an already-closed channel is
    /// a no-op.
    async fn close(&mut self, code: CloseCode) -> Result<(), GatewayError>;
}

/// How a session run ended, for the cases that are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Wrong or missing credential; the client was notified where possible
    /// and the connection closed with a policy-violation code.
    AuthFailed,
    /// No credential arrived within the handshake window.
    AuthTimedOut,
    /// The client went away. Not an error.
    Disconnected,
}

enum SessionState {
    AwaitingAuth,
    Idle,
    Streaming(String),
    Closed(SessionOutcome),
}

pub struct Session<C> {
    channel: C,
    verifier: TokenVerifier,
    producer: Arc<dyn FragmentProducer>,
    auth_timeout: Duration,
    peer: String,
}

impl<C: MessageChannel> Session<C> {
    pub fn new(
        channel: C,
        verifier: TokenVerifier,
        producer: Arc<dyn FragmentProducer>,
        auth_timeout: Duration,
        peer: impl Into<String>,
    ) -> Self {
        Self { channel, verifier, producer, auth_timeout, peer: peer.into() }
    }

    /// Drives the connection to its terminal state.
    ///
    /// Protocol-level terminations (auth failure, timeout, disconnect) come
    /// back as `Ok(outcome)`. Anything else is a generic runtime error: the
    /// client gets a best-effort `{"error": ...}` notification, the channel
    /// is closed, and the error is returned for the supervisor to log. No
    /// failure escapes past that.
    pub async fn run(mut self) -> Result<SessionOutcome, GatewayError> {
        let mut state = SessionState::AwaitingAuth;
        loop {
            let step = match state {
                SessionState::AwaitingAuth => self.await_credential().await,
                SessionState::Idle => self.await_prompt().await,
                SessionState::Streaming(prompt) => self.stream_reply(prompt).await,
                SessionState::Closed(outcome) => return Ok(outcome),
            };
            state = match step {
                Ok(next) => next,
                Err(err) => {
                    // The channel may already be gone; a failed notification
                    // must not mask the original error.
                    if let Ok(frame) = wire::encode(&ServerMessage::error(err.to_string())) {
                        let _ = self.channel.send(frame).await;
                    }
                    let _ = self.channel.close(CloseCode::Internal).await;
                    return Err(err);
                }
            };
        }
    }

    /// `AwaitingAuth`: exactly one inbound message, bounded by the handshake
    /// window. The credential is consumed here and nowhere else.
    async fn await_credential(&mut self) -> Result<SessionState, GatewayError> {
        let frame = match timeout(self.auth_timeout, self.channel.receive()).await {
            Err(_) => {
                // Nothing to respond to; close without a message.
                warn!(peer = %self.peer, "authentication timed out");
                let _ = self.channel.close(CloseCode::Policy).await;
                return Ok(SessionState::Closed(SessionOutcome::AuthTimedOut));
            }
            Ok(Ok(None)) => {
                info!(peer = %self.peer, "client disconnected before authenticating");
                return Ok(SessionState::Closed(SessionOutcome::Disconnected));
            }
            Ok(Err(err)) => return Err(err),
            Ok(Ok(Some(frame))) => frame,
        };

        match wire::decode(&frame) {
            ClientMessage::Credential { token } if self.verifier.verify(&token) => {
                self.channel.send(wire::encode(&ServerMessage::authenticated())?).await?;
                debug!(peer = %self.peer, "session authenticated");
                Ok(SessionState::Idle)
            }
            ClientMessage::Credential { .. } | ClientMessage::Prompt { .. } => {
                warn!(peer = %self.peer, "authentication failed");
                let _ = self
                    .channel
                    .send(wire::encode(&ServerMessage::error(wire::ERROR_AUTH_FAILED))?)
                    .await;
                let _ = self.channel.close(CloseCode::Policy).await;
                Ok(SessionState::Closed(SessionOutcome::AuthFailed))
            }
            ClientMessage::Malformed => {
                warn!(peer = %self.peer, "malformed credential message");
                let _ = self.channel.close(CloseCode::Policy).await;
                Ok(SessionState::Closed(SessionOutcome::AuthFailed))
            }
        }
    }

    /// `Idle`: unbounded wait for the next request. An authenticated client
    /// may sit here arbitrarily long.
    async fn await_prompt(&mut self) -> Result<SessionState, GatewayError> {
        let frame = match self.channel.receive().await? {
            None => {
                info!(peer = %self.peer, "client disconnected");
                return Ok(SessionState::Closed(SessionOutcome::Disconnected));
            }
            Some(frame) => frame,
        };

        match wire::decode(&frame) {
            ClientMessage::Prompt { prompt } if !prompt.is_empty() => {
                Ok(SessionState::Streaming(prompt))
            }
            // Missing or empty prompt is recoverable: tell the client and
            // keep the connection exactly as it was.
            ClientMessage::Prompt { .. } | ClientMessage::Credential { .. } => {
                self.channel
                    .send(wire::encode(&ServerMessage::error(wire::ERROR_PROMPT_REQUIRED))?)
                    .await?;
                Ok(SessionState::Idle)
            }
            ClientMessage::Malformed => Err(GatewayError::MalformedMessage),
        }
    }

    /// `Streaming`: relays each fragment the moment the producer yields it,
    /// preserving order, then reports completion and returns to `Idle`.
    async fn stream_reply(&mut self, prompt: String) -> Result<SessionState, GatewayError> {
        debug!(peer = %self.peer, prompt_chars = prompt.chars().count(), "starting generation");
        let mut fragments = self.producer.generate(&prompt);
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            self.channel.send(wire::encode(&ServerMessage::token(fragment))?).await?;
        }
        self.channel.send(wire::encode(&ServerMessage::done())?).await?;
        debug!(peer = %self.peer, "generation complete");
        Ok(SessionState::Idle)
    }
}
