//! promptnet — a persistent, bidirectional token-streaming gateway.
//!
//! A client opens a long-lived WebSocket, authenticates with a shared secret
//! within a bounded window, and then repeatedly submits text prompts. Each
//! response is delivered incrementally, one `{"token": ...}` message per
//! generated fragment, followed by `{"status": "done"}`.
//!
//! The crate is organized around one component per module:
//!
//! - [`wire`] — JSON codec for the four wire message shapes
//! - [`auth`] — shared-secret credential check
//! - [`producer`] — generation-engine abstraction and the fallback echo producer
//! - [`session`] — per-connection lifecycle state machine
//! - [`server`] — accept loop and per-connection task supervision
//! - [`client`] — connecting client for the same protocol
//!
//! ```no_run
//! use promptnet::{GatewayClient, GatewayConfig, GatewayServer};
//!
//! # async fn demo() -> Result<(), promptnet::GatewayError> {
//! let config = GatewayConfig::new("127.0.0.1:0").with_secret("sk-example");
//! let mut server = GatewayServer::new(config);
//! let listener = server.bind().await?;
//! let addr = server.local_addr().unwrap();
//! tokio::spawn(async move { server.serve(listener).await });
//!
//! let mut client = GatewayClient::connect(&format!("ws://{addr}/llm/ws")).await?;
//! client.authenticate("sk-example").await?;
//! let fragments = client.request("hello").await?;
//! println!("{}", fragments.concat());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub mod auth;
pub mod client;
pub mod producer;
pub mod server;
pub mod session;
pub mod wire;

pub use auth::TokenVerifier;
pub use client::GatewayClient;
pub use producer::{EchoProducer, FragmentProducer, FragmentStream};
pub use server::{GatewayServer, WsChannel};
pub use session::{CloseCode, MessageChannel, Session, SessionOutcome};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("transport error: {0}")]
    TransportError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("malformed message")]
    MalformedMessage,

    #[error("engine error: {0}")]
    Engine(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub mod env {
    //! Environment variable names and lookup helpers for process
    //! configuration.

    /// Shared secret clients must present during the handshake.
    pub const SECRET_ENV: &str = "MY_SECRET_KEY";

    /// Credential for the real generation engine, when one is wired in.
    pub const ENGINE_KEY_ENV: &str = "OPENAI_API_KEY";

    /// Listener address, `host:port`.
    pub const BIND_ENV: &str = "PROMPTNET_BIND_ADDR";

    pub(crate) fn var_or(key: &str, default: &str) -> String {
        or_default(std::env::var(key).ok(), default)
    }

    fn or_default(value: Option<String>, default: &str) -> String {
        match value {
            Some(value) if !value.trim().is_empty() => value,
            _ => default.to_string(),
        }
    }

}

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8765";
pub const DEFAULT_ENDPOINT_PATH: &str = "/llm/ws";
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Placeholder secret used when [`env::SECRET_ENV`] is unset. It is not a
/// real credential: a deployment that never overrides it can never be
/// authenticated against, by design.
pub const PLACEHOLDER_SECRET: &str = "sk-your-secret-api-key";

/// Placeholder engine credential; same unsafe-default contract as
/// [`PLACEHOLDER_SECRET`]. It will never reach a real engine.
pub const PLACEHOLDER_ENGINE_KEY: &str = "sk-your-openai-api-key";

#[derive(Clone)]
pub struct GatewayConfig {
    pub bind_address: String,

    pub endpoint_path: String,

    pub secret: String,

    pub engine_api_key: String,

    pub auth_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            secret: PLACEHOLDER_SECRET.to_string(),
            engine_api_key: PLACEHOLDER_ENGINE_KEY.to_string(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Reads configuration from the process environment, falling back to
    /// the placeholder defaults for anything unset.
    pub fn from_env() -> Self {
        Self::new(env::var_or(env::BIND_ENV, DEFAULT_BIND_ADDR))
            .with_secret(env::var_or(env::SECRET_ENV, PLACEHOLDER_SECRET))
            .with_engine_api_key(env::var_or(env::ENGINE_KEY_ENV, PLACEHOLDER_ENGINE_KEY))
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_engine_api_key(mut self, key: impl Into<String>) -> Self {
        self.engine_api_key = key.into();
        self
    }

    pub fn with_endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = path.into();
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn has_placeholder_secret(&self) -> bool {
        self.secret == PLACEHOLDER_SECRET
    }

    pub fn has_placeholder_engine_key(&self) -> bool {
        self.engine_api_key == PLACEHOLDER_ENGINE_KEY
    }
}

// Credentials stay out of logs even if someone debug-prints the config.
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bind_address", &self.bind_address)
            .field("endpoint_path", &self.endpoint_path)
            .field("secret", &"<redacted>")
            .field("engine_api_key", &"<redacted>")
            .field("auth_timeout", &self.auth_timeout)
            .finish()
    }
}
