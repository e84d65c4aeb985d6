//! Gateway entry point: logging, environment configuration, serve loop.

use std::process::ExitCode;

use promptnet::{GatewayConfig, GatewayServer};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env();
    if config.has_placeholder_secret() {
        warn!(
            "{} is not set; the placeholder secret will never authenticate a real client",
            promptnet::env::SECRET_ENV
        );
    }
    if config.has_placeholder_engine_key() {
        warn!(
            "{} is not set; responses come from the fallback echo producer",
            promptnet::env::ENGINE_KEY_ENV
        );
    }

    let mut server = GatewayServer::new(config);
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("Failed to bind: {err}");
            return ExitCode::FAILURE;
        }
    };

    match server.serve(listener).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Server error: {err}");
            ExitCode::FAILURE
        }
    }
}
