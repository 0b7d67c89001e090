//! Bridge a local MCP client on stdio to a remote relay over WebSocket
//!
//! Reads `RELAY_URL` and `RELAY_TOKEN` from the environment; when no token
//! is configured, one is obtained from the `gcloud` CLI. Exits 0 on local
//! EOF, 1 on fatal startup failure or exhausted reconnect attempts.

use anyhow::Result;
use relay_client::{BridgeClient, BridgeConfig, GcloudTokenProvider, WsConnector};
use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics on stderr; stdout carries the forwarded message stream
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = BridgeConfig::from_env();
    let mut client = BridgeClient::new(config, WsConnector, GcloudTokenProvider);
    if let Err(e) = client.run(tokio::io::stdin(), tokio::io::stdout()).await {
        error!("Bridge failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}
