//! Bearer token acquisition
//!
//! Tokens are opaque strings; no verification happens on this side.

use async_trait::async_trait;
use relay_core::{RelayError, Result};
use tokio::process::Command;

/// Source of the bearer token attached to the WebSocket handshake
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> Result<String>;
}

/// Obtains an identity token from the `gcloud` CLI
pub struct GcloudTokenProvider;

#[async_trait]
impl TokenProvider for GcloudTokenProvider {
    async fn get_token(&self) -> Result<String> {
        let output = Command::new("gcloud")
            .args(["auth", "print-identity-token"])
            .output()
            .await
            .map_err(|e| RelayError::Auth(format!("Failed to run gcloud: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::Auth(format!(
                "gcloud exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(RelayError::Auth("gcloud returned an empty token".into()));
        }
        Ok(token)
    }
}
