//! Secret Manager access via the `gcloud` CLI

use relay_core::{RelayError, Result};
use tokio::process::Command;

const SSH_KEY_SECRET: &str = "mcp-relay-ssh-private-key";

/// Fetch the SSH private key for remote tool execution.
pub async fn load_ssh_private_key(project: &str) -> Result<String> {
    let output = Command::new("gcloud")
        .args([
            "secrets",
            "versions",
            "access",
            "latest",
            "--secret",
            SSH_KEY_SECRET,
            "--project",
            project,
        ])
        .output()
        .await
        .map_err(|e| RelayError::Tool(format!("Failed to run gcloud: {e}")))?;
    if !output.status.success() {
        return Err(RelayError::Tool(format!(
            "Secret access failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let key = String::from_utf8_lossy(&output.stdout).to_string();
    if key.trim().is_empty() {
        return Err(RelayError::Tool(format!("Secret {SSH_KEY_SECRET} is empty")));
    }
    Ok(key)
}
