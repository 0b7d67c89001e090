use anyhow::Result;
use relay_server::http::{self, AppState};
use relay_server::ssh::SshDispatcher;
use relay_server::{McpServer, ServerInfo, ToolDispatcher, secrets};
use relay_transport::stdio;
use relay_transport::transport::SocketTransport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the protocol in stdio mode
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if std::env::args().any(|arg| arg == "--stdio") {
        return run_stdio().await;
    }
    run_http().await
}

/// Serve one MCP session over stdin/stdout, for local development.
async fn run_stdio() -> Result<()> {
    info!("Serving MCP over stdio");
    let (reader, writer) = stdio::stdio();
    let transport = Arc::new(SocketTransport::new(reader, writer));
    let server = McpServer::new(Arc::new(SshDispatcher::new()));
    server.serve(transport).await?;
    Ok(())
}

async fn run_http() -> Result<()> {
    let identity_file = stage_identity_file().await;

    let dispatcher_factory: Arc<dyn Fn() -> Arc<dyn ToolDispatcher> + Send + Sync> =
        Arc::new(move || {
            let mut dispatcher = SshDispatcher::new();
            if let Some(path) = &identity_file {
                dispatcher = dispatcher.with_identity_file(path.clone());
            }
            Arc::new(dispatcher)
        });

    let state = AppState {
        dispatcher_factory,
        info: ServerInfo::default(),
        started_at: Instant::now(),
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on port {port}");
    axum::serve(listener, http::router(state)).await?;
    Ok(())
}

/// Fetch the SSH key from Secret Manager and stage it on disk for `ssh -i`.
///
/// Failure is not fatal: the server still runs, SSH tools fall back to
/// ambient credentials.
async fn stage_identity_file() -> Option<PathBuf> {
    let project = match std::env::var("GOOGLE_CLOUD_PROJECT") {
        Ok(p) => p,
        Err(_) => {
            warn!("GOOGLE_CLOUD_PROJECT not set, skipping SSH key setup");
            return None;
        }
    };
    let key = match secrets::load_ssh_private_key(&project).await {
        Ok(k) => k,
        Err(e) => {
            warn!("Could not load SSH key: {e}");
            return None;
        }
    };

    let path = std::env::temp_dir().join("mcp-relay-ssh-key");
    if let Err(e) = tokio::fs::write(&path, &key).await {
        error!("Could not write SSH key file: {e}");
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await
        {
            error!("Could not restrict SSH key permissions: {e}");
            return None;
        }
    }
    info!("SSH identity staged at {}", path.display());
    Some(path)
}
