//! SSH tool family
//!
//! Pass-through handlers around external programs: `gcloud` for VM
//! metadata, `ssh` for remote execution and tunnels, `mysql`/`psql` for
//! database queries through the session. One active session per dispatcher.

use crate::tools::{ToolDef, ToolDispatcher};
use async_trait::async_trait;
use relay_core::{RelayError, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One active SSH session target
#[derive(Debug, Clone)]
struct SshSession {
    host: String,
    user: String,
}

/// Dispatcher for the SSH tool family
pub struct SshDispatcher {
    session: Mutex<Option<SshSession>>,
    /// Options applied to every `ssh` invocation
    ssh_options: Vec<String>,
}

impl SshDispatcher {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            ssh_options: vec![
                "-o".into(),
                "BatchMode=yes".into(),
                "-o".into(),
                "StrictHostKeyChecking=accept-new".into(),
            ],
        }
    }

    /// Use a staged private key for every `ssh` invocation.
    pub fn with_identity_file(mut self, path: PathBuf) -> Self {
        self.ssh_options.push("-i".into());
        self.ssh_options.push(path.to_string_lossy().into_owned());
        self
    }

    async fn connect_vm(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            project_id: String,
            zone: String,
            instance_name: String,
        }
        let params: Params = parse_args(args)?;

        // Resolve the instance's external IP
        let output = Command::new("gcloud")
            .args([
                "compute",
                "instances",
                "describe",
                &params.instance_name,
                "--project",
                &params.project_id,
                "--zone",
                &params.zone,
                "--format",
                "get(networkInterfaces[0].accessConfigs[0].natIP)",
            ])
            .output()
            .await
            .map_err(|e| RelayError::Tool(format!("Failed to run gcloud: {e}")))?;
        if !output.status.success() {
            return Err(RelayError::Tool(format!(
                "gcloud describe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let host = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if host.is_empty() {
            return Err(RelayError::Tool("No external IP found for instance".into()));
        }

        let user = std::env::var("SSH_USER").unwrap_or_else(|_| "default".to_string());
        info!("SSH session target is {user}@{host}");
        *self.session.lock().await = Some(SshSession { host, user });
        Ok(json!({
            "success": true,
            "message": format!("Connected to VM {}", params.instance_name)
        }))
    }

    /// Run one command on the connected VM and return its stdout.
    async fn run_remote(&self, command: &str) -> Result<String> {
        let session = self
            .session
            .lock()
            .await
            .clone()
            .ok_or_else(|| {
                RelayError::Tool("No active SSH session, call ssh-connect-vm first".into())
            })?;
        let target = format!("{}@{}", session.user, session.host);
        let output = Command::new("ssh")
            .args(&self.ssh_options)
            .arg(&target)
            .arg(command)
            .output()
            .await
            .map_err(|e| RelayError::Tool(format!("Failed to run ssh: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Remote command stderr: {}", stderr.trim());
            return Err(RelayError::Tool(format!(
                "Remote command exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn execute_command(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            command: String,
        }
        let params: Params = parse_args(args)?;
        let stdout = self.run_remote(&params.command).await?;
        Ok(json!({ "success": true, "output": stdout }))
    }

    async fn query_database(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            db_type: String,
            host: String,
            port: u16,
            database: String,
            username: String,
            password: String,
            query: String,
        }
        let params: Params = parse_args(args)?;

        let command = match params.db_type.as_str() {
            "mysql" => format!(
                "mysql -h {} -P {} -u {} -p{} {} -e \"{}\"",
                params.host,
                params.port,
                params.username,
                params.password,
                params.database,
                params.query
            ),
            "postgresql" => format!(
                "PGPASSWORD='{}' psql -h {} -p {} -U {} -d {} -c \"{}\"",
                params.password,
                params.host,
                params.port,
                params.username,
                params.database,
                params.query
            ),
            other => {
                return Err(RelayError::Tool(format!(
                    "Unsupported database type: {other}"
                )));
            }
        };

        let stdout = self.run_remote(&command).await?;
        Ok(json!({ "success": true, "result": stdout }))
    }

    async fn create_tunnel(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            local_port: u16,
            remote_host: String,
            remote_port: u16,
        }
        let params: Params = parse_args(args)?;

        let session = self
            .session
            .lock()
            .await
            .clone()
            .ok_or_else(|| {
                RelayError::Tool("No active SSH session, call ssh-connect-vm first".into())
            })?;
        let target = format!("{}@{}", session.user, session.host);
        let forward = format!(
            "{}:{}:{}",
            params.local_port, params.remote_host, params.remote_port
        );

        // -f backgrounds ssh after the forward is established
        let output = Command::new("ssh")
            .args(&self.ssh_options)
            .args(["-f", "-N", "-L", &forward])
            .arg(&target)
            .output()
            .await
            .map_err(|e| RelayError::Tool(format!("Failed to run ssh: {e}")))?;
        if !output.status.success() {
            return Err(RelayError::Tool(format!(
                "Tunnel setup failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(json!({
            "success": true,
            "message": format!(
                "SSH tunnel created: localhost:{} -> {}:{}",
                params.local_port, params.remote_host, params.remote_port
            )
        }))
    }

    async fn disconnect(&self) -> Result<Value> {
        let _ = self.session.lock().await.take();
        Ok(json!({ "success": true, "message": "SSH session disconnected" }))
    }
}

impl Default for SshDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatcher for SshDispatcher {
    fn tools(&self) -> Vec<ToolDef> {
        ssh_tools()
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value> {
        match name {
            "ssh-connect-vm" => self.connect_vm(arguments).await,
            "ssh-execute-command" => self.execute_command(arguments).await,
            "ssh-query-database" => self.query_database(arguments).await,
            "ssh-create-tunnel" => self.create_tunnel(arguments).await,
            "ssh-disconnect" => self.disconnect().await,
            other => Err(RelayError::Tool(format!("Unknown tool: {other}"))),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| RelayError::Tool(format!("Invalid tool arguments: {e}")))
}

/// Metadata for the SSH tool family
pub fn ssh_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "ssh-connect-vm".into(),
            description: "Connect to a Google Compute Engine VM via SSH".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "projectId": { "type": "string", "description": "GCP project ID" },
                    "zone": { "type": "string", "description": "GCP zone where the VM is located" },
                    "instanceName": { "type": "string", "description": "Name of the VM instance" }
                },
                "required": ["projectId", "zone", "instanceName"]
            }),
        },
        ToolDef {
            name: "ssh-execute-command".into(),
            description: "Execute a command on a connected VM via SSH".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command to execute on the VM" }
                },
                "required": ["command"]
            }),
        },
        ToolDef {
            name: "ssh-query-database".into(),
            description: "Query a database through an SSH tunnel".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dbType": { "type": "string", "enum": ["mysql", "postgresql"], "description": "Type of database" },
                    "host": { "type": "string", "description": "Database host (localhost for SSH tunnel)" },
                    "port": { "type": "number", "description": "Database port" },
                    "database": { "type": "string", "description": "Database name" },
                    "username": { "type": "string", "description": "Database username" },
                    "password": { "type": "string", "description": "Database password" },
                    "query": { "type": "string", "description": "SQL query to execute" }
                },
                "required": ["dbType", "host", "port", "database", "username", "password", "query"]
            }),
        },
        ToolDef {
            name: "ssh-create-tunnel".into(),
            description: "Create an SSH tunnel to a remote service".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "localPort": { "type": "number", "description": "Local port to bind" },
                    "remoteHost": { "type": "string", "description": "Remote host to tunnel to" },
                    "remotePort": { "type": "number", "description": "Remote port to tunnel to" }
                },
                "required": ["localPort", "remoteHost", "remotePort"]
            }),
        },
        ToolDef {
            name: "ssh-disconnect".into(),
            description: "Disconnect the current SSH session".into(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}
