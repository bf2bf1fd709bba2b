//! Subprocess channel: newline-delimited JSON over stdin/stdout.
//!
//! OCI packages run under `docker run -i --rm`; binary packages run the
//! identifier directly. Non-JSON stdout lines (server debug output) are
//! skipped. Close drops stdin to signal EOF, waits a short grace for the
//! process to exit, then kills it.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{McpChannel, SendOutcome};
use crate::error::{McpError, Result};
use crate::metadata::PackageInfo;
use crate::types::{IncomingMessage, JsonRpcRequest};

/// How long close waits for the child to exit before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

struct Process {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Channel to a local subprocess tool server.
pub struct StdioChannel {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    process: Mutex<Option<Process>>,
}

impl StdioChannel {
    /// Build a channel from a package descriptor.
    ///
    /// OCI packages become a `docker run -i --rm` invocation with the
    /// environment passed via `-e`; anything else runs the identifier as
    /// a native command.
    pub fn from_package(package: &PackageInfo, env: HashMap<String, String>) -> Self {
        if package.kind == "oci" {
            let mut args = vec![
                "run".to_string(),
                "-i".to_string(),
                "--rm".to_string(),
                "--name".to_string(),
                format!("mcp-{}", package.identifier.replace('/', "-")),
            ];
            for (key, value) in &env {
                args.push("-e".to_string());
                args.push(format!("{key}={value}"));
            }
            let image = if package.registry_base_url.is_empty() {
                format!("{}:{}", package.identifier, package.version)
            } else {
                format!(
                    "{}/{}:{}",
                    package.registry_base_url, package.identifier, package.version
                )
            };
            args.push(image);
            Self {
                command: "docker".to_string(),
                args,
                env: HashMap::new(),
                process: Mutex::new(None),
            }
        } else {
            Self {
                command: package.identifier.clone(),
                args: Vec::new(),
                env,
                process: Mutex::new(None),
            }
        }
    }

    /// Build a channel from an explicit command line (tests, custom
    /// launchers).
    pub fn from_command(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            process: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl McpChannel for StdioChannel {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.process.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!(command = %self.command, "starting tool server subprocess");

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            McpError::Connection(format!("failed to spawn {}: {e}", self.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection("failed to capture stdout".into()))?;

        *guard = Some(Process {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });
        Ok(())
    }

    async fn send(&self, request: JsonRpcRequest) -> Result<SendOutcome> {
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        let id = request.id.clone();

        let mut guard = self.process.lock().await;
        let process = guard
            .as_mut()
            .ok_or_else(|| McpError::Connection("channel not connected".into()))?;

        process
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("failed to write to stdin: {e}")))?;
        process
            .stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("failed to flush stdin: {e}")))?;

        debug!(method = %request.method, id = %id, "sent stdio request");
        Ok(SendOutcome::Correlated(id))
    }

    async fn next_message(&self) -> Option<IncomingMessage> {
        loop {
            let mut guard = self.process.lock().await;
            let process = guard.as_mut()?;

            let mut line = String::new();
            match process.stdout.read_line(&mut line).await {
                Ok(0) => {
                    debug!("tool server closed stdout");
                    return None;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || !trimmed.starts_with('{') {
                        // Server debug output; not a frame.
                        continue;
                    }
                    match IncomingMessage::parse(trimmed) {
                        Ok(message) => return Some(message),
                        Err(e) => {
                            warn!(error = %e, "skipping malformed frame");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stdio read error");
                    return None;
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let Some(mut process) = self.process.lock().await.take() else {
            return Ok(());
        };

        // Dropping stdin sends EOF; give the server a moment to exit on
        // its own before killing it.
        drop(process.stdin);
        match tokio::time::timeout(CLOSE_GRACE, process.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(status = %status, "tool server exited");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "error waiting for tool server exit");
            }
            Err(_elapsed) => {
                warn!("tool server did not exit in time, killing");
                let _ = process.child.kill().await;
            }
        }
        info!(command = %self.command, "stdio channel closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oci_package() -> PackageInfo {
        PackageInfo {
            kind: "oci".into(),
            identifier: "acme/tools".into(),
            version: "1.2.0".into(),
            registry_base_url: "ghcr.io".into(),
        }
    }

    #[test]
    fn oci_package_builds_docker_invocation() {
        let mut env = HashMap::new();
        env.insert("API_KEY".to_string(), "secret".to_string());
        let channel = StdioChannel::from_package(&oci_package(), env);

        assert_eq!(channel.command, "docker");
        assert!(channel.args.contains(&"run".to_string()));
        assert!(channel.args.contains(&"-i".to_string()));
        assert!(channel.args.contains(&"--rm".to_string()));
        assert!(channel.args.contains(&"mcp-acme-tools".to_string()));
        assert!(channel.args.contains(&"API_KEY=secret".to_string()));
        assert!(
            channel
                .args
                .contains(&"ghcr.io/acme/tools:1.2.0".to_string())
        );
    }

    #[test]
    fn binary_package_runs_identifier() {
        let package = PackageInfo {
            kind: "binary".into(),
            identifier: "/usr/local/bin/tool-server".into(),
            version: "1".into(),
            registry_base_url: String::new(),
        };
        let channel = StdioChannel::from_package(&package, HashMap::new());
        assert_eq!(channel.command, "/usr/local/bin/tool-server");
        assert!(channel.args.is_empty());
    }

    #[tokio::test]
    async fn send_before_connect_errors() {
        let channel = StdioChannel::from_command("true", vec![], HashMap::new());
        let err = channel
            .send(JsonRpcRequest::new("ping", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
    }

    #[tokio::test]
    async fn close_without_connect_is_noop() {
        let channel = StdioChannel::from_command("true", vec![], HashMap::new());
        channel.close().await.unwrap();
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn roundtrip_against_cat() {
        // `cat` echoes every request line back, which parses as a
        // response frame carrying the same id.
        let channel = StdioChannel::from_command("cat", vec![], HashMap::new());
        channel.connect().await.unwrap();

        let request = JsonRpcRequest::new("tools/list", serde_json::json!({}));
        let outcome = channel.send(request).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Correlated(_)));

        // `cat` echoes the request, which contains a method field, so it
        // comes back as a notification frame; what matters here is that
        // the listen stream yields the line we wrote.
        match channel.next_message().await {
            Some(IncomingMessage::Notification(n)) => {
                assert_eq!(n.method, "tools/list");
            }
            other => panic!("expected echoed frame, got {other:?}"),
        }

        channel.close().await.unwrap();
    }
}
