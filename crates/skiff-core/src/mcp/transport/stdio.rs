//! MCP stdio transport
//!
//! Spawns a local MCP server and speaks newline-delimited JSON over its
//! stdin/stdout. Stderr is drained into the log.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{InboundSink, InboundSlot, Transport, TransportEvent, TransportKind};
use crate::mcp::error::TransportError;

/// Grace period for a server to exit after its stdin closes
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Stdio transport for MCP servers
pub struct StdioTransport {
    label: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Arc<Mutex<Child>>,
    sink: InboundSink,
    inbound: InboundSlot,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

fn mask_secret(key: &str, value: &str) -> String {
    let upper = key.to_ascii_uppercase();
    if !(upper.contains("KEY") || upper.contains("TOKEN") || upper.contains("SECRET")) {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

impl StdioTransport {
    /// Spawn an MCP server process
    pub async fn spawn(
        label: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self, TransportError> {
        tracing::info!(server = label, "Spawning MCP server: {} {:?}", command, args);
        for (k, v) in env {
            tracing::debug!(server = label, "  env {}={}", k, mask_secret(k, v));
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(working_dir)
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::CommandNotFound(command.to_string())
            } else {
                TransportError::Spawn {
                    command: command.to_string(),
                    source: e,
                }
            }
        })?;

        let stdin = child.stdin.take().ok_or(TransportError::Closed)?;
        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        let stderr = child.stderr.take();

        let child = Arc::new(Mutex::new(child));
        let (sink, rx) = InboundSink::channel();

        let mut tasks = vec![tokio::spawn(read_stdout(
            label.to_string(),
            stdout,
            child.clone(),
            sink.clone(),
        ))];
        if let Some(stderr) = stderr {
            let label = label.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %label, "stderr: {}", line);
                }
            }));
        }

        Ok(Self {
            label: label.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child,
            sink,
            inbound: InboundSlot::new(rx),
            tasks: parking_lot::Mutex::new(tasks),
        })
    }
}

/// Forward stdout lines as frames until EOF, then report why the stream ended
async fn read_stdout(
    label: String,
    stdout: ChildStdout,
    child: Arc<Mutex<Child>>,
    sink: InboundSink,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                sink.close(format!("Failed to read from MCP server: {}", e));
                return;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            tracing::trace!(server = %label, "Received: {}", trimmed);
            sink.body(trimmed);
        } else {
            // Servers sometimes print banners or debug output on stdout
            tracing::debug!(server = %label, "Skipping non-JSON line: {}", trimmed);
        }
    }

    // EOF - give the process a moment to exit so the status is meaningful
    let status = {
        let mut child = child.lock().await;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => None,
        }
    };
    let reason = match status {
        Some(status) => format!("MCP server exited with {}", status),
        None => "MCP server closed stdout unexpectedly".to_string(),
    };
    tracing::info!(server = %label, "{}", reason);
    sink.close(reason);
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    /// Send a JSON-RPC message (newline-delimited JSON)
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(frame.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        tracing::trace!(server = %self.label, "Sent: {}", frame);
        Ok(())
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inbound.take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.close("Transport closed");

        // Dropping stdin signals EOF; well-behaved servers exit on it
        if self.stdin.lock().await.take().is_none() {
            return Ok(());
        }

        let mut child = self.child.lock().await;
        if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
            tracing::debug!(server = %self.label, "MCP server ignored EOF, killing");
            let _ = child.kill().await;
        }
        drop(child);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }
}
