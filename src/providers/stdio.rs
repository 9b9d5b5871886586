//! Child-process transport: newline-delimited JSON-RPC over stdin/stdout.

use super::client::RpcChannel;
use super::jsonrpc::{self, Incoming};
use super::transport::{TransportEvent, TransportEvents};
use super::ProviderError;
use crate::models::{ProviderConfig, TransportConfig};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ProviderError>>>>>;

/// JSON-RPC channel to a spawned MCP server
#[derive(Debug)]
pub struct StdioChannel {
    provider: String,
    stdin: Arc<Mutex<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: Pending,
    next_id: AtomicU64,
    closing: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioChannel {
    /// Spawn the configured command and start reading its stdout.
    pub fn spawn(config: &ProviderConfig, events: TransportEvents) -> Result<Self, ProviderError> {
        let TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } = &config.transport
        else {
            return Err(ProviderError::Connection {
                provider: config.name.clone(),
                message: "not a stdio transport".to_string(),
            });
        };

        let connection_error = |message: String| ProviderError::Connection {
            provider: config.name.clone(),
            message,
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .envs(&config.credentials)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| connection_error(format!("failed to spawn `{}`: {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connection_error("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connection_error("child stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        tracing::debug!(
            provider = %config.name,
            command = %command,
            pid = ?child.id(),
            "Spawned provider process"
        );

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let mut tasks = vec![tokio::spawn(read_loop(
            config.name.clone(),
            stdout,
            Arc::clone(&stdin),
            Arc::clone(&pending),
            Arc::clone(&closing),
            events,
        ))];

        if let Some(stderr) = stderr {
            let provider = config.name.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!(provider = %provider, "stderr: {}", line);
                }
            }));
        }

        Ok(Self {
            provider: config.name.clone(),
            stdin,
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            closing,
            tasks,
        })
    }

    async fn send(&self, frame: &Value) -> Result<(), ProviderError> {
        write_frame(&self.stdin, frame).await
    }
}

async fn write_frame(stdin: &Mutex<ChildStdin>, frame: &Value) -> Result<(), ProviderError> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');

    let mut stdin = stdin.lock().await;
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

async fn fail_pending(pending: &Pending, reason: &str) {
    for (_, waiter) in pending.lock().await.drain() {
        let _ = waiter.send(Err(ProviderError::Transport(reason.to_string())));
    }
}

async fn read_loop(
    provider: String,
    stdout: tokio::process::ChildStdout,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Pending,
    closing: Arc<AtomicBool>,
    events: TransportEvents,
) {
    let mut lines = BufReader::new(stdout).lines();

    let event = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let frame: Value = match serde_json::from_str(line) {
                    Ok(frame) => frame,
                    Err(_) => {
                        // servers sometimes log to stdout
                        tracing::trace!(provider = %provider, "non-JSON output: {}", line);
                        continue;
                    }
                };
                dispatch(&provider, frame, &stdin, &pending).await;
            }
            Ok(None) => break TransportEvent::Closed,
            Err(e) => break TransportEvent::Error(e.to_string()),
        }
    };

    fail_pending(&pending, "provider process exited").await;

    if !closing.load(Ordering::SeqCst) {
        tracing::debug!(provider = %provider, %event, "Provider stdout ended");
        let _ = events.send(event);
    }
}

async fn dispatch(provider: &str, frame: Value, stdin: &Mutex<ChildStdin>, pending: &Pending) {
    match jsonrpc::classify(frame) {
        Ok(Incoming::Response { id, outcome }) => match pending.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(outcome);
            }
            None => tracing::debug!(provider, id, "Response for unknown request"),
        },
        Ok(Incoming::Request { id, method }) => {
            let reply = if method == "ping" {
                jsonrpc::response(id, json!({}))
            } else {
                jsonrpc::error_response(id, -32601, "Method not found")
            };
            if let Err(e) = write_frame(stdin, &reply).await {
                tracing::debug!(provider, error = %e, "Failed to answer server request");
            }
        }
        Ok(Incoming::Notification { method }) => {
            tracing::trace!(provider, method = %method, "Server notification");
        }
        Err(e) => tracing::debug!(provider, error = %e, "Ignoring malformed frame"),
    }
}

#[async_trait]
impl RpcChannel for StdioChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("channel closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send(&jsonrpc::request(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| ProviderError::Transport("response channel dropped".to_string()))?
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ProviderError> {
        self.send(&jsonrpc::notification(method, params)).await
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        self.closing.store(true, Ordering::SeqCst);

        let _ = self.stdin.lock().await.shutdown().await;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(provider = %self.provider, error = %e, "Failed to kill provider process");
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        fail_pending(&self.pending, "channel closed").await;
        Ok(())
    }
}

impl Drop for StdioChannel {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn shell(name: &str, script: &str) -> ProviderConfig {
        ProviderConfig::stdio(name, "sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_request_roundtrip_through_child() {
        // reads one request and answers it with id 1
        let config = shell(
            "echo",
            r#"read line; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'; sleep 5"#,
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = StdioChannel::spawn(&config, tx).unwrap();

        let result = channel.request("tools/list", json!({})).await.unwrap();
        assert_eq!(result["ok"], true);

        channel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_child_exit_reports_closed() {
        let config = shell("exits", "exit 0");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = StdioChannel::spawn(&config, tx).unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_does_not_report_closed() {
        let config = shell("sleeper", "sleep 5");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = StdioChannel::spawn(&config, tx).unwrap();

        channel.shutdown().await.unwrap();
        drop(channel);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_connection_error() {
        let config =
            ProviderConfig::stdio("ghost", "/nonexistent/mcp-server", Vec::<String>::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            StdioChannel::spawn(&config, tx),
            Err(ProviderError::Connection { .. })
        ));
    }
}
