//! MCP server management (spawn, communicate, lifecycle).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcRequest, ListToolsResult, RequestId, Tool,
};

/// Default timeout for MCP operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum output size (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Configuration for an MCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Both pipes of the child, locked together so a request and its response
/// are never interleaved with another exchange.
struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// A write was abandoned part way (timeout), so stdin holds a partial
    /// line and the stream can no longer be framed.
    torn: bool,
}

impl Pipes {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        if self.torn {
            return Err(Error::TornWrite);
        }
        self.torn = true;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        self.torn = false;
        Ok(())
    }
}

/// Handle to a running MCP server.
pub struct Server {
    config: ServerConfig,
    process: Mutex<Child>,
    pipes: Mutex<Pipes>,
    next_id: AtomicI64,
    timeout: Duration,
    initialized: AtomicBool,
    server_info: Mutex<Option<InitializeResult>>,
    tools: Mutex<Vec<Tool>>,
}

impl Server {
    /// Spawn a new MCP server process.
    pub async fn spawn(config: ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdout")))?;

        debug!(server = %config.name, command = %config.command, "spawned MCP server");

        Ok(Self {
            config,
            process: Mutex::new(process),
            pipes: Mutex::new(Pipes {
                stdin,
                stdout: BufReader::new(stdout),
                torn: false,
            }),
            next_id: AtomicI64::new(1),
            timeout: DEFAULT_TIMEOUT,
            initialized: AtomicBool::new(false),
            server_info: Mutex::new(None),
            tools: Mutex::new(Vec::new()),
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Initialize the server (must be called before other operations).
    pub async fn initialize(&self) -> Result<&Self> {
        let params = InitializeParams::default();
        let result: InitializeResult = self.request("initialize", Some(params)).await?;
        debug!(
            server = %self.config.name,
            peer = %result.server_info.name,
            protocol = %result.protocol_version,
            "MCP handshake complete"
        );

        self.notify("notifications/initialized", None::<()>).await?;

        *self.server_info.lock().await = Some(result);
        self.initialized.store(true, Ordering::SeqCst);

        self.refresh_tools().await?;

        Ok(self)
    }

    /// Check if the server is initialized.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Get server info (after initialization).
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    /// Refresh the list of available tools.
    pub async fn refresh_tools(&self) -> Result<()> {
        let result: ListToolsResult = self.request("tools/list", None::<()>).await?;
        debug!(server = %self.config.name, count = result.tools.len(), "discovered tools");
        *self.tools.lock().await = result.tools;
        Ok(())
    }

    /// Get the list of available tools.
    pub async fn tools(&self) -> Vec<Tool> {
        self.tools.lock().await.clone()
    }

    /// Call a tool by name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.joined_text()));
        }

        Ok(result)
    }

    /// Check if the server process is still running.
    pub async fn is_running(&self) -> bool {
        let mut process = self.process.lock().await;
        matches!(process.try_wait(), Ok(None))
    }

    /// Shut down the server.
    pub async fn shutdown(self) -> Result<()> {
        // Closing stdin is the stdio transport's shutdown signal.
        drop(self.pipes);

        let mut process = self.process.lock().await;
        if timeout(Duration::from_secs(2), process.wait()).await.is_err() {
            let _ = process.kill().await;
        }

        Ok(())
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id, method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let response = timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| Error::Timeout {
                method: method.to_string(),
            })??;

        let result_value = response.into_result()?;
        let result: R = serde_json::from_value(result_value)?;

        Ok(result)
    }

    /// Write one request and read until its response arrives.
    async fn exchange(&self, request: &JsonRpcRequest) -> Result<JsonRpcMessage> {
        let request_json = serde_json::to_string(request)?;
        let mut pipes = self.pipes.lock().await;

        trace!(server = %self.config.name, method = %request.method, "-> {request_json}");
        pipes.send_line(&request_json).await?;

        loop {
            let message = read_message(&mut pipes.stdout).await?;
            if message.is_call() {
                // Server-initiated notifications and requests are not used here.
                trace!(server = %self.config.name, method = ?message.method, "skipping server message");
                continue;
            }
            match &message.id {
                Some(id) if *id == request.id => return Ok(message),
                // A late reply to a request that already timed out.
                other => {
                    warn!(server = %self.config.name, id = ?other, "discarding stale response");
                }
            }
        }
    }

    async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<()>
    where
        P: serde::Serialize,
    {
        // Notifications have no ID
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(p) = params {
            notification["params"] = serde_json::to_value(p)?;
        }

        let notification_json = serde_json::to_string(&notification)?;
        self.pipes.lock().await.send_line(&notification_json).await
    }
}

/// Read the next non-blank line as a JSON-RPC message. At most
/// [`MAX_OUTPUT_SIZE`] bytes are buffered per line.
async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<JsonRpcMessage> {
    let limit = MAX_OUTPUT_SIZE as u64 + 1;
    loop {
        let mut line = Vec::new();
        let bytes_read = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;
        if bytes_read == 0 {
            return Err(Error::ServerExited);
        }

        if line.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: line.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }

        if line.trim_ascii().is_empty() {
            continue;
        }

        return serde_json::from_slice(&line).map_err(|e| {
            Error::InvalidResponse(format!("{e}: {}", String::from_utf8_lossy(line.trim_ascii_end())))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_config() -> ServerConfig {
        ServerConfig {
            name: "test".to_string(),
            command: "cat".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn call_before_initialize_is_rejected() {
        let server = Server::spawn(cat_config()).await.unwrap();
        let err = server.call_tool("anything", None).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn oversized_line_is_rejected_without_reading_it_all() {
        let mut wire = vec![b'x'; MAX_OUTPUT_SIZE * 2];
        wire.push(b'\n');
        let mut reader = wire.as_slice();
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::OutputTooLarge { size, .. } if size == MAX_OUTPUT_SIZE + 1));
        assert_eq!(reader.len(), MAX_OUTPUT_SIZE);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let mut reader: &[u8] = b"\n  \n{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\n";
        let message = read_message(&mut reader).await.unwrap();
        assert_eq!(message.id, Some(RequestId::Number(7)));
        assert!(matches!(read_message(&mut reader).await, Err(Error::ServerExited)));
    }

    #[tokio::test]
    async fn torn_write_blocks_later_requests() {
        let server = Server::spawn(cat_config()).await.unwrap();
        server.pipes.lock().await.torn = true;
        let err = server.initialize().await.err().unwrap();
        assert!(matches!(err, Error::TornWrite));
    }

    #[tokio::test]
    async fn spawn_missing_binary_fails() {
        let mut config = cat_config();
        config.command = "definitely-not-a-real-mcp-server".to_string();
        assert!(matches!(Server::spawn(config).await, Err(Error::Io(_))));
    }
}
