//! Serving tools over the MCP stdio transport.
//!
//! A [`ToolHandler`] supplies tool descriptors and executes calls; [`serve`]
//! runs the JSON-RPC loop over any line-oriented reader/writer pair, which
//! keeps it testable over in-memory pipes.

use std::fmt::Display;
use std::future::Future;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, ServerCapabilities,
    Tool, ToolsCapability, codes,
};

/// The tool side of an MCP server.
pub trait ToolHandler: Send + Sync {
    /// Error produced by a failed call. Reported to the client as a
    /// tool-level error, not a protocol error.
    type Error: Display + Send;

    /// Name and version announced during the handshake.
    fn server_info(&self) -> Implementation;

    /// Tools advertised via `tools/list`.
    fn tools(&self) -> Vec<Tool>;

    /// Execute a tool call.
    fn call(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> impl Future<Output = std::result::Result<CallToolResult, Self::Error>> + Send;
}

/// Serve `handler` on the process's stdin/stdout until stdin closes.
pub async fn serve_stdio<H: ToolHandler>(handler: &H) -> Result<()> {
    serve(handler, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve `handler` over a newline-delimited JSON-RPC stream.
///
/// Returns when the reader reaches EOF.
pub async fn serve<H, R, W>(handler: &H, reader: R, mut writer: W) -> Result<()>
where
    H: ToolHandler,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(response) = handle_line(handler, &line).await else {
            continue;
        };
        let json = serde_json::to_string(&response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    info!("client closed the stream");
    Ok(())
}

async fn handle_line<H: ToolHandler>(handler: &H, line: &str) -> Option<JsonRpcResponse> {
    let message: JsonRpcMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("unparsable message: {e}");
            return Some(JsonRpcResponse::failure(
                None,
                JsonRpcError::new(codes::PARSE_ERROR, e.to_string()),
            ));
        }
    };

    let Some(method) = message.method else {
        // We never send requests, so responses are unexpected.
        warn!(id = ?message.id, "ignoring unsolicited response");
        return None;
    };

    let Some(id) = message.id else {
        debug!(%method, "notification");
        return None;
    };

    let response = match dispatch(handler, &method, message.params).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(Some(id), error),
    };
    Some(response)
}

async fn dispatch<H: ToolHandler>(
    handler: &H,
    method: &str,
    params: Option<Value>,
) -> std::result::Result<Value, JsonRpcError> {
    match method {
        "initialize" => {
            let info = handler.server_info();
            info!(server = %info.name, "client connected");
            to_result(InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability::default()),
                },
                server_info: info,
            })
        }
        "ping" => Ok(Value::Object(Default::default())),
        "tools/list" => to_result(ListToolsResult {
            tools: handler.tools(),
        }),
        "tools/call" => {
            let params: CallToolParams = params
                .ok_or_else(|| JsonRpcError::new(codes::INVALID_PARAMS, "missing params"))
                .and_then(|p| {
                    serde_json::from_value(p)
                        .map_err(|e| JsonRpcError::new(codes::INVALID_PARAMS, e.to_string()))
                })?;

            debug!(tool = %params.name, "tools/call");
            let result = match handler.call(&params.name, params.arguments).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %params.name, "tool failed: {e}");
                    CallToolResult::error(e.to_string())
                }
            };
            to_result(result)
        }
        other => Err(JsonRpcError::new(
            codes::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        )),
    }
}

fn to_result(value: impl serde::Serialize) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(codes::INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, duplex};

    struct Echo;

    impl ToolHandler for Echo {
        type Error = String;

        fn server_info(&self) -> Implementation {
            Implementation {
                name: "echo".into(),
                version: None,
            }
        }

        fn tools(&self) -> Vec<Tool> {
            vec![Tool {
                name: "echo".into(),
                description: Some("Echo the input".into()),
                input_schema: json!({"type": "object"}),
            }]
        }

        async fn call(
            &self,
            name: &str,
            arguments: Option<Value>,
        ) -> std::result::Result<CallToolResult, String> {
            match name {
                "echo" => Ok(CallToolResult::text(arguments.unwrap_or(Value::Null).to_string())),
                other => Err(format!("unknown tool {other}")),
            }
        }
    }

    async fn roundtrip(input: &str) -> Vec<Value> {
        let (mut client, server) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server);
        client.write_all(input.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        serve(&Echo, BufReader::new(read_half), write_half).await.unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn handshake_and_list() {
        let replies = roundtrip(concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        ))
        .await;

        assert_eq!(replies.len(), 2, "notifications get no reply");
        assert_eq!(replies[0]["result"]["serverInfo"]["name"], "echo");
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"]["tools"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn handler_failure_is_tool_level() {
        let replies = roundtrip(concat!(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"nope"}}"#,
            "\n",
        ))
        .await;

        assert_eq!(replies[0]["id"], "a");
        assert_eq!(replies[0]["result"]["isError"], true);
        assert_eq!(replies[0]["result"]["content"][0]["text"], "unknown tool nope");
    }

    #[tokio::test]
    async fn protocol_errors() {
        let replies = roundtrip(concat!(
            "not json\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call"}"#,
            "\n",
        ))
        .await;

        assert_eq!(replies[0]["error"]["code"], codes::PARSE_ERROR);
        assert!(replies[0]["id"].is_null());
        assert_eq!(replies[1]["error"]["code"], codes::METHOD_NOT_FOUND);
        assert_eq!(replies[2]["error"]["code"], codes::INVALID_PARAMS);
    }
}
