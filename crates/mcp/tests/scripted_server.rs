//! Client behaviour against a shell-scripted server that interleaves
//! notifications, server requests and stale responses with its replies.

use std::collections::HashMap;
use std::time::Duration;

use mcp::{Error, Server, ServerConfig};
use serde_json::json;

const INIT_REPLY: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"scripted","version":"0"}}}"#;
const LIST_REPLY: &str = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object"}}]}}"#;

fn scripted(script: String) -> ServerConfig {
    ServerConfig {
        name: "scripted".to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        env: HashMap::new(),
    }
}

/// Print each line verbatim.
fn emit(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|line| format!("printf '%s\\n' '{line}'\n"))
        .collect()
}

#[tokio::test]
async fn skips_interleaved_messages() {
    let script = [
        "read -r _\n".to_string(),
        emit(&[
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"starting"}}"#,
            r#"{"jsonrpc":"2.0","id":99,"result":{}}"#,
            INIT_REPLY,
        ]),
        "read -r _\nread -r _\n".to_string(),
        emit(&[LIST_REPLY]),
        "read -r _\n".to_string(),
        emit(&[
            r#"{"jsonrpc":"2.0","id":"s1","method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hello"}]}}"#,
        ]),
        "read -r _\n".to_string(),
        emit(&[
            r#"{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}"#,
        ]),
        "read -r _\n".to_string(),
    ]
    .concat();

    let server = Server::spawn(scripted(script)).await.unwrap();
    server.initialize().await.unwrap();
    assert_eq!(server.server_info().await.unwrap().server_info.name, "scripted");

    let tools = server.tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].description.as_deref(), Some("Echo text"));

    let result = server
        .call_tool("echo", Some(json!({"text": "hello"})))
        .await
        .unwrap();
    assert_eq!(result.joined_text(), "hello");

    let err = server.call_tool("echo", None).await.unwrap_err();
    assert!(matches!(err, Error::ToolCallFailed(ref text) if text == "boom"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn late_reply_is_discarded_after_timeout() {
    let script = [
        "read -r _\n".to_string(),
        emit(&[INIT_REPLY]),
        "read -r _\nread -r _\n".to_string(),
        emit(&[LIST_REPLY]),
        "read -r _\nsleep 1\n".to_string(),
        emit(&[r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"late"}]}}"#]),
        "read -r _\n".to_string(),
        emit(&[r#"{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"fresh"}]}}"#]),
        "read -r _\n".to_string(),
    ]
    .concat();

    let server = Server::spawn(scripted(script))
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(300));
    server.initialize().await.unwrap();

    let err = server.call_tool("echo", None).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { ref method } if method == "tools/call"));

    // Let the late reply land ahead of the next request's.
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let result = server.call_tool("echo", None).await.unwrap();
    assert_eq!(result.joined_text(), "fresh");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn exit_before_reply_is_reported() {
    let server = Server::spawn(scripted("read -r _\n".to_string()))
        .await
        .unwrap();
    let err = server.initialize().await.err().unwrap();
    assert!(matches!(err, Error::ServerExited));
}
