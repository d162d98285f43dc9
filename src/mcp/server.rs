//! MCP server: tool registry, JSON-RPC dispatch and the stdio transport.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{BatchError, Result};
use crate::execution::ToolResult;
use crate::mcp::protocol::{
    negotiate_version, CallToolResult, JsonRpcRequest, JsonRpcResponse, ToolDefinition,
    INVALID_REQUEST,
};
use crate::mcp::tools::Tool;

pub const SERVER_NAME: &str = "batch-mcp";

/// Responses buffered between request tasks and the stdout writer
const RESPONSE_QUEUE: usize = 64;

pub struct McpServer {
    name: String,
    version: String,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl McpServer {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            tools: HashMap::new(),
        }
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Tool definitions sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let tool = self.tools.get(name).ok_or_else(|| BatchError::ToolNotFound {
            tool: name.to_string(),
        })?;
        tool.call(arguments).await
    }

    /// Handle one request. Notifications produce no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, id = ?request.id, "Handling request");

        if request.is_notification() {
            if !request.has_valid_version() {
                debug!(jsonrpc = %request.jsonrpc, "Ignoring notification with bad jsonrpc version");
            } else if !request.method.starts_with("notifications/") {
                debug!(method = %request.method, "Ignoring notification for unknown method");
            }
            return None;
        }

        if !request.has_valid_version() {
            return Some(JsonRpcResponse::failure(
                request.id,
                INVALID_REQUEST,
                format!("Invalid request: jsonrpc must be \"2.0\", got {:?}", request.jsonrpc),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize(&request.params)),
            "tools/list" => Ok(json!({ "tools": self.definitions() })),
            "tools/call" => self.handle_tools_call(&request.params).await,
            "ping" => Ok(json!({})),
            method => Err(BatchError::MethodNotFound {
                method: method.to_string(),
            }),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(e) => {
                debug!(error = %e, "Request failed");
                JsonRpcResponse::from_error(request.id, &e)
            }
        })
    }

    /// Parse and handle one JSON value that should hold a single request.
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        let id = value.get("id").cloned();
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("Invalid request: {}", e),
            )),
        }
    }

    fn handle_initialize(&self, params: &Value) -> Value {
        let requested = params.get("protocolVersion").and_then(|v| v.as_str());
        json!({
            "protocolVersion": negotiate_version(requested),
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": self.name,
                "version": self.version
            }
        })
    }

    async fn handle_tools_call(&self, params: &Value) -> Result<Value> {
        let tool_name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BatchError::InvalidParams {
                tool: "tools/call".to_string(),
                reason: "missing tool name".to_string(),
            })?;

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        let result = self.call_tool(tool_name, arguments).await?;

        Ok(serde_json::to_value(CallToolResult::from(result))?)
    }
}

/// Serve newline-delimited JSON-RPC from `reader`, writing responses to
/// `writer`. Each request runs on its own task; responses are written in
/// completion order. Returns once the input is exhausted and every in-flight
/// request has answered.
pub async fn serve_lines<R, W>(server: Arc<McpServer>, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(RESPONSE_QUEUE);

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable message");
                let response = serde_json::to_string(&JsonRpcResponse::parse_error(e))?;
                if tx.send(response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let server = server.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = server.handle_value(value).await {
                match serde_json::to_string(&response) {
                    Ok(line) => {
                        let _ = tx.send(line).await;
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize response"),
                }
            }
        });
    }

    // The writer finishes once every request task has dropped its sender.
    drop(tx);
    writer_task
        .await
        .map_err(|e| BatchError::Transport(format!("writer task failed: {}", e)))??;

    Ok(())
}

/// Run the server on the process's stdin/stdout.
pub async fn run_stdio(server: Arc<McpServer>) -> Result<()> {
    info!(tools = server.tool_count(), "Serving MCP over stdio");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve_lines(server, stdin, tokio::io::stdout()).await?;
    info!("stdin closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ResultKind;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "Echo the text argument".to_string(),
                input_schema: json!({ "type": "object" }),
            }
        }

        async fn call(&self, arguments: Value) -> Result<ToolResult> {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BatchError::InvalidParams {
                    tool: "echo".to_string(),
                    reason: "text parameter is required".to_string(),
                })?;
            Ok(ToolResult {
                text: text.to_string(),
                is_error: false,
                kind: ResultKind::Success,
            })
        }
    }

    fn server() -> McpServer {
        let mut server = McpServer::new(SERVER_NAME, "0.0.0-test");
        server.register_tool(Arc::new(EchoTool));
        server
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_initialize() {
        let resp = server()
            .handle_request(request(
                1,
                "initialize",
                json!({ "protocolVersion": "2024-11-05" }),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let resp = server()
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: None,
                method: "notifications/initialized".to_string(),
                params: Value::Null,
            })
            .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn test_tools_list() {
        let resp = server()
            .handle_request(request(2, "tools/list", Value::Null))
            .await
            .unwrap();
        let tools = resp.result.unwrap()["tools"].clone();
        assert_eq!(tools.as_array().unwrap().len(), 1);
        assert_eq!(tools[0]["name"], "echo");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_tools_call() {
        let resp = server()
            .handle_request(request(
                3,
                "tools/call",
                json!({ "name": "echo", "arguments": { "text": "hi" } }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(json!(3)));
        assert_eq!(
            resp.result.unwrap(),
            json!({ "content": [{ "type": "text", "text": "hi" }], "isError": false })
        );
    }

    #[tokio::test]
    async fn test_errors() {
        let server = server();

        let resp = server
            .handle_request(request(4, "resources/list", Value::Null))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);

        let resp = server
            .handle_request(request(5, "tools/call", json!({ "name": "nope" })))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32602);

        let resp = server
            .handle_request(request(6, "tools/call", json!({ "name": "echo", "arguments": {} })))
            .await
            .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("text parameter is required"));
    }

    #[tokio::test]
    async fn test_invalid_request_value() {
        let resp = server()
            .handle_value(json!({ "jsonrpc": "2.0", "id": 9 }))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(json!(9)));
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_null_id_gets_a_reply() {
        let resp = server()
            .handle_value(json!({ "jsonrpc": "2.0", "id": null, "method": "ping" }))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(Value::Null));
        assert_eq!(resp.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let server = server();

        let resp = server
            .handle_value(json!({ "jsonrpc": "1.0", "id": 7, "method": "ping" }))
            .await
            .unwrap();
        assert_eq!(resp.id, Some(json!(7)));
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);

        let resp = server
            .handle_value(json!({ "id": 8, "method": "tools/list" }))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_serve_lines() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"text":"x"}}}"#,
            "\n",
        );
        let (client, mut output) = tokio::io::duplex(64 * 1024);

        serve_lines(Arc::new(server()), input.as_bytes(), client)
            .await
            .unwrap();

        let mut raw = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut output, &mut raw)
            .await
            .unwrap();
        let responses: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        // ping, parse error, tools/call; the notification is silent
        assert_eq!(responses.len(), 3);
        assert!(responses
            .iter()
            .any(|r| r["id"] == json!(1) && r["result"] == json!({})));
        assert!(responses
            .iter()
            .any(|r| r["id"].is_null() && r["error"]["code"] == json!(-32700)));
        assert!(responses
            .iter()
            .any(|r| r["id"] == json!(2) && r["result"]["content"][0]["text"] == "x"));
    }
}
