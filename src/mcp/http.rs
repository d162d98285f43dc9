//! HTTP transport
//!
//! - POST /mcp: one JSON-RPC request or a batch array, answered with JSON
//! - GET /health: liveness check
//!
//! Each POST is handled on its own task by axum, and each item of a batch on
//! its own task within that, so concurrent calls run in parallel. Dropping a
//! connection mid-call drops the execution future, which kills the interpreter
//! and releases its staged unit.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::Result;
use crate::mcp::protocol::{JsonRpcResponse, INVALID_REQUEST};
use crate::mcp::server::McpServer;

pub fn router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_post))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Run the HTTP transport until Ctrl+C.
pub async fn run_http(server: Arc<McpServer>, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(addr = %addr, tools = server.tool_count(), "HTTP server listening on /mcp");

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down");
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "server": crate::mcp::server::SERVER_NAME }))
}

async fn handle_post(State(server): State<Arc<McpServer>>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(JsonRpcResponse::parse_error(e))).into_response()
        }
    };

    match process_body(server, value).await {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        // Only notifications
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Answer a POST body. Returns `None` when nothing needs a reply.
///
/// Batch items run concurrently; replies come back in request order.
pub async fn process_body(server: Arc<McpServer>, body: Value) -> Option<Value> {
    match body {
        Value::Array(batch) => {
            if batch.is_empty() {
                let empty = JsonRpcResponse::failure(None, INVALID_REQUEST, "Empty batch");
                return serde_json::to_value(empty).ok();
            }

            // Dropping the set aborts unfinished items along with the request.
            let mut items = JoinSet::new();
            for (index, item) in batch.into_iter().enumerate() {
                let server = server.clone();
                items.spawn(async move { (index, server.handle_value(item).await) });
            }

            let mut replies = Vec::new();
            while let Some(joined) = items.join_next().await {
                match joined {
                    Ok((index, Some(response))) => {
                        if let Ok(reply) = serde_json::to_value(response) {
                            replies.push((index, reply));
                        }
                    }
                    Ok((_, None)) => {}
                    Err(e) => warn!(error = %e, "Batch item task failed"),
                }
            }
            replies.sort_by_key(|(index, _)| *index);

            if replies.is_empty() {
                None
            } else {
                Some(Value::Array(
                    replies.into_iter().map(|(_, reply)| reply).collect(),
                ))
            }
        }
        single => {
            let response = server.handle_value(single).await?;
            serde_json::to_value(response).ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Arc<McpServer> {
        Arc::new(McpServer::new("batch-mcp", "0.0.0-test"))
    }

    #[tokio::test]
    async fn test_single_request() {
        let reply = process_body(
            server(),
            json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }),
        )
        .await
        .unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn test_batch() {
        let reply = process_body(
            server(),
            json!([
                { "jsonrpc": "2.0", "id": 1, "method": "ping" },
                { "jsonrpc": "2.0", "method": "notifications/initialized" },
                { "jsonrpc": "2.0", "id": 2, "method": "tools/list" }
            ]),
        )
        .await
        .unwrap();

        let replies = reply.as_array().unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["result"]["tools"], json!([]));
    }

    #[tokio::test]
    async fn test_batch_keeps_request_order() {
        let batch: Vec<Value> = (1..=20)
            .map(|id| json!({ "jsonrpc": "2.0", "id": id, "method": "ping" }))
            .collect();

        let reply = process_body(server(), Value::Array(batch)).await.unwrap();

        let ids: Vec<i64> = reply
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_notifications_only() {
        let reply = process_body(
            server(),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        )
        .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let reply = process_body(server(), json!([])).await.unwrap();
        assert_eq!(reply["error"]["code"], INVALID_REQUEST);
    }
}
