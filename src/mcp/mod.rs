mod http;
mod protocol;
mod server;
mod tools;

use std::sync::Arc;

use crate::config::types::BatchConfig;
use crate::error::Result;
use crate::execution::Executor;

pub use http::{process_body, router, run_http};
pub use protocol::{
    CallToolResult, Content, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolDefinition,
};
pub use server::{run_stdio, serve_lines, McpServer, SERVER_NAME};
pub use tools::{ExecuteCodeTool, Tool};

/// Build the server with the code execution tool registered from `config`.
pub fn build_server(config: &BatchConfig) -> Result<McpServer> {
    let executor = Executor::new(config.interpreter.clone(), &config.execution);
    let tool = ExecuteCodeTool::new(
        config.server.tool_name.clone(),
        executor,
        config.execution.default_timeout()?,
    );

    let mut server = McpServer::new(SERVER_NAME, env!("CARGO_PKG_VERSION"));
    server.register_tool(Arc::new(tool));
    Ok(server)
}
