use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{BatchError, Result};
use crate::execution::{ExecutionRequest, Executor, ToolResult};
use crate::mcp::protocol::ToolDefinition;

/// A callable tool exposed through `tools/call`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and input schema
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. Argument problems are `Err`; anything that goes wrong
    /// while doing the work is an error `ToolResult`.
    async fn call(&self, arguments: Value) -> Result<ToolResult>;
}

/// Runs a code snippet through the configured interpreter.
pub struct ExecuteCodeTool {
    name: String,
    executor: Executor,
    default_timeout: Duration,
}

impl ExecuteCodeTool {
    pub fn new(name: impl Into<String>, executor: Executor, default_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            executor,
            default_timeout,
        }
    }

    /// Validate raw arguments into a request. Runs before anything is staged.
    pub fn parse_arguments(&self, arguments: &Value) -> Result<ExecutionRequest> {
        let invalid = |reason: &str| BatchError::InvalidParams {
            tool: self.name.clone(),
            reason: reason.to_string(),
        };

        let args = arguments
            .as_object()
            .ok_or_else(|| invalid("arguments must be an object"))?;

        let code = match args.get("code") {
            None | Some(Value::Null) => return Err(invalid("code parameter is required")),
            Some(Value::String(code)) => code.clone(),
            Some(_) => return Err(invalid("code parameter must be a string")),
        };

        let timeout = match args.get("timeout") {
            None | Some(Value::Null) => self.default_timeout,
            Some(value) => value
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| invalid("timeout must be a positive number of seconds"))?,
        };

        Ok(ExecutionRequest::new(code, timeout))
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn definition(&self) -> ToolDefinition {
        let default_secs = self.default_timeout.as_secs_f64();
        ToolDefinition {
            name: self.name.clone(),
            description: "Execute MATLAB code using matlab -batch command".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "MATLAB code to execute"
                    },
                    "timeout": {
                        "type": "number",
                        "description": format!("Timeout in seconds (default: {})", default_secs),
                        "default": default_secs
                    }
                },
                "required": ["code"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<ToolResult> {
        let request = self.parse_arguments(&arguments)?;
        debug!(
            tool = %self.name,
            code_len = request.code.len(),
            timeout = ?request.timeout,
            "Executing code"
        );
        Ok(self.executor.execute(&request).await)
    }
}
