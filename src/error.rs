use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Execution core errors
    #[error("failed to stage code: {0}")]
    StagingFailed(String),

    // Protocol errors
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Tool '{tool}' not found")]
    ToolNotFound { tool: String },

    #[error("Invalid params for '{tool}': {reason}")]
    InvalidParams { tool: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid listen address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BatchError {
    /// JSON-RPC error code reported when this error escapes a request handler.
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            Self::MethodNotFound { .. } => -32601,
            Self::ToolNotFound { .. } | Self::InvalidParams { .. } => -32602,
            _ => -32603,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
