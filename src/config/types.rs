use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BatchError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub interpreter: InterpreterConfig,
    pub execution: ExecutionConfig,
    pub server: ServerConfig,
}

/// How the external interpreter is launched against a staged unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Executable path, or a bare command name resolved via PATH
    pub path: String,
    /// Argument template. `{name}` is the staged identifier without extension,
    /// `{file}` the file name and `{path}` the absolute file path.
    pub args: Vec<String>,
    /// File extension given to staged units (without the dot)
    pub extension: String,
    /// Prefix for staged unit names. Must start with a letter for MATLAB.
    pub file_prefix: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            path: "matlab".to_string(),
            args: vec!["-batch".to_string(), "{name}".to_string()],
            extension: "m".to_string(),
            file_prefix: "matlab_code_".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout used when a call does not supply one
    pub default_timeout_seconds: f64,
    /// Root directory for staged units (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
    /// How long to keep collecting output after a timed out child is killed
    pub drain_grace_ms: u64,
}

impl ExecutionConfig {
    /// The default timeout as a `Duration`. Must be a finite number of
    /// seconds above zero.
    pub fn default_timeout(&self) -> Result<Duration> {
        let secs = self.default_timeout_seconds;
        Some(secs)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| {
                BatchError::Config(format!(
                    "execution.default_timeout_seconds must be a positive number, got {}",
                    secs
                ))
            })
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 300.0,
            staging_dir: None,
            drain_grace_ms: 500,
        }
    }
}

/// Transport the MCP server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC over stdin/stdout
    #[default]
    Stdio,
    /// JSON-RPC over HTTP POST /mcp
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    /// Name the execution tool is registered under
    pub tool_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            tool_name: "execute_matlab".to_string(),
        }
    }
}
