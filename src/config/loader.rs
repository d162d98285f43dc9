use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::types::BatchConfig;
use crate::error::{BatchError, Result};

/// Environment variable that overrides `interpreter.path`
pub const INTERPRETER_PATH_ENV: &str = "MATLAB_PATH";

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "batch-mcp", "batch-mcp") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".batch-mcp").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values, then apply
/// environment overrides.
///
/// An explicitly requested file that does not exist is an error; a missing
/// default file is not.
pub fn load_config(config_path: Option<&Path>) -> Result<BatchConfig> {
    let mut config = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(BatchError::ConfigNotFound {
                    path: path.display().to_string(),
                });
            }
            read_config_file(path)?
        }
        None => {
            let path = get_config_path();
            if path.exists() {
                read_config_file(&path)?
            } else {
                debug!(path = %path.display(), "No config file, using defaults");
                BatchConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config, std::env::var(INTERPRETER_PATH_ENV).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Reject values that would make every call misbehave.
pub fn validate_config(config: &BatchConfig) -> Result<()> {
    config.execution.default_timeout()?;
    Ok(())
}

fn read_config_file(path: &Path) -> Result<BatchConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<BatchConfig> {
    toml::from_str(content).map_err(|e| BatchError::TomlParse(e.to_string()))
}

/// Apply the interpreter path override. Empty values are ignored so that an
/// exported-but-blank variable keeps the configured default.
pub fn apply_env_overrides(config: &mut BatchConfig, interpreter_path: Option<String>) {
    if let Some(path) = interpreter_path.filter(|p| !p.trim().is_empty()) {
        debug!(path = %path, "Interpreter path overridden from {}", INTERPRETER_PATH_ENV);
        config.interpreter.path = path;
    }
}

/// Log where the interpreter resolves to. A miss is only a warning: every call
/// reports its own launch failure.
pub fn check_interpreter(config: &BatchConfig) {
    match which::which(&config.interpreter.path) {
        Ok(resolved) => {
            info!(path = %resolved.display(), "Found interpreter");
        }
        Err(e) => {
            warn!(
                path = %config.interpreter.path,
                error = %e,
                "Interpreter not found; calls will fail to launch until {} is fixed",
                INTERPRETER_PATH_ENV
            );
        }
    }
}
