use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::info;

use crate::cli::args::{ConfigAction, ConfigArgs, ExecArgs, InitArgs, OutputFormat, ServeArgs};
use crate::config::loader::{check_interpreter, get_config_path};
use crate::config::types::{BatchConfig, TransportKind};
use crate::error::{BatchError, Result};
use crate::execution::{ExecutionRequest, Executor, ToolResult};
use crate::mcp::{build_server, run_http, run_stdio};

// ============================================================================
// Server
// ============================================================================

/// Run the MCP server on the selected transport
pub async fn serve(args: ServeArgs, mut config: BatchConfig) -> Result<()> {
    apply_serve_overrides(&args, &mut config);

    info!(
        interpreter = %config.interpreter.path,
        transport = ?config.server.transport,
        "Starting batch MCP server"
    );
    check_interpreter(&config);

    let server = Arc::new(build_server(&config)?);

    match config.server.transport {
        TransportKind::Stdio => run_stdio(server).await,
        TransportKind::Http => run_http(server, &config.server.host, config.server.port).await,
    }
}

fn apply_serve_overrides(args: &ServeArgs, config: &mut BatchConfig) {
    if let Some(transport) = args.transport {
        config.server.transport = transport;
    }
    if let Some(ref host) = args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
}

// ============================================================================
// One-shot execution
// ============================================================================

/// Execute a snippet once through the same core the server uses
pub async fn exec(args: ExecArgs, config: BatchConfig, format: OutputFormat) -> Result<()> {
    let code = match (args.code, args.file) {
        (Some(code), _) => code,
        (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
        (None, None) => {
            let mut code = String::new();
            tokio::io::stdin().read_to_string(&mut code).await?;
            code
        }
    };

    let timeout = match args.timeout {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                BatchError::Config(format!("timeout must be a positive number, got {}", secs))
            })?,
        None => config.execution.default_timeout()?,
    };

    info!(code_len = code.len(), timeout = ?timeout, "Executing one-shot snippet");

    let executor = Executor::new(config.interpreter.clone(), &config.execution);
    let result = executor
        .execute(&ExecutionRequest::new(code, timeout))
        .await;

    output_tool_result(&result, format);
    Ok(())
}

fn output_tool_result(result: &ToolResult, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            if result.is_error {
                eprintln!("{}", result.text);
                std::process::exit(1);
            }
            print!("{}", result.text);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "content": result.text,
                    "isError": result.is_error,
                    "kind": result.kind,
                })
            );
            if result.is_error {
                std::process::exit(1);
            }
        }
    }
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_str = render_config(&BatchConfig::default())?;
    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Serve over stdio (for MCP clients that spawn the server)");
    println!("  batch-mcp serve");
    println!();
    println!("  # Serve over HTTP on :8080/mcp");
    println!("  batch-mcp serve --transport http");
    println!();
    println!("  # Point at a specific MATLAB install");
    println!("  MATLAB_PATH=/Applications/MATLAB_R2025a.app/bin/matlab batch-mcp serve");
    println!();
    println!("  # Run a snippet once");
    println!("  batch-mcp exec \"disp(2 + 3)\"");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: BatchConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            println!("{}", render_config(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

fn render_config(config: &BatchConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| BatchError::Config(e.to_string()))
}
