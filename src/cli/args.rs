use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::TransportKind;

#[derive(Parser, Debug)]
#[clap(name = "batch-mcp")]
#[clap(version, about = "MCP server that runs code through an interpreter in batch mode")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    /// Defaults to `serve` with configured settings
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "BATCH_MCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the MCP server
    Serve(ServeArgs),

    /// Execute a snippet once and print the result
    Exec(ExecArgs),

    /// Initialize a new configuration file
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Transport type
    #[clap(short, long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Listen host (http transport)
    #[clap(long)]
    pub host: Option<String>,

    /// Listen port (http transport)
    #[clap(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Code to execute (read from stdin when neither this nor --file is given)
    pub code: Option<String>,

    /// Read code from a file
    #[clap(long, short = 'f', conflicts_with = "code")]
    pub file: Option<PathBuf>,

    /// Timeout in seconds
    #[clap(long)]
    pub timeout: Option<f64>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
