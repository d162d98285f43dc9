pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod mcp;

pub use error::{BatchError, Result};
