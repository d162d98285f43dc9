//! Execution core: stage a payload, run the interpreter against it under a
//! deadline, classify what happened.

mod bounded;
mod classifier;
mod staging;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::types::{ExecutionConfig, InterpreterConfig};

pub use bounded::{run_bounded, ExecutionOutcome, Invocation, RunOutput};
pub use classifier::{classify, format_timeout, staging_failed, ResultKind, ToolResult};
pub use staging::StagedUnit;

/// One accepted call: the code to run and how long it may take.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub code: String,
    pub timeout: Duration,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            timeout,
        }
    }
}

/// Runs requests against one configured interpreter. Holds no per-call state,
/// so a single instance serves any number of concurrent calls.
#[derive(Debug, Clone)]
pub struct Executor {
    interpreter: InterpreterConfig,
    staging_root: PathBuf,
    drain_grace: Duration,
}

impl Executor {
    pub fn new(interpreter: InterpreterConfig, execution: &ExecutionConfig) -> Self {
        Self {
            interpreter,
            staging_root: execution
                .staging_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            drain_grace: execution.drain_grace(),
        }
    }

    pub fn interpreter(&self) -> &InterpreterConfig {
        &self.interpreter
    }

    /// Stage, run and classify. Never fails: every failure mode comes back as
    /// an error `ToolResult`.
    pub async fn execute(&self, request: &ExecutionRequest) -> ToolResult {
        let started = Instant::now();

        let mut unit = match StagedUnit::stage(
            &self.staging_root,
            &self.interpreter.file_prefix,
            &self.interpreter.extension,
            &request.code,
        ) {
            Ok(unit) => unit,
            Err(e) => {
                warn!(error = %e, root = %self.staging_root.display(), "Staging failed");
                return staging_failed(&e);
            }
        };

        let invocation = Invocation::for_unit(&self.interpreter, &unit);
        let run = run_bounded(&invocation, request.timeout, self.drain_grace).await;
        let result = classify(run);
        unit.release();

        info!(
            unit = %unit.name(),
            kind = ?result.kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_len = result.text.len(),
            "Execution finished"
        );

        result
    }
}
