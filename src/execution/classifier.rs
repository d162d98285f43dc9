use std::time::Duration;

use serde::Serialize;

use crate::error::BatchError;
use crate::execution::bounded::{ExecutionOutcome, RunOutput};

/// Which terminal state a call ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Success,
    RuntimeFailure,
    TimedOut,
    LaunchFailed,
    StagingFailed,
}

/// Caller-facing result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub text: String,
    pub is_error: bool,
    pub kind: ResultKind,
}

impl ToolResult {
    fn error(kind: ResultKind, text: String) -> Self {
        Self {
            text,
            is_error: true,
            kind,
        }
    }
}

/// Map a finished run onto a `ToolResult`. Every error variant keeps
/// whatever output was captured.
pub fn classify(run: RunOutput) -> ToolResult {
    let RunOutput { outcome, output } = run;

    match outcome {
        ExecutionOutcome::Completed { exit_ok: true, .. } => ToolResult {
            text: output,
            is_error: false,
            kind: ResultKind::Success,
        },
        ExecutionOutcome::Completed {
            exit_ok: false,
            summary,
        } => ToolResult::error(
            ResultKind::RuntimeFailure,
            format!("execution failed: {}\noutput: {}", summary, output),
        ),
        ExecutionOutcome::TimedOut { after } => ToolResult::error(
            ResultKind::TimedOut,
            with_output(
                format!("execution timed out after {}", format_timeout(after)),
                &output,
            ),
        ),
        ExecutionOutcome::LaunchFailed(reason) => ToolResult::error(
            ResultKind::LaunchFailed,
            with_output(format!("failed to start interpreter: {}", reason), &output),
        ),
    }
}

/// Result for a call that never got as far as launching.
pub fn staging_failed(err: &BatchError) -> ToolResult {
    let text = match err {
        BatchError::StagingFailed(_) => err.to_string(),
        other => format!("failed to stage code: {}", other),
    };
    ToolResult::error(ResultKind::StagingFailed, text)
}

fn with_output(mut text: String, output: &str) -> String {
    if !output.is_empty() {
        text.push_str("\noutput: ");
        text.push_str(output);
    }
    text
}

/// Whole seconds print as `30s`, anything finer keeps millisecond precision.
pub fn format_timeout(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(outcome: ExecutionOutcome, output: &str) -> RunOutput {
        RunOutput {
            outcome,
            output: output.to_string(),
        }
    }

    #[test]
    fn test_success_is_verbatim() {
        let result = classify(run(
            ExecutionOutcome::Completed {
                exit_ok: true,
                summary: "exit status: 0".to_string(),
            },
            "     5\n\n",
        ));
        assert_eq!(result.text, "     5\n\n");
        assert!(!result.is_error);
        assert_eq!(result.kind, ResultKind::Success);
    }

    #[test]
    fn test_runtime_failure() {
        let result = classify(run(
            ExecutionOutcome::Completed {
                exit_ok: false,
                summary: "exit status: 1".to_string(),
            },
            "Error: Invalid expression.\n",
        ));
        assert!(result.is_error);
        assert_eq!(result.kind, ResultKind::RuntimeFailure);
        assert_eq!(
            result.text,
            "execution failed: exit status: 1\noutput: Error: Invalid expression.\n"
        );
    }

    #[test]
    fn test_timeout_with_and_without_output() {
        let result = classify(run(
            ExecutionOutcome::TimedOut {
                after: Duration::from_secs(1),
            },
            "",
        ));
        assert!(result.is_error);
        assert_eq!(result.kind, ResultKind::TimedOut);
        assert_eq!(result.text, "execution timed out after 1s");

        let result = classify(run(
            ExecutionOutcome::TimedOut {
                after: Duration::from_millis(1500),
            },
            "partial\n",
        ));
        assert_eq!(
            result.text,
            "execution timed out after 1.500s\noutput: partial\n"
        );
    }

    #[test]
    fn test_launch_failed() {
        let result = classify(run(
            ExecutionOutcome::LaunchFailed("No such file or directory (os error 2)".to_string()),
            "",
        ));
        assert!(result.is_error);
        assert_eq!(result.kind, ResultKind::LaunchFailed);
        assert_eq!(
            result.text,
            "failed to start interpreter: No such file or directory (os error 2)"
        );
    }

    #[test]
    fn test_staging_failed() {
        let err = BatchError::StagingFailed("disk full".to_string());
        let result = staging_failed(&err);
        assert!(result.is_error);
        assert_eq!(result.kind, ResultKind::StagingFailed);
        assert_eq!(result.text, "failed to stage code: disk full");
    }

    #[test]
    fn test_failure_modes_are_distinguishable() {
        let texts = [
            classify(run(
                ExecutionOutcome::Completed {
                    exit_ok: false,
                    summary: "exit status: 1".to_string(),
                },
                "",
            ))
            .text,
            classify(run(
                ExecutionOutcome::TimedOut {
                    after: Duration::from_secs(1),
                },
                "",
            ))
            .text,
            classify(run(ExecutionOutcome::LaunchFailed("denied".to_string()), "")).text,
            staging_failed(&BatchError::StagingFailed("denied".to_string())).text,
        ];
        let prefixes = [
            "execution failed:",
            "execution timed out",
            "failed to start interpreter:",
            "failed to stage code:",
        ];
        for (text, prefix) in texts.iter().zip(prefixes) {
            assert!(text.starts_with(prefix), "{:?} !~ {:?}", text, prefix);
        }
    }

    #[test]
    fn test_format_timeout() {
        assert_eq!(format_timeout(Duration::from_secs(300)), "300s");
        assert_eq!(format_timeout(Duration::from_millis(250)), "0.250s");
    }
}
