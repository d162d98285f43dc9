use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::types::InterpreterConfig;
use crate::execution::staging::StagedUnit;

const READ_CHUNK: usize = 8 * 1024;

/// Terminal state of one interpreter run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The interpreter exited on its own before the deadline.
    Completed {
        exit_ok: bool,
        /// Exit status as reported by the OS, e.g. `exit status: 1`
        summary: String,
    },
    /// The deadline elapsed and the process tree was killed.
    TimedOut { after: Duration },
    /// The executable could not be started at all.
    LaunchFailed(String),
}

/// Outcome plus everything the child wrote to stdout and stderr.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub outcome: ExecutionOutcome,
    pub output: String,
}

/// A fully resolved command line for one staged unit.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

impl Invocation {
    /// Expand the configured argument template against `unit`.
    pub fn for_unit(config: &InterpreterConfig, unit: &StagedUnit) -> Self {
        let path = unit.path().display().to_string();
        let args = config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{name}", unit.name())
                    .replace("{file}", unit.file_name())
                    .replace("{path}", &path)
            })
            .collect();

        Self {
            program: config.path.clone(),
            args,
            workdir: unit.workdir().to_path_buf(),
        }
    }
}

/// Shared sink both output pipes append to, in arrival order.
#[derive(Clone, Default)]
struct CombinedOutput(Arc<Mutex<Vec<u8>>>);

impl CombinedOutput {
    fn append(&self, bytes: &[u8]) {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(bytes);
        }
    }

    fn snapshot(&self) -> String {
        match self.0.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>, sink: CombinedOutput) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut pipe = pipe?;
    Some(tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink.append(&chunk[..n]),
                Err(e) => {
                    warn!(error = %e, "Error reading interpreter output");
                    break;
                }
            }
        }
    }))
}

/// Kills the child's whole process group. Fires on drop unless already used,
/// so a cancelled or panicking run never leaves the tree behind.
struct ProcessGroup {
    pgid: Option<i32>,
    killed: bool,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
            killed: false,
        }
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: kill(2) takes plain integers and touches no memory. A
            // negative pid addresses the group the child leads; ESRCH just
            // means the group is already gone.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            debug!(pgid = pgid, rc = rc, "Sent SIGKILL to process group");
        }
        self.killed = true;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if !self.killed {
            self.kill();
        }
    }
}

/// Run `invocation` with a hard wall-clock deadline measured from launch.
///
/// Whichever comes first wins: the child exiting or the deadline. On the
/// deadline the whole process group is killed and reaped. Output readers get
/// `drain_grace` to collect what is still buffered in the pipes; anything
/// captured up to that point is returned.
pub async fn run_bounded(
    invocation: &Invocation,
    timeout: Duration,
    drain_grace: Duration,
) -> RunOutput {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(&invocation.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group so descendants can be killed together.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!(program = %invocation.program, error = %e, "Interpreter launch failed");
            return RunOutput {
                outcome: ExecutionOutcome::LaunchFailed(e.to_string()),
                output: String::new(),
            };
        }
    };

    let mut group = ProcessGroup::new(child.id());
    debug!(
        program = %invocation.program,
        args = ?invocation.args,
        pid = ?child.id(),
        "Interpreter started"
    );

    let sink = CombinedOutput::default();
    let readers: Vec<JoinHandle<()>> = [
        spawn_reader(child.stdout.take(), sink.clone()),
        spawn_reader(child.stderr.take(), sink.clone()),
    ]
    .into_iter()
    .flatten()
    .collect();

    let exited = tokio::time::timeout(timeout, leader_exited(&mut child)).await;
    if exited.is_err() {
        debug!(timeout = ?timeout, "Deadline elapsed, killing interpreter");
    }

    // The leader has not been reaped yet, so its pid (and with it the group
    // id) cannot have been handed to an unrelated process. Stragglers left
    // by the interpreter would otherwise hold the pipes open.
    group.kill();
    if exited.is_err() {
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "start_kill after group kill");
        }
    }
    let status = child.wait().await;

    let outcome = match (exited, status) {
        (Err(_), status) => {
            if let Err(e) = status {
                warn!(error = %e, "Failed to reap timed out interpreter");
            }
            ExecutionOutcome::TimedOut { after: timeout }
        }
        (Ok(()), Ok(status)) => ExecutionOutcome::Completed {
            exit_ok: status.success(),
            summary: status.to_string(),
        },
        (Ok(()), Err(e)) => ExecutionOutcome::Completed {
            exit_ok: false,
            summary: format!("failed to wait for interpreter: {}", e),
        },
    };

    drain(readers, drain_grace).await;

    RunOutput {
        outcome,
        output: sink.snapshot(),
    }
}

/// Resolve once the child has exited, without reaping it.
///
/// Falls back to a reaping `wait` when the exit cannot be observed in place.
async fn leader_exited(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        match tokio::task::spawn_blocking(move || wait_exited_in_place(pid)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => debug!(pid = pid, error = %e, "waitid failed, reaping instead"),
            Err(e) => debug!(pid = pid, error = %e, "waitid task failed, reaping instead"),
        }
    }
    // The status is kept by `child` and read again by the caller.
    let _ = child.wait().await;
}

/// Block until `pid` exits, leaving it a zombie for the owner to reap.
#[cfg(unix)]
fn wait_exited_in_place(pid: u32) -> std::io::Result<()> {
    loop {
        // SAFETY: siginfo_t is plain old data, so the all-zero value is valid
        // and waitid only writes into it. WNOWAIT leaves the child waitable,
        // so tokio still reaps it afterwards.
        let rc = unsafe {
            let mut info: libc::siginfo_t = std::mem::zeroed();
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Wait for the pipe readers to hit EOF, giving up after `grace`.
async fn drain(readers: Vec<JoinHandle<()>>, grace: Duration) {
    let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
    let joined = tokio::time::timeout(grace, async move {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;

    if joined.is_err() {
        warn!(grace = ?grace, "Output pipes still open after grace period, output may be truncated");
        for abort in aborts {
            abort.abort();
        }
    }
}
