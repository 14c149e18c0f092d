/*!
 * Supervised execution of external tools (yt-dlp, ffprobe, the ASR engine).
 *
 * A child is owned by a `ChildGuard` from spawn to exit. A guard dropped
 * before the child was reaped kills the whole process group, so a timeout,
 * a cancellation or a panic in the caller never leaves the tool running.
 */

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::cancel::CancellationToken;
use crate::errors::ProcessError;

/// Number of output lines kept for error diagnostics
pub const DEFAULT_TAIL_LINES: usize = 20;

/// How long to keep reading pipes after the child itself exited
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Description of one external command invocation
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub tail_lines: usize,
}

impl ProcessSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// Successful run: exit status plus the last captured lines
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub status: ExitStatus,
    pub tail: Vec<String>,
}

// @struct: Owns the child for its whole life and tears it down on drop
struct ChildGuard {
    child: Child,
    pid: Option<u32>,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            reaped: false,
        }
    }

    /// Kill the leader and its group. Once the leader has been reaped its
    /// pid may name an unrelated group, so nothing is signalled.
    fn kill_group(&mut self) {
        if self.reaped {
            return;
        }
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;
            if let Some(pid) = self.pid {
                // ESRCH just means the group is already gone
                let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
        let _ = self.child.start_kill();
    }

    async fn terminate(&mut self) {
        self.kill_group();
        if !self.reaped {
            let _ = self.child.wait().await;
            self.reaped = true;
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill_group();
    }
}

struct TailBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl TailBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

enum Event {
    Line(OutputStream, String),
    Closed(OutputStream),
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    DrainExpired,
    Cancelled,
}

/// Run a command to completion, streaming each output line to `on_output`.
///
/// Non-zero exit, timeout and cancellation are errors; the last
/// `spec.tail_lines` lines of combined output are attached to each.
pub async fn run<F>(
    spec: &ProcessSpec,
    mut on_output: F,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, ProcessError>
where
    F: FnMut(OutputStream, &str) + Send,
{
    let program = spec.program_name();
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled {
            program,
            tail: Vec::new(),
        });
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    command.process_group(0);

    debug!("Spawning {} {:?}", program, spec.args);
    let child = command.spawn().map_err(|e| ProcessError::SpawnFailure {
        program: program.clone(),
        message: e.to_string(),
    })?;
    let mut guard = ChildGuard::new(child);

    let stdout = guard.child.stdout.take();
    let stderr = guard.child.stderr.take();
    let mut out_lines = stdout.map(|s| BufReader::new(s).lines());
    let mut err_lines = stderr.map(|s| BufReader::new(s).lines());

    let mut tail = TailBuffer::new(spec.tail_lines);
    let mut exit_status: Option<ExitStatus> = None;

    let timeout = spec.timeout.unwrap_or(FAR_FUTURE);
    let timeout_sleep = tokio::time::sleep(timeout);
    tokio::pin!(timeout_sleep);
    let drain_sleep = tokio::time::sleep(FAR_FUTURE);
    tokio::pin!(drain_sleep);

    loop {
        if exit_status.is_some() && out_lines.is_none() && err_lines.is_none() {
            break;
        }

        let event = tokio::select! {
            line = async { out_lines.as_mut()?.next_line().await.ok().flatten() }, if out_lines.is_some() => {
                match line {
                    Some(l) => Event::Line(OutputStream::Stdout, l),
                    None => Event::Closed(OutputStream::Stdout),
                }
            }
            line = async { err_lines.as_mut()?.next_line().await.ok().flatten() }, if err_lines.is_some() => {
                match line {
                    Some(l) => Event::Line(OutputStream::Stderr, l),
                    None => Event::Closed(OutputStream::Stderr),
                }
            }
            status = guard.child.wait(), if exit_status.is_none() => Event::Exited(status),
            _ = &mut timeout_sleep, if spec.timeout.is_some() => Event::TimedOut,
            _ = &mut drain_sleep, if exit_status.is_some() => Event::DrainExpired,
            _ = cancel.cancelled() => Event::Cancelled,
        };

        match event {
            Event::Line(stream, line) => {
                tail.push(&line);
                on_output(stream, &line);
            }
            Event::Closed(OutputStream::Stdout) => out_lines = None,
            Event::Closed(OutputStream::Stderr) => err_lines = None,
            Event::Exited(Ok(status)) => {
                guard.reaped = true;
                exit_status = Some(status);
                drain_sleep
                    .as_mut()
                    .reset(tokio::time::Instant::now() + PIPE_DRAIN_GRACE);
            }
            Event::Exited(Err(e)) => {
                guard.terminate().await;
                return Err(ProcessError::SpawnFailure {
                    program,
                    message: format!("wait failed: {}", e),
                });
            }
            Event::DrainExpired => {
                warn!("{} exited but its output pipes stayed open; closing them", program);
                break;
            }
            Event::TimedOut => {
                guard.terminate().await;
                warn!("{} timed out after {:?}", program, timeout);
                return Err(ProcessError::Timeout {
                    program,
                    timeout_secs: timeout.as_secs(),
                    tail: tail.snapshot(),
                });
            }
            Event::Cancelled => {
                guard.terminate().await;
                debug!("{} cancelled", program);
                return Err(ProcessError::Cancelled {
                    program,
                    tail: tail.snapshot(),
                });
            }
        }
    }

    // Dropping the readers closes our end of any pipe a stray child still holds
    drop(out_lines);
    drop(err_lines);
    drop(guard);

    let tail = tail.snapshot();
    match exit_status {
        Some(status) if status.success() => {
            debug!("{} finished successfully", program);
            Ok(ProcessOutcome { status, tail })
        }
        Some(status) => Err(ProcessError::NonzeroExit {
            program,
            code: status.code(),
            tail,
        }),
        None => Err(ProcessError::SpawnFailure {
            program,
            message: "process exit status unavailable".to_string(),
        }),
    }
}

/// Run a command and collect its stdout, for small query tools like ffprobe
pub async fn run_capture(spec: &ProcessSpec, cancel: &CancellationToken) -> Result<String, ProcessError> {
    let mut stdout = String::new();
    run(
        spec,
        |stream, line| {
            if stream == OutputStream::Stdout {
                stdout.push_str(line);
                stdout.push('\n');
            }
        },
        cancel,
    )
    .await?;
    Ok(stdout)
}
