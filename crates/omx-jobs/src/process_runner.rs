//! External engine invocation with timeout enforcement.
//!
//! Two interchangeable strategies implement [`ProcessRunner`]:
//! [`AsyncProcessRunner`] waits on the child from the async runtime, while
//! [`BlockingProcessRunner`] offloads a blocking spawn-and-wait onto the
//! runtime's blocking pool. Both classify results through the same code so
//! callers observe identical outcomes.
//!
//! The timeout covers the whole call, including draining output. On Unix each
//! engine leads its own process group and expiry kills the entire group.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use wait_timeout::ChildExt;

use crate::error::{JobError, JobResult};

const DEFAULT_ENGINE_PROGRAM: &str = "Rscript";
const STDOUT_EXCERPT_MAX_CHARS: usize = 512;
const SIGNAL_EXIT_CODE: i32 = -1;

/// Program (plus fixed leading arguments) used to run engine scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_ENGINE_PROGRAM),
            args: Vec::new(),
        }
    }
}

/// One engine call: `<program> [args..] <script_path> <args_path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub script_path: PathBuf,
    pub args_path: PathBuf,
    pub timeout: Duration,
}

/// Captured result of a successful engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub result: Value,
}

impl EngineOutcome {
    /// Non-fatal engine diagnostics (stderr), if any were written.
    pub fn diagnostics(&self) -> Option<String> {
        non_empty_trimmed(&self.stderr)
    }
}

/// Execution strategy used to wait on engine processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerStrategy {
    /// Await the child process on the async runtime.
    Async,
    /// Run a blocking spawn-and-wait on a dedicated worker thread.
    Blocking,
}

impl RunnerStrategy {
    /// Strategy appropriate for the current platform.
    pub fn for_host() -> Self {
        if cfg!(windows) {
            Self::Blocking
        } else {
            Self::Async
        }
    }

    /// Parses a configuration token; `auto` resolves to [`RunnerStrategy::for_host`].
    pub fn from_setting(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::for_host()),
            "async" => Some(Self::Async),
            "blocking" | "thread" => Some(Self::Blocking),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Async => "async",
            Self::Blocking => "blocking",
        }
    }
}

/// Runs engine invocations and classifies their outcome.
#[async_trait]
pub trait ProcessRunner: Send + Sync + std::fmt::Debug {
    fn strategy(&self) -> RunnerStrategy;

    async fn run(&self, invocation: &EngineInvocation) -> JobResult<EngineOutcome>;
}

/// Builds the runner for `strategy`. `blocking_workers` bounds concurrent
/// blocking waits and is ignored by the async strategy.
pub fn build_process_runner(
    strategy: RunnerStrategy,
    command: EngineCommand,
    blocking_workers: usize,
) -> Arc<dyn ProcessRunner> {
    match strategy {
        RunnerStrategy::Async => Arc::new(AsyncProcessRunner::new(command)),
        RunnerStrategy::Blocking => Arc::new(BlockingProcessRunner::new(command, blocking_workers)),
    }
}

#[derive(Debug, Clone)]
pub struct AsyncProcessRunner {
    command: EngineCommand,
}

impl AsyncProcessRunner {
    pub fn new(command: EngineCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ProcessRunner for AsyncProcessRunner {
    fn strategy(&self) -> RunnerStrategy {
        RunnerStrategy::Async
    }

    async fn run(&self, invocation: &EngineInvocation) -> JobResult<EngineOutcome> {
        ensure_script_exists(&invocation.script_path)?;

        let mut command = tokio::process::Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .arg(&invocation.script_path)
            .arg(&invocation.args_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|error| classify_spawn_error(&self.command.program, &error))?;
        // Captured before waiting: a reaped child no longer reports its id.
        let pid = child.id();

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let collected = tokio::time::timeout(invocation.timeout, async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                read_pipe(stdout_pipe.as_mut()),
                read_pipe(stderr_pipe.as_mut())
            );
            status.map(|status| (status, stdout, stderr))
        })
        .await;

        match collected {
            Ok(Ok((status, stdout, stderr))) => {
                classify_outcome(&invocation.script_path, stdout, stderr, status.code())
            }
            Ok(Err(error)) => {
                kill_process_group(pid);
                let _ = child.kill().await;
                Err(JobError::Storage(format!(
                    "failed while waiting for engine process: {error}"
                )))
            }
            Err(_) => {
                // kill() also reaps the direct child; the group signal covers
                // anything the engine started.
                kill_process_group(pid);
                let _ = child.kill().await;
                Err(timeout_error(invocation))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockingProcessRunner {
    command: EngineCommand,
    permits: Arc<Semaphore>,
}

impl BlockingProcessRunner {
    pub fn new(command: EngineCommand, workers: usize) -> Self {
        Self {
            command,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

#[async_trait]
impl ProcessRunner for BlockingProcessRunner {
    fn strategy(&self) -> RunnerStrategy {
        RunnerStrategy::Blocking
    }

    async fn run(&self, invocation: &EngineInvocation) -> JobResult<EngineOutcome> {
        ensure_script_exists(&invocation.script_path)?;

        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|error| JobError::Storage(format!("engine worker pool closed: {error}")))?;
        let command = self.command.clone();
        let invocation = invocation.clone();
        tokio::task::spawn_blocking(move || run_blocking(&command, &invocation))
            .await
            .map_err(|error| JobError::Storage(format!("engine worker thread failed: {error}")))?
    }
}

fn run_blocking(command: &EngineCommand, invocation: &EngineInvocation) -> JobResult<EngineOutcome> {
    let deadline = Instant::now() + invocation.timeout;
    let mut process = std::process::Command::new(&command.program);
    process
        .args(&command.args)
        .arg(&invocation.script_path)
        .arg(&invocation.args_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        process.process_group(0);
    }
    let mut child = process
        .spawn()
        .map_err(|error| classify_spawn_error(&command.program, &error))?;
    let pid = Some(child.id());

    // Pipes are drained on their own threads so a chatty engine cannot fill
    // the pipe buffer and stall before wait_timeout returns.
    let stdout_rx = drain_thread(child.stdout.take());
    let stderr_rx = drain_thread(child.stderr.take());

    let status = match child.wait_timeout(invocation.timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate_blocking(&mut child, pid);
            return Err(timeout_error(invocation));
        }
        Err(error) => {
            terminate_blocking(&mut child, pid);
            return Err(JobError::Storage(format!(
                "failed while waiting for engine process: {error}"
            )));
        }
    };

    // The engine may have exited while something it started still holds a pipe.
    let mut drained = Vec::with_capacity(2);
    for receiver in [stdout_rx, stderr_rx] {
        match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(buffer) => drained.push(buffer),
            Err(RecvTimeoutError::Disconnected) => drained.push(Vec::new()),
            Err(RecvTimeoutError::Timeout) => {
                terminate_blocking(&mut child, pid);
                return Err(timeout_error(invocation));
            }
        }
    }
    let stderr = drained.pop().unwrap_or_default();
    let stdout = drained.pop().unwrap_or_default();
    classify_outcome(&invocation.script_path, stdout, stderr, status.code())
}

fn terminate_blocking(child: &mut std::process::Child, pid: Option<u32>) {
    kill_process_group(pid);
    let _ = child.kill();
    let _ = child.wait();
}

fn timeout_error(invocation: &EngineInvocation) -> JobError {
    warn!(
        script = %invocation.script_path.display(),
        timeout_ms = duration_ms(invocation.timeout),
        "engine process killed after timeout"
    );
    JobError::ProcessTimeout {
        timeout_ms: duration_ms(invocation.timeout),
    }
}

/// Sends SIGKILL to the engine's process group so helpers it spawned die with it.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers; the group was created at spawn.
    let _ = unsafe { libc::kill(-pgid, libc::SIGKILL) };
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn read_pipe<R>(reader: Option<&mut R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    if let Some(reader) = reader {
        let _ = reader.read_to_end(&mut buffer).await;
    }
    buffer
}

fn drain_thread<R>(reader: Option<R>) -> Receiver<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buffer);
        }
        let _ = sender.send(buffer);
    });
    receiver
}

fn ensure_script_exists(script_path: &Path) -> JobResult<()> {
    if script_path.is_file() {
        return Ok(());
    }
    Err(JobError::EngineNotFound(format!(
        "engine script '{}' does not exist",
        script_path.display()
    )))
}

fn classify_spawn_error(program: &Path, error: &std::io::Error) -> JobError {
    match error.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            JobError::EngineNotFound(format!(
                "engine executable '{}' could not be started: {error}",
                program.display()
            ))
        }
        _ => JobError::Storage(format!(
            "failed to spawn engine executable '{}': {error}",
            program.display()
        )),
    }
}

/// Shared by both strategies: turns captured output into an outcome or error.
pub fn classify_outcome(
    script_path: &Path,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
) -> JobResult<EngineOutcome> {
    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    let exit_code = exit_code.unwrap_or(SIGNAL_EXIT_CODE);

    if let Some(diagnostics) = non_empty_trimmed(&stderr) {
        info!(
            script = %script_path.display(),
            exit_code,
            "engine diagnostics:\n{diagnostics}"
        );
    }

    if exit_code != 0 {
        return Err(JobError::ProcessFailure {
            exit_code,
            stderr: stderr.trim().to_string(),
        });
    }

    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(JobError::OutputFormat {
            parse_error: "engine produced no output".to_string(),
            stdout_excerpt: String::new(),
        });
    }
    let result = serde_json::from_str::<Value>(trimmed).map_err(|error| JobError::OutputFormat {
        parse_error: error.to_string(),
        stdout_excerpt: excerpt(trimmed, STDOUT_EXCERPT_MAX_CHARS),
    })?;

    Ok(EngineOutcome {
        stdout,
        stderr,
        exit_code,
        result,
    })
}

fn non_empty_trimmed(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn excerpt(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.to_string();
    }
    let mut clipped: String = raw.chars().take(max_chars).collect();
    clipped.push_str("...");
    clipped
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{classify_outcome, excerpt, RunnerStrategy};
    use crate::error::JobError;
    use std::path::Path;

    #[test]
    fn unit_strategy_setting_parses_known_tokens() {
        assert_eq!(
            RunnerStrategy::from_setting("auto"),
            Some(RunnerStrategy::for_host())
        );
        assert_eq!(
            RunnerStrategy::from_setting(" Blocking "),
            Some(RunnerStrategy::Blocking)
        );
        assert_eq!(
            RunnerStrategy::from_setting("async"),
            Some(RunnerStrategy::Async)
        );
        assert_eq!(RunnerStrategy::from_setting("fork"), None);
    }

    #[test]
    fn unit_classify_outcome_prefers_exit_code_over_stdout_shape() {
        let error = classify_outcome(
            Path::new("analysis.R"),
            br#"{"success":true}"#.to_vec(),
            b"bad column index\n".to_vec(),
            Some(2),
        )
        .expect_err("non-zero exit");
        assert_eq!(
            error,
            JobError::ProcessFailure {
                exit_code: 2,
                stderr: "bad column index".to_string()
            }
        );

        let signalled = classify_outcome(Path::new("analysis.R"), Vec::new(), Vec::new(), None)
            .expect_err("signal");
        assert!(matches!(
            signalled,
            JobError::ProcessFailure { exit_code: -1, .. }
        ));
    }

    #[test]
    fn unit_classify_outcome_keeps_stderr_as_diagnostics_on_success() {
        let outcome = classify_outcome(
            Path::new("preprocess.R"),
            b"  {\"success\": true, \"message\": \"ok\"}\n".to_vec(),
            b"Loading required package: stats\n".to_vec(),
            Some(0),
        )
        .expect("success outcome");
        assert_eq!(outcome.result["message"], "ok");
        assert_eq!(
            outcome.diagnostics().as_deref(),
            Some("Loading required package: stats")
        );
    }

    #[test]
    fn regression_classify_outcome_rejects_empty_and_non_json_stdout() {
        let empty = classify_outcome(Path::new("a.R"), b"\n".to_vec(), Vec::new(), Some(0))
            .expect_err("empty stdout");
        assert!(matches!(empty, JobError::OutputFormat { .. }));

        let garbage = classify_outcome(Path::new("a.R"), b"oops".to_vec(), Vec::new(), Some(0))
            .expect_err("non-json");
        match garbage {
            JobError::OutputFormat { stdout_excerpt, .. } => assert_eq!(stdout_excerpt, "oops"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unit_excerpt_clips_long_output() {
        let long = "x".repeat(600);
        let clipped = excerpt(&long, 512);
        assert_eq!(clipped.len(), 515);
        assert!(clipped.ends_with("..."));
    }
}
