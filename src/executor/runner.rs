//! Execution orchestrator
//!
//! Turns a `CommandSpec` into a running process whose output is exposed through two
//! `StreamRelay`s while it runs:
//! - Preparation (tokenize, lookup, identity) fails synchronously, before anything starts
//! - One drain task per pipe feeds the relays
//! - A supervisor task waits for both relays to drain, then for the exit status, and publishes
//!   exactly one outcome on the completion signal
//! - A non-zero timeout arms a deadline that kills the process when it elapses

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::{oneshot, watch};

use super::deadline::DeadlineContext;
use super::process::{ChildProcess, PipeReader, PreparedCommand, StdioMode};
use super::relay::{StreamKind, StreamRelay};
use crate::command::{CommandSpec, DEFAULT_SHELL};
use crate::config::ExecutorSettings;
use crate::error::ExecError;
use crate::identity::{platform_strategy, IdentityStrategy};
use crate::script::Script;

/// Time the relays get to reach end-of-stream after a deadline kill
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Outcome delivered through the completion signal
pub type Outcome = Result<(), ExecError>;

/// One-shot completion signal of an execution
///
/// Resolves once the process has exited and both output relays have drained.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Outcome>,
}

fn supervisor_gone() -> ExecError {
    ExecError::Io(std::io::Error::other("execution supervisor stopped without a result"))
}

impl Completion {
    /// Block the current thread until the outcome is published
    ///
    /// Must not be called from inside an async context.
    pub fn blocking_wait(self) -> Outcome {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(supervisor_gone()))
    }

    /// The outcome, if it has already been published
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(supervisor_gone())),
        }
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(supervisor_gone())))
    }
}

/// Handles to a running execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub stdout: StreamRelay,
    pub stderr: StreamRelay,
    pub finished: Completion,
    pub deadline: DeadlineContext,
    pid: Option<u32>,
    command: String,
    killed: watch::Receiver<bool>,
}

impl ExecutionResult {
    /// OS process id of the child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Read both streams to the end, then wait for the outcome
    pub async fn wait_with_output(self) -> CapturedOutput {
        let (stdout, stderr) = tokio::join!(self.stdout.read_all(), self.stderr.read_all());
        let outcome = self.finished.await;
        CapturedOutput {
            stdout,
            stderr,
            outcome,
        }
    }

    /// `wait_with_output`, but give up on the streams once the deadline has killed the process
    ///
    /// A descendant that left the process group can hold the pipes open after the kill. If the
    /// streams have not ended shortly after the kill, the output is abandoned and the outcome is
    /// `DeadlineExceeded`.
    pub async fn wait_within_deadline(self) -> CapturedOutput {
        let command = self.command.clone();
        let timeout = self.deadline.timeout().unwrap_or_default();
        let deadline = self.deadline.clone();
        let mut killed = self.killed.clone();

        let enforced = async move {
            deadline.expired().await;
            // Closed once the supervisor is gone, which also ends the wait
            let _ = killed.wait_for(|k| *k).await;
            tokio::time::sleep(KILL_DRAIN_GRACE).await;
        };

        tokio::select! {
            biased;
            captured = self.wait_with_output() => captured,
            _ = enforced => {
                tracing::warn!(command = %command, "output still open after deadline kill, abandoning it");
                CapturedOutput {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    outcome: Err(ExecError::DeadlineExceeded { command, timeout }),
                }
            }
        }
    }
}

/// Fully drained output of an execution plus its outcome
#[derive(Debug)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outcome: Outcome,
}

impl CapturedOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut bytes = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        bytes.extend_from_slice(&self.stdout);
        bytes.extend_from_slice(&self.stderr);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Combined output, or the outcome's error
    pub fn into_combined(self) -> Result<String, ExecError> {
        let combined = self.combined();
        self.outcome.map(|()| combined)
    }

    /// Separate stdout and stderr, or the outcome's error
    pub fn into_separate(self) -> Result<(String, String), ExecError> {
        let (stdout, stderr) = (self.stdout_string(), self.stderr_string());
        self.outcome.map(|()| (stdout, stderr))
    }
}

/// Launches commands with a fixed set of defaults
///
/// Every `execute*` entry point expects to run inside a Tokio runtime; the blocking
/// wrappers build their own.
#[derive(Clone)]
pub struct Executor {
    environment: Option<Vec<String>>,
    user: Option<String>,
    shell: Option<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    identity: Arc<dyn IdentityStrategy>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field(
                "environment",
                &self.environment.as_ref().map(|entries| entries.len()),
            )
            .field("user", &self.user)
            .field("shell", &self.shell)
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Executor that inherits the live environment and uses the platform identity strategy
    pub fn new() -> Self {
        Self {
            environment: None,
            user: None,
            shell: None,
            working_dir: None,
            timeout: Duration::ZERO,
            identity: platform_strategy(),
        }
    }

    /// Executor built from the `[executor]` config section
    pub fn from_config(settings: &ExecutorSettings) -> Self {
        let mut executor = Self::new();
        executor.environment = settings.environment.clone();
        executor.user = settings.user.clone().filter(|u| !u.is_empty());
        executor.shell = settings.shell.clone().filter(|s| !s.is_empty());
        executor.working_dir = settings.working_dir.clone();
        executor.timeout = Duration::from_secs(settings.timeout);
        executor
    }

    /// Replace the environment passed to children
    pub fn with_environment<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environment = Some(entries.into_iter().map(Into::into).collect());
        self
    }

    /// Freeze the current process environment as the child environment
    pub fn with_inherited_environment(mut self) -> Self {
        self.environment = Some(
            std::env::vars()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect(),
        );
        self
    }

    /// Run every command as `user`
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Hand every command string to `shell`
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Hand every command string to the platform shell
    pub fn with_default_shell(self) -> Self {
        self.with_shell(DEFAULT_SHELL)
    }

    /// Working directory for children; `~` is expanded at launch
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Default deadline; zero means unbounded
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Swap the identity strategy
    pub fn with_identity_strategy(mut self, identity: Arc<dyn IdentityStrategy>) -> Self {
        self.identity = identity;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build a spec for `command` carrying this executor's defaults
    pub fn spec(&self, command: &str) -> CommandSpec {
        CommandSpec {
            command: command.to_string(),
            environment: self.environment.clone(),
            user: self.user.clone(),
            shell: self.shell.clone(),
            working_dir: self.working_dir.clone(),
            timeout: self.timeout,
        }
    }

    /// Run every synchronous step of a launch without starting anything
    pub fn prepare(&self, spec: &CommandSpec) -> Result<PreparedCommand, ExecError> {
        PreparedCommand::prepare(spec, self.identity.as_ref())
    }

    /// Start `spec`, optionally feeding `input` to its stdin
    ///
    /// # Errors
    /// Only preparation and spawn failures are returned here. Everything that happens after
    /// the process starts is delivered through `ExecutionResult::finished`.
    pub fn launch(
        &self,
        spec: &CommandSpec,
        input: Option<PipeReader>,
    ) -> Result<ExecutionResult, ExecError> {
        self.launch_with_keepalive(spec, input, None)
    }

    pub(crate) fn launch_with_keepalive(
        &self,
        spec: &CommandSpec,
        input: Option<PipeReader>,
        keepalive: Option<TempPath>,
    ) -> Result<ExecutionResult, ExecError> {
        let prepared = self.prepare(spec)?;
        let command = prepared.display.clone();
        let timeout = prepared.timeout;

        let spawned = prepared.spawn(StdioMode::Piped {
            stdin: input.is_some(),
        })?;
        let pid = spawned.process.id();

        let stdout = StreamRelay::new(StreamKind::Stdout);
        let stderr = StreamRelay::new(StreamKind::Stderr);
        attach(&stdout, spawned.stdout);
        attach(&stderr, spawned.stderr);

        if let (Some(mut input), Some(mut stdin)) = (input, spawned.stdin) {
            tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut input, &mut stdin).await {
                    tracing::debug!(error = %e, "stdin feed stopped early");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let deadline = DeadlineContext::start(timeout);
        let (tx, rx) = oneshot::channel();
        let (killed_tx, killed) = watch::channel(false);

        tokio::spawn(supervise(Supervision {
            process: spawned.process,
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            deadline: deadline.clone(),
            command: command.clone(),
            timeout,
            tx,
            killed: killed_tx,
            keepalive,
        }));

        Ok(ExecutionResult {
            stdout,
            stderr,
            finished: Completion { rx },
            deadline,
            pid,
            command,
            killed,
        })
    }

    /// Start `command` with the executor's defaults
    pub fn execute_async(&self, command: &str) -> Result<ExecutionResult, ExecError> {
        self.launch(&self.spec(command), None)
    }

    /// Start `command` with an explicit deadline
    pub fn execute_async_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        self.launch(&self.spec(command).with_timeout(timeout), None)
    }

    /// Start `command`, copying `input` into its stdin and then closing it
    pub fn execute_async_with_input<R>(
        &self,
        command: &str,
        input: R,
    ) -> Result<ExecutionResult, ExecError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.launch(&self.spec(command), Some(Box::new(input)))
    }

    /// Run `spec` to completion and collect its output
    ///
    /// Returns by the deadline at the latest; see `ExecutionResult::wait_within_deadline`.
    pub async fn output(&self, spec: &CommandSpec) -> Result<CapturedOutput, ExecError> {
        Ok(self.launch(spec, None)?.wait_within_deadline().await)
    }

    /// Run a script; its temp file lives until the process has finished
    pub fn execute_script_async(&self, script: &Script) -> Result<ExecutionResult, ExecError> {
        let built = script.build()?;
        let spec = self
            .spec(&built.command)
            .with_shell(built.shell.clone());
        self.launch_with_keepalive(&spec, None, built.into_temp_path())
    }

    /// Run `command` attached to the caller's terminal
    pub async fn execute_tty(&self, command: &str) -> Result<(), ExecError> {
        let prepared = self.prepare(&self.spec(command))?;
        let command = prepared.display.clone();
        let timeout = prepared.timeout;

        let mut process = prepared.spawn(StdioMode::Inherit)?.process;
        let deadline = DeadlineContext::start(timeout);

        let status = tokio::select! {
            status = process.wait() => status,
            _ = deadline.expired() => {
                kill(&mut process);
                let _ = process.wait().await;
                return Err(ExecError::DeadlineExceeded { command, timeout });
            }
        };
        deadline.cancel();

        let status = status?;
        if !status.success() {
            return Err(ExecError::NonZeroExit {
                command,
                code: status.code(),
            });
        }
        Ok(())
    }
}

/// Spawn the drain task for one pipe
fn attach(relay: &StreamRelay, pipe: Option<PipeReader>) {
    match pipe {
        Some(pipe) => {
            tokio::spawn(relay.clone().drain_from(pipe));
        }
        None => relay.mark_producer_closed(),
    }
}

struct Supervision {
    process: ChildProcess,
    stdout: StreamRelay,
    stderr: StreamRelay,
    deadline: DeadlineContext,
    command: String,
    timeout: Duration,
    tx: oneshot::Sender<Outcome>,
    killed: watch::Sender<bool>,
    keepalive: Option<TempPath>,
}

fn kill(process: &mut ChildProcess) {
    tracing::debug!(pid = process.id(), "deadline expired, killing process");
    if let Err(e) = process.start_kill() {
        tracing::warn!(error = %e, "failed to kill process");
    }
}

/// Completion worker: drain, reap, publish, cancel
async fn supervise(job: Supervision) {
    let Supervision {
        mut process,
        stdout,
        stderr,
        deadline,
        command,
        timeout,
        tx,
        killed: killed_tx,
        keepalive,
    } = job;

    let mut killed = false;
    {
        let drained = async {
            tokio::join!(stdout.producer_closed(), stderr.producer_closed());
        };
        tokio::pin!(drained);

        loop {
            tokio::select! {
                _ = &mut drained => break,
                _ = deadline.expired(), if !killed => {
                    kill(&mut process);
                    killed = true;
                    killed_tx.send_replace(true);
                }
            }
        }
    }

    let status = if killed {
        process.wait().await
    } else {
        tokio::select! {
            status = process.wait() => status,
            _ = deadline.expired() => {
                kill(&mut process);
                killed = true;
                killed_tx.send_replace(true);
                process.wait().await
            }
        }
    };

    let outcome = classify(
        status,
        killed,
        &command,
        timeout,
        [
            (StreamKind::Stdout, stdout.take_error()),
            (StreamKind::Stderr, stderr.take_error()),
        ],
    );

    tracing::debug!(command = %command, ok = outcome.is_ok(), "execution finished");
    if tx.send(outcome).is_err() {
        tracing::trace!(command = %command, "completion receiver dropped");
    }
    deadline.cancel();
    drop(keepalive);
}

/// Map the exit status and any stream failures to a single outcome
///
/// Priority: deadline, then exit status, then the first stream error. Stream errors that
/// lose to a higher-priority failure are logged.
fn classify(
    status: std::io::Result<ExitStatus>,
    killed: bool,
    command: &str,
    timeout: Duration,
    stream_errors: [(StreamKind, Option<std::io::Error>); 2],
) -> Outcome {
    let primary = match status {
        Err(e) => Some(ExecError::Io(e)),
        Ok(_) if killed => Some(ExecError::DeadlineExceeded {
            command: command.to_string(),
            timeout,
        }),
        Ok(status) if !status.success() => Some(ExecError::NonZeroExit {
            command: command.to_string(),
            code: status.code(),
        }),
        Ok(_) => None,
    };

    let mut outcome = primary.map_or(Ok(()), Err);
    for (stream, error) in stream_errors {
        let Some(source) = error else { continue };
        if outcome.is_ok() {
            outcome = Err(ExecError::Stream { stream, source });
        } else {
            tracing::warn!(command = %command, %stream, error = %source, "secondary stream error");
        }
    }
    outcome
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::IdentityError;
    use crate::executor::DeadlineState;
    use crate::identity::MockIdentityStrategy;

    #[test]
    fn test_executor_defaults() {
        let executor = Executor::new();
        let spec = executor.spec("ls");

        assert_eq!(spec.command, "ls");
        assert!(spec.environment.is_none());
        assert!(spec.user.is_none());
        assert!(spec.shell.is_none());
        assert!(spec.timeout.is_zero());
    }

    #[test]
    fn test_executor_builder() {
        let executor = Executor::new()
            .with_environment(["PATH=/usr/bin"])
            .with_user("builder")
            .with_default_shell()
            .with_working_dir("/tmp")
            .with_timeout(Duration::from_secs(30));

        let spec = executor.spec("make");
        assert_eq!(spec.environment, Some(vec!["PATH=/usr/bin".to_string()]));
        assert_eq!(spec.user.as_deref(), Some("builder"));
        assert_eq!(spec.shell.as_deref(), Some(DEFAULT_SHELL));
        assert_eq!(spec.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_inherited_environment_snapshot() {
        let executor = Executor::new().with_inherited_environment();
        let env = executor.spec("env").environment.unwrap();
        assert_eq!(env.len(), std::env::vars().count());
    }

    #[test]
    fn test_from_config() {
        let settings = ExecutorSettings {
            environment: None,
            user: Some(String::new()),
            shell: Some("/bin/bash".to_string()),
            working_dir: None,
            timeout: 5,
        };
        let executor = Executor::from_config(&settings);

        assert!(executor.user.is_none());
        assert_eq!(executor.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(executor.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_classify_priority() {
        use std::os::unix::process::ExitStatusExt;

        let ok = ExitStatus::from_raw(0);
        let failed = ExitStatus::from_raw(3 << 8);
        let none = || [(StreamKind::Stdout, None), (StreamKind::Stderr, None)];

        assert!(classify(Ok(ok), false, "x", Duration::ZERO, none()).is_ok());

        let err = classify(Ok(failed), false, "x", Duration::ZERO, none()).unwrap_err();
        assert_eq!(err.exit_code(), Some(3));

        let err = classify(Ok(failed), true, "x", Duration::from_secs(1), none()).unwrap_err();
        assert!(matches!(err, ExecError::DeadlineExceeded { .. }));

        let err = classify(
            Ok(ok),
            false,
            "x",
            Duration::ZERO,
            [
                (StreamKind::Stdout, None),
                (StreamKind::Stderr, Some(std::io::Error::other("broken"))),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExecError::Stream {
                stream: StreamKind::Stderr,
                ..
            }
        ));

        let err = classify(
            Ok(failed),
            false,
            "x",
            Duration::ZERO,
            [
                (StreamKind::Stdout, Some(std::io::Error::other("broken"))),
                (StreamKind::Stderr, None),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::NonZeroExit { .. }));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_synchronous() {
        let err = Executor::new()
            .execute_async("execrelay-does-not-exist")
            .unwrap_err();
        assert!(matches!(err, ExecError::Lookup { .. }));
        assert!(err.is_synchronous());
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let err = Executor::new().execute_async("   ").unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_identity_failure_starts_nothing() {
        let mut mock = MockIdentityStrategy::new();
        mock.expect_resolve().times(1).returning(|user| {
            Err(IdentityError::UserNotFound {
                user: user.to_string(),
            })
        });

        let executor = Executor::new()
            .with_identity_strategy(Arc::new(mock))
            .with_user("nobody-here");
        let err = executor.execute_async("whoami").unwrap_err();
        assert!(matches!(
            err,
            ExecError::Identity(IdentityError::UserNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_echo_combined_output() {
        let captured = Executor::new()
            .execute_async("echo Hello, World!")
            .unwrap()
            .wait_with_output()
            .await;

        assert!(captured.outcome.is_ok());
        assert_eq!(captured.combined(), "Hello, World!\n");
    }

    #[tokio::test]
    async fn test_streams_are_separate() {
        let captured = Executor::new()
            .with_default_shell()
            .execute_async("echo out; echo err >&2")
            .unwrap()
            .wait_with_output()
            .await;

        assert!(captured.outcome.is_ok());
        assert_eq!(captured.stdout_string(), "out\n");
        assert_eq!(captured.stderr_string(), "err\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let captured = Executor::new()
            .with_default_shell()
            .execute_async("echo before; exit 7")
            .unwrap()
            .wait_with_output()
            .await;

        assert_eq!(captured.stdout_string(), "before\n");
        match captured.outcome {
            Err(ExecError::NonZeroExit { code, .. }) => assert_eq!(code, Some(7)),
            other => panic!("expected non-zero exit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let result = Executor::new()
            .execute_async_with_timeout("sleep 5", Duration::from_millis(300))
            .unwrap();
        let deadline = result.deadline.clone();

        let started = std::time::Instant::now();
        let captured = result.wait_with_output().await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(captured.stdout.is_empty());
        assert!(matches!(
            captured.outcome,
            Err(ExecError::DeadlineExceeded { .. })
        ));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_deadline_reaches_grandchildren() {
        let result = Executor::new()
            .with_default_shell()
            .execute_async_with_timeout("sleep 5 & sleep 5; wait", Duration::from_millis(300))
            .unwrap();

        let started = std::time::Instant::now();
        let captured = result.wait_with_output().await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(
            captured.outcome,
            Err(ExecError::DeadlineExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_completion_cancels_deadline() {
        let result = Executor::new()
            .execute_async_with_timeout("true", Duration::from_secs(30))
            .unwrap();
        let deadline = result.deadline.clone();

        assert!(result.wait_with_output().await.outcome.is_ok());
        assert_eq!(deadline.state(), DeadlineState::Cancelled);
    }

    #[tokio::test]
    async fn test_stdin_input() {
        let result = Executor::new()
            .execute_async_with_input("cat", std::io::Cursor::new(b"Hello, World!".to_vec()))
            .unwrap();

        let captured = result.wait_with_output().await;
        assert!(captured.outcome.is_ok());
        assert_eq!(captured.stdout_string(), "Hello, World!");
    }

    #[tokio::test]
    async fn test_stdin_is_null_without_input() {
        let captured = Executor::new()
            .execute_async("cat")
            .unwrap()
            .wait_with_output()
            .await;
        assert!(captured.outcome.is_ok());
        assert!(captured.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_environment_replaces_inherited() {
        let captured = Executor::new()
            .with_environment(["ONLY_VAR=present"])
            .execute_async("/usr/bin/env")
            .unwrap()
            .wait_with_output()
            .await;

        assert!(captured.outcome.is_ok());
        assert_eq!(captured.stdout_string(), "ONLY_VAR=present\n");
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().canonicalize().unwrap();

        let captured = Executor::new()
            .with_working_dir(dir.path())
            .execute_async("pwd -P")
            .unwrap()
            .wait_with_output()
            .await;

        assert!(captured.outcome.is_ok());
        assert_eq!(
            captured.stdout_string().trim(),
            canonical.to_string_lossy()
        );
    }

    #[tokio::test]
    async fn test_large_output_does_not_stall() {
        // Far beyond a pipe buffer; the child would block if nothing drained it
        let result = Executor::new()
            .with_default_shell()
            .execute_async_with_timeout(
                "head -c 1048576 /dev/zero",
                Duration::from_secs(20),
            )
            .unwrap();

        let outcome = result.finished.await;
        assert!(outcome.is_ok());
        assert_eq!(result.stdout.read_all().await.len(), 1_048_576);
    }

    #[tokio::test]
    async fn test_run_as_current_user() {
        // SAFETY: getuid/getgid cannot fail
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };

        let mut mock = MockIdentityStrategy::new();
        mock.expect_resolve()
            .withf(|name| name == "me")
            .times(1)
            .returning(move |_| Ok(crate::identity::LaunchCredential::Posix { uid, gid }));

        let captured = Executor::new()
            .with_identity_strategy(Arc::new(mock))
            .with_user("me")
            .execute_async("id -u")
            .unwrap()
            .wait_with_output()
            .await;

        assert!(captured.outcome.is_ok());
        assert_eq!(captured.stdout_string().trim(), uid.to_string());
    }

    #[tokio::test]
    async fn test_completion_try_outcome() {
        let mut result = Executor::new().execute_async("true").unwrap();
        result.stdout.producer_closed().await;
        result.stderr.producer_closed().await;

        let outcome = loop {
            if let Some(outcome) = result.finished.try_outcome() {
                break outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert!(outcome.is_ok());
    }
}
