//! Process-wide default executor
//!
//! Built on first use from a snapshot of the environment at that moment, and never
//! reconfigured afterwards. Later changes to the process environment are not seen by it.

use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::io::AsyncRead;

use super::runner::{ExecutionResult, Executor};
use crate::error::ExecError;

static DEFAULT_EXECUTOR: Lazy<Executor> = Lazy::new(|| {
    tracing::trace!("initializing default executor");
    Executor::new().with_inherited_environment()
});

/// The shared default executor
pub fn default_executor() -> &'static Executor {
    &DEFAULT_EXECUTOR
}

/// Run `command` and return stdout followed by stderr
pub fn execute(command: &str) -> Result<String, ExecError> {
    DEFAULT_EXECUTOR.execute(command)
}

/// Run `command` and return stdout and stderr separately
pub fn execute_separate(command: &str) -> Result<(String, String), ExecError> {
    DEFAULT_EXECUTOR.execute_separate(command)
}

pub fn execute_with_timeout(command: &str, timeout: Duration) -> Result<String, ExecError> {
    DEFAULT_EXECUTOR.execute_with_timeout(command, timeout)
}

pub fn execute_separate_with_timeout(
    command: &str,
    timeout: Duration,
) -> Result<(String, String), ExecError> {
    DEFAULT_EXECUTOR.execute_separate_with_timeout(command, timeout)
}

/// Start `command` on the current runtime
pub fn execute_async(command: &str) -> Result<ExecutionResult, ExecError> {
    DEFAULT_EXECUTOR.execute_async(command)
}

pub fn execute_async_with_timeout(
    command: &str,
    timeout: Duration,
) -> Result<ExecutionResult, ExecError> {
    DEFAULT_EXECUTOR.execute_async_with_timeout(command, timeout)
}

pub fn execute_async_with_input<R>(command: &str, input: R) -> Result<ExecutionResult, ExecError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    DEFAULT_EXECUTOR.execute_async_with_input(command, input)
}

/// Run `command` attached to the caller's terminal
pub async fn execute_tty(command: &str) -> Result<(), ExecError> {
    DEFAULT_EXECUTOR.execute_tty(command).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_default_executor_is_shared() {
        assert!(std::ptr::eq(default_executor(), default_executor()));
        assert!(default_executor().spec("x").environment.is_some());
    }

    #[test]
    fn test_free_execute() {
        assert_eq!(execute("echo hi").unwrap(), "hi\n");
    }

    #[test]
    fn test_free_execute_separate_with_timeout() {
        let err = execute_separate_with_timeout("sleep 5", Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ExecError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn test_free_execute_async_with_input() {
        let result = execute_async_with_input("cat", std::io::Cursor::new(b"piped".to_vec())).unwrap();
        let captured = result.wait_with_output().await;
        assert!(captured.outcome.is_ok());
        assert_eq!(captured.stdout_string(), "piped");
    }

    #[tokio::test]
    async fn test_free_execute_tty_exit_code() {
        let err = execute_tty("false").await.unwrap_err();
        assert!(matches!(err, ExecError::NonZeroExit { .. }));
    }
}
