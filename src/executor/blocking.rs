//! Blocking wrappers over the async executor
//!
//! Each call builds a current-thread runtime, launches the command, drains both streams and
//! waits for the completion signal or the deadline, whichever comes first. Calling these from
//! inside a Tokio runtime panics; use the async API there.

use std::time::Duration;

use super::runner::{CapturedOutput, Executor};
use crate::command::CommandSpec;
use crate::error::ExecError;
use crate::script::Script;

impl Executor {
    /// Run `command` and return stdout followed by stderr
    pub fn execute(&self, command: &str) -> Result<String, ExecError> {
        self.capture_blocking(self.spec(command))?.into_combined()
    }

    /// Run `command` and return stdout and stderr separately
    pub fn execute_separate(&self, command: &str) -> Result<(String, String), ExecError> {
        self.capture_blocking(self.spec(command))?.into_separate()
    }

    /// `execute` with an explicit deadline
    pub fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        self.capture_blocking(self.spec(command).with_timeout(timeout))?
            .into_combined()
    }

    /// `execute_separate` with an explicit deadline
    pub fn execute_separate_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<(String, String), ExecError> {
        self.capture_blocking(self.spec(command).with_timeout(timeout))?
            .into_separate()
    }

    /// Run a script and return stdout and stderr separately
    pub fn execute_script(&self, script: &Script) -> Result<(String, String), ExecError> {
        block_on(async {
            let result = self.execute_script_async(script)?;
            Ok::<_, ExecError>(result.wait_within_deadline().await)
        })?
        .into_separate()
    }

    fn capture_blocking(&self, spec: CommandSpec) -> Result<CapturedOutput, ExecError> {
        block_on(self.output(&spec))
    }
}

/// Drive `future` on a fresh current-thread runtime
pub(crate) fn block_on<F, T>(future: F) -> Result<T, ExecError>
where
    F: std::future::Future<Output = Result<T, ExecError>>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ExecError::Io(std::io::Error::other(format!("Failed to create runtime: {}", e))))?;

    rt.block_on(future)
}
