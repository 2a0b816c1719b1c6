//! What to launch and how
//!
//! Everything the executor needs to launch one process: the raw command string plus
//! environment, identity, shell, working directory and deadline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::fields::tokenize;
use crate::error::ExecError;

/// Default shell used by `with_default_shell`
#[cfg(windows)]
pub const DEFAULT_SHELL: &str = "cmd.exe";
/// Default shell used by `with_default_shell`
#[cfg(not(windows))]
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// A command to be executed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// The raw command line
    pub command: String,
    /// `KEY=VALUE` entries replacing the inherited environment (None = inherit)
    pub environment: Option<Vec<String>>,
    /// Account to run the process as
    pub user: Option<String>,
    /// Shell that receives the whole command string as one argument
    pub shell: Option<String>,
    /// Working directory for the process
    pub working_dir: Option<PathBuf>,
    /// Deadline for the process (zero = unbounded)
    pub timeout: Duration,
}

impl CommandSpec {
    /// Create a spec for a command line with no overrides
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Replace the inherited environment
    pub fn with_environment<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environment = Some(entries.into_iter().map(Into::into).collect());
        self
    }

    /// Run as another user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Pass the command string to a shell
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Set the working directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the deadline in seconds
    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    /// Target user, treating an empty name as "no switch"
    pub fn target_user(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty())
    }

    /// Deadline, if one is set
    pub fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Build the argument vector for this command
    ///
    /// With a shell override the result is `[shell, flag, command]`; otherwise the command
    /// string is tokenized.
    ///
    /// # Errors
    /// * `ExecError::Tokenize` - malformed quoting
    /// * `ExecError::EmptyCommand` - no arguments were produced
    pub fn argv(&self) -> Result<Vec<String>, ExecError> {
        if self.command.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        if let Some(shell) = self.shell.as_deref().filter(|s| !s.is_empty()) {
            return Ok(vec![
                shell.to_string(),
                shell_flag(shell).to_string(),
                self.command.clone(),
            ]);
        }

        let argv = tokenize(&self.command)?;
        if argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(argv)
    }
}

/// Flag a shell uses to run a command string
pub fn shell_flag(shell: &str) -> &'static str {
    let name = Path::new(shell)
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match name.as_str() {
        "cmd" => "/C",
        "powershell" | "pwsh" => "-Command",
        _ => "-c",
    }
}

/// Split a `KEY=VALUE` entry
///
/// A leading `=` belongs to the key (Windows keeps per-drive entries like `=C:=C:\`).
pub fn split_env_entry(entry: &str) -> Option<(&str, &str)> {
    let search_from = usize::from(entry.starts_with('='));
    let pos = entry[search_from..].find('=')? + search_from;
    Some((&entry[..pos], &entry[pos + 1..]))
}
