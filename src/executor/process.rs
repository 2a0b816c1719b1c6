//! Prepared commands and the child processes they spawn

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::command::{split_env_entry, CommandSpec};
use crate::error::ExecError;
use crate::identity::{IdentityStrategy, LaunchCredential};

/// Boxed readable pipe end
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed writable pipe end
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How the child's standard streams are connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// stdout/stderr piped; stdin piped when `stdin` is set, otherwise the null device
    Piped { stdin: bool },
    /// All three inherited from the caller
    Inherit,
}

/// A command that passed every synchronous check and is ready to spawn
#[derive(Debug)]
pub struct PreparedCommand {
    /// The command string as the caller gave it
    pub display: String,
    /// Resolved executable
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete environment; `None` inherits the caller's
    pub environment: Option<Vec<(String, String)>>,
    pub working_dir: Option<PathBuf>,
    pub credential: Option<LaunchCredential>,
    pub timeout: Duration,
}

impl PreparedCommand {
    /// Tokenize, resolve the executable, and obtain launch credentials
    ///
    /// No process exists when this fails.
    pub fn prepare(spec: &CommandSpec, identity: &dyn IdentityStrategy) -> Result<Self, ExecError> {
        let mut argv = spec.argv()?.into_iter();
        let program = argv.next().ok_or(ExecError::EmptyCommand)?;
        let args: Vec<String> = argv.collect();

        let resolved = which::which(&program).map_err(|source| ExecError::Lookup {
            program: program.clone(),
            source,
        })?;

        let environment = spec.environment.as_ref().map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match split_env_entry(entry) {
                    Some((key, value)) => Some((key.to_string(), value.to_string())),
                    None => {
                        tracing::warn!(entry = %entry, "ignoring environment entry without '='");
                        None
                    }
                })
                .collect()
        });

        let working_dir = spec
            .working_dir
            .as_ref()
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).as_ref()));

        let credential = match spec.target_user() {
            Some(user) => Some(identity.resolve(user)?),
            None => None,
        };

        tracing::debug!(
            program = %resolved.display(),
            args = ?args,
            user = spec.target_user(),
            "prepared command"
        );

        Ok(Self {
            display: spec.command.clone(),
            program: resolved,
            args,
            environment,
            working_dir,
            credential,
            timeout: spec.timeout,
        })
    }

    /// Start the process
    pub fn spawn(self, mode: StdioMode) -> Result<SpawnedChild, ExecError> {
        match self.credential {
            #[cfg(windows)]
            Some(LaunchCredential::Token(ref token)) => {
                super::token::spawn_with_token(&self, token, mode)
            }
            _ => self.spawn_native(mode),
        }
    }

    fn spawn_native(&self, mode: StdioMode) -> Result<SpawnedChild, ExecError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.kill_on_drop(true);

        if let Some(env) = &self.environment {
            cmd.env_clear();
            cmd.envs(env.iter().map(|(k, v)| (k, v)));
        }

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        match self.credential {
            #[cfg(unix)]
            Some(LaunchCredential::Posix { uid, gid }) => {
                cmd.uid(uid).gid(gid);
            }
            #[cfg(not(unix))]
            Some(LaunchCredential::Posix { .. }) => {
                return Err(crate::error::IdentityError::Unsupported.into());
            }
            _ => {}
        }

        let group = match mode {
            StdioMode::Piped { stdin } => {
                cmd.stdin(if stdin { Stdio::piped() } else { Stdio::null() });
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::piped());
                // Own process group so a deadline kill reaches grandchildren too
                #[cfg(unix)]
                cmd.process_group(0);
                cfg!(unix)
            }
            StdioMode::Inherit => {
                cmd.stdin(Stdio::inherit());
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
                false
            }
        };

        let mut child = cmd.spawn().map_err(|source| ExecError::Start {
            command: self.display.clone(),
            source,
        })?;

        tracing::debug!(pid = child.id(), command = %self.display, "spawned");

        let stdin = child.stdin.take().map(|p| Box::new(p) as PipeWriter);
        let stdout = child.stdout.take().map(|p| Box::new(p) as PipeReader);
        let stderr = child.stderr.take().map(|p| Box::new(p) as PipeReader);

        Ok(SpawnedChild {
            process: ChildProcess::Native { child, group },
            stdin,
            stdout,
            stderr,
        })
    }
}

/// A started process with whichever pipes were requested
pub struct SpawnedChild {
    pub process: ChildProcess,
    pub stdin: Option<PipeWriter>,
    pub stdout: Option<PipeReader>,
    pub stderr: Option<PipeReader>,
}

/// Handle to a running child
#[derive(Debug)]
pub enum ChildProcess {
    /// Spawned through `tokio::process`; `group` means it leads its own process group
    Native { child: Child, group: bool },
    /// Created with a borrowed user token
    #[cfg(windows)]
    Token(super::token::TokenChild),
}

impl ChildProcess {
    /// OS process id, while the process has not been reaped
    pub fn id(&self) -> Option<u32> {
        match self {
            ChildProcess::Native { child, .. } => child.id(),
            #[cfg(windows)]
            ChildProcess::Token(child) => Some(child.id()),
        }
    }

    /// Forcefully terminate the process (and its group, where it has one)
    pub fn start_kill(&mut self) -> std::io::Result<()> {
        match self {
            ChildProcess::Native { child, group } => {
                #[cfg(unix)]
                if *group {
                    if let Some(pid) = child.id() {
                        // SAFETY: killpg has no memory-safety preconditions
                        if unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) } == 0 {
                            return Ok(());
                        }
                        tracing::debug!(
                            pid,
                            error = %std::io::Error::last_os_error(),
                            "killpg failed, killing leader only"
                        );
                    }
                }
                #[cfg(not(unix))]
                let _ = group;
                child.start_kill()
            }
            #[cfg(windows)]
            ChildProcess::Token(child) => child.kill(),
        }
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        match self {
            ChildProcess::Native { child, .. } => child.wait().await,
            #[cfg(windows)]
            ChildProcess::Token(child) => child.wait().await,
        }
    }
}
