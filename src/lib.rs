//! execrelay - Process launching with live, cancellable output relays
//!
//! Launches external processes and exposes their stdout and stderr as streams the caller
//! can read while the process runs:
//! - **Tokenizer** - quote-aware splitting of command lines
//! - **Stream relay** - decouples pipe draining from consumption
//! - **Executor** - prepare, start, drain, deadline, single completion signal
//! - **Identity** - run as another user (uid/gid on Unix, borrowed token on Windows)
//!
//! ## Features
//!
//! - Deadlines that kill the whole process group
//! - Blocking wrappers and a process-wide default executor
//! - PowerShell, Bash and Python script invocation
//! - XDG-compliant layered configuration for the CLI
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), execrelay::ExecError> {
//! let executor = execrelay::Executor::new();
//! let result = executor.execute_async("echo Hello, World!")?;
//! let captured = result.wait_with_output().await;
//! assert_eq!(captured.into_combined()?, "Hello, World!\n");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod logging;
pub mod script;

pub use command::{tokenize, CommandSpec};
pub use config::Config;
pub use error::{ClosedRelayError, ErrorInfo, ExecError, IdentityError, TokenizeError};
pub use executor::default::{
    execute, execute_async, execute_async_with_input, execute_async_with_timeout,
    execute_separate, execute_separate_with_timeout, execute_tty, execute_with_timeout,
};
pub use executor::{
    CapturedOutput, Completion, DeadlineContext, DeadlineState, ExecutionResult, Executor,
    StreamKind, StreamRelay,
};
pub use identity::{platform_strategy, IdentityStrategy, LaunchCredential};
pub use script::{BuiltScript, Script, ScriptSource, ScriptType};
