//! Command execution module
//!
//! Provides process execution with:
//! - Live stdout/stderr relays readable while the process runs
//! - Deadline cancellation that kills the whole process group
//! - A single completion signal per execution
//! - Blocking wrappers and a process-wide default executor

pub mod blocking;
pub mod deadline;
pub mod default;
pub mod process;
pub mod relay;
pub mod runner;
#[cfg(windows)]
mod token;

pub use deadline::{DeadlineContext, DeadlineState};
pub use default::default_executor;
pub use process::{ChildProcess, PipeReader, PipeWriter, PreparedCommand, StdioMode};
pub use relay::{StreamKind, StreamRelay};
pub use runner::{CapturedOutput, Completion, ExecutionResult, Executor, Outcome};
