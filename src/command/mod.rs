//! Command-line parsing and launch descriptions

pub mod fields;
pub mod spec;

pub use fields::tokenize;
pub use spec::{shell_flag, split_env_entry, CommandSpec, DEFAULT_SHELL};
