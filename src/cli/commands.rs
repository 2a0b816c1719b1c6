//! CLI command definitions using clap
//!
//! Defines all CLI subcommands and their arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::script::ScriptType;

/// Launch processes and relay their output live.
///
/// Commands are tokenized with quote-aware splitting (or handed to a shell), can run as
/// another user, and can be bounded by a deadline that kills the whole process group.
#[derive(Parser, Debug)]
#[command(name = "execrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (overrides default XDG paths)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command and print its captured output
    Run(RunArgs),

    /// Run a command and relay its output while it runs
    Stream(StreamArgs),

    /// Run a command attached to this terminal
    Tty(TtyArgs),

    /// Show how a command line splits into arguments
    Tokenize(TokenizeArgs),

    /// Run a PowerShell, Bash or Python script
    Script(ScriptArgs),

    /// Show resolved configuration
    Config(ConfigArgs),
}

/// Options shared by every subcommand that launches a process
#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    /// Timeout in seconds (0 for no timeout; defaults to the configured value)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Run as this user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Pass the command string to this shell instead of tokenizing it
    #[arg(long, conflicts_with = "default_shell")]
    pub shell: Option<String>,

    /// Pass the command string to the platform shell
    #[arg(long)]
    pub default_shell: bool,

    /// Working directory
    #[arg(short = 'd', long = "dir")]
    pub working_dir: Option<String>,

    /// Environment entries in KEY=VALUE format, added to the inherited environment
    #[arg(short = 'e', long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Start from an empty environment instead of inheriting
    #[arg(long)]
    pub clear_env: bool,
}

impl LaunchArgs {
    /// Environment entries to apply, or None to keep the configured environment
    ///
    /// `-e` entries extend `configured` when one is set, otherwise the inherited environment.
    /// `--clear-env` starts from nothing.
    pub fn environment(&self, configured: Option<&[String]>) -> Option<Vec<String>> {
        if self.env.is_empty() && !self.clear_env {
            return None;
        }

        let mut entries: Vec<String> = match configured {
            _ if self.clear_env => Vec::new(),
            Some(configured) => configured.to_vec(),
            None => std::env::vars().map(|(k, v)| format!("{}={}", k, v)).collect(),
        };
        entries.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        Some(entries)
    }
}

/// Arguments for the `run` subcommand
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Command line to run
    #[arg(required = true)]
    pub command: String,

    #[command(flatten)]
    pub launch: LaunchArgs,

    /// Print stdout and stderr separately instead of combined
    #[arg(long)]
    pub separate: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `stream` subcommand
#[derive(Parser, Debug)]
pub struct StreamArgs {
    /// Command line to run
    #[arg(required = true)]
    pub command: String,

    #[command(flatten)]
    pub launch: LaunchArgs,

    /// Forward this process's stdin to the command
    ///
    /// Input is read until end-of-file; the command may finish before that, in which case
    /// remaining input is ignored.
    #[arg(long)]
    pub stdin: bool,
}

/// Arguments for the `tty` subcommand
#[derive(Parser, Debug)]
pub struct TtyArgs {
    /// Command line to run
    #[arg(required = true)]
    pub command: String,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

/// Arguments for the `tokenize` subcommand
#[derive(Parser, Debug)]
pub struct TokenizeArgs {
    /// Command line to split
    pub command: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: TokenFormat,
}

/// Arguments for the `script` subcommand
#[derive(Parser, Debug)]
pub struct ScriptArgs {
    /// Script language
    #[arg(short, long, value_enum)]
    pub kind: ScriptKind,

    /// Script file to run
    #[arg(required_unless_present = "inline", conflicts_with = "inline")]
    pub path: Option<String>,

    /// Inline script source
    #[arg(long)]
    pub inline: Option<String>,

    /// Named parameters in KEY=VALUE format
    #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Positional arguments passed to the script
    #[arg(last = true)]
    pub args: Vec<String>,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

/// Script language options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScriptKind {
    Powershell,
    Bash,
    Python,
}

impl From<ScriptKind> for ScriptType {
    fn from(kind: ScriptKind) -> Self {
        match kind {
            ScriptKind::Powershell => ScriptType::PowerShell,
            ScriptKind::Bash => ScriptType::Bash,
            ScriptKind::Python => ScriptType::Python,
        }
    }
}

/// Arguments for the `config` subcommand
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Text,
    /// JSON output
    Json,
}

/// Token output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TokenFormat {
    /// One token per line
    Plain,
    /// JSON array
    Json,
}

/// Parse KEY=VALUE argument
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid argument '{}': expected KEY=VALUE format", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
