//! Script builder
//!
//! Renders a PowerShell, Bash or Python script invocation into a command string for the
//! executor. Inline sources are written to a temp file that lives until the process exits.
//! The command always goes through a shell so argument quoting is parsed by a real shell.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::command::DEFAULT_SHELL;
use crate::error::ExecError;

/// Supported script languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    PowerShell,
    Bash,
    Python,
}

/// How the hosting shell parses quotes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quoting {
    Posix,
    PowerShell,
    Cmd,
}

impl ScriptType {
    /// Interpreter executable
    pub fn interpreter(self) -> &'static str {
        match self {
            ScriptType::PowerShell if cfg!(windows) => "powershell",
            ScriptType::PowerShell => "pwsh",
            ScriptType::Bash => "bash",
            ScriptType::Python if cfg!(windows) => "python",
            ScriptType::Python => "python3",
        }
    }

    /// File extension for temp files, without the dot
    pub fn extension(self) -> &'static str {
        match self {
            ScriptType::PowerShell => "ps1",
            ScriptType::Bash => "sh",
            ScriptType::Python => "py",
        }
    }

    /// Prefix for named parameters
    pub fn flag_prefix(self) -> &'static str {
        match self {
            ScriptType::PowerShell => "-",
            ScriptType::Bash | ScriptType::Python => "--",
        }
    }

    /// Shell that hosts the rendered command, and its quoting rules
    fn host(self) -> (&'static str, Quoting) {
        match self {
            ScriptType::PowerShell => (self.interpreter(), Quoting::PowerShell),
            ScriptType::Bash if cfg!(windows) => ("bash", Quoting::Posix),
            ScriptType::Python if cfg!(windows) => (DEFAULT_SHELL, Quoting::Cmd),
            ScriptType::Bash | ScriptType::Python => (DEFAULT_SHELL, Quoting::Posix),
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptType::PowerShell => write!(f, "powershell"),
            ScriptType::Bash => write!(f, "bash"),
            ScriptType::Python => write!(f, "python"),
        }
    }
}

/// Where the script body comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline(String),
    Path(PathBuf),
}

/// A script invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub kind: ScriptType,
    pub source: ScriptSource,
    pub args: Vec<String>,
    pub params: BTreeMap<String, String>,
}

/// A rendered script ready to launch
#[derive(Debug)]
pub struct BuiltScript {
    /// Shell that receives `command`
    pub shell: String,
    pub command: String,
    file: Option<TempPath>,
}

impl BuiltScript {
    /// Path of the temp file holding an inline source
    pub fn temp_file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Hand over the temp file guard; the file is deleted when it drops
    pub fn into_temp_path(self) -> Option<TempPath> {
        self.file
    }
}

impl Script {
    /// Script from inline source text
    pub fn inline(kind: ScriptType, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: ScriptSource::Inline(source.into()),
            args: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Script from an existing file
    pub fn from_path(kind: ScriptType, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: ScriptSource::Path(path.into()),
            args: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append positional arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a named parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Render the invocation, writing inline sources to a temp file
    ///
    /// # Errors
    /// * `ExecError::Config` - a parameter name is not a plain identifier
    /// * `ExecError::Io` - the temp file could not be written
    pub fn build(&self) -> Result<BuiltScript, ExecError> {
        if let Some(key) = self.params.keys().find(|k| !is_param_name(k)) {
            return Err(ExecError::Config(format!(
                "invalid script parameter name: {:?}",
                key
            )));
        }

        let (file, path) = match &self.source {
            ScriptSource::Inline(body) => {
                let file = write_temp(self.kind, body)?;
                let path = file.to_path_buf();
                (Some(file), path)
            }
            ScriptSource::Path(path) => (None, path.clone()),
        };

        let (shell, quoting) = self.kind.host();
        let command = self.render(&path, quoting);
        tracing::debug!(kind = %self.kind, shell, command = %command, "built script");

        Ok(BuiltScript {
            shell: shell.to_string(),
            command,
            file,
        })
    }

    fn render(&self, path: &Path, quoting: Quoting) -> String {
        let mut parts = Vec::with_capacity(2 + self.args.len() + self.params.len() * 2);
        match self.kind {
            ScriptType::PowerShell => parts.push("&".to_string()),
            _ => parts.push(self.kind.interpreter().to_string()),
        }
        parts.push(quote(&path.to_string_lossy(), quoting));
        parts.extend(self.args.iter().map(|arg| quote(arg, quoting)));
        for (key, value) in &self.params {
            parts.push(format!("{}{}", self.kind.flag_prefix(), key));
            parts.push(quote(value, quoting));
        }
        parts.join(" ")
    }
}

fn write_temp(kind: ScriptType, body: &str) -> Result<TempPath, ExecError> {
    let mut file = tempfile::Builder::new()
        .prefix("execrelay-")
        .suffix(&format!(".{}", kind.extension()))
        .tempfile()?;
    file.write_all(body.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

fn is_param_name(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn quote(value: &str, quoting: Quoting) -> String {
    match quoting {
        Quoting::Posix => posix_quote(value),
        Quoting::PowerShell => format!("'{}'", value.replace('\'', "''")),
        Quoting::Cmd => format!("\"{}\"", value.replace('"', "\"\"")),
    }
}

fn posix_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
