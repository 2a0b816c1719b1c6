//! Configuration model for execrelay
//!
//! Defines the structure for XDG-compliant layered configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::command::split_env_entry;
use crate::error::ExecError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Defaults applied to every command the executor launches
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Log output settings for the binary
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Executor defaults
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// `KEY=VALUE` entries replacing the inherited environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Vec<String>>,

    /// Account to run commands as (empty = current user)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Shell that receives the whole command string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Working directory for commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Deadline in seconds (0 = no deadline)
    #[serde(default)]
    pub timeout: u64,
}

impl ExecutorSettings {
    /// Reject settings no launch could use
    pub fn check(&self) -> Result<(), ExecError> {
        if let Some(entry) = self
            .environment
            .iter()
            .flatten()
            .find(|entry| split_env_entry(entry).is_none())
        {
            return Err(ExecError::Config(format!(
                "executor.environment entry {:?} is not KEY=VALUE",
                entry
            )));
        }
        if self.shell.as_deref() == Some("") {
            return Err(ExecError::Config("executor.shell must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// Log line format
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_settings() {
        assert!(ExecutorSettings::default().check().is_ok());

        let settings = ExecutorSettings {
            environment: Some(vec!["A=1".to_string(), "=C:=C:\\".to_string()]),
            ..Default::default()
        };
        assert!(settings.check().is_ok());

        let settings = ExecutorSettings {
            environment: Some(vec!["NOVALUE".to_string()]),
            ..Default::default()
        };
        assert!(matches!(settings.check(), Err(ExecError::Config(_))));

        let settings = ExecutorSettings {
            shell: Some(String::new()),
            ..Default::default()
        };
        assert!(settings.check().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.executor.timeout, 0);
        assert!(config.executor.environment.is_none());
        assert!(config.executor.shell.is_none());
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let toml = r#"
            [executor]
            timeout = 60
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.executor.timeout, 60);
        // Defaults should still apply
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
            [executor]
            environment = ["PATH=/usr/bin:/bin", "LANG=C"]
            user = "deploy"
            shell = "/bin/bash"
            working_dir = "~/work"
            timeout = 120

            [logging]
            level = "execrelay=debug"
            format = "json"
        "#;

        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.executor.environment,
            Some(vec!["PATH=/usr/bin:/bin".to_string(), "LANG=C".to_string()])
        );
        assert_eq!(config.executor.user.as_deref(), Some("deploy"));
        assert_eq!(config.executor.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.executor.working_dir, Some(PathBuf::from("~/work")));
        assert_eq!(config.executor.timeout, 120);
        assert_eq!(config.logging.level, "execrelay=debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let toml = r#"
            [logging]
            format = "xml"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_serialize_skips_unset_fields() {
        let rendered = toml::to_string(&Config::default()).unwrap();
        assert!(rendered.contains("timeout = 0"));
        assert!(!rendered.contains("shell"));
    }
}
