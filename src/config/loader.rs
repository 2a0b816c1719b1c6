//! Layered configuration loading
//!
//! Layers, lowest priority first:
//! 1. `/etc/execrelay/config.toml`
//! 2. `$XDG_CONFIG_HOME/execrelay/config.toml`
//! 3. `~/.execrelay.toml`
//! 4. `./.execrelay.toml`
//! 5. the `--config` file
//!
//! `EXECRELAY_` environment variables override every file.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::Serialize;

use super::model::Config;

const APP_NAME: &str = "execrelay";

/// Prefix for environment overrides; `__` separates nested keys
/// (`EXECRELAY_EXECUTOR__TIMEOUT=30` sets `executor.timeout`)
pub const ENV_PREFIX: &str = "EXECRELAY_";

/// Where a configuration layer comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerScope {
    System,
    User,
    Home,
    Project,
    Override,
}

impl fmt::Display for LayerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerScope::System => "system",
            LayerScope::User => "user",
            LayerScope::Home => "home",
            LayerScope::Project => "project",
            LayerScope::Override => "override",
        };
        f.write_str(name)
    }
}

/// One candidate configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigLayer {
    pub scope: LayerScope,
    pub path: PathBuf,
}

impl ConfigLayer {
    fn new(scope: LayerScope, path: impl Into<PathBuf>) -> Self {
        Self {
            scope,
            path: path.into(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Every candidate layer in merge order, whether or not the file exists
pub fn config_layers(override_path: Option<&str>) -> Vec<ConfigLayer> {
    let mut layers = vec![ConfigLayer::new(
        LayerScope::System,
        format!("/etc/{}/config.toml", APP_NAME),
    )];

    if let Some(config_dir) = dirs::config_dir() {
        layers.push(ConfigLayer::new(
            LayerScope::User,
            config_dir.join(APP_NAME).join("config.toml"),
        ));
    }
    if let Some(home) = dirs::home_dir() {
        layers.push(ConfigLayer::new(
            LayerScope::Home,
            home.join(format!(".{}.toml", APP_NAME)),
        ));
    }
    layers.push(ConfigLayer::new(
        LayerScope::Project,
        format!(".{}.toml", APP_NAME),
    ));

    if let Some(path) = override_path {
        layers.push(ConfigLayer::new(LayerScope::Override, path));
    }
    layers
}

/// Layers whose file is present
pub fn active_layers(override_path: Option<&str>) -> Vec<ConfigLayer> {
    config_layers(override_path)
        .into_iter()
        .filter(ConfigLayer::exists)
        .collect()
}

/// Merge defaults, every present layer, then the environment
///
/// A missing `--config` file is logged and skipped.
pub fn load_config(override_path: Option<&str>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    for layer in config_layers(override_path) {
        if layer.exists() {
            tracing::debug!(scope = %layer.scope, path = %layer.path.display(), "loading config layer");
            figment = figment.merge(Toml::file(&layer.path));
        } else if layer.scope == LayerScope::Override {
            tracing::warn!(path = %layer.path.display(), "config file not found");
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract().context("Failed to load configuration")?;
    config.executor.check()?;
    Ok(config)
}

/// Path new user-level configuration should be written to
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_layer_order() {
        let layers = config_layers(Some("custom.toml"));
        let scopes: Vec<LayerScope> = layers.iter().map(|l| l.scope).collect();

        assert_eq!(scopes.first(), Some(&LayerScope::System));
        assert_eq!(scopes.last(), Some(&LayerScope::Override));
        assert!(layers[0].path.starts_with("/etc/execrelay"));

        let project = layers
            .iter()
            .find(|l| l.scope == LayerScope::Project)
            .unwrap();
        assert_eq!(project.path, PathBuf::from(".execrelay.toml"));
    }

    #[test]
    fn test_no_override_layer_without_path() {
        assert!(config_layers(None)
            .iter()
            .all(|l| l.scope != LayerScope::Override));
    }

    #[test]
    fn test_load_config_from_override() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("test-config.toml");

        fs::write(
            &config_path,
            r#"
            [executor]
            shell = "/bin/bash"
            timeout = 45

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        let path = config_path.to_str().unwrap();
        let config = load_config(Some(path)).unwrap();

        assert_eq!(config.executor.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.executor.timeout, 45);
        assert_eq!(config.logging.format, crate::config::LogFormat::Json);

        let active = active_layers(Some(path));
        assert_eq!(active.last().map(|l| l.scope), Some(LayerScope::Override));
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("broken.toml");
        fs::write(&config_path, "[executor]\ntimeout = \"soon\"\n").unwrap();

        assert!(load_config(Some(config_path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_malformed_environment_entry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("env.toml");
        fs::write(&config_path, "[executor]\nenvironment = [\"PATH\"]\n").unwrap();

        let err = load_config(Some(config_path.to_str().unwrap())).unwrap_err();
        assert!(format!("{:#}", err).contains("PATH"));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EXECRELAY_EXECUTOR__USER", "env-user");
            jail.set_env("EXECRELAY_EXECUTOR__TIMEOUT", "12");

            let config = load_config(None).map_err(|e| format!("{:#}", e))?;
            assert_eq!(config.executor.user.as_deref(), Some("env-user"));
            assert_eq!(config.executor.timeout, 12);
            Ok(())
        });
    }

    #[test]
    fn test_project_layer_in_working_dir() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(".execrelay.toml", "[executor]\nshell = \"/bin/sh\"\n")?;

            let config = load_config(None).map_err(|e| format!("{:#}", e))?;
            assert_eq!(config.executor.shell.as_deref(), Some("/bin/sh"));
            assert!(active_layers(None)
                .iter()
                .any(|l| l.scope == LayerScope::Project));
            Ok(())
        });
    }

    #[test]
    fn test_missing_override_file_uses_defaults() {
        let config = load_config(Some("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_default_config_file() {
        if let Some(path) = default_config_file() {
            assert!(path.ends_with("execrelay/config.toml"));
        }
    }
}
