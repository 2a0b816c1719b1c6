//! Common test utilities for execrelay tests

#![allow(dead_code)]

use std::path::PathBuf;
use tempfile::TempDir;

/// Creates a temporary directory holding a config file
pub fn create_config(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (dir, config_path)
}

/// Creates a temporary directory with a script file
pub fn create_script(script_name: &str, content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let script_path = dir.path().join(script_name);
    std::fs::write(&script_path, content).expect("Failed to write script");

    // Make script executable on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script_path)
            .expect("Failed to get metadata")
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).expect("Failed to set permissions");
    }

    (dir, script_path)
}

/// True when `program` can be found on PATH
pub fn has_program(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Config with a short timeout and a fixed log level
pub const SAMPLE_CONFIG: &str = r#"
[executor]
timeout = 30
environment = ["PATH=/usr/bin:/bin", "GREETING=configured"]

[logging]
level = "error"
format = "compact"
"#;

/// Bash script that echoes its positional arguments and named flags
pub const SAMPLE_BASH_SCRIPT: &str = r#"#!/bin/bash
set -e

echo "args: $*"
while [ $# -gt 0 ]; do
    case "$1" in
        --name)
            echo "name=$2"
            shift 2
            ;;
        *)
            shift
            ;;
    esac
done
echo "done" >&2
"#;
