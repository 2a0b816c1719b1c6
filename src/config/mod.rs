//! Configuration module for execrelay
//!
//! XDG-compliant layered configuration with environment variable overrides.

pub mod loader;
pub mod model;

pub use loader::{
    active_layers, config_layers, default_config_file, load_config, ConfigLayer, LayerScope,
    ENV_PREFIX,
};
pub use model::*;
