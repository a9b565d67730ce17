//! Configuration parsing and types.

pub mod env;
pub mod parser;
pub mod types;
pub mod validate;

use std::path::Path;

use crate::common::error::ConfigError;

pub use parser::load_config;
pub use types::*;
pub use validate::validate_config;

/// Load a config file, apply environment overrides and validate it.
///
/// The outer error means the file itself is unusable. Each bridge then
/// carries its own validation result.
pub fn load_and_validate(
    path: impl AsRef<Path>,
) -> Result<Vec<Result<BridgeConfig, ConfigError>>, ConfigError> {
    let config = env::apply_env_overrides(load_config(path)?);
    validate_config(&config)
}
