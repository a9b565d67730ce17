//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `PIERLINK_CONFIG` - Config file path
//! - `PIERLINK_DISCORD_TOKEN` - Discord bot token (all bridges)
//! - `PIERLINK_IRC_PASSWORD` - IRC server password (all bridges)

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "PIERLINK";

/// Apply environment variable overrides to a config.
///
/// This allows secrets to be provided via environment variables
/// instead of the config file.
pub fn apply_env_overrides(config: Config) -> Config {
    let token = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)).ok();
    let irc_password = env::var(format!("{}_IRC_PASSWORD", ENV_PREFIX)).ok();
    apply_overrides(config, token, irc_password)
}

fn apply_overrides(
    mut config: Config,
    token: Option<String>,
    irc_password: Option<String>,
) -> Config {
    for bridge in &mut config.bridges {
        if let Some(ref token) = token {
            bridge.discord.token = token.clone();
        }
        if let Some(ref password) = irc_password {
            bridge.irc.password = Some(password.clone());
        }
    }
    config
}

/// Get the config file path from environment or use default.
///
/// Checks `PIERLINK_CONFIG` environment variable, otherwise returns "pierlink.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "pierlink.conf".to_string())
}
