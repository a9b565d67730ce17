//! Configuration validation.
//!
//! Validates configuration values, provides helpful error messages and
//! builds the immutable per-bridge configuration.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::common::error::ConfigError;
use crate::common::Platform;
use crate::config::types::*;

/// Validate a configuration, producing one result per bridge in file order.
///
/// Each bridge is checked on its own so one broken bridge never takes the
/// healthy ones down with it. All problems of a bridge are reported
/// together. A repeated bridge name is an error of the later bridge only.
/// Only a file with no bridges at all is rejected outright.
pub fn validate_config(config: &Config) -> Result<Vec<Result<BridgeConfig, ConfigError>>, ConfigError> {
    if config.bridges.is_empty() {
        return Err(ConfigError::ValidationError {
            message: "bridges is empty - nothing to run".to_string(),
        });
    }

    let mut names = HashSet::new();
    let results = config
        .bridges
        .iter()
        .enumerate()
        .map(|(i, section)| {
            let mut errors = Vec::new();
            let label = if section.name.trim().is_empty() {
                errors.push(format!("bridges[{}].name is required", i));
                format!("bridges[{}]", i)
            } else {
                if !names.insert(section.name.clone()) {
                    errors.push(format!("bridge name '{}' is used more than once", section.name));
                }
                section.name.clone()
            };

            match validate_bridge(section, &label, &mut errors) {
                Some(bridge) if errors.is_empty() => Ok(bridge),
                _ => Err(ConfigError::ValidationError {
                    message: errors.join("\n"),
                }),
            }
        })
        .collect();

    Ok(results)
}

fn validate_bridge(section: &BridgeSection, label: &str, errors: &mut Vec<String>) -> Option<BridgeConfig> {
    let before = errors.len();

    // Discord
    if section.discord.token.trim().is_empty() {
        errors.push(format!("{}: discord.token is required", label));
    }
    if section.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push(format!(
            "{}: discord.token has not been configured (still using placeholder)",
            label
        ));
    }

    // IRC
    let irc = &section.irc;
    if irc.server.trim().is_empty() {
        errors.push(format!("{}: irc.server is required", label));
    }
    if irc.port == 0 {
        errors.push(format!("{}: irc.port must be non-zero", label));
    }
    if irc.nickname.trim().is_empty() {
        errors.push(format!("{}: irc.nickname is required", label));
    }
    if let Some(ref password) = irc.password {
        if password.trim().is_empty() {
            errors.push(format!("{}: irc.password cannot be left empty (remove it instead)", label));
        }
    }
    if let Some(ref pattern) = irc.no_prefix_regex {
        if pattern.trim().is_empty() {
            errors.push(format!("{}: irc.no-prefix-regex cannot be left empty (remove it instead)", label));
        } else if fancy_regex::Regex::new(pattern).is_err() {
            errors.push(format!("{}: irc.no-prefix-regex is not a valid regex: '{}'", label, pattern));
        }
    }

    let prefix = section
        .command_prefix
        .clone()
        .unwrap_or_else(|| DEFAULT_COMMAND_PREFIX.to_string());
    if prefix.trim().is_empty() {
        errors.push(format!("{}: command-prefix cannot be empty", label));
    }

    let mappings = validate_mappings(&section.channel_mappings, label, errors);
    let webhooks = validate_webhooks(&section.discord.webhooks, &mappings, label, errors);
    let mutators = validate_mutators(&section.mutators, label, errors);

    if errors.len() > before {
        return None;
    }

    let statistics_file = section
        .statistics_file
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}-stats.json", section.name)));

    Some(BridgeConfig {
        name: section.name.clone(),
        command_prefix: prefix,
        statistics_file,
        discord: DiscordSettings {
            token: section.discord.token.clone(),
            format: section
                .discord
                .format
                .clone()
                .unwrap_or_else(|| DEFAULT_DISCORD_FORMAT.to_string()),
            webhooks,
        },
        irc: IrcSettings {
            server: irc.server.clone(),
            port: irc.port,
            nickname: irc.nickname.clone(),
            username: irc.username.clone().unwrap_or_else(|| irc.nickname.clone()),
            realname: irc.realname.clone().unwrap_or_else(|| irc.nickname.clone()),
            password: irc.password.clone(),
            use_ssl: irc.use_ssl.unwrap_or(true),
            allow_invalid_certs: irc.allow_invalid_ssl_certs.unwrap_or(false),
            anti_ping: irc.anti_ping.unwrap_or(true),
            no_prefix_regex: irc.no_prefix_regex.clone(),
            announce_forwarded_sender: irc.announce_forwarded_messages_sender.unwrap_or(false),
            reply_context_limit: irc
                .discord_reply_context_limit
                .unwrap_or(DEFAULT_REPLY_CONTEXT_LIMIT),
            announce_joins_and_quits: section.announce_joins_and_quits,
            announce_extras: section.announce_extras,
            init_commands: irc.init_commands.clone(),
            format: irc.format.clone().unwrap_or_else(|| DEFAULT_IRC_FORMAT.to_string()),
        },
        channel_mappings: mappings,
        mutators,
    })
}

fn validate_webhooks(
    sections: &[WebhookSection],
    mappings: &[ChannelMapping],
    label: &str,
    errors: &mut Vec<String>,
) -> HashMap<String, String> {
    let mut webhooks = HashMap::new();

    for (i, webhook) in sections.iter().enumerate() {
        if !mappings.iter().any(|mapping| mapping.discord == webhook.discord) {
            errors.push(format!(
                "{}: discord.webhooks[{}] channel '{}' is not in channel-mappings",
                label, i, webhook.discord
            ));
        }
        if !webhook.url.starts_with("https://") || !webhook.url.contains("/webhooks/") {
            errors.push(format!(
                "{}: discord.webhooks[{}].url is not a Discord webhook URL",
                label, i
            ));
        }
        if webhooks.insert(webhook.discord.clone(), webhook.url.clone()).is_some() {
            errors.push(format!(
                "{}: Discord channel '{}' has more than one webhook",
                label, webhook.discord
            ));
        }
    }

    webhooks
}

fn validate_mappings(sections: &[MappingSection], label: &str, errors: &mut Vec<String>) -> Vec<ChannelMapping> {
    if sections.is_empty() {
        errors.push(format!("{}: channel-mappings is empty - no message routing configured", label));
        return Vec::new();
    }

    let mut discord_seen = HashSet::new();
    let mut irc_seen = HashSet::new();
    let mut mappings = Vec::new();

    for (i, mapping) in sections.iter().enumerate() {
        if mapping.discord.parse::<u64>().map(|id| id == 0).unwrap_or(true) {
            errors.push(format!(
                "{}: channel-mappings[{}].discord '{}' is not a Discord channel id",
                label, i, mapping.discord
            ));
        }
        if !mapping.irc.starts_with('#') && !mapping.irc.starts_with('&') {
            errors.push(format!(
                "{}: channel-mappings[{}].irc '{}' must start with '#' or '&'",
                label, i, mapping.irc
            ));
        }
        if !discord_seen.insert(mapping.discord.clone()) {
            errors.push(format!(
                "{}: Discord channel '{}' is mapped more than once",
                label, mapping.discord
            ));
        }
        if !irc_seen.insert(mapping.irc.to_lowercase()) {
            errors.push(format!(
                "{}: IRC channel '{}' is mapped more than once",
                label, mapping.irc
            ));
        }
        mappings.push(ChannelMapping::new(mapping.discord.clone(), mapping.irc.clone()));
    }

    mappings
}

fn validate_mutators(sections: &[MutatorSection], label: &str, errors: &mut Vec<String>) -> Vec<MutatorSpec> {
    let mut specs = Vec::new();

    for (i, section) in sections.iter().enumerate() {
        let spec = match section.kind.to_lowercase().as_str() {
            "filter" => {
                let patterns = section.patterns.clone().unwrap_or_default();
                if patterns.is_empty() {
                    errors.push(format!("{}: mutators[{}] filter has no patterns", label, i));
                }
                for (j, pattern) in patterns.iter().enumerate() {
                    if fancy_regex::Regex::new(pattern).is_err() {
                        errors.push(format!(
                            "{}: mutators[{}].patterns[{}] is not a valid regex: '{}'",
                            label, i, j, pattern
                        ));
                    }
                }
                let platforms = section.platforms.as_ref().map(|names| {
                    names
                        .iter()
                        .filter_map(|name| {
                            let platform = Platform::from_name(name);
                            if platform.is_none() {
                                errors.push(format!(
                                    "{}: mutators[{}] unknown platform '{}' (use: discord, irc)",
                                    label, i, name
                                ));
                            }
                            platform
                        })
                        .collect()
                });
                MutatorSpec::Filter { patterns, platforms }
            }
            "suppress-commands" => MutatorSpec::SuppressCommands,
            "block-mass-mentions" => MutatorSpec::BlockMassMentions,
            "strip-anti-ping" => MutatorSpec::StripAntiPing,
            "translate-formatting" => MutatorSpec::TranslateFormatting,
            "rate-limit" => {
                let max_messages = section.max_messages.unwrap_or(0);
                let window_secs = section.window_secs.unwrap_or(0);
                if max_messages == 0 {
                    errors.push(format!("{}: mutators[{}].max-messages must be non-zero", label, i));
                }
                if window_secs == 0 {
                    errors.push(format!("{}: mutators[{}].window-secs must be non-zero", label, i));
                }
                MutatorSpec::RateLimit {
                    max_messages,
                    window: Duration::from_secs(window_secs),
                }
            }
            other => {
                errors.push(format!("{}: mutators[{}] has unknown type '{}'", label, i, other));
                continue;
            }
        };
        specs.push(spec);
    }

    specs
}
