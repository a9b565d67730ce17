//! Channel mapping between Discord and IRC.
//!
//! Both directions are indexed up front, so resolving a target is a single
//! hash lookup regardless of how many channels are bridged. The table is
//! never modified after construction.

use std::collections::HashMap;

use crate::common::error::ConfigError;
use crate::common::{Platform, Source};
use crate::config::types::ChannelMapping;

/// Bidirectional Discord <-> IRC channel index.
#[derive(Debug, Clone, Default)]
pub struct ChannelMappingManager {
    /// Discord channel id -> IRC channel name (as configured).
    discord_to_irc: HashMap<String, String>,
    /// Lowercased IRC channel name -> Discord channel id.
    irc_to_discord: HashMap<String, String>,
}

impl ChannelMappingManager {
    /// Build the index, rejecting any identifier that appears twice.
    pub fn new(mappings: &[ChannelMapping]) -> Result<Self, ConfigError> {
        let mut discord_to_irc = HashMap::with_capacity(mappings.len());
        let mut irc_to_discord = HashMap::with_capacity(mappings.len());

        for mapping in mappings {
            if mapping.discord.is_empty() || mapping.irc.is_empty() {
                return Err(ConfigError::MalformedMapping {
                    message: format!("empty channel in mapping {:?}", mapping),
                });
            }
            if discord_to_irc
                .insert(mapping.discord.clone(), mapping.irc.clone())
                .is_some()
            {
                return Err(ConfigError::MalformedMapping {
                    message: format!("Discord channel '{}' is mapped more than once", mapping.discord),
                });
            }
            if irc_to_discord
                .insert(irc_key(&mapping.irc), mapping.discord.clone())
                .is_some()
            {
                return Err(ConfigError::MalformedMapping {
                    message: format!("IRC channel '{}' is mapped more than once", mapping.irc),
                });
            }
        }

        Ok(Self {
            discord_to_irc,
            irc_to_discord,
        })
    }

    /// The channel on the other platform that `source` is bridged to.
    pub fn resolve_target(&self, source: &Source) -> Option<&str> {
        match source.platform {
            Platform::Discord => self.discord_to_irc.get(&source.channel),
            Platform::Irc => self.irc_to_discord.get(&irc_key(&source.channel)),
        }
        .map(String::as_str)
    }

    /// IRC channels the IRC pier has to join.
    pub fn irc_channels(&self) -> Vec<&str> {
        let mut channels: Vec<&str> = self.discord_to_irc.values().map(String::as_str).collect();
        channels.sort_unstable();
        channels
    }

    pub fn len(&self) -> usize {
        self.discord_to_irc.len()
    }
}

/// IRC channel names are case-insensitive.
fn irc_key(channel: &str) -> String {
    channel.to_lowercase()
}
