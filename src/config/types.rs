//! Configuration type definitions.
//!
//! `Config` and the `*Section` types mirror the HOCON file as written.
//! They are only ever read by `config::validate`, which turns them into the
//! immutable `BridgeConfig` values the rest of the application is built from.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::common::Platform;

/// Default command prefix.
pub const DEFAULT_COMMAND_PREFIX: &str = "!";

/// Default format for messages relayed to IRC.
pub const DEFAULT_IRC_FORMAT: &str = "<%user> %message";

/// Default format for messages relayed to Discord.
pub const DEFAULT_DISCORD_FORMAT: &str = "**<%user>** %message";

/// Default number of characters of a replied-to Discord message shown on IRC.
pub const DEFAULT_REPLY_CONTEXT_LIMIT: usize = 90;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bridges: Vec<BridgeSection>,
}

/// One bridge as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeSection {
    pub name: String,
    pub command_prefix: Option<String>,
    pub statistics_file: Option<String>,
    pub discord: DiscordSection,
    pub irc: IrcSection,
    #[serde(default)]
    pub channel_mappings: Vec<MappingSection>,
    #[serde(default)]
    pub mutators: Vec<MutatorSection>,
    /// Relay IRC joins, parts, quits and kicks to Discord
    #[serde(default)]
    pub announce_joins_and_quits: bool,
    /// Relay IRC nick and topic changes to Discord
    #[serde(default)]
    pub announce_extras: bool,
}

/// Discord bot settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscordSection {
    pub token: String,
    pub format: Option<String>,
    #[serde(default)]
    pub webhooks: Vec<WebhookSection>,
}

/// Posts to a Discord channel through a webhook instead of the bot user.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSection {
    /// Discord channel ID
    pub discord: String,
    pub url: String,
}

/// IRC connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IrcSection {
    pub server: String,
    pub port: u16,
    pub nickname: String,
    pub username: Option<String>,
    pub realname: Option<String>,
    pub password: Option<String>,
    pub anti_ping: Option<bool>,
    pub use_ssl: Option<bool>,
    pub allow_invalid_ssl_certs: Option<bool>,
    /// Discord messages matching this are sent without the user prefix
    pub no_prefix_regex: Option<String>,
    pub announce_forwarded_messages_sender: Option<bool>,
    pub discord_reply_context_limit: Option<usize>,
    #[serde(default)]
    pub init_commands: Vec<String>,
    pub format: Option<String>,
}

/// Maps a Discord channel to an IRC channel.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingSection {
    /// Discord channel ID
    pub discord: String,
    /// IRC channel name, including the leading `#`
    pub irc: String,
}

/// A mutator entry. Which fields matter depends on `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MutatorSection {
    #[serde(rename = "type")]
    pub kind: String,
    pub patterns: Option<Vec<String>>,
    pub platforms: Option<Vec<String>>,
    pub max_messages: Option<u32>,
    pub window_secs: Option<u64>,
}

// ============================================================
// Validated configuration
// ============================================================

/// Fully validated, immutable configuration for one bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub name: String,
    pub command_prefix: String,
    pub statistics_file: PathBuf,
    pub discord: DiscordSettings,
    pub irc: IrcSettings,
    pub channel_mappings: Vec<ChannelMapping>,
    pub mutators: Vec<MutatorSpec>,
}

#[derive(Clone)]
pub struct DiscordSettings {
    pub token: String,
    pub format: String,
    /// Discord channel ID -> webhook URL
    pub webhooks: HashMap<String, String>,
}

// Keep the token and webhook URLs out of debug logs.
impl std::fmt::Debug for DiscordSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut webhook_channels: Vec<&String> = self.webhooks.keys().collect();
        webhook_channels.sort();
        f.debug_struct("DiscordSettings")
            .field("token", &"<redacted>")
            .field("format", &self.format)
            .field("webhooks", &webhook_channels)
            .finish()
    }
}

#[derive(Clone)]
pub struct IrcSettings {
    pub server: String,
    pub port: u16,
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub password: Option<String>,
    pub use_ssl: bool,
    pub allow_invalid_certs: bool,
    pub anti_ping: bool,
    pub no_prefix_regex: Option<String>,
    pub announce_forwarded_sender: bool,
    /// 0 disables reply context
    pub reply_context_limit: usize,
    pub announce_joins_and_quits: bool,
    pub announce_extras: bool,
    pub init_commands: Vec<String>,
    pub format: String,
}

impl std::fmt::Debug for IrcSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrcSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("nickname", &self.nickname)
            .field("username", &self.username)
            .field("realname", &self.realname)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("use_ssl", &self.use_ssl)
            .field("allow_invalid_certs", &self.allow_invalid_certs)
            .field("anti_ping", &self.anti_ping)
            .field("no_prefix_regex", &self.no_prefix_regex)
            .field("announce_forwarded_sender", &self.announce_forwarded_sender)
            .field("reply_context_limit", &self.reply_context_limit)
            .field("announce_joins_and_quits", &self.announce_joins_and_quits)
            .field("announce_extras", &self.announce_extras)
            .field("init_commands", &self.init_commands.len())
            .field("format", &self.format)
            .finish()
    }
}

/// A validated Discord <-> IRC channel pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    pub discord: String,
    pub irc: String,
}

impl ChannelMapping {
    pub fn new(discord: impl Into<String>, irc: impl Into<String>) -> Self {
        Self {
            discord: discord.into(),
            irc: irc.into(),
        }
    }
}

/// A validated mutator, in pipeline order.
#[derive(Debug, Clone, PartialEq)]
pub enum MutatorSpec {
    Filter {
        patterns: Vec<String>,
        platforms: Option<Vec<Platform>>,
    },
    SuppressCommands,
    BlockMassMentions,
    StripAntiPing,
    TranslateFormatting,
    RateLimit {
        max_messages: u32,
        window: Duration,
    },
}

impl MutatorSpec {
    /// The config `type` name for this mutator.
    pub fn kind(&self) -> &'static str {
        match self {
            MutatorSpec::Filter { .. } => "filter",
            MutatorSpec::SuppressCommands => "suppress-commands",
            MutatorSpec::BlockMassMentions => "block-mass-mentions",
            MutatorSpec::StripAntiPing => "strip-anti-ping",
            MutatorSpec::TranslateFormatting => "translate-formatting",
            MutatorSpec::RateLimit { .. } => "rate-limit",
        }
    }
}
