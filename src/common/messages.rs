//! Canonical message types for bridge communication.
//!
//! This module defines the single source of truth for the chat events
//! that flow between the Discord and IRC piers.

use std::fmt;
use std::time::Instant;

/// Chat platform a pier connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Irc,
}

impl Platform {
    /// The platform on the other side of the bridge.
    pub fn other(self) -> Self {
        match self {
            Platform::Discord => Platform::Irc,
            Platform::Irc => Platform::Discord,
        }
    }

    /// Parse a platform name from config ("discord" / "irc").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "discord" => Some(Platform::Discord),
            "irc" => Some(Platform::Irc),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Platform::Discord => 0b01,
            Platform::Irc => 0b10,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Discord => f.write_str("Discord"),
            Platform::Irc => f.write_str("IRC"),
        }
    }
}

/// Set of platforms a message should still be delivered to.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Destinations(u8);

impl Destinations {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self(Platform::Discord.bit() | Platform::Irc.bit())
    }

    pub fn only(platform: Platform) -> Self {
        Self(platform.bit())
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.0 & platform.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Platforms in delivery order (IRC first, then Discord).
    pub fn iter(self) -> impl Iterator<Item = Platform> {
        [Platform::Irc, Platform::Discord]
            .into_iter()
            .filter(move |p| self.contains(*p))
    }
}

impl fmt::Debug for Destinations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Platform-specific sender id (Discord user id, IRC nick!user@host).
    pub id: String,
    /// Name shown to users on the other side.
    pub display_name: String,
}

impl Sender {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// The sender used for messages synthesized by the bridge itself.
    pub fn bridge() -> Self {
        Self::new("pierlink", "Bridge")
    }
}

/// Where a message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub platform: Platform,
    /// Discord channel id or IRC channel name.
    pub channel: String,
    pub sender: Sender,
}

impl Source {
    pub fn new(platform: Platform, channel: impl Into<String>, sender: Sender) -> Self {
        Self {
            platform,
            channel: channel.into(),
            sender,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.platform, self.channel, self.sender.display_name
        )
    }
}

/// The message a Discord reply points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub author: String,
    pub contents: String,
}

/// One chat event travelling through the bridge.
///
/// Messages are values: mutators consume one and hand back another, so a
/// message is never changed behind the back of a stage that already saw it.
#[derive(Debug, Clone)]
pub struct Message {
    source: Source,
    contents: String,
    attachments: Vec<String>,
    reply_to: Option<ReplyContext>,
    timestamp_in: Instant,
    destinations: Destinations,
    bridge_origin: bool,
}

impl Message {
    /// A message received from a user on `source.platform`.
    ///
    /// It is addressed to the other platform only.
    pub fn new(source: Source, contents: impl Into<String>) -> Self {
        let destinations = Destinations::only(source.platform.other());
        Self {
            source,
            contents: contents.into(),
            attachments: Vec::new(),
            reply_to: None,
            timestamp_in: Instant::now(),
            destinations,
            bridge_origin: false,
        }
    }

    /// A message synthesized by the bridge (command replies, announcements).
    ///
    /// Addressed to both platforms, origin included, and never dispatched
    /// as a command.
    pub fn from_bridge(platform: Platform, channel: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            source: Source::new(platform, channel, Sender::bridge()),
            contents: contents.into(),
            attachments: Vec::new(),
            reply_to: None,
            timestamp_in: Instant::now(),
            destinations: Destinations::all(),
            bridge_origin: true,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_reply_to(mut self, reply_to: ReplyContext) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    #[cfg(test)]
    pub fn with_timestamp(mut self, timestamp_in: Instant) -> Self {
        self.timestamp_in = timestamp_in;
        self
    }

    pub fn with_contents(mut self, contents: impl Into<String>) -> Self {
        self.contents = contents.into();
        self
    }

    /// Replace the delivery targets. Including the origin platform echoes
    /// the message back to the channel it came from, so only do that
    /// deliberately.
    pub fn with_destinations(mut self, destinations: Destinations) -> Self {
        self.destinations = destinations;
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn attachments(&self) -> &[String] {
        &self.attachments
    }

    pub fn reply_to(&self) -> Option<&ReplyContext> {
        self.reply_to.as_ref()
    }

    pub fn timestamp_in(&self) -> Instant {
        self.timestamp_in
    }

    pub fn destinations(&self) -> Destinations {
        self.destinations
    }

    pub fn originates_from_bridge(&self) -> bool {
        self.bridge_origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn irc_source() -> Source {
        Source::new(Platform::Irc, "#general", Sender::new("alice!a@host", "alice"))
    }

    #[test]
    fn test_new_message_targets_other_platform_only() {
        let msg = Message::new(irc_source(), "hi");
        assert_eq!(msg.destinations(), Destinations::only(Platform::Discord));
        assert!(!msg.originates_from_bridge());
    }

    #[test]
    fn test_bridge_message_targets_both() {
        let msg = Message::from_bridge(Platform::Discord, "123", "reply");
        assert_eq!(msg.destinations(), Destinations::all());
        assert!(msg.originates_from_bridge());
        assert_eq!(msg.source().sender, Sender::bridge());
    }

    #[test]
    fn test_echo_is_explicit() {
        let msg = Message::new(irc_source(), "hi").with_destinations(Destinations::all());
        assert!(msg.destinations().contains(Platform::Irc));

        let msg = msg.with_destinations(Destinations::none());
        assert!(msg.destinations().is_empty());
        assert_eq!(msg.destinations(), Destinations::none());
    }

    #[test]
    fn test_destination_iteration_order() {
        let order: Vec<_> = Destinations::all().iter().collect();
        assert_eq!(order, vec![Platform::Irc, Platform::Discord]);
        assert_eq!(Destinations::none().iter().count(), 0);
    }

    #[test]
    fn test_platform_names() {
        assert_eq!(Platform::from_name("IRC"), Some(Platform::Irc));
        assert_eq!(Platform::from_name("discord"), Some(Platform::Discord));
        assert_eq!(Platform::from_name("slack"), None);
        assert_eq!(Platform::Irc.other(), Platform::Discord);
    }
}
