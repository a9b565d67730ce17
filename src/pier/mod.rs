//! Platform connections ("piers").
//!
//! A pier owns one platform connection. It turns inbound chat events into
//! [`Message`]s and hands them to the bridge through a [`BridgeHandle`], and
//! it delivers outbound messages the bridge routes to it.
//!
//! ## Module Structure
//!
//! - `format`: outbound line formatting and splitting
//! - `irc`: IRC client over a line codec
//! - `discord`: serenity gateway client

pub mod discord;
pub mod format;
pub mod irc;

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::bridge::Bridge;
use crate::common::error::PierError;
use crate::common::{Message, Platform};

pub use discord::DiscordPier;
pub use irc::IrcPier;

/// One side of a bridge.
#[async_trait]
pub trait Pier: Send + Sync {
    fn platform(&self) -> Platform;

    /// Connect. The bridge does not start if this fails.
    async fn start(&self, bridge: BridgeHandle) -> Result<(), PierError>;

    /// Queue `message` for `target_channel`. Must not block on the network.
    fn send_message(&self, target_channel: &str, message: &Message) -> Result<(), PierError>;

    /// Release the connection. Safe to call more than once; never fails.
    async fn on_shutdown(&self);
}

/// Weak reference a pier uses to submit inbound messages.
///
/// The bridge owns its piers, so piers only hold a weak pointer back.
#[derive(Clone, Default)]
pub struct BridgeHandle {
    bridge: Weak<Bridge>,
}

impl BridgeHandle {
    pub fn new(bridge: &Arc<Bridge>) -> Self {
        Self {
            bridge: Arc::downgrade(bridge),
        }
    }

    /// A handle that is not attached to any bridge; submits go nowhere.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Hand a message to the bridge. Returns false once the bridge is gone.
    pub fn submit(&self, message: Message) -> bool {
        match self.bridge.upgrade() {
            Some(bridge) => {
                bridge.submit(message);
                true
            }
            None => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Sender, Source};

    #[test]
    fn test_detached_handle_drops_messages() {
        let handle = BridgeHandle::detached();
        let message = Message::new(
            Source::new(Platform::Irc, "#general", Sender::new("bob", "bob")),
            "hi",
        );
        assert!(!handle.submit(message));
    }
}
