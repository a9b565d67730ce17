//! Mention handling for IRC-origin messages.

use super::{Mutation, Mutator};
use crate::common::error::MutatorError;
use crate::common::{Message, Platform};

/// Zero-width space.
pub const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Characters IRC clients and bridges insert into nicknames to avoid pings.
const ANTI_PING_CHARS: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}'];

/// Keeps IRC users from pinging a whole Discord server.
///
/// `@everyone` and `@here` get a zero-width space after the `@`, which
/// Discord renders identically but does not treat as a mention.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockMassMentions;

impl Mutator for BlockMassMentions {
    fn name(&self) -> &'static str {
        "block-mass-mentions"
    }

    fn mutate(&self, message: Message) -> Result<Mutation, MutatorError> {
        if message.source().platform != Platform::Irc {
            return Ok(Mutation::Continue(message));
        }

        let contents = message.contents();
        if !contents.contains("@everyone") && !contents.contains("@here") {
            return Ok(Mutation::Continue(message));
        }

        let defused = contents
            .replace("@everyone", &format!("@{}everyone", ZERO_WIDTH_SPACE))
            .replace("@here", &format!("@{}here", ZERO_WIDTH_SPACE));
        Ok(Mutation::Continue(message.with_contents(defused)))
    }
}

/// Removes anti-ping characters from IRC-origin text.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripAntiPing;

impl Mutator for StripAntiPing {
    fn name(&self) -> &'static str {
        "strip-anti-ping"
    }

    fn mutate(&self, message: Message) -> Result<Mutation, MutatorError> {
        if message.source().platform != Platform::Irc
            || !message.contents().contains(&ANTI_PING_CHARS[..])
        {
            return Ok(Mutation::Continue(message));
        }

        let stripped: String = message
            .contents()
            .chars()
            .filter(|c| !ANTI_PING_CHARS.contains(c))
            .collect();
        Ok(Mutation::Continue(message.with_contents(stripped)))
    }
}
