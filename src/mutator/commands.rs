//! Keeps raw command text on its own side of the bridge.

use super::{Mutation, Mutator};
use crate::common::error::MutatorError;
use crate::common::{Destinations, Message};

/// Clears every destination of a user-sent command message.
///
/// The message still leaves the pipeline, so the command is dispatched,
/// but `!stats` typed on IRC is not echoed into Discord. The reply is
/// relayed to both sides.
#[derive(Debug, Clone)]
pub struct SuppressCommands {
    prefix: String,
}

impl SuppressCommands {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Mutator for SuppressCommands {
    fn name(&self) -> &'static str {
        "suppress-commands"
    }

    fn mutate(&self, message: Message) -> Result<Mutation, MutatorError> {
        if message.originates_from_bridge() || !message.contents().starts_with(&self.prefix) {
            return Ok(Mutation::Continue(message));
        }

        Ok(Mutation::Continue(message.with_destinations(Destinations::none())))
    }
}
