//! Bridge commands (!stats, !help, etc).
//!
//! Handles command parsing and dispatch for chat messages starting with the
//! configured prefix. Replies are plain text; the bridge relays them to
//! both platforms as bridge-originated messages.

pub mod help;
pub mod stats;

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info, warn};

use crate::common::error::CommandError;
use crate::common::Message;
use crate::stats::StatisticsTracker;

pub use help::HelpCommand;
pub use stats::StatsCommand;

/// What a command handler may look at while it runs.
pub struct CommandContext<'a> {
    pub bridge_name: &'a str,
    pub prefix: &'a str,
    pub statistics: &'a StatisticsTracker,
    /// (name, description) of every registered command, sorted by name.
    pub commands: Vec<(&'a str, &'a str)>,
}

/// A command that can be invoked from chat.
pub trait Command: Send + Sync {
    /// Name typed after the prefix (lowercase).
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Run the command with everything after its name. Returns the reply.
    fn run(&self, ctx: &CommandContext<'_>, message: &Message, args: &str) -> Result<String, CommandError>;
}

/// Registry of commands keyed by name.
pub struct CommandDispatcher {
    prefix: String,
    commands: BTreeMap<&'static str, Box<dyn Command>>,
}

impl CommandDispatcher {
    /// An empty dispatcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            commands: BTreeMap::new(),
        }
    }

    /// A dispatcher with the built-in commands registered.
    pub fn with_builtin_commands(prefix: impl Into<String>) -> Self {
        let mut dispatcher = Self::new(prefix);
        dispatcher.register(Box::new(StatsCommand));
        dispatcher.register(Box::new(HelpCommand));
        dispatcher
    }

    pub fn register(&mut self, command: Box<dyn Command>) {
        if self.commands.insert(command.name(), command).is_some() {
            warn!("Command registered twice, keeping the last one");
        }
    }

    /// Whether `message` should be dispatched: any user message that starts
    /// with the prefix, even if no command name follows.
    ///
    /// Bridge-originated messages never are, which is what stops a reply
    /// that happens to start with the prefix from triggering itself.
    pub fn is_command(&self, message: &Message) -> bool {
        !message.originates_from_bridge() && message.contents().starts_with(self.prefix.as_str())
    }

    /// Split `!name args` into (lowercased name, trimmed args). The name is
    /// empty unless it follows the prefix directly.
    fn parse<'m>(&self, contents: &'m str) -> Option<(String, &'m str)> {
        let rest = contents.strip_prefix(self.prefix.as_str())?;
        let name_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (name, args) = rest.split_at(name_end);
        Some((name.to_lowercase(), args.trim()))
    }

    /// Run the command in `message` and return the replies to relay.
    ///
    /// Unknown commands and handler failures come back as visible replies.
    pub fn dispatch(&self, message: &Message, bridge_name: &str, statistics: &StatisticsTracker) -> Vec<String> {
        if message.originates_from_bridge() {
            return Vec::new();
        }
        let Some((name, args)) = self.parse(message.contents()) else {
            return Vec::new();
        };

        let ctx = CommandContext {
            bridge_name,
            prefix: &self.prefix,
            statistics,
            commands: self
                .commands
                .values()
                .map(|c| (c.name(), c.description()))
                .collect(),
        };

        let result = match self.commands.get(name.as_str()) {
            _ if name.is_empty() => Err(CommandError::Missing),
            Some(command) => {
                info!(command = %name, source = %message.source(), "Running command");
                // A panicking handler must not take the pier's task down with it.
                panic::catch_unwind(AssertUnwindSafe(|| command.run(&ctx, message, args))).unwrap_or_else(|_| {
                    Err(CommandError::Failed {
                        name: name.clone(),
                        message: "the command crashed".to_string(),
                    })
                })
            }
            None => {
                debug!(command = %name, "Unknown command");
                Err(CommandError::Unknown { name })
            }
        };

        match result {
            Ok(reply) if reply.is_empty() => Vec::new(),
            Ok(reply) => vec![reply],
            Err(e @ (CommandError::Unknown { .. } | CommandError::Missing)) => {
                vec![format!("{} (try {}help)", e, self.prefix)]
            }
            Err(e) => {
                warn!(source = %message.source(), "Command failed: {}", e);
                vec![e.to_string()]
            }
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }
}
