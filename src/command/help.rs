//! The `help` command.

use super::{Command, CommandContext};
use crate::common::error::CommandError;
use crate::common::Message;

pub struct HelpCommand;

impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "List available commands"
    }

    fn run(&self, ctx: &CommandContext<'_>, _message: &Message, _args: &str) -> Result<String, CommandError> {
        // One line: IRC would split a multi-line reply into separate messages anyway.
        let commands: Vec<String> = ctx
            .commands
            .iter()
            .map(|(name, description)| format!("{}{} - {}", ctx.prefix, name, description))
            .collect();
        Ok(format!("Available commands: {}", commands.join(" | ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandDispatcher;
    use crate::common::{Platform, Sender, Source};
    use crate::stats::StatisticsTracker;

    #[test]
    fn test_help_lists_registered_commands() {
        let dispatcher = CommandDispatcher::with_builtin_commands("?");
        let message = Message::new(
            Source::new(Platform::Irc, "#general", Sender::new("bob", "bob")),
            "?help",
        );

        let replies = dispatcher.dispatch(&message, "main", &StatisticsTracker::new());
        assert_eq!(
            replies,
            vec![
                "Available commands: ?help - List available commands | ?stats - Show bridge uptime and message latency"
                    .to_string()
            ]
        );
    }
}
