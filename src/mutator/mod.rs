//! Message mutators.
//!
//! A mutator looks at one message and either hands back a (possibly
//! rewritten) message or drops it. Mutators run in the order they are
//! configured and each one sees the previous one's output.
//!
//! ## Module Structure
//!
//! - `filter`: regex drop filter
//! - `commands`: keeps raw command text from being relayed
//! - `mentions`: `@everyone`/`@here` defusing and anti-ping stripping
//! - `formatting`: Discord markdown <-> IRC control codes
//! - `rate_limit`: per-sender flood protection

pub mod commands;
pub mod filter;
pub mod formatting;
pub mod mentions;
pub mod rate_limit;

use tracing::{debug, warn};

use crate::common::error::MutatorError;
use crate::common::Message;
use crate::config::types::MutatorSpec;

pub use commands::SuppressCommands;
pub use filter::FilterMutator;
pub use formatting::TranslateFormatting;
pub use mentions::{BlockMassMentions, StripAntiPing};
pub use rate_limit::RateLimit;

/// Result of running one mutator.
#[derive(Debug)]
pub enum Mutation {
    /// Pass this message on to the next stage.
    Continue(Message),
    /// Discard the message.
    Drop,
}

/// One pipeline stage.
///
/// Mutators run synchronously on the submitting pier's task and must not
/// block on I/O. Mutators with state shared across messages synchronize it
/// themselves.
pub trait Mutator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn mutate(&self, message: Message) -> Result<Mutation, MutatorError>;
}

/// Ordered list of mutators.
#[derive(Default)]
pub struct MutatorPipeline {
    mutators: Vec<Box<dyn Mutator>>,
}

impl MutatorPipeline {
    pub fn new(mutators: Vec<Box<dyn Mutator>>) -> Self {
        Self { mutators }
    }

    /// Build the pipeline described by the configuration, in order.
    pub fn from_specs(specs: &[MutatorSpec], command_prefix: &str) -> Self {
        let mutators = specs
            .iter()
            .map(|spec| -> Box<dyn Mutator> {
                match spec {
                    MutatorSpec::Filter { patterns, platforms } => {
                        Box::new(FilterMutator::new(patterns.clone(), platforms.clone()))
                    }
                    MutatorSpec::SuppressCommands => Box::new(SuppressCommands::new(command_prefix)),
                    MutatorSpec::BlockMassMentions => Box::new(BlockMassMentions),
                    MutatorSpec::StripAntiPing => Box::new(StripAntiPing),
                    MutatorSpec::TranslateFormatting => Box::new(TranslateFormatting::new()),
                    MutatorSpec::RateLimit {
                        max_messages,
                        window,
                    } => Box::new(RateLimit::new(*max_messages, *window)),
                }
            })
            .collect();
        Self::new(mutators)
    }

    /// Append a mutator after the configured ones.
    pub fn push(&mut self, mutator: Box<dyn Mutator>) {
        self.mutators.push(mutator);
    }

    /// Run every mutator in order.
    ///
    /// Returns `None` as soon as one drops the message or fails.
    pub fn apply(&self, message: Message) -> Option<Message> {
        let mut current = message;

        for mutator in &self.mutators {
            let source = current.source().clone();
            match mutator.mutate(current) {
                Ok(Mutation::Continue(next)) => current = next,
                Ok(Mutation::Drop) => {
                    debug!(mutator = mutator.name(), %source, "Message dropped by mutator");
                    return None;
                }
                Err(e) => {
                    warn!(mutator = mutator.name(), %source, "Mutator failed, dropping message: {}", e);
                    return None;
                }
            }
        }

        Some(current)
    }

    /// Mutator names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.mutators.iter().map(|m| m.name()).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Append, DropAll, Failing};
    use super::*;
    use crate::common::{Platform, Sender, Source};

    fn make_message(contents: &str) -> Message {
        Message::new(
            Source::new(Platform::Discord, "123", Sender::new("1", "alice")),
            contents,
        )
    }

    #[test]
    fn test_empty_pipeline_passes_through() {
        let pipeline = MutatorPipeline::default();
        let result = pipeline.apply(make_message("hello")).unwrap();
        assert_eq!(result.contents(), "hello");
    }

    #[test]
    fn test_mutators_run_in_order_on_previous_output() {
        let (a, _) = Append::new("-a");
        let (b, seen_by_b) = Append::new("-b");
        let pipeline = MutatorPipeline::new(vec![Box::new(a), Box::new(b)]);

        let result = pipeline.apply(make_message("hello")).unwrap();

        assert_eq!(result.contents(), "hello-a-b");
        assert_eq!(*seen_by_b.lock().unwrap(), vec!["hello-a".to_string()]);
    }

    #[test]
    fn test_drop_at_any_position_stops_pipeline() {
        for position in 0..3 {
            let (after, seen_after) = Append::new("-x");
            let mut mutators: Vec<Box<dyn Mutator>> = vec![Box::new(Append::new("-1").0), Box::new(Append::new("-2").0)];
            mutators.insert(position, Box::new(DropAll));
            mutators.push(Box::new(after));

            let pipeline = MutatorPipeline::new(mutators);
            assert!(pipeline.apply(make_message("hello")).is_none());
            assert!(seen_after.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn test_failing_mutator_drops_message() {
        let (after, seen_after) = Append::new("-x");
        let pipeline = MutatorPipeline::new(vec![Box::new(Failing), Box::new(after)]);

        assert!(pipeline.apply(make_message("hello")).is_none());
        assert!(seen_after.lock().unwrap().is_empty());
    }

    #[test]
    fn test_from_specs_preserves_order() {
        let specs = vec![
            MutatorSpec::StripAntiPing,
            MutatorSpec::TranslateFormatting,
            MutatorSpec::SuppressCommands,
            MutatorSpec::Filter {
                patterns: vec!["spam".to_string()],
                platforms: None,
            },
        ];
        let pipeline = MutatorPipeline::from_specs(&specs, "!");
        assert_eq!(
            pipeline.names(),
            vec!["strip-anti-ping", "translate-formatting", "suppress-commands", "filter"]
        );
    }
}
