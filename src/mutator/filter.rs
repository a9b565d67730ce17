//! Message filtering with regex patterns.
//!
//! Drops messages matching configurable regex patterns to keep spam or
//! unwanted messages from being relayed between Discord and IRC.

use fancy_regex::{Regex, RegexBuilder};
use tracing::{info, warn};

use super::{Mutation, Mutator};
use crate::common::error::MutatorError;
use crate::common::{Message, Platform};

/// Backtracking steps one pattern may take on one message before the
/// match is abandoned and the message dropped.
const BACKTRACK_LIMIT: usize = 100_000;

/// Drops messages whose contents match any pattern.
#[derive(Debug, Clone)]
pub struct FilterMutator {
    patterns: Vec<CompiledPattern>,
    /// Origins to check. `None` checks messages from both platforms.
    platforms: Option<Vec<Platform>>,
}

/// A compiled regex pattern with its original string for debugging.
#[derive(Debug, Clone)]
struct CompiledPattern {
    original: String,
    regex: Regex,
}

impl FilterMutator {
    /// Create a new filter from pattern strings.
    ///
    /// Invalid regex patterns are logged and skipped.
    pub fn new(patterns: Vec<String>, platforms: Option<Vec<Platform>>) -> Self {
        Self {
            patterns: compile_patterns(patterns),
            platforms,
        }
    }

    /// Check if a message from `origin` should be blocked.
    ///
    /// A pattern that cannot be evaluated (for example one that runs into
    /// the backtracking limit) is an error, never a "no match".
    pub fn should_filter(&self, origin: Platform, message: &str) -> Result<bool, MutatorError> {
        if let Some(ref platforms) = self.platforms {
            if !platforms.contains(&origin) {
                return Ok(false);
            }
        }

        for pattern in &self.patterns {
            let matched = pattern.regex.is_match(message).map_err(|e| {
                MutatorError::new(
                    "filter",
                    format!("pattern '{}' could not be evaluated: {}", pattern.original, e),
                )
            })?;
            if matched {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Mutator for FilterMutator {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn mutate(&self, message: Message) -> Result<Mutation, MutatorError> {
        let source = message.source();
        if self.should_filter(source.platform, message.contents())? {
            info!(
                platform = %source.platform,
                channel = %source.channel,
                "FILTERED: {}",
                message.contents()
            );
            return Ok(Mutation::Drop);
        }
        Ok(Mutation::Continue(message))
    }
}

/// Compile a list of regex pattern strings, skipping invalid ones.
fn compile_patterns(patterns: Vec<String>) -> Vec<CompiledPattern> {
    patterns
        .into_iter()
        .filter_map(|pattern| match RegexBuilder::new(&pattern).backtrack_limit(BACKTRACK_LIMIT).build() {
            Ok(regex) => Some(CompiledPattern {
                original: pattern,
                regex,
            }),
            Err(e) => {
                warn!("Invalid filter regex pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}
