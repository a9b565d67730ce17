//! Per-sender flood protection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

use super::{Mutation, Mutator};
use crate::common::error::MutatorError;
use crate::common::{Message, Platform};

/// Drops messages from a sender who already sent `max_messages` within
/// the last `window`.
///
/// Both piers submit concurrently, so the per-sender history sits behind a
/// mutex. The lock is only held for the bookkeeping, never across sends.
#[derive(Debug)]
pub struct RateLimit {
    max_messages: usize,
    window: Duration,
    history: Mutex<HashMap<(Platform, String), VecDeque<Instant>>>,
}

impl RateLimit {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self {
            max_messages: max_messages as usize,
            window,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt at `now`; returns false if it exceeds the limit.
    fn allow(&self, platform: Platform, sender: &str, now: Instant) -> bool {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        // Forget senders that have been quiet for a whole window.
        history.retain(|_, sent| {
            sent.back()
                .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
        });

        let sent = history.entry((platform, sender.to_string())).or_default();
        while sent
            .front()
            .is_some_and(|first| now.saturating_duration_since(*first) >= self.window)
        {
            sent.pop_front();
        }

        if sent.len() >= self.max_messages {
            return false;
        }
        sent.push_back(now);
        true
    }
}

impl Mutator for RateLimit {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn mutate(&self, message: Message) -> Result<Mutation, MutatorError> {
        if message.originates_from_bridge() {
            return Ok(Mutation::Continue(message));
        }

        let source = message.source();
        if self.allow(source.platform, &source.sender.id, message.timestamp_in()) {
            Ok(Mutation::Continue(message))
        } else {
            info!(sender = %source.sender.display_name, platform = %source.platform, "Rate limit exceeded, dropping message");
            Ok(Mutation::Drop)
        }
    }
}
