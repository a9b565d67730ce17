//! Message latency statistics.
//!
//! The tracker counts every message that made it through the bridge and
//! sums how long each one took from receipt to the last send. Totals are
//! persisted between runs; a short window of recent latencies is kept in
//! memory for the `stats` command.

pub mod store;

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::Message;

pub use store::{JsonFileStore, StatisticsStore};

/// Number of recent latencies kept for mean/median reporting.
pub const RECENT_WINDOW: usize = 1000;

/// Persisted statistics totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatisticsSnapshot {
    pub message_count: u64,
    pub cumulative_latency_nanos: u64,
}

impl StatisticsSnapshot {
    /// Mean latency over every message ever counted.
    pub fn mean_latency(&self) -> Option<Duration> {
        (self.message_count > 0)
            .then(|| Duration::from_nanos(self.cumulative_latency_nanos / self.message_count))
    }
}

#[derive(Debug, Default)]
struct Totals {
    message_count: u64,
    cumulative_latency_nanos: u64,
    recent: VecDeque<u64>,
}

/// Thread-safe statistics for one bridge.
#[derive(Debug)]
pub struct StatisticsTracker {
    totals: Mutex<Totals>,
    started_at: DateTime<Utc>,
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsTracker {
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(Totals::default()),
            started_at: Utc::now(),
        }
    }

    fn totals(&self) -> std::sync::MutexGuard<'_, Totals> {
        // Totals are plain counters; a panic elsewhere cannot leave them torn.
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count `message` as delivered at `timestamp_out`.
    pub fn record_completion(&self, message: &Message, timestamp_out: Instant) {
        let latency = timestamp_out.saturating_duration_since(message.timestamp_in());
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);

        let mut totals = self.totals();
        totals.message_count = totals.message_count.saturating_add(1);
        totals.cumulative_latency_nanos = totals.cumulative_latency_nanos.saturating_add(nanos);
        if totals.recent.len() == RECENT_WINDOW {
            totals.recent.pop_front();
        }
        totals.recent.push_back(nanos);
    }

    /// Consistent point-in-time totals.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let totals = self.totals();
        StatisticsSnapshot {
            message_count: totals.message_count,
            cumulative_latency_nanos: totals.cumulative_latency_nanos,
        }
    }

    /// Add a persisted baseline to whatever has been counted so far.
    pub fn restore(&self, snapshot: StatisticsSnapshot) {
        let mut totals = self.totals();
        totals.message_count = totals.message_count.saturating_add(snapshot.message_count);
        totals.cumulative_latency_nanos = totals
            .cumulative_latency_nanos
            .saturating_add(snapshot.cumulative_latency_nanos);
    }

    /// Mean and median of the recent window.
    pub fn recent_latency(&self) -> Option<(Duration, Duration)> {
        let mut recent: Vec<u64> = self.totals().recent.iter().copied().collect();
        if recent.is_empty() {
            return None;
        }
        recent.sort_unstable();

        let mean = recent.iter().map(|&n| n as u128).sum::<u128>() / recent.len() as u128;
        let mid = recent.len() / 2;
        let median = if recent.len() % 2 == 0 {
            (recent[mid - 1] / 2) + (recent[mid] / 2) + (recent[mid - 1] % 2 + recent[mid] % 2) / 2
        } else {
            recent[mid]
        };

        Some((
            Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX)),
            Duration::from_nanos(median),
        ))
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}
