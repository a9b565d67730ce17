//! The `stats` command.

use std::time::Duration;

use super::{Command, CommandContext};
use crate::common::error::CommandError;
use crate::common::Message;

pub struct StatsCommand;

impl Command for StatsCommand {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn description(&self) -> &'static str {
        "Show bridge uptime and message latency"
    }

    fn run(&self, ctx: &CommandContext<'_>, _message: &Message, _args: &str) -> Result<String, CommandError> {
        let snapshot = ctx.statistics.snapshot();
        let uptime = format_uptime(ctx.statistics.uptime());

        let mut reply = format!(
            "{}: up {} (since {}), {} messages bridged",
            ctx.bridge_name,
            uptime,
            ctx.statistics.started_at().format("%Y-%m-%d %H:%M UTC"),
            snapshot.message_count,
        );

        if let Some(mean) = snapshot.mean_latency() {
            reply.push_str(&format!(", overall mean {}", format_latency(mean)));
        }
        if let Some((mean, median)) = ctx.statistics.recent_latency() {
            reply.push_str(&format!(
                ", recent mean {} / median {}",
                format_latency(mean),
                format_latency(median)
            ));
        }

        Ok(reply)
    }
}

/// `3d 4h 5m 6s`, leading zero units omitted.
fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, hours, minutes, seconds) = (total / 86_400, total / 3_600 % 24, total / 60 % 60, total % 60);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));
    parts.join(" ")
}

fn format_latency(latency: Duration) -> String {
    format!("{:.2}ms", latency.as_secs_f64() * 1_000.0)
}
