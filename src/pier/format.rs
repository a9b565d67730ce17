//! Outbound message formatting.
//!
//! Handles placeholder substitution in per-platform format strings.
//! Supports placeholders: %time, %user, %message, %channel, %platform

use chrono::Local;

use crate::common::Message;

/// Zero-width space, invisible on both platforms.
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Message formatter that substitutes placeholders in format strings.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    format: String,
}

impl MessageFormatter {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Render `message` as the line(s) to post.
    ///
    /// Bridge-originated messages are posted verbatim; everything else goes
    /// through the format string with `user` as the sender name.
    ///
    /// - `%time` - Current time (HH:MM:SS)
    /// - `%user` - Sender display name
    /// - `%message` - Contents followed by attachment URLs
    /// - `%channel` - Channel the message came from
    /// - `%platform` - Platform the message came from
    pub fn format(&self, message: &Message, user: &str) -> String {
        let body = body(message);
        if message.originates_from_bridge() {
            return body;
        }

        let source = message.source();
        self.format
            .replace("%time", &get_time())
            .replace("%user", user)
            .replace("%channel", &source.channel)
            .replace("%platform", &source.platform.to_string())
            // Last, so placeholders typed by users are left alone.
            .replace("%message", &body)
    }
}

/// Contents with attachment URLs appended.
pub fn body(message: &Message) -> String {
    let mut full = message.contents().to_string();
    for attachment in message.attachments() {
        if !full.is_empty() {
            full.push(' ');
        }
        full.push_str(attachment);
    }
    full
}

/// Insert a zero-width space after the first character so IRC clients
/// do not highlight the user whose name is being relayed.
pub fn anti_ping(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if name.chars().count() > 1 => {
            let mut out = String::with_capacity(name.len() + ZERO_WIDTH_SPACE.len_utf8());
            out.push(first);
            out.push(ZERO_WIDTH_SPACE);
            out.push_str(chars.as_str());
            out
        }
        _ => name.to_string(),
    }
}

/// Get the current time as HH:MM:SS string.
fn get_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Find the last UTF-8 char boundary at or before `byte_index` in `s`.
pub(crate) fn floor_char_boundary(s: &str, byte_index: usize) -> usize {
    if byte_index >= s.len() {
        return s.len();
    }
    let mut i = byte_index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split text into single lines no longer than `max_len` bytes, for
/// line-based protocols.
///
/// Embedded newlines always start a new line and blank lines are dropped.
/// Long lines split on word boundaries when possible and never inside a
/// multi-byte character.
pub fn split_lines(message: &str, max_len: usize) -> Vec<String> {
    message
        .lines()
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| split_line(line, max_len))
        .collect()
}

/// Split text into posts no longer than `max_len` bytes, keeping line
/// breaks, blank lines and indentation inside each post.
///
/// Cuts at the last newline that fits, then the last space, and only
/// then mid-word.
pub fn split_chunks(message: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = message.trim_end();

    while remaining.len() > max_len {
        let mut limit = floor_char_boundary(remaining, max_len);
        if limit == 0 {
            limit = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }

        let window = &remaining[..limit];
        let (cut, skip) = match remaining.as_bytes()[limit] {
            b'\n' | b' ' => (limit, 1),
            _ => match window.rfind('\n').or_else(|| window.rfind(' ')).filter(|i| *i > 0) {
                Some(i) => (i, 1),
                None => (limit, 0),
            },
        };

        let chunk = remaining[..cut].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        remaining = &remaining[cut + skip..];
    }

    if !remaining.trim().is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

fn split_line(line: &str, max_len: usize) -> Vec<String> {
    if line.len() <= max_len {
        return vec![line.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = line;

    while !remaining.is_empty() {
        // Skip leading spaces left over from previous word-boundary splits
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let split_at = floor_char_boundary(remaining, max_len);

        // Always take at least one character.
        if split_at == 0 {
            let first_char_end = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
            chunks.push(remaining[..first_char_end].to_string());
            remaining = &remaining[first_char_end..];
            continue;
        }

        let chunk = &remaining[..split_at];
        if remaining.as_bytes()[split_at] == b' ' {
            chunks.push(chunk.to_string());
            remaining = &remaining[split_at + 1..];
            continue;
        }
        match chunk.rfind(' ') {
            Some(space_idx) if space_idx > 0 => {
                chunks.push(remaining[..space_idx].to_string());
                remaining = &remaining[space_idx + 1..];
            }
            _ => {
                chunks.push(chunk.to_string());
                remaining = &remaining[split_at..];
            }
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Platform, Sender, Source};

    fn discord_message(contents: &str) -> Message {
        Message::new(
            Source::new(Platform::Discord, "123", Sender::new("1", "alice")),
            contents,
        )
    }

    #[test]
    fn test_basic_format() {
        let formatter = MessageFormatter::new("<%user> %message");
        assert_eq!(formatter.format(&discord_message("hello"), "alice"), "<alice> hello");
    }

    #[test]
    fn test_source_placeholders() {
        let formatter = MessageFormatter::new("[%platform %channel] %user: %message");
        assert_eq!(
            formatter.format(&discord_message("hi"), "alice"),
            "[Discord 123] alice: hi"
        );
    }

    #[test]
    fn test_format_with_time() {
        let formatter = MessageFormatter::new("[%time] %message");
        let result = formatter.format(&discord_message("x"), "alice");
        // [HH:MM:SS] x
        assert_eq!(result.len(), 12);
        assert!(result.ends_with("] x"));
    }

    #[test]
    fn test_user_text_is_not_expanded() {
        let formatter = MessageFormatter::new("<%user> %message");
        assert_eq!(
            formatter.format(&discord_message("100%user"), "alice"),
            "<alice> 100%user"
        );
    }

    #[test]
    fn test_attachments_appended() {
        let formatter = MessageFormatter::new("<%user> %message");
        let message = discord_message("look")
            .with_attachments(vec!["https://cdn.example/a.png".to_string()]);
        assert_eq!(
            formatter.format(&message, "alice"),
            "<alice> look https://cdn.example/a.png"
        );

        let only_attachment = discord_message("")
            .with_attachments(vec!["https://cdn.example/a.png".to_string()]);
        assert_eq!(body(&only_attachment), "https://cdn.example/a.png");
    }

    #[test]
    fn test_bridge_messages_are_verbatim() {
        let formatter = MessageFormatter::new("<%user> %message");
        let reply = Message::from_bridge(Platform::Irc, "#general", "Available commands");
        assert_eq!(formatter.format(&reply, "Bridge"), "Available commands");
    }

    #[test]
    fn test_anti_ping() {
        assert_eq!(anti_ping("alice"), "a\u{200B}lice");
        assert_eq!(anti_ping("x"), "x");
        assert_eq!(anti_ping(""), "");
        assert_eq!(anti_ping("éa"), "é\u{200B}a");
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_lines("Hello", 10), vec!["Hello"]);
    }

    #[test]
    fn test_split_on_words() {
        assert_eq!(
            split_lines("Hello world this is a test", 11),
            vec!["Hello world", "this is a", "test"]
        );
    }

    #[test]
    fn test_split_on_newlines() {
        assert_eq!(split_lines("one\n\ntwo\r\nthree", 100), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_split_never_breaks_characters() {
        let chunks = split_lines("ééééé", 3);
        assert_eq!(chunks, vec!["é", "é", "é", "é", "é"]);
        for chunk in chunks {
            assert!(chunk.len() <= 3);
        }
    }

    #[test]
    fn test_split_long_word() {
        assert_eq!(split_lines("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn test_chunks_keep_blank_lines_and_indentation() {
        let code = "```\nfn main() {\n\n    run();\n}\n```";
        assert_eq!(split_chunks(code, 2000), vec![code.to_string()]);
    }

    #[test]
    fn test_chunks_prefer_line_breaks() {
        assert_eq!(
            split_chunks("line one\n\nline two", 12),
            vec!["line one", "line two"]
        );
        assert_eq!(
            split_chunks("alpha beta gamma", 11),
            vec!["alpha beta", "gamma"]
        );
        assert_eq!(split_chunks("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn test_chunks_never_break_characters() {
        let chunks = split_chunks("ééééé", 3);
        assert_eq!(chunks, vec!["é", "é", "é", "é", "é"]);
    }
}
