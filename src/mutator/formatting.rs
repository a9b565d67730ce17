//! Text style translation between Discord markdown and IRC control codes.
//!
//! Discord -> IRC turns `**bold**`, `*italic*`/`_italic_`, `__underline__`,
//! `~~strike~~` and `` `code` `` into the matching control codes.
//! IRC -> Discord does the reverse, strips colours, escapes markdown that
//! IRC users typed literally and expands `:shortcode:` emoji.

use super::{Mutation, Mutator};
use crate::common::error::MutatorError;
use crate::common::{Message, Platform};

pub const BOLD: char = '\x02';
pub const COLOR: char = '\x03';
pub const HEX_COLOR: char = '\x04';
pub const RESET: char = '\x0F';
pub const MONOSPACE: char = '\x11';
pub const REVERSE: char = '\x16';
pub const ITALIC: char = '\x1D';
pub const STRIKETHROUGH: char = '\x1E';
pub const UNDERLINE: char = '\x1F';

/// Markdown delimiters in match priority order (longest first).
const DELIMITERS: [(&str, char); 5] = [
    ("**", BOLD),
    ("__", UNDERLINE),
    ("~~", STRIKETHROUGH),
    ("*", ITALIC),
    ("_", ITALIC),
];

/// Characters escaped when IRC text is shown on Discord.
const MARKDOWN_CHARS: &str = "\\*_~`|";

/// Translates formatting according to where a message came from.
#[derive(Debug, Clone, Default)]
pub struct TranslateFormatting;

impl TranslateFormatting {
    pub fn new() -> Self {
        Self
    }
}

impl Mutator for TranslateFormatting {
    fn name(&self) -> &'static str {
        "translate-formatting"
    }

    fn mutate(&self, message: Message) -> Result<Mutation, MutatorError> {
        // Bridge replies go to both sides; leave them as plain text.
        if message.originates_from_bridge() {
            return Ok(Mutation::Continue(message));
        }

        let translated = match message.source().platform {
            Platform::Discord => markdown_to_irc(message.contents()),
            Platform::Irc => expand_shortcodes(&irc_to_markdown(message.contents())),
        };
        Ok(Mutation::Continue(message.with_contents(translated)))
    }
}

// ============================================================
// Discord -> IRC
// ============================================================

/// Convert Discord markdown into IRC control codes.
pub fn markdown_to_irc(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open: Vec<&'static str> = Vec::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        // Escaped markdown character: emit it literally.
        if let Some(escaped) = rest.strip_prefix('\\') {
            if let Some(c) = escaped.chars().next().filter(|c| MARKDOWN_CHARS.contains(*c)) {
                out.push(c);
                i += 1 + c.len_utf8();
                continue;
            }
        }

        // Inline code: no formatting inside.
        if let Some(inner) = rest.strip_prefix('`') {
            if let Some(end) = inner.find('`') {
                out.push(MONOSPACE);
                out.push_str(&inner[..end]);
                out.push(MONOSPACE);
                i += end + 2;
                continue;
            }
        }

        if let Some(&(delim, code)) = DELIMITERS.iter().find(|(d, _)| rest.starts_with(d)) {
            let after = &rest[delim.len()..];
            if open.last() == Some(&delim) && closes_word(delim, after) {
                open.pop();
                out.push(code);
                i += delim.len();
                continue;
            }
            if !open.contains(&delim) && opens_word(delim, &text[..i]) && after.contains(delim) {
                open.push(delim);
                out.push(code);
                i += delim.len();
                continue;
            }
        }

        match rest.chars().next() {
            Some(c) => {
                out.push(c);
                i += c.len_utf8();
            }
            None => break,
        }
    }

    // Anything still open would bleed into the rest of the IRC line.
    while let Some(delim) = open.pop() {
        if let Some(&(_, code)) = DELIMITERS.iter().find(|(d, _)| *d == delim) {
            out.push(code);
        }
    }

    out
}

/// `_` only starts emphasis at the beginning of a word (`snake_case` stays).
fn opens_word(delim: &str, before: &str) -> bool {
    !delim.starts_with('_') || !before.chars().last().is_some_and(|c| c.is_alphanumeric())
}

fn closes_word(delim: &str, after: &str) -> bool {
    !delim.starts_with('_') || !after.chars().next().is_some_and(|c| c.is_alphanumeric())
}

// ============================================================
// IRC -> Discord
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Monospace,
}

impl Style {
    fn from_code(c: char) -> Option<Self> {
        match c {
            BOLD => Some(Style::Bold),
            ITALIC => Some(Style::Italic),
            UNDERLINE => Some(Style::Underline),
            STRIKETHROUGH => Some(Style::Strikethrough),
            MONOSPACE => Some(Style::Monospace),
            _ => None,
        }
    }

    fn markdown(self) -> &'static str {
        match self {
            Style::Bold => "**",
            Style::Italic => "*",
            Style::Underline => "__",
            Style::Strikethrough => "~~",
            Style::Monospace => "`",
        }
    }
}

/// Open markdown spans, innermost last. Each entry remembers where its
/// content starts so empty spans can be removed instead of closed.
struct SpanStack {
    open: Vec<(Style, usize)>,
}

impl SpanStack {
    fn new() -> Self {
        Self { open: Vec::new() }
    }

    fn toggle(&mut self, style: Style, out: &mut String) {
        match self.open.iter().position(|(s, _)| *s == style) {
            Some(index) => {
                // Markdown has to nest: close everything above, then reopen it.
                let above: Vec<Style> = self.open[index + 1..].iter().map(|(s, _)| *s).collect();
                while self.open.len() > index {
                    self.close_top(out);
                }
                for s in above {
                    self.push(s, out);
                }
            }
            None => self.push(style, out),
        }
    }

    fn push(&mut self, style: Style, out: &mut String) {
        out.push_str(style.markdown());
        self.open.push((style, out.len()));
    }

    fn close_top(&mut self, out: &mut String) {
        if let Some((style, content_start)) = self.open.pop() {
            let delim = style.markdown();
            if out.len() == content_start {
                out.truncate(content_start - delim.len());
            } else {
                out.push_str(delim);
            }
        }
    }

    fn close_all(&mut self, out: &mut String) {
        while !self.open.is_empty() {
            self.close_top(out);
        }
    }
}

/// Convert IRC control codes into Discord markdown.
pub fn irc_to_markdown(text: &str) -> String {
    let escaped = escape_markdown(text);
    let mut out = String::with_capacity(escaped.len());
    let mut spans = SpanStack::new();
    let mut chars = escaped.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(style) = Style::from_code(c) {
            spans.toggle(style, &mut out);
            continue;
        }
        match c {
            RESET => spans.close_all(&mut out),
            COLOR => skip_color(&mut chars, 2, |c| c.is_ascii_digit()),
            HEX_COLOR => skip_color(&mut chars, 6, |c| c.is_ascii_hexdigit()),
            REVERSE => {}
            _ => out.push(c),
        }
    }

    spans.close_all(&mut out);
    out
}

/// Skip `fg[,bg]` after a colour code, each at most `width` chars long.
fn skip_color<I, F>(chars: &mut std::iter::Peekable<I>, width: usize, is_digit: F)
where
    I: Iterator<Item = char> + Clone,
    F: Fn(char) -> bool,
{
    let skip_digits = |chars: &mut std::iter::Peekable<I>| {
        let mut taken = 0;
        while taken < width && chars.peek().is_some_and(|c| is_digit(*c)) {
            chars.next();
            taken += 1;
        }
        taken
    };

    if skip_digits(chars) == 0 {
        return;
    }

    // Only consume the comma if a background colour follows it.
    if chars.peek() == Some(&',') {
        let mut lookahead = chars.clone();
        lookahead.next();
        if lookahead.peek().is_some_and(|c| is_digit(*c)) {
            chars.next();
            skip_digits(chars);
        }
    }
}

/// Escape characters Discord would read as markdown, leaving links alone.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for word in text.split_inclusive(char::is_whitespace) {
        let bare = word.trim_start_matches(char::is_control);
        if bare.starts_with("http://") || bare.starts_with("https://") {
            out.push_str(word);
            continue;
        }
        for c in word.chars() {
            if MARKDOWN_CHARS.contains(c) {
                out.push('\\');
            }
            out.push(c);
        }
    }

    out
}

/// Replace `:shortcode:` with the Unicode emoji, when one exists.
pub fn expand_shortcodes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(':') {
        let after = &rest[start + 1..];
        let Some(end) = after.find(':') else {
            break;
        };

        let code = &after[..end];
        let emoji = is_shortcode(code)
            .then(|| emojis::get_by_shortcode(code))
            .flatten();

        match emoji {
            Some(emoji) => {
                out.push_str(&rest[..start]);
                out.push_str(emoji.as_str());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[..=start]);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_shortcode(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '+'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Sender, Source};

    #[test]
    fn test_markdown_to_irc_basic_styles() {
        assert_eq!(
            markdown_to_irc("**bold** and *italic* __under__ ~~gone~~ `co*de`"),
            "\x02bold\x02 and \x1Ditalic\x1D \x1Funder\x1F \x1Egone\x1E \x11co*de\x11"
        );
    }

    #[test]
    fn test_markdown_to_irc_leaves_plain_text() {
        assert_eq!(markdown_to_irc("snake_case_name"), "snake_case_name");
        assert_eq!(markdown_to_irc("2 * 3 = 6"), "2 * 3 = 6");
        assert_eq!(markdown_to_irc("not \\*italic\\*"), "not *italic*");
    }

    #[test]
    fn test_markdown_to_irc_underscore_italic() {
        assert_eq!(markdown_to_irc("_hi_ there"), "\x1Dhi\x1D there");
    }

    #[test]
    fn test_irc_to_markdown_basic_styles() {
        assert_eq!(
            irc_to_markdown("\x02bold\x02 \x1Ditalic\x1D \x1Funder\x1F"),
            "**bold** *italic* __under__"
        );
    }

    #[test]
    fn test_irc_to_markdown_unclosed_and_reset() {
        assert_eq!(irc_to_markdown("\x02bold"), "**bold**");
        assert_eq!(irc_to_markdown("\x02\x1Dboth\x0F plain"), "***both*** plain");
    }

    #[test]
    fn test_irc_to_markdown_misnested() {
        // bold, underline, close bold, close underline
        assert_eq!(irc_to_markdown("\x02a\x1Fb\x02c\x1F"), "**a__b__**__c__");
    }

    #[test]
    fn test_irc_to_markdown_drops_empty_spans() {
        assert_eq!(irc_to_markdown("a\x02\x02b"), "ab");
    }

    #[test]
    fn test_irc_colors_stripped() {
        assert_eq!(irc_to_markdown("\x0304red\x03 \x0312,01blue\x03, 5"), "red blue, 5");
        assert_eq!(irc_to_markdown("\x04FF0000hex"), "hex");
    }

    #[test]
    fn test_escape_markdown_skips_links() {
        assert_eq!(
            escape_markdown("*wow* https://example.com/a_b_c"),
            "\\*wow\\* https://example.com/a_b_c"
        );
    }

    #[test]
    fn test_round_trip_styles() {
        let discord = "**hi** *there* __u__";
        assert_eq!(irc_to_markdown(&markdown_to_irc(discord)), discord);
    }

    #[test]
    fn test_expand_shortcodes() {
        assert_eq!(expand_shortcodes("hi :wave:"), "hi \u{1F44B}");
        assert_eq!(expand_shortcodes("at 12:30 :nope_not_real: x"), "at 12:30 :nope_not_real: x");
        assert_eq!(expand_shortcodes("a: :wave: :"), "a: \u{1F44B} :");
    }

    #[test]
    fn test_mutator_uses_origin() {
        let irc = Message::new(
            Source::new(Platform::Irc, "#general", Sender::new("a", "a")),
            "\x02hey\x02",
        );
        match TranslateFormatting::new().mutate(irc).unwrap() {
            Mutation::Continue(m) => assert_eq!(m.contents(), "**hey**"),
            Mutation::Drop => panic!("dropped"),
        }

        let reply = Message::from_bridge(Platform::Irc, "#general", "**raw**");
        match TranslateFormatting::new().mutate(reply).unwrap() {
            Mutation::Continue(m) => assert_eq!(m.contents(), "**raw**"),
            Mutation::Drop => panic!("dropped"),
        }
    }
}
