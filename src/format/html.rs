//! Helpers for Telegram's HTML parse mode.
//!
//! Telegram accepts a small set of tags and rejects a message outright when
//! tags are unbalanced or a bare `<`, `>` or `&` appears in text, so anything
//! built from external HTML goes through [`sanitize_html`] (ammonia) and long
//! output is cut with [`truncate_html`] or split with [`chunk_html`], which
//! work on ammonia's well-formed output.

use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashSet;

pub use teloxide::utils::html::escape;

/// Tags kept by [`sanitize_html`].
pub const ALLOWED_TAGS: &[&str] = &["a", "b", "code", "i", "pre"];

/// URL schemes allowed in `<a href>`.
const LINK_SCHEMES: [&str; 3] = ["http", "https", "tg"];

/// Telegram's limit on message text length.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Keys stripped from update dumps before they are forwarded to log chats.
const REDACTED_KEYS: &[&str] = &["id", "first_name", "last_name", "username"];

#[derive(Debug, Clone, PartialEq)]
struct Tag<'a> {
    raw: &'a str,
    name: String,
    closing: bool,
    self_closing: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Tag(Tag<'a>),
    /// One visible character, possibly as an entity.
    Text(Cow<'a, str>),
}

impl Token<'_> {
    fn as_str(&self) -> &str {
        match self {
            Token::Tag(tag) => tag.raw,
            Token::Text(text) => text.as_ref(),
        }
    }
}

fn parse_tag(raw: &str) -> Option<Tag<'_>> {
    let inner = raw.get(1..raw.len() - 1)?;
    if inner.contains('<') {
        return None;
    }
    let closing = inner.starts_with('/');
    let body = if closing { &inner[1..] } else { inner };
    // `< b` is text, `<b` is a tag
    if !body.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    let name = body
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    Some(Tag {
        raw,
        name,
        closing,
        self_closing: !closing && inner.trim_end().ends_with('/'),
    })
}

fn entity_len(rest: &str) -> Option<usize> {
    let end = rest.char_indices().take(12).find(|(_, c)| *c == ';')?.0;
    let body = &rest[1..end];
    let valid = !body.is_empty()
        && (body.chars().all(|c| c.is_ascii_alphanumeric())
            || (body.starts_with('#') && body[1..].chars().all(|c| c.is_ascii_alphanumeric()) && body.len() > 1));
    valid.then_some(end + 1)
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];
        let Some(c) = rest.chars().next() else {
            break;
        };
        match c {
            '<' => {
                let tag = rest
                    .find('>')
                    .and_then(|end| parse_tag(&rest[..=end]).map(|tag| (end + 1, tag)));
                match tag {
                    Some((len, tag)) => {
                        tokens.push(Token::Tag(tag));
                        i += len;
                    }
                    None => {
                        tokens.push(Token::Text(Cow::Borrowed("&lt;")));
                        i += 1;
                    }
                }
            }
            '>' => {
                tokens.push(Token::Text(Cow::Borrowed("&gt;")));
                i += 1;
            }
            '&' => match entity_len(rest) {
                Some(len) => {
                    tokens.push(Token::Text(Cow::Borrowed(&rest[..len])));
                    i += len;
                }
                None => {
                    tokens.push(Token::Text(Cow::Borrowed("&amp;")));
                    i += 1;
                }
            },
            _ => {
                let len = c.len_utf8();
                tokens.push(Token::Text(Cow::Borrowed(&rest[..len])));
                i += len;
            }
        }
    }
    tokens
}

/// Keep only `allowed` tags, turn `<br>` into newlines and drop every other
/// tag while keeping its text. Only `href` survives, and only on `<a>`.
pub fn sanitize_html(text: &str, allowed: &[&str]) -> String {
    let mut builder = ammonia::Builder::empty();
    builder
        .add_tags(allowed.iter().copied())
        .add_tags(["br"])
        .link_rel(None);
    if allowed.contains(&"a") {
        builder
            .add_tag_attributes("a", ["href"])
            .url_schemes(HashSet::from(LINK_SCHEMES));
    }
    builder.clean(text).to_string().replace("<br>", "\n")
}

/// Close unclosed tags and drop closing tags without a matching opener.
pub fn balance_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open: Vec<String> = Vec::new();
    for token in tokenize(text) {
        match token {
            Token::Tag(tag) if tag.self_closing => out.push_str(tag.raw),
            Token::Tag(tag) if tag.closing => {
                if open.last() == Some(&tag.name) {
                    open.pop();
                    out.push_str(tag.raw);
                }
            }
            Token::Tag(tag) => {
                open.push(tag.name.clone());
                out.push_str(tag.raw);
            }
            Token::Text(t) => out.push_str(&t),
        }
    }
    for name in open.iter().rev() {
        out.push_str(&format!("</{name}>"));
    }
    out
}

/// Cut to at most `max_chars` visible characters without breaking a tag or
/// entity, appending an ellipsis when anything was removed.
pub fn truncate_html(text: &str, max_chars: usize) -> String {
    let tokens = tokenize(text);
    let visible = tokens.iter().filter(|t| matches!(t, Token::Text(_))).count();
    if visible <= max_chars {
        return balance_html(text);
    }

    let mut out = String::new();
    let mut count = 0;
    for token in &tokens {
        if let Token::Text(_) = token {
            if count == max_chars {
                break;
            }
            count += 1;
        }
        out.push_str(token.as_str());
    }
    out.push('…');
    balance_html(&out)
}

fn closers(open: &[(String, &str)]) -> String {
    open.iter()
        .rev()
        .map(|(name, _)| format!("</{name}>"))
        .collect()
}

fn closer_len(name: &str) -> usize {
    name.len() + 3
}

/// Split HTML into pieces that fit a Telegram message. Each piece, closing
/// tags included, stays within 80% of `limit` characters. Tags open at a cut
/// are closed at the end of one piece and reopened at the start of the next;
/// opening tags with no text after them yet move to the next piece whole.
pub fn chunk_html(text: &str, limit: usize) -> Vec<String> {
    let budget = (limit * 8 / 10).max(1);
    let mut chunks = Vec::new();
    let mut open: Vec<(String, &str)> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    let mut has_text = false;
    // Opening tags at the end of `current` not yet followed by text
    let mut trailing = 0;
    let mut trailing_start = 0;

    for token in tokenize(text) {
        let unit = token.as_str().chars().count();
        let overhead: usize = open.iter().map(|(name, _)| closer_len(name)).sum();

        let needed = match &token {
            Token::Tag(tag) if tag.self_closing => unit + overhead,
            Token::Tag(tag) if tag.closing => {
                if open.last().map(|(name, _)| name) != Some(&tag.name) {
                    continue;
                }
                // Takes the place of the closer already counted
                overhead
            }
            Token::Tag(tag) => unit + overhead + closer_len(&tag.name),
            Token::Text(_) => unit + overhead,
        };

        if has_text && current_len + needed > budget {
            let kept = open.len() - trailing;
            if trailing > 0 {
                current.truncate(trailing_start);
            }
            current.push_str(&closers(&open[..kept]));
            chunks.push(std::mem::take(&mut current));
            for (_, raw) in &open {
                current.push_str(raw);
            }
            current_len = current.chars().count();
            has_text = false;
            trailing = 0;
        }

        match &token {
            Token::Tag(tag) if tag.self_closing => trailing = 0,
            Token::Tag(tag) if tag.closing => {
                open.pop();
                trailing = 0;
            }
            Token::Tag(tag) => {
                if trailing == 0 {
                    trailing_start = current.len();
                }
                trailing += 1;
                open.push((tag.name.clone(), tag.raw));
            }
            Token::Text(t) => {
                trailing = 0;
                if !t.trim().is_empty() {
                    has_text = true;
                }
            }
        }
        current.push_str(token.as_str());
        current_len += unit;
    }

    if has_text {
        let kept = open.len() - trailing;
        if trailing > 0 {
            current.truncate(trailing_start);
        }
        current.push_str(&closers(&open[..kept]));
        chunks.push(current);
    }
    chunks
}

/// Remove identifying keys from an update dump.
pub fn redact_update(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !REDACTED_KEYS.contains(&key.as_str()))
                .map(|(key, v)| (key.clone(), redact_update(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_update).collect()),
        other => other.clone(),
    }
}
