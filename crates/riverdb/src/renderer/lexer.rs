//! Placeholder lexing.
//!
//! Scans a SQL template once, left to right, and splits it into literal text
//! and placeholder segments while respecting quoted-string contexts and the
//! `::` cast operator.

use std::collections::HashSet;

/// One piece of a lexed statement template.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text(String),
    /// Zero-based occurrence index of a `?` placeholder.
    Positional(usize),
    /// A `:name` placeholder; the name is not unique across segments.
    Named(String),
}

#[derive(Copy, Clone, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
    Backtick,
}

/// The result of lexing a template: its segments, the number of distinct
/// positional occurrences, and the set of distinct names referenced.
pub(crate) struct Lexed {
    pub(crate) segments: Vec<Segment>,
    pub(crate) declared_positions: usize,
    pub(crate) declared_names: HashSet<String>,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_name_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) fn lex(sql: &str) -> Lexed {
    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut i = 0usize;
    let mut quote = Quote::None;
    let mut buf = String::new();
    let mut segments = Vec::new();
    let mut positional_count = 0usize;
    let mut names = HashSet::new();

    let flush = |buf: &mut String, segments: &mut Vec<Segment>| {
        if !buf.is_empty() {
            segments.push(Segment::Text(std::mem::take(buf)));
        }
    };

    while i < len {
        let c = chars[i];

        match quote {
            Quote::Single | Quote::Double | Quote::Backtick => {
                let quote_char = match quote {
                    Quote::Single => '\'',
                    Quote::Double => '"',
                    Quote::Backtick => '`',
                    Quote::None => unreachable!(),
                };
                buf.push(c);
                if c == quote_char {
                    // A doubled quote char is an escaped literal quote; stay
                    // inside the same quoted region.
                    if i + 1 < len && chars[i + 1] == quote_char {
                        buf.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    quote = Quote::None;
                }
                i += 1;
                continue;
            }
            Quote::None => {}
        }

        match c {
            '\'' => {
                quote = Quote::Single;
                buf.push(c);
                i += 1;
            }
            '"' => {
                quote = Quote::Double;
                buf.push(c);
                i += 1;
            }
            '`' => {
                quote = Quote::Backtick;
                buf.push(c);
                i += 1;
            }
            '?' => {
                flush(&mut buf, &mut segments);
                segments.push(Segment::Positional(positional_count));
                positional_count += 1;
                i += 1;
            }
            ':' => {
                // `::` is a type cast; both colons are inert.
                if i + 1 < len && chars[i + 1] == ':' {
                    buf.push(':');
                    buf.push(':');
                    i += 2;
                    continue;
                }

                // Try to lex a named parameter.
                if i + 1 < len && is_name_start(chars[i + 1]) {
                    let start = i + 1;
                    let mut end = start + 1;
                    while end < len && is_name_continue(chars[end]) {
                        end += 1;
                    }
                    let followed_by_disallowed =
                        end < len && matches!(chars[end], 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | ':' | '\'' | '"');
                    if !followed_by_disallowed {
                        let name: String = chars[start..end].iter().collect();
                        flush(&mut buf, &mut segments);
                        segments.push(Segment::Named(name.clone()));
                        names.insert(name);
                        i = end;
                        continue;
                    }
                }

                // Not a valid named parameter; the colon is inert text.
                buf.push(':');
                i += 1;
            }
            _ => {
                buf.push(c);
                i += 1;
            }
        }
    }

    flush(&mut buf, &mut segments);

    Lexed {
        segments,
        declared_positions: positional_count,
        declared_names: names,
    }
}
