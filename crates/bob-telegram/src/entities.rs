// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Markdown to message-entity rendering.
//!
//! The Bot API addresses rich-text spans by UTF-16 code unit offsets over
//! the plain text, with entities overriding any parse mode. This renderer
//! walks the markdown once, emitting cleaned text plus entity spans, and
//! provides the offset arithmetic chunking needs.

use bob_core::types::{EntityKind, TextEntity};

/// Renders a markdown subset to plain text plus entity spans.
///
/// Supported: `**bold**`, `_italic_` (word-bounded), `` `code` ``,
/// fenced blocks with an optional language, and `[text](http…)` links.
/// Anything unclosed is left as literal text.
pub fn render_markdown(input: &str) -> (String, Vec<TextEntity>) {
    let mut out = String::with_capacity(input.len());
    let mut entities: Vec<TextEntity> = Vec::new();
    let mut out_utf16 = 0usize;
    let mut prev_char: Option<char> = None;
    let mut rest = input;

    macro_rules! push_plain {
        ($s:expr) => {{
            let s: &str = $s;
            out.push_str(s);
            out_utf16 += utf16_len(s);
            prev_char = s.chars().last().or(prev_char);
        }};
    }

    while !rest.is_empty() {
        // Fenced code block: ```lang\n…```
        if let Some(body) = rest.strip_prefix("```") {
            if let Some(end) = body.find("```") {
                let inner = &body[..end];
                let (language, code) = match inner.split_once('\n') {
                    Some((lang, code)) if !lang.trim().is_empty() => {
                        (Some(lang.trim().to_string()), code)
                    }
                    Some((_, code)) => (None, code),
                    None => (None, inner),
                };
                let code = code.trim_end_matches('\n');
                let start = out_utf16;
                push_plain!(code);
                entities.push(TextEntity {
                    kind: EntityKind::Pre { language },
                    offset: start,
                    length: out_utf16 - start,
                });
                rest = &body[end + 3..];
                continue;
            }
        }

        // Bold: **…**
        if let Some(body) = rest.strip_prefix("**") {
            if let Some(end) = body.find("**") {
                if end > 0 {
                    let start = out_utf16;
                    push_plain!(&body[..end]);
                    entities.push(TextEntity {
                        kind: EntityKind::Bold,
                        offset: start,
                        length: out_utf16 - start,
                    });
                    rest = &body[end + 2..];
                    continue;
                }
            }
        }

        // Inline code: `…`
        if let Some(body) = rest.strip_prefix('`') {
            if let Some(end) = body.find('`') {
                if end > 0 {
                    let start = out_utf16;
                    push_plain!(&body[..end]);
                    entities.push(TextEntity {
                        kind: EntityKind::Code,
                        offset: start,
                        length: out_utf16 - start,
                    });
                    rest = &body[end + 1..];
                    continue;
                }
            }
        }

        // Link: [text](http…)
        if rest.starts_with('[') {
            if let Some((label, url, consumed)) = parse_link(rest) {
                let start = out_utf16;
                push_plain!(label);
                entities.push(TextEntity {
                    kind: EntityKind::TextLink {
                        url: url.to_string(),
                    },
                    offset: start,
                    length: out_utf16 - start,
                });
                rest = &rest[consumed..];
                continue;
            }
        }

        // Italic: _…_ only at word boundaries, single line.
        if rest.starts_with('_') && !prev_char.is_some_and(|c| c.is_alphanumeric()) {
            let body = &rest[1..];
            if let Some(end) = body.find('_') {
                let inner = &body[..end];
                let after = body[end + 1..].chars().next();
                let boundary_ok = !after.is_some_and(|c| c.is_alphanumeric());
                if !inner.is_empty() && !inner.contains('\n') && boundary_ok {
                    let start = out_utf16;
                    push_plain!(inner);
                    entities.push(TextEntity {
                        kind: EntityKind::Italic,
                        offset: start,
                        length: out_utf16 - start,
                    });
                    rest = &body[end + 1..];
                    continue;
                }
            }
        }

        let Some(ch) = rest.chars().next() else { break };
        out.push(ch);
        out_utf16 += ch.len_utf16();
        prev_char = Some(ch);
        rest = &rest[ch.len_utf8()..];
    }

    (out, entities)
}

/// `[label](url)` where the url scheme is http(s). Returns
/// `(label, url, bytes consumed)`.
fn parse_link(s: &str) -> Option<(&str, &str, usize)> {
    let close = s.find("](")?;
    let label = &s[1..close];
    if label.is_empty() || label.contains('\n') {
        return None;
    }
    let after = &s[close + 2..];
    let end = after.find(')')?;
    let url = &after[..end];
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return None;
    }
    Some((label, url, close + 2 + end + 1))
}

/// UTF-16 code unit length of a string.
pub fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Clips entities to the UTF-16 window `[start, end)` and rebases them to it.
pub fn slice_entities(entities: &[TextEntity], start: usize, end: usize) -> Vec<TextEntity> {
    entities
        .iter()
        .filter_map(|e| {
            let e_start = e.offset.max(start);
            let e_end = (e.offset + e.length).min(end);
            if e_start >= e_end {
                return None;
            }
            Some(TextEntity {
                kind: e.kind.clone(),
                offset: e_start - start,
                length: e_end - e_start,
            })
        })
        .collect()
}

/// Splits rendered text into chunks of at most `max_chars`, preferring
/// paragraph boundaries, carrying each chunk's entities by offset-slicing.
pub fn split_chunks(
    text: &str,
    entities: &[TextEntity],
    max_chars: usize,
) -> Vec<(String, Vec<TextEntity>)> {
    let mut chunks = Vec::new();
    let mut cursor = 0usize; // byte offset into `text`

    loop {
        let remaining = &text[cursor..];
        if remaining.chars().count() <= max_chars {
            let start16 = utf16_len(&text[..cursor]);
            let end16 = start16 + utf16_len(remaining);
            chunks.push((
                remaining.to_string(),
                slice_entities(entities, start16, end16),
            ));
            break;
        }

        let (first_end, rest_start) = split_point(remaining, max_chars);
        let first = &remaining[..first_end];
        let start16 = utf16_len(&text[..cursor]);
        let end16 = start16 + utf16_len(first);
        chunks.push((first.to_string(), slice_entities(entities, start16, end16)));
        cursor += rest_start;
    }

    chunks
}

/// Byte offsets `(end of first part, start of remainder)` for a split at or
/// before `max_chars`. Priority: blank line, newline, space, hard split.
fn split_point(text: &str, max_chars: usize) -> (usize, usize) {
    let limit = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let region = &text[..limit];

    if let Some(pos) = region.rfind("\n\n") {
        let rest = pos + 2 + leading_ws(&text[pos + 2..]);
        return (pos, rest);
    }
    if let Some(pos) = region.rfind('\n') {
        let rest = pos + 1 + leading_ws(&text[pos + 1..]);
        return (pos, rest);
    }
    if let Some(pos) = region.rfind(' ') {
        return (pos, pos + 1);
    }
    (limit, limit)
}

fn leading_ws(s: &str) -> usize {
    s.len() - s.trim_start().len()
}
