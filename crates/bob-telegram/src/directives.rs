// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-band directive tokenizer.
//!
//! Engine output can embed control markers that alter delivery:
//! `[[react: 👍]]`, `[[stream: edit|append|off]]`, `[[reply_to: 123]]`,
//! `[[reply_to_current]]`, plus short `[tg:<tag>[:value]]` aliases. The
//! tokenizer produces a typed directive list and a stripped text buffer;
//! silence is a property of the parse result, not a sentinel substring the
//! rest of the pipeline has to re-detect.

/// Streaming delivery mode requested by a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Edit,
    Append,
    Off,
}

/// A parsed in-band directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// React to the initiator message with this emoji.
    React(String),
    /// Switch the delivery mode.
    Stream(StreamMode),
    /// Reply-thread the first outgoing message to this message id.
    ReplyTo(i64),
    /// Reply-thread to the message that triggered this run.
    ReplyToCurrent,
}

/// Result of tokenizing an output buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    /// The buffer with all recognized markers removed.
    pub text: String,
    pub directives: Vec<Directive>,
    /// A silent token matched: the run produces no visible message.
    pub silent: bool,
}

/// Tokenizes `raw`, stripping recognized markers and matching silent tokens.
///
/// Unrecognized bracket constructs are left in the text untouched. A silent
/// token counts when the stripped text begins with it.
pub fn parse_directives(raw: &str, silent_tokens: &[String]) -> ParsedOutput {
    let mut text = String::with_capacity(raw.len());
    let mut directives = Vec::new();
    let mut rest = raw;

    while let Some(pos) = rest.find('[') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some((directive, consumed)) = parse_double_bracket(tail) {
            if let Some(d) = directive {
                directives.push(d);
            }
            rest = &tail[consumed..];
        } else if let Some((directive, consumed)) = parse_tg_alias(tail) {
            if let Some(d) = directive {
                directives.push(d);
            }
            rest = &tail[consumed..];
        } else {
            text.push('[');
            rest = &tail[1..];
        }
    }
    text.push_str(rest);

    let trimmed = text.trim();
    let mut silent = false;
    for token in silent_tokens {
        if let Some(after) = trimmed.strip_prefix(token.as_str()) {
            if after.trim().is_empty() {
                silent = true;
                break;
            }
        }
    }

    ParsedOutput {
        text,
        directives,
        silent,
    }
}

/// `[[name: value]]` / `[[name]]`. Returns `(directive, bytes consumed)`;
/// `None` when `s` is not a well-formed double-bracket marker.
fn parse_double_bracket(s: &str) -> Option<(Option<Directive>, usize)> {
    let body = s.strip_prefix("[[")?;
    let end = body.find("]]")?;
    let consumed = 2 + end + 2;
    let directive = parse_body(&body[..end]);
    // A well-formed but unknown marker is dropped from the visible text,
    // same as recognized ones.
    Some((directive, consumed))
}

/// `[tg:tag]` / `[tg:tag:value]` alias form.
fn parse_tg_alias(s: &str) -> Option<(Option<Directive>, usize)> {
    let body = s.strip_prefix("[tg:")?;
    let end = body.find(']')?;
    let consumed = 4 + end + 1;
    let inner = &body[..end];
    let directive = match inner.split_once(':') {
        Some((tag, value)) => parse_body(&format!("{tag}: {value}")),
        None => parse_body(inner),
    };
    Some((directive, consumed))
}

fn parse_body(body: &str) -> Option<Directive> {
    let (name, value) = match body.split_once(':') {
        Some((n, v)) => (n.trim(), v.trim()),
        None => (body.trim(), ""),
    };

    match name {
        "react" if !value.is_empty() => Some(Directive::React(value.to_string())),
        "stream" => match value {
            "edit" => Some(Directive::Stream(StreamMode::Edit)),
            "append" => Some(Directive::Stream(StreamMode::Append)),
            "off" => Some(Directive::Stream(StreamMode::Off)),
            _ => None,
        },
        "reply_to" => value.parse::<i64>().ok().map(Directive::ReplyTo),
        "reply_to_current" => Some(Directive::ReplyToCurrent),
        _ => None,
    }
}

/// Removes reasoning wrappers (`<thinking>…</thinking>` and kin) from
/// visible text. An unclosed wrapper swallows everything after it.
pub fn sanitize(text: &str) -> String {
    const WRAPPERS: &[&str] = &["thinking", "reasoning", "reflection"];

    let mut result = text.to_string();
    for tag in WRAPPERS {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        loop {
            let Some(start) = result.find(&open) else { break };
            match result[start..].find(&close) {
                Some(rel_end) => {
                    let end = start + rel_end + close.len();
                    result.replace_range(start..end, "");
                }
                None => {
                    result.truncate(start);
                    break;
                }
            }
        }
    }
    result
}

/// Cuts a trailing unclosed marker off a streaming preview so partially
/// received directives never flash on screen.
pub fn trim_partial_marker(text: &str) -> &str {
    for opener in ["[[", "[tg:"] {
        if let Some(pos) = text.rfind(opener) {
            let tail = &text[pos..];
            let closed = if opener == "[[" {
                tail.contains("]]")
            } else {
                tail.contains(']')
            };
            if !closed {
                return &text[..pos];
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_tokens() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn plain_text_passes_through() {
        let parsed = parse_directives("just some text", &no_tokens());
        assert_eq!(parsed.text, "just some text");
        assert!(parsed.directives.is_empty());
        assert!(!parsed.silent);
    }

    #[test]
    fn react_directive_is_stripped_and_typed() {
        let parsed = parse_directives("done! [[react: 👍]]", &no_tokens());
        assert_eq!(parsed.text, "done! ");
        assert_eq!(parsed.directives, vec![Directive::React("👍".into())]);
    }

    #[test]
    fn stream_modes() {
        for (input, mode) in [
            ("[[stream: edit]]", StreamMode::Edit),
            ("[[stream: append]]", StreamMode::Append),
            ("[[stream: off]]", StreamMode::Off),
        ] {
            let parsed = parse_directives(input, &no_tokens());
            assert_eq!(parsed.directives, vec![Directive::Stream(mode)]);
            assert!(parsed.text.is_empty());
        }
    }

    #[test]
    fn reply_directives() {
        let parsed = parse_directives("[[reply_to: 42]]ok[[reply_to_current]]", &no_tokens());
        assert_eq!(parsed.text, "ok");
        assert_eq!(
            parsed.directives,
            vec![Directive::ReplyTo(42), Directive::ReplyToCurrent]
        );
    }

    #[test]
    fn tg_aliases_map_to_same_directives() {
        let parsed = parse_directives("[tg:react:🔥] and [tg:stream:append]", &no_tokens());
        assert_eq!(parsed.text, " and ");
        assert_eq!(
            parsed.directives,
            vec![
                Directive::React("🔥".into()),
                Directive::Stream(StreamMode::Append)
            ]
        );

        let parsed = parse_directives("[tg:reply_to_current]", &no_tokens());
        assert_eq!(parsed.directives, vec![Directive::ReplyToCurrent]);
    }

    #[test]
    fn unknown_bracket_constructs_survive() {
        let parsed = parse_directives("see [1] and [link](url)", &no_tokens());
        assert_eq!(parsed.text, "see [1] and [link](url)");
        assert!(parsed.directives.is_empty());
    }

    #[test]
    fn malformed_reply_to_is_dropped_not_kept() {
        // Well-formed marker syntax with a bad value: stripped, no directive.
        let parsed = parse_directives("[[reply_to: soon]]hi", &no_tokens());
        assert_eq!(parsed.text, "hi");
        assert!(parsed.directives.is_empty());
    }

    #[test]
    fn silent_token_matches_alone() {
        let tokens = vec!["HEARTBEAT_OK".to_string(), "NO_REPLY".to_string()];
        assert!(parse_directives("HEARTBEAT_OK", &tokens).silent);
        assert!(parse_directives("  NO_REPLY\n", &tokens).silent);
        assert!(parse_directives("HEARTBEAT_OK [[react: 👍]]", &tokens).silent);
        assert!(!parse_directives("HEARTBEAT_OK but also news", &tokens).silent);
        assert!(!parse_directives("all good", &tokens).silent);
    }

    #[test]
    fn sanitize_removes_reasoning_wrappers() {
        assert_eq!(
            sanitize("<thinking>hmm</thinking>The answer is 4."),
            "The answer is 4."
        );
        assert_eq!(sanitize("a<reasoning>x</reasoning>b"), "ab");
        // Unclosed wrapper swallows the tail.
        assert_eq!(sanitize("visible<thinking>never closed"), "visible");
        assert_eq!(sanitize("no wrappers here"), "no wrappers here");
    }

    #[test]
    fn partial_marker_is_trimmed_from_previews() {
        assert_eq!(trim_partial_marker("text [[rea"), "text ");
        assert_eq!(trim_partial_marker("text [tg:re"), "text ");
        assert_eq!(trim_partial_marker("complete [[react: x]]"), "complete [[react: x]]");
        assert_eq!(trim_partial_marker("plain"), "plain");
    }
}
