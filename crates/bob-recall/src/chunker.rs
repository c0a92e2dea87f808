// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heading-bounded markdown chunking.
//!
//! The parser maintains a heading stack indexed by level, so every chunk
//! carries its breadcrumb trail. Oversized sections are split into
//! sub-chunks with a small overlap; a trailing sub-chunk that adds almost
//! nothing beyond the overlap is dropped.

/// Soft cap per chunk, in estimated tokens.
const MAX_CHUNK_TOKENS: usize = 500;

/// Overlap carried into each continuation sub-chunk.
const OVERLAP_TOKENS: usize = 40;

/// Continuations contributing fewer new tokens than this are dropped.
const MIN_TAIL_TOKENS: usize = 50;

/// One indexable chunk of a markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub title: String,
    /// Ancestor heading labels, outermost first.
    pub breadcrumbs: Vec<String>,
    pub content: String,
    /// 1-based line span in the source document.
    pub line_start: usize,
    pub line_end: usize,
    pub token_count: usize,
}

/// token ≈ ⌈chars / 4⌉
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Chunks a markdown document by headings.
///
/// `default_title` names content that appears before the first heading.
pub fn chunk_markdown(text: &str, default_title: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    // (level, title) stack; the open section is the last entry.
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut section_lines: Vec<(usize, &str)> = Vec::new();
    let mut section_title = default_title.to_string();
    let mut section_crumbs: Vec<String> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if let Some((level, heading)) = parse_heading(line) {
            emit_section(&mut chunks, &section_title, &section_crumbs, &section_lines);
            section_lines.clear();

            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            section_crumbs = stack.iter().map(|(_, t)| t.clone()).collect();
            section_title = heading.to_string();
            stack.push((level, heading.to_string()));
        } else {
            section_lines.push((line_no, line));
        }
    }
    emit_section(&mut chunks, &section_title, &section_crumbs, &section_lines);

    chunks
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    let title = rest.strip_prefix(' ')?;
    let title = title.trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes, title))
}

/// Emits one section as one or more chunks, splitting at the token cap.
fn emit_section(
    chunks: &mut Vec<Chunk>,
    title: &str,
    breadcrumbs: &[String],
    lines: &[(usize, &str)],
) {
    let content_lines: Vec<(usize, &str)> = trim_blank_edges(lines);
    if content_lines.is_empty() {
        return;
    }

    let full_text = join_lines(&content_lines);
    if estimate_tokens(&full_text) <= MAX_CHUNK_TOKENS {
        chunks.push(build_chunk(title, breadcrumbs, &content_lines));
        return;
    }

    // Oversized: accumulate line windows up to the cap, carrying overlap.
    let mut window: Vec<(usize, &str)> = Vec::new();
    let mut window_tokens = 0usize;
    let mut continuation = false;
    let mut pending: Vec<(usize, &str)> = content_lines;

    while !pending.is_empty() {
        // Every round must consume at least one pending line (i > 0), or a
        // long line after an overlap seed would loop forever.
        let mut i = 0;
        while i < pending.len() {
            let line_tokens = estimate_tokens(pending[i].1).max(1);
            if window_tokens + line_tokens > MAX_CHUNK_TOKENS && i > 0 {
                break;
            }
            window.push(pending[i]);
            window_tokens += line_tokens;
            i += 1;
        }
        let rest = pending.split_off(i);

        let chunk_title = if continuation {
            format!("{title} (cont.)")
        } else {
            title.to_string()
        };

        if continuation && rest.is_empty() {
            // Drop a tail that adds too little beyond the carried overlap.
            let new_tokens: usize = window
                .iter()
                .skip_while(|l| is_overlap_line(l, chunks))
                .map(|(_, t)| estimate_tokens(t).max(1))
                .sum();
            if new_tokens < MIN_TAIL_TOKENS {
                break;
            }
        }

        chunks.push(build_chunk(&chunk_title, breadcrumbs, &window));

        if rest.is_empty() {
            break;
        }

        // Seed the next window with trailing overlap from this one.
        let mut overlap: Vec<(usize, &str)> = Vec::new();
        let mut overlap_tokens = 0usize;
        for line in window.iter().rev() {
            let t = estimate_tokens(line.1).max(1);
            if overlap_tokens + t > OVERLAP_TOKENS {
                break;
            }
            overlap.push(*line);
            overlap_tokens += t;
        }
        overlap.reverse();

        window = overlap;
        window_tokens = overlap_tokens;
        continuation = true;
        pending = rest;
    }
}

fn is_overlap_line(line: &(usize, &str), chunks: &[Chunk]) -> bool {
    chunks
        .last()
        .is_some_and(|prev| line.0 <= prev.line_end)
}

fn trim_blank_edges<'a>(lines: &[(usize, &'a str)]) -> Vec<(usize, &'a str)> {
    let start = lines
        .iter()
        .position(|(_, l)| !l.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|(_, l)| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(start);
    lines[start..end].to_vec()
}

fn join_lines(lines: &[(usize, &str)]) -> String {
    lines
        .iter()
        .map(|(_, l)| *l)
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_chunk(title: &str, breadcrumbs: &[String], lines: &[(usize, &str)]) -> Chunk {
    let content = join_lines(lines);
    let token_count = estimate_tokens(&content);
    Chunk {
        title: title.to_string(),
        breadcrumbs: breadcrumbs.to_vec(),
        line_start: lines.first().map(|(n, _)| *n).unwrap_or(0),
        line_end: lines.last().map(|(n, _)| *n).unwrap_or(0),
        token_count,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_document_is_one_chunk() {
        let chunks = chunk_markdown("just a note\nwith two lines", "user");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "user");
        assert_eq!(chunks[0].content, "just a note\nwith two lines");
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, 2);
        assert!(chunks[0].breadcrumbs.is_empty());
    }

    #[test]
    fn headings_bound_chunks_and_build_breadcrumbs() {
        let doc = "\
# Projects
intro text

## Bob
daemon notes

### Scheduler
tick details

## Other
misc";
        let chunks = chunk_markdown(doc, "notes");
        let titles: Vec<_> = chunks.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Projects", "Bob", "Scheduler", "Other"]);

        let scheduler = &chunks[2];
        assert_eq!(scheduler.breadcrumbs, vec!["Projects", "Bob"]);
        assert_eq!(scheduler.content, "tick details");

        let other = &chunks[3];
        assert_eq!(other.breadcrumbs, vec!["Projects"]);
    }

    #[test]
    fn empty_sections_produce_no_chunks() {
        let doc = "# Empty\n\n# Full\ncontent";
        let chunks = chunk_markdown(doc, "x");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "Full");
    }

    #[test]
    fn oversized_section_splits_with_continuation_titles() {
        // ~50 lines of ~60 chars ≈ 750 tokens: must split.
        let body: Vec<String> = (0..50)
            .map(|i| format!("line {i} {}", "abcdefgh ".repeat(6)))
            .collect();
        let doc = format!("# Big\n{}", body.join("\n"));
        let chunks = chunk_markdown(&doc, "x");

        assert!(chunks.len() >= 2, "expected a split, got {}", chunks.len());
        assert_eq!(chunks[0].title, "Big");
        assert!(chunks[1].title.ends_with("(cont.)"));
        for chunk in &chunks {
            assert!(chunk.token_count <= MAX_CHUNK_TOKENS + OVERLAP_TOKENS);
        }
    }

    #[test]
    fn continuation_overlaps_previous_chunk() {
        let body: Vec<String> = (0..60)
            .map(|i| format!("unique-{i} {}", "filler ".repeat(8)))
            .collect();
        let doc = format!("# Big\n{}", body.join("\n"));
        let chunks = chunk_markdown(&doc, "x");
        assert!(chunks.len() >= 2);
        // The continuation starts at or before the previous chunk's end.
        assert!(chunks[1].line_start <= chunks[0].line_end);
    }

    #[test]
    fn line_numbers_are_one_based_spans() {
        let doc = "# A\nfirst\nsecond\n# B\nthird";
        let chunks = chunk_markdown(doc, "x");
        assert_eq!(chunks[0].line_start, 2);
        assert_eq!(chunks[0].line_end, 3);
        assert_eq!(chunks[1].line_start, 5);
        assert_eq!(chunks[1].line_end, 5);
    }

    #[test]
    fn hash_without_space_is_not_a_heading() {
        let chunks = chunk_markdown("#hashtag\ncontent", "x");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "x");
        assert!(chunks[0].content.contains("#hashtag"));
    }

    #[test]
    fn token_estimate_is_ceiling() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn sibling_heading_replaces_stack_level() {
        let doc = "## A\na body\n## B\nb body";
        let chunks = chunk_markdown(doc, "x");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].breadcrumbs.is_empty(), "B is a sibling, not a child");
    }
}
