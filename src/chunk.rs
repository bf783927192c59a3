//! Paragraph-boundary passage splitter.
//!
//! Splits extracted document text into [`Passage`]s that respect a
//! `max_tokens` limit, so the retriever scores and the reader reads
//! paragraph-sized units rather than whole files.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs until adding the next one would exceed `max_chars`,
//!    then flush the buffer as a passage.
//! 4. A single paragraph longer than `max_chars` is hard-split at the nearest
//!    newline or space boundary.
//!
//! Unlike chunking for display, whitespace-only text yields no passages:
//! there is nothing to retrieve from it.

use uuid::Uuid;

use crate::models::Passage;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into passages of at most `max_tokens` (approximate) each.
pub fn split_passages(document: &str, text: &str, max_tokens: usize) -> Vec<Passage> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut passages = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            push(&mut passages, document, &buf);
            buf.clear();
        }

        if trimmed.len() > max_chars {
            hard_split(&mut passages, document, trimmed, max_chars);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        push(&mut passages, document, &buf);
    }
    passages
}

fn hard_split(passages: &mut Vec<Passage>, document: &str, mut remaining: &str, max_chars: usize) {
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        // Always make progress, even when the first char is wider than max_chars.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            push(passages, document, piece);
        }
        remaining = &remaining[split_at..];
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn push(passages: &mut Vec<Passage>, document: &str, text: &str) {
    passages.push(Passage {
        id: Uuid::new_v4().to_string(),
        document: document.to_string(),
        text: text.to_string(),
    });
}
