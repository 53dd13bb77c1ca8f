//! Text splitting offered to plugins.
//!
//! - [`chunk_with_overlap`] breaks text on paragraph, line and word
//!   boundaries and packs the pieces into windows of at most
//!   `max_chunk_size` characters, carrying up to `overlap` characters of the
//!   previous window into the next.
//! - [`chunk_by_sentence`] returns one chunk per sentence, splitting sentences
//!   longer than `max_chunk_size`.

use std::collections::VecDeque;

use hubble_core::defaults::{CHUNK_OVERLAP, CHUNK_SIZE};

/// Size limits for chunking, in characters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: CHUNK_SIZE,
            overlap: CHUNK_OVERLAP,
        }
    }
}

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

const ABBREVIATIONS: [&str; 14] = [
    "dr", "mr", "mrs", "ms", "prof", "sr", "jr", "inc", "ltd", "co", "etc", "vs", "e.g", "i.e",
];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th character, or the end of `s`.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Cut `text` into pieces of at most `max` characters.
fn hard_split<'a>(text: &'a str, max: usize, out: &mut Vec<&'a str>) {
    let mut rest = text;
    while !rest.is_empty() {
        let end = byte_offset(rest, max.max(1));
        out.push(&rest[..end]);
        rest = &rest[end..];
    }
}

fn split_recursive<'a>(text: &'a str, separators: &[&str], max: usize, out: &mut Vec<&'a str>) {
    if char_len(text) <= max {
        out.push(text);
        return;
    }
    match separators.split_first() {
        Some((sep, rest)) if text.contains(sep) => {
            for piece in text.split_inclusive(sep) {
                split_recursive(piece, rest, max, out);
            }
        }
        Some((_, rest)) => split_recursive(text, rest, max, out),
        None => hard_split(text, max, out),
    }
}

fn flush(window: &VecDeque<&str>, chunks: &mut Vec<String>) {
    let chunk: String = window.iter().copied().collect();
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

/// Sliding-window chunks over natural boundaries.
pub fn chunk_with_overlap(text: &str, config: ChunkerConfig) -> Vec<String> {
    let max = config.max_chunk_size.max(1);
    let overlap = config.overlap.min(max.saturating_sub(1));

    let mut pieces = Vec::new();
    split_recursive(text, &SEPARATORS, max, &mut pieces);

    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut window_len = 0;

    for piece in pieces {
        let len = char_len(piece);
        if window_len + len > max && !window.is_empty() {
            flush(&window, &mut chunks);
            // Keep a tail of the finished window as context for the next one.
            while window_len > overlap || (window_len + len > max && !window.is_empty()) {
                match window.pop_front() {
                    Some(front) => window_len -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece);
        window_len += len;
    }
    if !window.is_empty() {
        flush(&window, &mut chunks);
    }
    chunks
}

fn ends_with_abbreviation(sentence: &str) -> bool {
    let Some(body) = sentence.trim_end().strip_suffix('.') else {
        return false;
    };
    let last_word = body
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    ABBREVIATIONS.contains(&last_word.as_str())
}

/// Byte ranges of the sentences in `text`.
fn find_sentences(text: &str) -> Vec<(usize, usize)> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if matches!(next, '.' | '!' | '?') {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if !at_boundary || ends_with_abbreviation(&text[start..end]) {
            continue;
        }
        sentences.push((start, end));
        start = end;
    }

    if start < text.len() && !text[start..].trim().is_empty() {
        sentences.push((start, text.len()));
    }
    sentences
}

/// One chunk per sentence.
pub fn chunk_by_sentence(text: &str, config: ChunkerConfig) -> Vec<String> {
    let max = config.max_chunk_size.max(1);
    let mut chunks = Vec::new();

    for (start, end) in find_sentences(text) {
        let sentence = text[start..end].trim();
        if sentence.is_empty() {
            continue;
        }
        if char_len(sentence) <= max {
            chunks.push(sentence.to_string());
            continue;
        }
        let mut pieces = Vec::new();
        hard_split(sentence, max, &mut pieces);
        chunks.extend(
            pieces
                .into_iter()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chunk_size: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_size,
            overlap,
        }
    }

    #[test]
    fn test_overlap_empty_and_short() {
        assert!(chunk_with_overlap("", ChunkerConfig::default()).is_empty());
        assert!(chunk_with_overlap("   \n\n  ", ChunkerConfig::default()).is_empty());
        assert_eq!(
            chunk_with_overlap("short text", ChunkerConfig::default()),
            vec!["short text"]
        );
    }

    #[test]
    fn test_overlap_respects_max_size() {
        let text = "word ".repeat(1000);
        let chunks = chunk_with_overlap(&text, ChunkerConfig::default());
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
    }

    #[test]
    fn test_overlap_carries_context() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_with_overlap(text, config(20, 8));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(pair[1].contains(last_word), "{pair:?}");
        }
    }

    #[test]
    fn test_overlap_prefers_paragraphs() {
        let text = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = chunk_with_overlap(&text, config(40, 0));
        assert_eq!(chunks, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn test_overlap_hard_splits_long_words() {
        let text = "x".repeat(25);
        let chunks = chunk_with_overlap(&text, config(10, 0));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], "xxxxx");
    }

    #[test]
    fn test_overlap_utf8_safe() {
        let text = "é".repeat(30);
        let chunks = chunk_with_overlap(&text, config(7, 2));
        assert!(chunks.iter().all(|c| c.chars().count() <= 7));
    }

    #[test]
    fn test_sentences() {
        let chunks = chunk_by_sentence(
            "First sentence. Second one! A third? Trailing text",
            ChunkerConfig::default(),
        );
        assert_eq!(
            chunks,
            vec!["First sentence.", "Second one!", "A third?", "Trailing text"]
        );
    }

    #[test]
    fn test_sentences_skip_abbreviations_and_decimals() {
        let chunks = chunk_by_sentence(
            "Dr. Smith measured 3.14 units. Then e.g. more work followed.",
            ChunkerConfig::default(),
        );
        assert_eq!(
            chunks,
            vec!["Dr. Smith measured 3.14 units.", "Then e.g. more work followed."]
        );
    }

    #[test]
    fn test_sentences_split_when_too_long() {
        let sentence = format!("{}.", "a".repeat(25));
        let chunks = chunk_by_sentence(&sentence, config(10, 0));
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn test_sentences_empty() {
        assert!(chunk_by_sentence("", ChunkerConfig::default()).is_empty());
        assert!(chunk_by_sentence("  ", ChunkerConfig::default()).is_empty());
    }
}
