//! Sliding-window text chunker with overlap carry.
//!
//! Splits extracted document regions into [`Chunk`]s that respect a
//! configurable `max_chars` limit, carrying `overlap_chars` of trailing
//! context into each following chunk. Window ends prefer sentence
//! boundaries so chunks stay semantically coherent.
//!
//! Each chunk receives a deterministic id derived from its document id and
//! position, plus a SHA-256 hash of its content for staleness detection in
//! the embedding pipeline.
//!
//! # Algorithm
//!
//! 1. Measure in characters (a window never splits a UTF-8 code point).
//! 2. A region no longer than `max_chars` becomes exactly one chunk.
//! 3. Otherwise a window covers `[start, start + max_chars)`; when sentence
//!    splitting is enabled the end is pulled back to the last sentence end
//!    inside the window that still clears the overlap, falling back to the
//!    hard cut when none exists.
//! 4. The next window starts `overlap_chars` before the previous end, so
//!    consecutive chunks minus the overlap reconstruct the region exactly.
//! 5. Every image region becomes exactly one image-modality chunk.
//! 6. At least one chunk is always produced, even for an empty document.
//!
//! # Example
//!
//! ```rust
//! use localrag::chunker::chunk_document;
//! use localrag::config::ChunkingConfig;
//! use localrag::models::Region;
//!
//! let regions = vec![Region::Text { text: "Hello world.".into(), page: None }];
//! let chunks = chunk_document("doc-123", &regions, &ChunkingConfig::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "doc-123:0");
//! ```

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Modality, Region};

/// Approximate characters-per-token ratio.
///
/// Rough heuristic (4 chars ≈ 1 token); good enough for sizing reports
/// without pulling in a tokenizer.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document's extracted regions into chunks.
///
/// Positions are global across regions and contiguous starting at 0, so a
/// chunk id (`"{document_id}:{position}"`) is stable for unchanged input.
///
/// # Guarantees
///
/// - At least one chunk is always returned (even for an empty document).
/// - Text chunks are at most `max_chars` characters.
/// - Each text chunk after the first begins with the previous chunk's final
///   `overlap_chars` characters of the same region.
/// - Each image region yields exactly one image chunk whose `content` is the
///   caption (or the reference's file name when no caption exists).
pub fn chunk_document(document_id: &str, regions: &[Region], cfg: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut position: i64 = 0;

    for region in regions {
        match region {
            Region::Text { text, page } => {
                for window in split_windows(text, cfg) {
                    chunks.push(make_text_chunk(document_id, position, window, *page));
                    position += 1;
                }
            }
            Region::Image {
                reference,
                caption,
                data_base64,
                page,
            } => {
                chunks.push(make_image_chunk(
                    document_id,
                    position,
                    reference,
                    caption.as_deref(),
                    data_base64.clone(),
                    *page,
                ));
                position += 1;
            }
        }
    }

    if chunks.is_empty() {
        chunks.push(make_text_chunk(document_id, 0, "", None));
    }

    chunks
}

/// Deterministic chunk id: document id plus position.
pub fn chunk_id(document_id: &str, position: i64) -> String {
    format!("{document_id}:{position}")
}

/// Split one text region into overlapping windows.
///
/// Returned slices borrow from `text` and cover it contiguously: window `i+1`
/// starts exactly `overlap_chars` characters before window `i` ends.
pub fn split_windows<'a>(text: &'a str, cfg: &ChunkingConfig) -> Vec<&'a str> {
    let max_chars = cfg.max_chars.max(1);
    let overlap = cfg.overlap_chars.min(max_chars - 1);

    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    if n <= max_chars {
        return vec![text];
    }

    let byte_at = |char_idx: usize| -> usize {
        if char_idx >= n {
            text.len()
        } else {
            offsets[char_idx]
        }
    };

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = (start + max_chars).min(n);
        let end = if hard_end < n && cfg.sentence_boundaries {
            last_sentence_end(&chars, start + overlap, hard_end).unwrap_or(hard_end)
        } else {
            hard_end
        };
        windows.push(&text[byte_at(start)..byte_at(end)]);
        if end >= n {
            break;
        }
        start = end - overlap;
    }
    windows
}

/// Find the last sentence end in `(lo, hi]`, as a char index.
///
/// A sentence ends right after `.`, `!`, or `?` followed by whitespace (or
/// the end of the text). The lower bound is exclusive so a snapped window
/// always extends past the overlap it shares with its predecessor.
fn last_sentence_end(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    let n = chars.len();
    let mut p = hi;
    while p > lo {
        if matches!(chars[p - 1], '.' | '!' | '?') && (p == n || chars[p].is_whitespace()) {
            return Some(p);
        }
        p -= 1;
    }
    None
}

fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn make_text_chunk(document_id: &str, position: i64, text: &str, page: Option<i64>) -> Chunk {
    Chunk {
        id: chunk_id(document_id, position),
        document_id: document_id.to_string(),
        position,
        modality: Modality::Text,
        content: text.to_string(),
        image_ref: None,
        image_data: None,
        page,
        token_estimate: (text.chars().count() / CHARS_PER_TOKEN) as i64,
        hash: content_hash(&[text]),
        embedding: None,
    }
}

fn make_image_chunk(
    document_id: &str,
    position: i64,
    reference: &str,
    caption: Option<&str>,
    data_base64: Option<String>,
    page: Option<i64>,
) -> Chunk {
    let content = match caption {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => reference
            .rsplit('/')
            .next()
            .unwrap_or(reference)
            .to_string(),
    };
    Chunk {
        id: chunk_id(document_id, position),
        document_id: document_id.to_string(),
        position,
        modality: Modality::Image,
        token_estimate: (content.chars().count() / CHARS_PER_TOKEN) as i64,
        hash: content_hash(&[&content, reference]),
        content,
        image_ref: Some(reference.to_string()),
        image_data: data_base64,
        page,
        embedding: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_chars: usize, overlap_chars: usize, sentence_boundaries: bool) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_chars,
            sentence_boundaries,
        }
    }

    fn text_region(text: &str) -> Region {
        Region::Text {
            text: text.to_string(),
            page: None,
        }
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_document("doc1", &[text_region("Hello, world!")], &cfg(700, 80, true));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].id, "doc1:0");
    }

    #[test]
    fn test_empty_document_single_chunk() {
        let chunks = chunk_document("doc1", &[], &cfg(700, 80, true));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].content, "");
    }

    #[test]
    fn test_empty_text_single_chunk() {
        let chunks = chunk_document("doc1", &[text_region("")], &cfg(700, 80, true));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn test_overlap_carry_exact_windows() {
        // 2000 chars of "word " filler: no sentence ends, so windows fall
        // back to hard cuts at 500 with a 450-char step.
        let text = "word ".repeat(400);
        assert_eq!(text.chars().count(), 2000);
        let chunks = chunk_document("doc1", &[text_region(&text)], &cfg(500, 50, true));
        assert_eq!(chunks.len(), 5);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i as i64);
            assert!(c.content.chars().count() <= 500);
        }
        for pair in chunks.windows(2) {
            let prev_tail: String = pair[0]
                .content
                .chars()
                .rev()
                .take(50)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(pair[1].content.starts_with(&prev_tail));
        }
    }

    #[test]
    fn test_sentence_snap() {
        let chunks = chunk_document(
            "doc1",
            &[text_region("One. Two. Three. Four.")],
            &cfg(12, 3, true),
        );
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(texts, vec!["One. Two.", "wo. Three.", "ee. Four."]);
    }

    #[test]
    fn test_reconstruction_minus_overlap() {
        let text = "One. Two. Three. Four.";
        let overlap = 3;
        let chunks = chunk_document("doc1", &[text_region(text)], &cfg(12, overlap, true));
        let mut rebuilt = chunks[0].content.clone();
        for c in &chunks[1..] {
            let skip: usize = c.content.chars().take(overlap).map(|ch| ch.len_utf8()).sum();
            rebuilt.push_str(&c.content[skip..]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_hard_cut_without_sentence_boundaries() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunk_document("doc1", &[text_region(text)], &cfg(10, 2, false));
        for c in &chunks {
            assert!(c.content.chars().count() <= 10);
        }
        let mut rebuilt = chunks[0].content.clone();
        for c in &chunks[1..] {
            rebuilt.push_str(&c.content[2..]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_image_region_single_chunk() {
        let regions = vec![
            text_region("Intro text."),
            Region::Image {
                reference: "figures/plot.png".to_string(),
                caption: Some("Latency distribution".to_string()),
                data_base64: None,
                page: Some(2),
            },
        ];
        let chunks = chunk_document("doc1", &regions, &cfg(700, 80, true));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].modality, Modality::Image);
        assert_eq!(chunks[1].content, "Latency distribution");
        assert_eq!(chunks[1].image_ref.as_deref(), Some("figures/plot.png"));
        assert_eq!(chunks[1].page, Some(2));
        assert_eq!(chunks[1].position, 1);
    }

    #[test]
    fn test_image_without_caption_uses_file_name() {
        let regions = vec![Region::Image {
            reference: "assets/diagram.png".to_string(),
            caption: None,
            data_base64: None,
            page: None,
        }];
        let chunks = chunk_document("doc1", &regions, &cfg(700, 80, true));
        assert_eq!(chunks[0].content, "diagram.png");
    }

    #[test]
    fn test_positions_monotonic_across_regions() {
        let regions = vec![
            text_region(&"alpha beta ".repeat(30)),
            Region::Image {
                reference: "a.png".to_string(),
                caption: None,
                data_base64: None,
                page: None,
            },
            text_region("Trailing note."),
        ];
        let chunks = chunk_document("doc1", &regions, &cfg(100, 10, true));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i as i64);
            assert_eq!(c.id, format!("doc1:{i}"));
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐ один два три │ Hello │ └──────────┘";
        let chunks = chunk_document("doc1", &[text_region(text)], &cfg(12, 4, true));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.content.chars().count() <= 12);
        }
        let mut rebuilt = chunks[0].content.clone();
        for c in &chunks[1..] {
            let skip: usize = c.content.chars().take(4).map(|ch| ch.len_utf8()).sum();
            rebuilt.push_str(&c.content[skip..]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota kappa.";
        let c1 = chunk_document("doc1", &[text_region(text)], &cfg(20, 5, true));
        let c2 = chunk_document("doc1", &[text_region(text)], &cfg(20, 5, true));
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.content, b.content);
            assert_eq!(a.hash, b.hash);
        }
    }
}
