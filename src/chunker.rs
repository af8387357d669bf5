//! Overlapping sliding-window text chunker.
//!
//! Splits normalized text into fixed-size chunks that overlap by a
//! configurable number of characters: the window advances by
//! `chunk_size - overlap` chars, and the final chunk may be shorter.
//! Spans are char offsets into the input, so identical (text, chunk_size,
//! overlap) always yields an identical chunk sequence, which the
//! content-hash chunk identity and dedup rely on.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Chunk;

/// A chunk's text and its char span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSlice {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split `text` into overlapping chunks of at most `chunk_size` chars.
///
/// Fails with `InvalidChunkParameters` unless `0 < overlap < chunk_size`
/// is relaxed to `overlap < chunk_size` and `chunk_size > 0`. Empty text
/// yields no chunks.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<ChunkSlice>> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(Error::InvalidChunkParameters {
            chunk_size,
            overlap,
        });
    }

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char boundary, plus the end sentinel, so spans
    // stay char-based while slicing stays O(1).
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = boundaries.len() - 1;

    let step = chunk_size - overlap;
    let mut slices = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + chunk_size).min(n_chars);
        slices.push(ChunkSlice {
            text: text[boundaries[start]..boundaries[end]].to_string(),
            start,
            end,
        });
        if end == n_chars {
            break;
        }
        start += step;
    }

    Ok(slices)
}

/// Deterministic chunk identity: SHA-256 over document id, ordinal, and text.
pub fn chunk_id(document_id: &str, chunk_index: i64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(chunk_index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Materialize chunk records for a document from its normalized text.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let slices = split(text, chunk_size, overlap)?;
    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(i, slice)| Chunk {
            id: chunk_id(document_id, i as i64, &slice.text),
            document_id: document_id.to_string(),
            chunk_index: i as i64,
            text: slice.text,
            start: slice.start as i64,
            end: slice.end as i64,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let slices = split("Hello, world!", 1000, 200).unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].start, 0);
        assert_eq!(slices[0].end, 13);
        assert_eq!(slices[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_no_chunks() {
        let slices = split("", 1000, 200).unwrap();
        assert!(slices.is_empty());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(matches!(
            split("abc", 0, 0),
            Err(Error::InvalidChunkParameters { .. })
        ));
        assert!(matches!(
            split("abc", 100, 100),
            Err(Error::InvalidChunkParameters { .. })
        ));
        assert!(matches!(
            split("abc", 100, 150),
            Err(Error::InvalidChunkParameters { .. })
        ));
    }

    #[test]
    fn test_3000_chars_with_1000_200_gives_four_chunks() {
        let text = "a".repeat(3000);
        let slices = split(&text, 1000, 200).unwrap();
        assert_eq!(slices.len(), 4);
        let starts: Vec<usize> = slices.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 800, 1600, 2400]);
        assert_eq!(slices[3].end, 3000);
        assert_eq!(slices[3].text.len(), 600);
    }

    #[test]
    fn test_overlap_repeats_tail_of_previous_chunk() {
        let text: String = ('a'..='z').cycle().take(50).collect();
        let slices = split(&text, 20, 5).unwrap();
        for pair in slices.windows(2) {
            let prev_tail: String = pair[0].text.chars().skip(pair[0].text.chars().count() - 5).collect();
            let next_head: String = pair[1].text.chars().take(5).collect();
            assert_eq!(prev_tail, next_head);
        }
    }

    #[test]
    fn test_multibyte_chars_split_on_char_boundaries() {
        let text = "é".repeat(25);
        let slices = split(&text, 10, 2).unwrap();
        for slice in &slices {
            assert!(slice.text.chars().count() <= 10);
        }
        // Spans are char offsets covering the full input
        assert_eq!(slices.first().unwrap().start, 0);
        assert_eq!(slices.last().unwrap().end, 25);
    }

    #[test]
    fn test_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let a = split(&text, 100, 20).unwrap();
        let b = split(&text, 100, 20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_ids_differ_by_index_and_text() {
        let chunks = chunk_document("doc1", &"x".repeat(30), 10, 2).unwrap();
        let mut ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        // Same text in every window, but the ordinal keeps ids distinct
        assert_eq!(ids.len(), chunks.len());
    }
}
