//! Sliding-window text chunker.
//!
//! Splits document text into overlapping [`Chunk`]s of `chunk_size`
//! characters. Each window starts `chunk_size - chunk_overlap` characters
//! after the previous one; the last window is cut short at the end of the
//! text. Boundaries count Unicode scalar values, not bytes, and may fall in
//! the middle of a word.
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and index, plus a SHA-256 hash of its text.
//!
//! # Example
//!
//! ```rust
//! use kbase::chunk::chunk_document;
//! use kbase::models::ChunkingParams;
//!
//! let text = "a".repeat(250);
//! let params = ChunkingParams { chunk_size: 100, chunk_overlap: 20 };
//! let chunks = chunk_document("doc-1", &text, params).unwrap();
//! let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
//! assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkingParams};

/// Check chunking parameters without processing any text.
pub fn validate_params(params: &ChunkingParams) -> Result<()> {
    if params.chunk_size == 0 {
        return Err(Error::Chunking("chunk_size must be > 0".to_string()));
    }
    if params.chunk_overlap >= params.chunk_size {
        return Err(Error::Chunking(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            params.chunk_overlap, params.chunk_size
        )));
    }
    Ok(())
}

/// Split `text` into overlapping character windows.
///
/// # Guarantees
///
/// - Empty text yields no chunks.
/// - Indices are contiguous: `0, 1, 2, …, N-1`.
/// - The first chunk starts at 0 and the last ends at the text length.
/// - Consecutive chunks overlap by exactly `chunk_overlap` characters.
/// - No chunk is empty.
pub fn chunk_document(document_id: &str, text: &str, params: ChunkingParams) -> Result<Vec<Chunk>> {
    validate_params(&params)?;

    // Byte offset of every char, plus the end, so char windows slice cleanly.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_len = boundaries.len();
    boundaries.push(text.len());

    let step = params.chunk_size - params.chunk_overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < char_len {
        let end = (start + params.chunk_size).min(char_len);
        let piece = &text[boundaries[start]..boundaries[end]];
        chunks.push(make_chunk(document_id, chunks.len() as i64, piece, start, end));
        if end == char_len {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Deterministic chunk identity: UUID v5 over `document_id` and `index`.
pub fn chunk_id(document_id: &str, index: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}", document_id, index).as_bytes(),
    )
    .to_string()
}

/// SHA-256 of `text`, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, index: i64, text: &str, start: usize, end: usize) -> Chunk {
    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        start,
        end,
        hash: content_hash(text),
        embedding: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn test_reference_example() {
        let text: String = (0..250).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_document("doc1", &text, params(100, 20)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 100));
        assert_eq!((chunks[1].start, chunks[1].end), (80, 180));
        assert_eq!((chunks[2].start, chunks[2].end), (160, 250));
        assert_eq!(chunks[2].text.chars().count(), 90);
        assert_eq!(chunks[1].text, &text[80..180]);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_document("doc1", "", params(100, 20)).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("doc1", "Hello, world!", params(100, 20)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 13));
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_sliver() {
        // 180 chars, size 100, overlap 20: windows [0,100) and [80,180).
        let text = "x".repeat(180);
        let chunks = chunk_document("doc1", &text, params(100, 20)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].end, 180);
    }

    #[test]
    fn test_overlap_equal_to_size_rejected() {
        let err = chunk_document("doc1", "abc", params(10, 10)).unwrap_err();
        assert!(matches!(err, Error::Chunking(_)));
        let err = chunk_document("doc1", "abc", params(10, 25)).unwrap_err();
        assert!(matches!(err, Error::Chunking(_)));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            chunk_document("doc1", "abc", params(0, 0)),
            Err(Error::Chunking(_))
        ));
    }

    #[test]
    fn test_invalid_params_rejected_even_for_empty_text() {
        assert!(chunk_document("doc1", "", params(5, 5)).is_err());
    }

    #[test]
    fn test_windows_cover_text_with_exact_overlap() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(37);
        let char_len = text.chars().count();
        for (size, overlap) in [(7, 0), (50, 10), (64, 63), (1000, 200), (3, 1)] {
            let chunks = chunk_document("doc1", &text, params(size, overlap)).unwrap();
            assert_eq!(chunks[0].start, 0);
            assert_eq!(chunks.last().unwrap().end, char_len);
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.chunk_index, i as i64);
                assert!(c.end > c.start);
                assert!(c.end - c.start <= size);
                assert_eq!(c.text.chars().count(), c.end - c.start);
            }
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end - pair[1].start, overlap, "size={} overlap={}", size, overlap);
                assert!(pair[1].start > pair[0].start);
                assert_eq!(pair[0].end - pair[0].start, size);
            }
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────┐ héllo wörld 日本語のテキスト ✓";
        let chunks = chunk_document("doc1", text, params(5, 2)).unwrap();
        let rebuilt: String = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i == 0 {
                    c.text.clone()
                } else {
                    c.text.chars().skip(2).collect()
                }
            })
            .collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta";
        let c1 = chunk_document("doc1", text, params(10, 3)).unwrap();
        let c2 = chunk_document("doc1", text, params(10, 3)).unwrap();
        assert_eq!(c1, c2);
        assert_ne!(c1[0].id, chunk_document("doc2", text, params(10, 3)).unwrap()[0].id);
    }

    #[test]
    fn test_hash_is_sha256_of_text() {
        let chunks = chunk_document("doc1", "abc", params(10, 0)).unwrap();
        assert_eq!(
            chunks[0].hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(chunks[0].embedding.is_none());
    }
}
