//! Chunked document paging.
//!
//! A document is split into fixed-size line chunks. Only a bounded number of
//! chunks is resident at once; the rest exist as `ChunkMetadata` so line range
//! math never needs the line data itself.
//!
//! Invariants:
//! * One `ChunkMetadata` per chunk slot, created at document load, kept across
//!   eviction (`loaded` flips back to false).
//! * After any load, resident chunks <= `max_loaded_chunks`.
//! * `load_chunk` is single-flight per index: concurrent callers share one
//!   load and receive the same `Arc<Chunk>`.
//! * Only index bounds violations are errors. Storage misses, storage errors
//!   and storage timeouts degrade to an empty chunk that is not cached, so the
//!   next access retries.

mod manager;
mod source;

pub use manager::{ChunkManager, ChunkStats};
pub use source::{ChunkSource, LoadFuture, NullChunkSource};

use thiserror::Error;

/// Resident slice of document lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub lines: Vec<String>,
}

/// Per-slot bookkeeping; `end_line` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub line_count: usize,
    pub loaded: bool,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk index {index} out of range (total chunks: {total})")]
    InvalidChunkIndex { index: usize, total: usize },
}

/// Number of chunks needed for `total_lines` (`ceil(total / chunk_size)`).
pub fn chunk_count(total_lines: usize, chunk_size: usize) -> usize {
    total_lines.div_ceil(chunk_size.max(1))
}

/// Build the metadata table for a document.
pub fn build_metadata(total_lines: usize, chunk_size: usize) -> Vec<ChunkMetadata> {
    let chunk_size = chunk_size.max(1);
    (0..chunk_count(total_lines, chunk_size))
        .map(|index| {
            let start_line = index * chunk_size;
            let end_line = (start_line + chunk_size).min(total_lines);
            ChunkMetadata {
                index,
                start_line,
                end_line,
                line_count: end_line - start_line,
                loaded: false,
            }
        })
        .collect()
}

/// Split document text into lines. A trailing newline yields a final empty
/// line and empty text yields one empty line, matching what an editor shows.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_covers_document_exactly() {
        let meta = build_metadata(2500, 1000);
        assert_eq!(meta.len(), 3);
        assert_eq!(meta[0].start_line, 0);
        assert_eq!(meta[1].end_line, 2000);
        assert_eq!(
            meta[2],
            ChunkMetadata {
                index: 2,
                start_line: 2000,
                end_line: 2500,
                line_count: 500,
                loaded: false
            }
        );
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(0, 1000), 0);
        assert_eq!(chunk_count(1, 1000), 1);
        assert_eq!(chunk_count(1000, 1000), 1);
        assert_eq!(chunk_count(1001, 1000), 2);
    }

    #[test]
    fn split_lines_editor_semantics() {
        assert_eq!(split_lines(""), vec![""]);
        assert_eq!(split_lines("a\r\nb\n"), vec!["a", "b", ""]);
        assert_eq!(split_lines("# title"), vec!["# title"]);
    }

    #[test]
    fn error_message_names_bounds() {
        let e = ChunkError::InvalidChunkIndex { index: 7, total: 3 };
        assert_eq!(e.to_string(), "chunk index 7 out of range (total chunks: 3)");
    }
}
