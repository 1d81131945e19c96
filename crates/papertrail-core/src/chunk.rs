//! Fixed-window character chunker with bounded overlap.
//!
//! Splits source text into windows of `chunk_size` characters where each
//! window starts `chunk_size - chunk_overlap` characters after the
//! previous one, so adjacent chunks share exactly `chunk_overlap`
//! characters. The final window may be shorter.
//!
//! Lengths and offsets are counted in `char`s, never bytes, so multi-byte
//! text is never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use papertrail_core::chunk::{split_windows, ChunkingParams};
//!
//! let params = ChunkingParams::new(4, 1).unwrap();
//! let windows = split_windows("abcdefghij", &params);
//! let texts: Vec<&str> = windows.iter().map(|w| w.text).collect();
//! assert_eq!(texts, ["abcd", "defg", "ghij"]);
//! ```

use crate::error::ChunkingError;
use crate::models::{CharSpan, Chunk, Provenance, RegistryEntry};

/// Default window length, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default overlap between adjacent windows, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Validated chunking parameters. `overlap < size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    size: usize,
    overlap: usize,
}

impl ChunkingParams {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if size == 0 {
            return Err(ChunkingError::ZeroSize);
        }
        if overlap >= size {
            return Err(ChunkingError::OverlapTooLarge { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.size - self.overlap
    }

    /// Number of windows produced for a text of `len` characters.
    pub fn expected_chunks(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if len <= self.size {
            1
        } else {
            (len - self.overlap).div_ceil(self.step())
        }
    }
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A window borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a> {
    pub text: &'a str,
    pub span: CharSpan,
}

/// Split `text` into overlapping windows. Empty text yields no windows.
pub fn split_windows<'a>(text: &'a str, params: &ChunkingParams) -> Vec<Window<'a>> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = bounds.len() - 1;

    let mut windows = Vec::with_capacity(params.expected_chunks(n));
    let mut start = 0;
    while start < n {
        let end = (start + params.size).min(n);
        windows.push(Window {
            text: &text[bounds[start]..bounds[end]],
            span: CharSpan {
                offset: start,
                length: end - start,
            },
        });
        if end == n {
            break;
        }
        start += params.step();
    }
    windows
}

/// Chunk one source's text, attaching provenance from its registry entry.
///
/// Chunk indices are contiguous from 0 in text order.
pub fn chunk_source(
    ordinal: usize,
    entry: &RegistryEntry,
    text: &str,
    params: &ChunkingParams,
) -> Vec<Chunk> {
    let provenance = Provenance::from_entry(ordinal, entry);
    split_windows(text, params)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, w)| Chunk {
            text: w.text.to_string(),
            source_id: entry.id.clone(),
            chunk_index,
            char_span: w.span,
            provenance: provenance.clone(),
        })
        .collect()
}

/// Rebuild the source text from its chunks by dropping each chunk's
/// leading overlap. Chunks must belong to one source and be in
/// `chunk_index` order.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}
