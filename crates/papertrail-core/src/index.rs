//! Exact nearest-neighbour vector index.
//!
//! [`VectorIndex`] owns `(chunk, embedding)` pairs and answers top-k
//! queries by brute-force cosine similarity. Ordering is total and
//! deterministic:
//!
//! 1. score, descending
//! 2. source registration ordinal, ascending
//! 3. `chunk_index`, ascending
//!
//! An index is immutable once built; rebuilding produces a new value.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::DimensionMismatch;
use crate::models::{Chunk, SearchHit};

/// A chunk and its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// In-memory vector index plus the identity of the inputs it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    fingerprint: String,
    entries: Vec<IndexedVector>,
    failed_sources: Vec<String>,
}

impl VectorIndex {
    /// Assemble an index, checking every embedding has `dims` components.
    pub fn new(
        model: impl Into<String>,
        dims: usize,
        fingerprint: impl Into<String>,
        entries: Vec<IndexedVector>,
    ) -> Result<Self, DimensionMismatch> {
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dims) {
            return Err(DimensionMismatch {
                expected: dims,
                actual: bad.embedding.len(),
            });
        }
        Ok(Self {
            model: model.into(),
            dims,
            fingerprint: fingerprint.into(),
            entries,
            failed_sources: Vec::new(),
        })
    }

    /// Record registry sources that could not be ingested into this index.
    pub fn with_failed_sources(mut self, failed_sources: Vec<String>) -> Self {
        self.failed_sources = failed_sources;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entries(&self) -> &[IndexedVector] {
        &self.entries
    }

    /// Registry sources missing from this index because ingestion failed.
    pub fn failed_sources(&self) -> &[String] {
        &self.failed_sources
    }

    /// Whether every registry source made it into the index.
    pub fn is_complete(&self) -> bool {
        self.failed_sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct source ids in registration order.
    pub fn source_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for e in &self.entries {
            if !ids.contains(&e.chunk.source_id.as_str()) {
                ids.push(&e.chunk.source_id);
            }
        }
        ids
    }

    /// Top-`k` chunks most similar to `query`.
    ///
    /// Returns at most `k` hits. An empty index returns nothing regardless
    /// of the query's length; otherwise a query of the wrong
    /// dimensionality is rejected.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, DimensionMismatch> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexedVector)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.embedding), e))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| rank(*sa, a, *sb, b));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, e)| SearchHit {
                chunk: e.chunk.clone(),
                score,
            })
            .collect())
    }
}

fn rank(sa: f32, a: &IndexedVector, sb: f32, b: &IndexedVector) -> Ordering {
    sb.total_cmp(&sa)
        .then_with(|| a.chunk.provenance.ordinal.cmp(&b.chunk.provenance.ordinal))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
}
