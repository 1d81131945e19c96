//! Error taxonomy for registry loading, ingestion, indexing and queries.

use std::path::PathBuf;

use papertrail_core::error::{CapabilityError, DimensionMismatch, ValidationError};

use crate::state::Stage;

/// Errors loading the metadata registry. Fatal: surfaced before any indexing.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Registry file could not be read.
    #[error("cannot read registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Registry is not valid JSON or not a JSON array.
    #[error("malformed registry: {0}")]
    Parse(String),

    /// A required field is absent, null or blank.
    #[error("registry entry {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    /// A field is present but has an unusable value.
    #[error("registry entry {index} has invalid '{field}': {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    /// Two entries share an id.
    #[error("duplicate registry id '{id}' (entries {first} and {second})")]
    DuplicateId {
        id: String,
        first: usize,
        second: usize,
    },
}

/// A single source failed to ingest. Non-fatal: other sources continue.
#[derive(Debug, thiserror::Error)]
#[error("failed to ingest '{source_id}': {cause}")]
pub struct IngestionError {
    pub source_id: String,
    pub cause: IngestCause,
}

impl IngestionError {
    pub fn new(source_id: impl Into<String>, cause: IngestCause) -> Self {
        Self {
            source_id: source_id.into(),
            cause,
        }
    }
}

/// Why a source failed to ingest.
#[derive(Debug, thiserror::Error)]
pub enum IngestCause {
    /// Local file unreadable.
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    /// URL fetch failed after retries.
    #[error("fetch failed: {0}")]
    Fetch(#[from] CapabilityError),

    /// Content could not be converted to text.
    #[error("text extraction failed: {0}")]
    Extract(String),

    /// Source exceeds the configured size limit.
    #[error("source is {bytes} bytes, limit is {limit}")]
    TooLarge { bytes: u64, limit: u64 },

    /// Extraction produced no non-whitespace text.
    #[error("no text extracted")]
    EmptyText,
}

/// Errors building, persisting, loading or reading the vector index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Embedding capability failed after the retry budget.
    #[error("embedding failed: {0}")]
    Embedding(#[from] CapabilityError),

    /// Embedding length disagrees with the index dimensionality.
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),

    /// Filesystem error reading or writing the persisted index.
    #[error("index I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted index exists but cannot be decoded.
    #[error("corrupt index file: {0}")]
    Corrupt(String),

    /// Persisted index was written by a different format or version.
    #[error("incompatible index format: found {found}, expected {expected}")]
    Incompatible { found: String, expected: String },

    /// No persisted index at the configured path.
    #[error("no index file at {0}")]
    Missing(PathBuf),

    /// No index has been built or loaded yet.
    #[error("index not ready")]
    NotReady,
}

/// Error kinds a query can fail with.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Query embedding failed.
    #[error("embedding failed: {0}")]
    Embedding(CapabilityError),

    /// Answer generation failed.
    #[error("generation failed: {0}")]
    Generation(CapabilityError),

    /// The index was unavailable or rejected the query vector.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("query cancelled")]
    Cancelled,
}

/// A failed query: what was asked, where it failed, and why.
#[derive(Debug, thiserror::Error)]
#[error("query failed during {stage}: {error}")]
pub struct QueryFailure {
    pub query: String,
    pub stage: Stage,
    #[source]
    pub error: QueryError,
}
