//! Data models that flow through ingestion, indexing and retrieval.
//!
//! A [`RegistryEntry`] describes one source document. Ingestion turns it
//! into [`Chunk`]s, each carrying a [`Provenance`] copied from the entry,
//! so a search hit can always be traced back to the paper it came from.

use serde::{Deserialize, Serialize};

/// Where a registered source lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LocalFile,
    Url,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LocalFile => "local_file",
            SourceKind::Url => "url",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One document declared in the metadata registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub title: String,
    pub source_kind: SourceKind,
    /// Absolute path for `local_file`, absolute URL for `url`.
    pub source_location: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

/// Character span of a chunk within its source text, counted in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub offset: usize,
    pub length: usize,
}

impl CharSpan {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Registry metadata attached to every chunk of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Position of the source in the registry; used as a search tie-breaker.
    pub ordinal: usize,
    pub title: String,
    pub source_kind: SourceKind,
    pub source_location: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

impl Provenance {
    pub fn from_entry(ordinal: usize, entry: &RegistryEntry) -> Self {
        Self {
            ordinal,
            title: entry.title.clone(),
            source_kind: entry.source_kind,
            source_location: entry.source_location.clone(),
            tags: entry.tags.clone(),
            authors: entry.authors.clone(),
            year: entry.year,
            venue: entry.venue.clone(),
            doi: entry.doi.clone(),
        }
    }
}

/// A bounded span of source text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub chunk_index: usize,
    pub char_span: CharSpan,
    pub provenance: Provenance,
}

impl Chunk {
    /// Stable identifier, e.g. `smith2020::chunk_00003`.
    pub fn id(&self) -> String {
        format!("{}::chunk_{:05}", self.source_id, self.chunk_index)
    }
}

/// A chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Bibliographic record for a cited source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub source_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub source_location: String,
}

impl Reference {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let p = &chunk.provenance;
        Self {
            source_id: chunk.source_id.clone(),
            title: p.title.clone(),
            authors: p.authors.clone(),
            year: p.year,
            venue: p.venue.clone(),
            doi: p.doi.clone(),
            source_location: p.source_location.clone(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.source_id, self.title)?;
        if !self.authors.is_empty() {
            write!(f, " ({})", self.authors.join(", "))?;
        }
        if let Some(year) = self.year {
            write!(f, ", {}", year)?;
        }
        if let Some(venue) = &self.venue {
            write!(f, ", {}", venue)?;
        }
        if let Some(doi) = &self.doi {
            write!(f, ". doi:{}", doi)?;
        }
        Ok(())
    }
}
