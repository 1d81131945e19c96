//! On-disk index format.
//!
//! A persisted index is one JSON document:
//!
//! ```json
//! {
//!   "format": "papertrail-index",
//!   "version": 1,
//!   "fingerprint": "<sha256 hex>",
//!   "model": "text-embedding-3-small",
//!   "dims": 1536,
//!   "created_at": "2026-01-01T00:00:00Z",
//!   "failed_sources": ["kuhl1997"],
//!   "entries": [{ "chunk": { ... }, "embedding": "<base64 little-endian f32>" }]
//! }
//! ```
//!
//! Embeddings are stored as raw `f32` bytes so a reload reproduces search
//! scores bit for bit. Writes go to a temporary file in the target
//! directory and are renamed over the target once synced.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use papertrail_core::embedding::{blob_to_vec, vec_to_blob};
use papertrail_core::index::{IndexedVector, VectorIndex};
use papertrail_core::models::Chunk;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::IndexError;

pub const FORMAT_NAME: &str = "papertrail-index";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    version: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format: String,
    version: u32,
    fingerprint: String,
    model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    /// Registry ids that failed to ingest; a non-empty list marks the
    /// artifact as partial.
    #[serde(default)]
    failed_sources: Vec<String>,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    chunk: Chunk,
    embedding: String,
}

/// Write `index` to `path` atomically.
pub async fn persist(index: &VectorIndex, path: &Path) -> Result<(), IndexError> {
    let file = IndexFile {
        format: FORMAT_NAME.to_string(),
        version: FORMAT_VERSION,
        fingerprint: index.fingerprint().to_string(),
        model: index.model().to_string(),
        dims: index.dims(),
        created_at: Utc::now(),
        failed_sources: index.failed_sources().to_vec(),
        entries: index
            .entries()
            .iter()
            .map(|e| StoredEntry {
                chunk: e.chunk.clone(),
                embedding: STANDARD.encode(vec_to_blob(&e.embedding)),
            })
            .collect(),
    };
    let bytes = serde_json::to_vec(&file)
        .map_err(|e| IndexError::Corrupt(format!("failed to serialize index: {}", e)))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await.map_err(|source| IndexError::Io {
        path: dir.clone(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    if let Err(err) = write_synced(&tmp, &bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(IndexError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    tracing::info!(
        path = %path.display(),
        entries = index.len(),
        bytes = bytes.len(),
        "persisted index"
    );
    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let io_err = |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut f = tokio::fs::File::create(path).await.map_err(io_err)?;
    f.write_all(bytes).await.map_err(io_err)?;
    f.sync_all().await.map_err(io_err)?;
    Ok(())
}

/// Read and validate a persisted index.
///
/// The header is checked before the entries are decoded, so an artifact
/// from another format version is reported as
/// [`IndexError::Incompatible`] rather than [`IndexError::Corrupt`].
pub async fn load(path: &Path) -> Result<VectorIndex, IndexError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::Missing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(IndexError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let header: Header = serde_json::from_slice(&bytes)
        .map_err(|e| IndexError::Corrupt(format!("unreadable header: {}", e)))?;
    match (header.format.as_deref(), header.version) {
        (Some(FORMAT_NAME), Some(FORMAT_VERSION)) => {}
        (format, version) => {
            return Err(IndexError::Incompatible {
                found: format!(
                    "{} v{}",
                    format.unwrap_or("<none>"),
                    version.map(|v| v.to_string()).unwrap_or_else(|| "?".into())
                ),
                expected: format!("{} v{}", FORMAT_NAME, FORMAT_VERSION),
            })
        }
    }

    let file: IndexFile =
        serde_json::from_slice(&bytes).map_err(|e| IndexError::Corrupt(e.to_string()))?;

    let mut entries = Vec::with_capacity(file.entries.len());
    for (i, stored) in file.entries.into_iter().enumerate() {
        let blob = STANDARD
            .decode(stored.embedding.as_bytes())
            .map_err(|e| IndexError::Corrupt(format!("entry {}: bad embedding encoding: {}", i, e)))?;
        let embedding = blob_to_vec(&blob)
            .ok_or_else(|| IndexError::Corrupt(format!("entry {}: truncated embedding", i)))?;
        if embedding.len() != file.dims {
            return Err(IndexError::Corrupt(format!(
                "entry {}: embedding has {} dimensions, header says {}",
                i,
                embedding.len(),
                file.dims
            )));
        }
        entries.push(IndexedVector {
            chunk: stored.chunk,
            embedding,
        });
    }

    let index = VectorIndex::new(file.model, file.dims, file.fingerprint, entries)
        .map_err(|e| IndexError::Corrupt(e.to_string()))?
        .with_failed_sources(file.failed_sources);
    tracing::debug!(
        path = %path.display(),
        entries = index.len(),
        created_at = %file.created_at,
        "loaded index"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use papertrail_core::models::{CharSpan, Provenance, RegistryEntry, SourceKind};

    fn sample_index() -> VectorIndex {
        let entry = RegistryEntry {
            id: "kuhl1997".into(),
            title: "Phonetic units".into(),
            source_kind: SourceKind::Url,
            source_location: "https://example.org/k.pdf".into(),
            tags: vec!["ids".into()],
            authors: vec!["Kuhl, P.".into()],
            year: Some(1997),
            venue: None,
            doi: None,
        };
        let entries = (0..3)
            .map(|i| IndexedVector {
                chunk: Chunk {
                    text: format!("chunk text {}", i),
                    source_id: "kuhl1997".into(),
                    chunk_index: i,
                    char_span: CharSpan {
                        offset: i * 10,
                        length: 12,
                    },
                    provenance: Provenance::from_entry(0, &entry),
                },
                embedding: vec![0.1 * i as f32, -0.3, 1.0 / 3.0],
            })
            .collect();
        VectorIndex::new("hashing-3", 3, "abc123", entries).unwrap()
    }

    #[tokio::test]
    async fn roundtrip_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");
        let index = sample_index();
        persist(&index, &path).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded, index);
    }

    #[tokio::test]
    async fn roundtrip_keeps_failed_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = sample_index().with_failed_sources(vec!["late".into()]);
        persist(&index, &path).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert!(!loaded.is_complete());
        assert_eq!(loaded.failed_sources(), ["late".to_string()]);
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        persist(&sample_index(), &path).await.unwrap();
        persist(&sample_index(), &path).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.json".to_string()]);
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, IndexError::Missing(_)));
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"\x00\x01 not json").unwrap();
        assert!(matches!(load(&path).await.unwrap_err(), IndexError::Corrupt(_)));
    }

    #[tokio::test]
    async fn other_version_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(
            &path,
            r#"{"format":"papertrail-index","version":99,"entries":"whatever"}"#,
        )
        .unwrap();
        match load(&path).await.unwrap_err() {
            IndexError::Incompatible { found, expected } => {
                assert_eq!(found, "papertrail-index v99");
                assert_eq!(expected, "papertrail-index v1");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn wrong_dims_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        persist(&sample_index(), &path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"dims\":3", "\"dims\":4")).unwrap();
        assert!(matches!(load(&path).await.unwrap_err(), IndexError::Corrupt(_)));
    }
}
