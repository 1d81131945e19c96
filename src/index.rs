//! Index lifecycle: fingerprinting, building, and the single-writer manager.
//!
//! [`IndexManager`] owns the live [`VectorIndex`] and moves it through
//! `Uninitialized → Building → Ready`. State is published on a
//! `tokio::sync::watch` channel so readers never take a lock:
//!
//! - while a rebuild runs, readers keep getting the previous index;
//! - on a first build, readers wait for it to finish;
//! - a failed build restores whatever was there before.
//!
//! Builds are serialized by an async mutex. A second caller that arrives
//! while a build is in flight waits, then finds the fresh index already
//! matches its fingerprint and reuses it.
//!
//! An index built while some sources failed to ingest records their ids.
//! Such an index is served, but never reused or loaded as up to date: the
//! next `load_or_build` rebuilds and retries the failed sources.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use papertrail_core::chunk::ChunkingParams;
use papertrail_core::embedding::Embedder;
use papertrail_core::error::CapabilityError;
use papertrail_core::index::{IndexedVector, VectorIndex};
use papertrail_core::models::{Chunk, RegistryEntry};
use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex};

use crate::error::{IndexError, IngestionError};
use crate::ingest::Ingestor;
use crate::persist;

/// Identify the inputs an index is built from.
///
/// Covers the on-disk format version, every registry entry in order, the
/// chunking parameters, and the embedding model and dimensionality.
pub fn fingerprint(
    entries: &[RegistryEntry],
    params: &ChunkingParams,
    model: &str,
    dims: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(persist::FORMAT_NAME.as_bytes());
    hasher.update(persist::FORMAT_VERSION.to_le_bytes());
    for entry in entries {
        // RegistryEntry serialization cannot fail: plain strings and numbers.
        let json = serde_json::to_vec(entry).unwrap_or_default();
        hasher.update((json.len() as u64).to_le_bytes());
        hasher.update(&json);
    }
    hasher.update((params.size() as u64).to_le_bytes());
    hasher.update((params.overlap() as u64).to_le_bytes());
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update((dims as u64).to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Embed `chunks` in batches of `batch_size` and assemble an index.
///
/// An empty chunk list produces an empty index without calling the
/// embedder.
pub async fn build_index(
    embedder: &dyn Embedder,
    chunks: Vec<Chunk>,
    batch_size: usize,
    fingerprint: String,
) -> Result<VectorIndex, IndexError> {
    let batch_size = batch_size.max(1);
    let mut entries = Vec::with_capacity(chunks.len());
    let total = chunks.len();
    let mut pending = chunks.into_iter().peekable();

    while pending.peek().is_some() {
        let batch: Vec<Chunk> = pending.by_ref().take(batch_size).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if let Some(pos) = vectors.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
            return Err(IndexError::Embedding(CapabilityError::InvalidResponse(
                format!("embedding {} contains non-finite values", entries.len() + pos),
            )));
        }
        if vectors.len() != batch.len() {
            return Err(IndexError::Embedding(CapabilityError::InvalidResponse(
                format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                ),
            )));
        }
        entries.extend(
            batch
                .into_iter()
                .zip(vectors)
                .map(|(chunk, embedding)| IndexedVector { chunk, embedding }),
        );
        tracing::debug!(embedded = entries.len(), total, "embedded batch");
    }

    Ok(VectorIndex::new(
        embedder.model_name(),
        embedder.dims(),
        fingerprint,
        entries,
    )?)
}

/// Lifecycle state visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Uninitialized,
    Building,
    Ready,
}

#[derive(Clone)]
enum Slot {
    Uninitialized,
    Building { previous: Option<Arc<VectorIndex>> },
    Ready(Arc<VectorIndex>),
}

impl Slot {
    fn current(&self) -> Option<Arc<VectorIndex>> {
        match self {
            Slot::Uninitialized => None,
            Slot::Building { previous } => previous.clone(),
            Slot::Ready(index) => Some(index.clone()),
        }
    }
}

/// Why a fresh index was built instead of reusing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    Missing,
    Stale,
    /// The persisted index is missing sources that failed to ingest.
    Incomplete(Vec<String>),
    Unreadable(String),
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::Forced => write!(f, "rebuild requested"),
            RebuildReason::Missing => write!(f, "no persisted index"),
            RebuildReason::Stale => write!(f, "persisted index is stale"),
            RebuildReason::Incomplete(ids) => {
                write!(f, "persisted index is missing {}", ids.join(", "))
            }
            RebuildReason::Unreadable(e) => write!(f, "persisted index unreadable: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOrigin {
    /// In-memory index already matched.
    Reused,
    /// Loaded from the persisted artifact.
    Loaded,
    Rebuilt(RebuildReason),
}

/// Outcome of [`IndexManager::load_or_build`].
#[derive(Debug)]
pub struct BuildReport {
    pub origin: BuildOrigin,
    pub chunks: usize,
    /// Per-source ingestion failures; empty unless the index was rebuilt.
    pub failures: Vec<IngestionError>,
}

/// Restores the pre-build slot if a build is dropped or fails.
struct BuildGuard<'a> {
    slot: &'a watch::Sender<Slot>,
    previous: Option<Arc<VectorIndex>>,
    armed: bool,
}

impl BuildGuard<'_> {
    fn finish(mut self, index: Arc<VectorIndex>) {
        self.armed = false;
        self.slot.send_replace(Slot::Ready(index));
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let restored = match self.previous.take() {
                Some(index) => Slot::Ready(index),
                None => Slot::Uninitialized,
            };
            self.slot.send_replace(restored);
        }
    }
}

pub struct IndexManager {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    build_lock: Mutex<()>,
    slot: watch::Sender<Slot>,
}

impl IndexManager {
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        let (slot, _) = watch::channel(Slot::Uninitialized);
        Self {
            path: path.into(),
            embedder,
            batch_size,
            build_lock: Mutex::new(()),
            slot,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn status(&self) -> IndexStatus {
        match &*self.slot.borrow() {
            Slot::Uninitialized => IndexStatus::Uninitialized,
            Slot::Building { .. } => IndexStatus::Building,
            Slot::Ready(_) => IndexStatus::Ready,
        }
    }

    /// The index readers would get right now, without waiting.
    pub fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.slot.borrow().current()
    }

    /// Current index for reading.
    ///
    /// During a rebuild this is the previous index. During a first build it
    /// waits for the build to finish. Fails with [`IndexError::NotReady`]
    /// when nothing has been built and no build is running.
    pub async fn ready(&self) -> Result<Arc<VectorIndex>, IndexError> {
        let mut rx = self.slot.subscribe();
        loop {
            {
                let slot = rx.borrow_and_update();
                match &*slot {
                    Slot::Uninitialized => return Err(IndexError::NotReady),
                    Slot::Ready(index) => return Ok(index.clone()),
                    Slot::Building {
                        previous: Some(index),
                    } => return Ok(index.clone()),
                    Slot::Building { previous: None } => {}
                }
            }
            rx.changed().await.map_err(|_| IndexError::NotReady)?;
        }
    }

    /// Make the index match `entries`, reusing, loading or rebuilding it.
    ///
    /// With `force`, the persisted artifact is ignored and the index is
    /// always rebuilt. The build lock is held throughout.
    pub async fn load_or_build(
        &self,
        entries: &[RegistryEntry],
        ingestor: &Ingestor,
        force: bool,
    ) -> Result<BuildReport, IndexError> {
        let _lock = self.build_lock.lock().await;
        let fp = fingerprint(
            entries,
            ingestor.params(),
            self.embedder.model_name(),
            self.embedder.dims(),
        );

        let previous = self.snapshot();
        if !force {
            if let Some(index) = previous
                .as_ref()
                .filter(|i| i.fingerprint() == fp && i.is_complete())
            {
                tracing::debug!(entries = index.len(), "index up to date");
                return Ok(BuildReport {
                    origin: BuildOrigin::Reused,
                    chunks: index.len(),
                    failures: Vec::new(),
                });
            }
        }

        self.slot.send_replace(Slot::Building {
            previous: previous.clone(),
        });
        let guard = BuildGuard {
            slot: &self.slot,
            previous,
            armed: true,
        };

        let reason = if force {
            RebuildReason::Forced
        } else {
            match persist::load(&self.path).await {
                Ok(index) if index.fingerprint() == fp && index.is_complete() => {
                    tracing::info!(
                        path = %self.path.display(),
                        entries = index.len(),
                        "loaded persisted index"
                    );
                    let chunks = index.len();
                    guard.finish(Arc::new(index));
                    return Ok(BuildReport {
                        origin: BuildOrigin::Loaded,
                        chunks,
                        failures: Vec::new(),
                    });
                }
                Ok(index) if index.fingerprint() == fp => {
                    RebuildReason::Incomplete(index.failed_sources().to_vec())
                }
                Ok(_) => RebuildReason::Stale,
                Err(IndexError::Missing(_)) => RebuildReason::Missing,
                Err(e) => RebuildReason::Unreadable(e.to_string()),
            }
        };
        match &reason {
            RebuildReason::Forced | RebuildReason::Missing => {
                tracing::info!(reason = %reason, "building index")
            }
            _ => tracing::warn!(reason = %reason, "rebuilding index"),
        }

        let report = ingestor.ingest_all(entries).await;
        let failed: Vec<String> = report
            .failures
            .iter()
            .map(|f| f.source_id.clone())
            .collect();
        let index = build_index(
            self.embedder.as_ref(),
            report.chunks,
            self.batch_size,
            fp,
        )
        .await?
        .with_failed_sources(failed);
        persist::persist(&index, &self.path).await?;

        let chunks = index.len();
        tracing::info!(
            chunks,
            sources = index.source_ids().len(),
            failures = report.failures.len(),
            "index ready"
        );
        guard.finish(Arc::new(index));

        Ok(BuildReport {
            origin: BuildOrigin::Rebuilt(reason),
            chunks,
            failures: report.failures,
        })
    }
}
