//! Application facade wiring registry, ingestion, index and orchestrator.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use papertrail_core::embedding::Embedder;
use papertrail_core::error::ValidationError;
use papertrail_core::generation::Generator;
use papertrail_core::models::{RegistryEntry, SearchHit};
use tokio::sync::watch;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::{IndexError, QueryError, QueryFailure};
use crate::generation::create_generator;
use crate::index::{BuildReport, IndexManager};
use crate::ingest::Ingestor;
use crate::orchestrator::Orchestrator;
use crate::registry::load_registry;
use crate::state::Answer;

pub struct Papertrail {
    registry_path: PathBuf,
    entries: RwLock<Arc<Vec<RegistryEntry>>>,
    ingestor: Ingestor,
    index: Arc<IndexManager>,
    orchestrator: Orchestrator,
}

impl Papertrail {
    /// Build from configuration, creating providers from the
    /// `[embedding]` and `[generation]` sections.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding, &config.retry)?;
        let generator = create_generator(&config.generation, &config.retry)?;
        Self::with_providers(config, embedder, generator)
    }

    /// Build from configuration with caller-supplied providers.
    ///
    /// Providers are used as given; wrap them in
    /// [`RetryingEmbedder`](crate::retry::RetryingEmbedder) or
    /// [`RetryingGenerator`](crate::retry::RetryingGenerator) for retries.
    pub fn with_providers(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        crate::config::validate(config)?;
        let entries = load_registry(&config.registry.path).with_context(|| {
            format!(
                "Failed to load registry: {}",
                config.registry.path.display()
            )
        })?;
        tracing::info!(
            path = %config.registry.path.display(),
            sources = entries.len(),
            "registry loaded"
        );

        let index = Arc::new(IndexManager::new(
            config.index.path.clone(),
            embedder,
            config.embedding.batch_size,
        ));
        let orchestrator = Orchestrator::new(index.clone(), generator, config.retrieval.top_k);

        Ok(Self {
            registry_path: config.registry.path.clone(),
            entries: RwLock::new(Arc::new(entries)),
            ingestor: Ingestor::from_config(config)?,
            index,
            orchestrator,
        })
    }

    pub fn entries(&self) -> Arc<Vec<RegistryEntry>> {
        match self.entries.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Load the persisted index if it matches the registry, else rebuild.
    pub async fn prepare(&self, force_rebuild: bool) -> Result<BuildReport, IndexError> {
        let entries = self.entries();
        self.index
            .load_or_build(&entries, &self.ingestor, force_rebuild)
            .await
    }

    /// Re-read the registry from disk and rebuild if it changed.
    ///
    /// The new entries become visible only once the index for them is
    /// ready; on failure both keep their previous values.
    pub async fn refresh(&self) -> Result<BuildReport> {
        let entries = load_registry(&self.registry_path).with_context(|| {
            format!("Failed to reload registry: {}", self.registry_path.display())
        })?;
        let report = self
            .index
            .load_or_build(&entries, &self.ingestor, false)
            .await?;
        let entries = Arc::new(entries);
        match self.entries.write() {
            Ok(mut guard) => *guard = entries,
            Err(poisoned) => *poisoned.into_inner() = entries,
        }
        Ok(report)
    }

    pub async fn ask(&self, query: &str) -> Result<Answer, QueryFailure> {
        self.orchestrator.ask(query).await
    }

    pub async fn ask_with_cancel(
        &self,
        query: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<Answer, QueryFailure> {
        self.orchestrator.ask_with_cancel(query, cancel).await
    }

    /// Raw similarity search without generation.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }
        let index = self.index.ready().await?;
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self
            .index
            .embedder()
            .embed(query)
            .await
            .map_err(QueryError::Embedding)?;
        index
            .search(&vector, limit)
            .map_err(|e| QueryError::Index(e.into()))
    }
}
