//! Two-node retrieval-generation workflow.
//!
//! ```text
//! Start ──▶ Retrieve ──▶ Generate ──▶ Done
//!   │          │            │
//!   └──────────┴────────────┴──▶ Failed
//! ```
//!
//! `retrieve` reads the query and produces ranked evidence; `generate`
//! reads the query and evidence and produces an answer plus the set of
//! cited source ids. An empty query fails before either capability is
//! called. Empty evidence still goes through `Generate`, which answers
//! with [`NO_EVIDENCE_ANSWER`] without calling the generator.
//!
//! Cancellation is a `watch::Receiver<bool>` flipped to `true`. It is
//! checked before each stage and raced against every capability call; a
//! cancelled in-flight call is dropped and its result discarded.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use papertrail_core::error::ValidationError;
use papertrail_core::generation::Generator;
use papertrail_core::models::SearchHit;
use tokio::sync::watch;

use crate::error::{QueryError, QueryFailure};
use crate::index::IndexManager;
use crate::prompt::{build_prompt, extract_citations, unverified_citations, NO_EVIDENCE_ANSWER};
use crate::state::{Answer, QueryState, Stage};

type Cancel = Option<watch::Receiver<bool>>;

/// Output of the `generate` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub answer: String,
    pub citations: BTreeSet<String>,
    /// Tags the answer declares that name no retrieved source.
    pub unverified_citations: BTreeSet<String>,
}

pub struct Orchestrator {
    index: Arc<IndexManager>,
    generator: Arc<dyn Generator>,
    top_k: usize,
}

impl Orchestrator {
    /// Query embeddings use the index manager's embedder so queries and
    /// chunks always share a vector space.
    pub fn new(index: Arc<IndexManager>, generator: Arc<dyn Generator>, top_k: usize) -> Self {
        Self {
            index,
            generator,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn ask(&self, query: &str) -> Result<Answer, QueryFailure> {
        self.run(query).await.into_result()
    }

    pub async fn ask_with_cancel(
        &self,
        query: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<Answer, QueryFailure> {
        self.run_with_cancel(query, Some(cancel))
            .await
            .into_result()
    }

    /// Run the workflow to a terminal state (`Done` or `Failed`).
    pub async fn run(&self, query: &str) -> QueryState {
        self.run_with_cancel(query, None).await
    }

    pub async fn run_with_cancel(&self, query: &str, mut cancel: Cancel) -> QueryState {
        let mut state = QueryState::new(query.trim());

        if state.query.is_empty() {
            state.fail(ValidationError::EmptyQuery.into());
            return state;
        }
        if is_cancelled(&cancel) {
            state.fail(QueryError::Cancelled);
            return state;
        }

        state.enter(Stage::Retrieve);
        match self.retrieve(&state.query, &mut cancel).await {
            Ok(hits) => state.retrieved = hits,
            Err(e) => {
                state.fail(e);
                return state;
            }
        }
        if is_cancelled(&cancel) {
            state.fail(QueryError::Cancelled);
            return state;
        }

        state.enter(Stage::Generate);
        match self
            .generate(&state.query, &state.retrieved, &mut cancel)
            .await
        {
            Ok(generated) => {
                state.answer = Some(generated.answer);
                state.citations = generated.citations;
                state.unverified_citations = generated.unverified_citations;
            }
            Err(e) => {
                state.fail(e);
                return state;
            }
        }

        state.enter(Stage::Done);
        tracing::info!(
            retrieved = state.retrieved.len(),
            citations = state.citations.len(),
            "query answered"
        );
        state
    }

    /// `Retrieve` node: query → top-k evidence, most relevant first.
    pub async fn retrieve(
        &self,
        query: &str,
        cancel: &mut Cancel,
    ) -> Result<Vec<SearchHit>, QueryError> {
        let index = cancellable(cancel, self.index.ready()).await??;
        if index.is_empty() {
            tracing::debug!("index is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let embedder = self.index.embedder().clone();
        let vector = cancellable(cancel, embedder.embed(query))
            .await?
            .map_err(QueryError::Embedding)?;
        let hits = index
            .search(&vector, self.top_k)
            .map_err(|e| QueryError::Index(e.into()))?;
        tracing::debug!(hits = hits.len(), top_k = self.top_k, "retrieved evidence");
        Ok(hits)
    }

    /// `Generate` node: query + evidence → answer and cited source ids.
    pub async fn generate(
        &self,
        query: &str,
        retrieved: &[SearchHit],
        cancel: &mut Cancel,
    ) -> Result<Generated, QueryError> {
        if retrieved.is_empty() {
            return Ok(Generated {
                answer: NO_EVIDENCE_ANSWER.to_string(),
                citations: BTreeSet::new(),
                unverified_citations: BTreeSet::new(),
            });
        }

        let prompt = build_prompt(query, retrieved);
        let answer = cancellable(cancel, self.generator.generate(&prompt))
            .await?
            .map_err(QueryError::Generation)?;
        let citations = extract_citations(&answer, retrieved);
        let unverified = unverified_citations(&answer, retrieved);
        if citations.is_empty() {
            tracing::warn!("answer cites none of the retrieved sources");
        }
        if !unverified.is_empty() {
            tracing::warn!(
                tags = ?unverified,
                "answer cites sources that were not retrieved"
            );
        }
        Ok(Generated {
            answer,
            citations,
            unverified_citations: unverified,
        })
    }
}

fn is_cancelled(cancel: &Cancel) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Await `fut` unless cancellation is signalled first.
async fn cancellable<F: Future>(cancel: &mut Cancel, fut: F) -> Result<F::Output, QueryError> {
    let Some(rx) = cancel.as_mut() else {
        return Ok(fut.await);
    };
    if *rx.borrow_and_update() {
        return Err(QueryError::Cancelled);
    }
    tokio::select! {
        out = fut => Ok(out),
        _ = cancelled(rx) => Err(QueryError::Cancelled),
    }
}

/// Resolves once the flag turns `true`; never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *rx.borrow_and_update() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use papertrail_core::embedding::HashingEmbedder;
    use papertrail_core::error::CapabilityError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, _prompt: &str) -> Result<String, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("nothing".into())
        }
    }

    fn orchestrator() -> (Orchestrator, Arc<Echo>) {
        let mgr = Arc::new(IndexManager::new(
            "/nonexistent/index.json",
            Arc::new(HashingEmbedder::new(8)),
            4,
        ));
        let gen = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        (Orchestrator::new(mgr, gen.clone(), 3), gen)
    }

    #[tokio::test]
    async fn empty_query_fails_at_start() {
        let (orch, gen) = orchestrator();
        let state = orch.run(" \t\n").await;
        assert_eq!(state.stage, Stage::Failed);
        assert_eq!(state.trace, vec![Stage::Start, Stage::Failed]);
        assert!(matches!(
            state.error,
            Some(QueryError::Validation(ValidationError::EmptyQuery))
        ));
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unbuilt_index_fails_in_retrieve() {
        let (orch, _) = orchestrator();
        let failure = orch.ask("what is motherese?").await.unwrap_err();
        assert_eq!(failure.stage, Stage::Retrieve);
        assert!(matches!(
            failure.error,
            QueryError::Index(crate::error::IndexError::NotReady)
        ));
    }

    #[tokio::test]
    async fn generate_without_evidence_skips_generator() {
        let (orch, gen) = orchestrator();
        let out = orch.generate("q", &[], &mut None).await.unwrap();
        assert_eq!(out.answer, NO_EVIDENCE_ANSWER);
        assert!(out.citations.is_empty());
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pre_cancelled_query_never_starts() {
        let (orch, gen) = orchestrator();
        let (tx, rx) = watch::channel(true);
        let failure = orch.ask_with_cancel("q", rx).await.unwrap_err();
        assert!(matches!(failure.error, QueryError::Cancelled));
        assert_eq!(failure.stage, Stage::Start);
        assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
        drop(tx);
    }

    #[tokio::test]
    async fn cancellable_passes_through_without_signal() {
        let (_tx, rx) = watch::channel(false);
        let out = cancellable(&mut Some(rx), async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn cancellable_interrupts_pending_future() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            cancellable(&mut Some(rx), std::future::pending::<()>()).await
        });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();
        assert!(matches!(handle.await.unwrap(), Err(QueryError::Cancelled)));
    }
}
