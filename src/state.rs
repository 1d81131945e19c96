//! Per-query workflow state.
//!
//! A [`QueryState`] is created for one question, mutated in place by the
//! `retrieve` and `generate` nodes, and consumed into an [`Answer`] or a
//! [`QueryFailure`].

use std::collections::BTreeSet;
use std::fmt;

use papertrail_core::models::{Reference, SearchHit};
use serde::Serialize;

use crate::error::{QueryError, QueryFailure};

/// Workflow position. `Failed` is reachable from every non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Retrieve,
    Generate,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "start",
            Stage::Retrieve => "retrieve",
            Stage::Generate => "generate",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct QueryState {
    pub query: String,
    /// Most relevant first.
    pub retrieved: Vec<SearchHit>,
    pub answer: Option<String>,
    pub citations: BTreeSet<String>,
    pub unverified_citations: BTreeSet<String>,
    pub stage: Stage,
    /// Every stage entered, in order.
    pub trace: Vec<Stage>,
    pub error: Option<QueryError>,
}

impl QueryState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            retrieved: Vec::new(),
            answer: None,
            citations: BTreeSet::new(),
            unverified_citations: BTreeSet::new(),
            stage: Stage::Start,
            trace: vec![Stage::Start],
            error: None,
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        tracing::debug!(from = %self.stage, to = %stage, "query transition");
        self.stage = stage;
        self.trace.push(stage);
    }

    /// Move to `Failed`, remembering which stage failed.
    pub fn fail(&mut self, error: QueryError) {
        tracing::debug!(stage = %self.stage, error = %error, "query failed");
        self.error = Some(error);
        self.stage = Stage::Failed;
        self.trace.push(Stage::Failed);
    }

    /// The stage that was active when the query failed.
    pub fn failed_stage(&self) -> Option<Stage> {
        if self.stage != Stage::Failed {
            return None;
        }
        self.trace.iter().rev().nth(1).copied()
    }

    /// References for cited sources, in retrieval order.
    pub fn references(&self) -> Vec<Reference> {
        let mut seen = BTreeSet::new();
        self.retrieved
            .iter()
            .filter(|h| self.citations.contains(&h.chunk.source_id))
            .filter(|h| seen.insert(h.chunk.source_id.clone()))
            .map(|h| Reference::from_chunk(&h.chunk))
            .collect()
    }

    /// Convert a terminal state into the outward result.
    pub fn into_result(mut self) -> Result<Answer, QueryFailure> {
        if let Some(error) = self.error.take() {
            let stage = self.failed_stage().unwrap_or(Stage::Start);
            return Err(QueryFailure {
                query: self.query,
                stage,
                error,
            });
        }
        let references = self.references();
        Ok(Answer {
            answer: self.answer.unwrap_or_default(),
            citations: self.citations,
            unverified_citations: self.unverified_citations,
            references,
            retrieved: self.retrieved,
        })
    }
}

/// Successful result of a query.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    /// Cited ids that name a retrieved source.
    pub citations: BTreeSet<String>,
    /// Cited ids that name no retrieved source. Reported as-is.
    pub unverified_citations: BTreeSet<String>,
    pub references: Vec<Reference>,
    /// Evidence the answer was generated from, most relevant first.
    pub retrieved: Vec<SearchHit>,
}
