//! # Papertrail
//!
//! Grounded question answering over a curated corpus of academic papers.
//!
//! Papertrail reads a metadata registry of papers, extracts and chunks
//! their text, embeds the chunks into a persisted vector index, and answers
//! questions with a two-stage retrieve/generate workflow whose answers cite
//! the sources they draw on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌─────────────┐
//! │ Registry │──▶│  Ingestion  │──▶│ VectorIndex │◀── persist / load
//! │  (JSON)  │   │ fetch+chunk │   │  + embedder │
//! └──────────┘   └─────────────┘   └──────┬──────┘
//!                                         │
//!                                         ▼
//!                             ┌───────────────────────┐
//!                             │ Orchestrator          │
//!                             │ Retrieve ─▶ Generate  │
//!                             └───────────┬───────────┘
//!                                         ▼
//!                                answer + references
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`registry`] | Metadata registry loading and validation |
//! | [`ingest`] | Lazy per-source text loading and chunking |
//! | [`extract`] | PDF, DOCX and HTML text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Generation providers |
//! | [`index`] | Index building and lifecycle |
//! | [`persist`] | On-disk index format |
//! | [`orchestrator`] | Retrieve/generate workflow |
//! | [`app`] | Facade used by the CLI |

pub mod app;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod http;
pub mod index;
pub mod ingest;
pub mod orchestrator;
pub mod persist;
pub mod prompt;
pub mod registry;
pub mod retry;
pub mod state;
