//! # Papertrail Core
//!
//! I/O-free logic shared by the Papertrail application: the data model,
//! the overlapping character chunker, the embedding and generation
//! capability traits, vector utilities, and the exact cosine-similarity
//! vector index.
//!
//! Nothing in this crate touches the filesystem, the network, or an
//! async runtime. Concrete providers and persistence live in the
//! `papertrail` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
