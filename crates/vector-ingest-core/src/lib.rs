//! # Vector Ingest Core
//!
//! I/O-free building blocks of the ingestion job subsystem: the job record
//! and its registry, progress estimation, chunking and deduplication,
//! language tagging, and the embedder and vector-store traits.
//!
//! This crate performs no filesystem or network access. The `vector-ingest`
//! app crate supplies extraction, concrete providers, the pipeline
//! executor, and the HTTP surface.

pub mod chunk;
pub mod embedding;
pub mod job;
pub mod lang;
pub mod models;
pub mod progress;
pub mod registry;
pub mod store;
