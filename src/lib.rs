//! # Vector Ingest
//!
//! Asynchronous document ingestion jobs for vector databases.
//!
//! A job takes a batch of files (an HTTP upload or a server-side sync of a
//! source folder), extracts their text, chunks and deduplicates it, embeds
//! the chunks, upserts them into a vector collection, and builds the index.
//! Clients poll the job for status, stage, progress, and a bounded log tail.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────────────────────┐
//! │ Upload/Sync  │──▶│ JobRegistry │◀──│ Pipeline                      │
//! │ (service)    │   │  (core)     │   │ extract → chunk → embed →     │
//! └──────┬───────┘   └──────▲──────┘   │ upsert → index                │
//!        │ spawn            │ poll     └───────────────┬───────────────┘
//!        └──────────────────┼──────────────────────────┘
//!                      ┌────┴─────┐
//!                      │   HTTP   │
//!                      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Request-path errors |
//! | [`extract`] | Multi-format text extraction |
//! | [`embedding`] | Embedding providers and model catalog |
//! | [`milvus`] | Milvus REST vector store |
//! | [`pipeline`] | Job executor |
//! | [`upload`] | Per-job scratch directories |
//! | [`sync`] | Source-root scanning |
//! | [`service`] | Upload receiver and sync trigger |
//! | [`server`] | HTTP server |
//! | [`progress`] | CLI progress reporting |
//!
//! The I/O-free pieces (job model, registry, chunker, traits) live in the
//! `vector-ingest-core` crate and are re-exported as [`core`].

pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod milvus;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod service;
pub mod sync;
pub mod upload;

pub use vector_ingest_core as core;
