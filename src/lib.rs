//! Core ingestion library for the Bluesky firehose search/analytics index.
//!
//! This crate is the shared engine behind four thin command binaries
//! (`jetstream`, `megastream`, `expiry`, `extract`, see `src/bin/`):
//! a real-time WebSocket "like" consumer, a file-spooling post consumer
//! with pre-computed embeddings, a retention job, and a columnar extract
//! job. All four share the same document-store client, codec, and
//! cursor machinery defined here.

pub mod aggregate;
pub mod cli;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod health;
pub mod indexer;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod routing_cache;

pub use error::{IngestError, IngestResult};
