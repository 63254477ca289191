//! Resilient structured-LLM pipeline: a retrying, rate-limit-aware call
//! client, a two-layer cache (execution records over SQLite, responses over a
//! JSON file), and a bounded-concurrency batch orchestrator with
//! partial-failure semantics.
//!
//! The crate is provider-agnostic: anything implementing
//! [`provider::CompletionClient`] can sit behind [`client::StructuredCallClient`].

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
pub mod model;
pub mod provider;
pub mod schema;

pub use batch::{dedup_by_key, sort_by_identity, BatchOrchestrator, ItemProcessor};
pub use cache::CacheCoordinator;
pub use client::{ClientOptions, StructuredCallClient};
pub use config::Config;
pub use errors::{ApiError, ConfigError, StoreError};
pub use model::{BatchResult, BatchStage, CallParams, Fingerprint, WorkItem};
pub use provider::{CompletionClient, OpenAiClient};
pub use schema::SchemaValidator;
