//! Title Sampler Library
//!
//! Stratified track sampling from a music catalog API, batched enrichment
//! and title feature derivation. Exposes the internal modules for the CLI,
//! tests and reuse.

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod gateway;
pub mod models;
pub mod pipeline;
pub mod sqlite_persistence;
pub mod telemetry;

// Re-export commonly used types for convenience
pub use catalog::{CatalogClient, CatalogError, SpotifyCatalogClient};
pub use checkpoint::{CheckpointStore, SqliteCheckpointStore};
pub use error::PipelineError;
pub use gateway::{GatewayError, RateLimitedGateway};
pub use pipeline::{FeatureRow, Pipeline};
