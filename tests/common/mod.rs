//! Common test infrastructure
//!
//! This module provides everything end-to-end tests need to drive the
//! pipeline against an in-memory catalog. Tests should only import from this
//! module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{seed_genre, test_gateway, FakeCatalog, TEST_YEAR};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let catalog = FakeCatalog::new();
//!     seed_genre(&catalog, Genre::Pop, &[("t1", "a1")]);
//!     let gateway = test_gateway(catalog.clone());
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fake_catalog;
mod fixtures;

// Public API - this is what tests import
pub use constants::*;
pub use fake_catalog::{hit, FakeCatalog};
#[allow(unused_imports)]
pub use fixtures::{
    bucket_query, candidate, seed_genre, seed_query, test_config, test_gateway, test_pipeline,
    TestPipeline,
};
