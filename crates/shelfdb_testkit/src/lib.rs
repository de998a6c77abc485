//! # ShelfDB Testkit
//!
//! Test utilities for ShelfDB.
//!
//! This crate provides:
//! - Test fixtures and factory helpers over throwaway backends
//! - Property-based test generators using proptest
//! - A model harness that mirrors a store in a `BTreeMap`
//! - End-to-end scenarios and engine-level property checks
//! - Persisted layout verification
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shelfdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_factory() {
//!     let factory = TestFactory::memory();
//!     let connection = scenarios::populated_store(&factory, "test", 10).await;
//!     assert_eq!(read_all(&connection, "items").await.len(), 10);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod layout;
pub mod properties;
pub mod scenarios;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::layout::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use layout::*;
