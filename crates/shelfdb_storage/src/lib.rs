//! # ShelfDB Storage
//!
//! Asynchronous persistence backends for ShelfDB.
//!
//! This crate provides the lowest-level storage abstraction for ShelfDB.
//! Backends are **opaque string stores**: they map string keys to string
//! values and never interpret either.
//!
//! ## Design Principles
//!
//! - Backends expose three asynchronous calls: `get`, `set`, `remove`
//! - No atomicity across calls is assumed; the engine's rollback log
//!   provides transaction atomicity on top
//! - Must be `Send + Sync` so the engine can share one handle
//! - ShelfDB owns the layout of keys and the encoding of values
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - One file per key inside a directory
//!
//! ## Example
//!
//! ```rust
//! use shelfdb_storage::{InMemoryBackend, StorageBackend, StorageResult};
//!
//! async fn demo() -> StorageResult<()> {
//!     let backend = InMemoryBackend::new();
//!     backend.set("greeting", "hello world".to_string()).await?;
//!     let value = backend.get("greeting").await?;
//!     assert_eq!(value.as_deref(), Some("hello world"));
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
