//! # ShelfDB Core
//!
//! Transactional object-store engine for ShelfDB.
//!
//! This crate provides:
//! - Named, versioned databases opened through a [`Factory`]
//! - Object stores with optional key paths and key generators
//! - Secondary indexes, including unique and multi-entry indexes
//! - Transactions with strict request ordering and atomic rollback
//! - Cursors over stores and indexes in four directions
//!
//! All persistence goes through a [`shelfdb_storage::StorageBackend`];
//! record payloads are encoded with a [`shelfdb_codec::Codec`].
//!
//! ## Execution model
//!
//! Every operation on a store, index or cursor queues a request on its
//! transaction and returns a [`Request`] future. Requests run one at a time
//! in the order they were placed. A transaction commits on its own once its
//! queue drains, and aborts as soon as a request fails unless the caller
//! called [`Request::prevent_abort`]. The engine spawns Tokio tasks, so
//! factories must be used from within a Tokio runtime.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod connection;
mod cursor;
mod database;
mod error;
mod events;
mod factory;
mod handle;
mod index;
mod key;
mod key_generator;
mod key_path;
mod object_store;
mod range;
mod record_store;
mod request;
mod rollback;
mod schema;
mod transaction;

pub use config::{Config, DEFAULT_MAX_GENERATED_KEY};
pub use connection::Connection;
pub use cursor::{Cursor, CursorDirection};
pub use error::{CoreError, CoreResult};
pub use events::{EventSink, NoopSink, VersionChangeEvent};
pub use factory::{DatabaseInfo, Factory, FactoryBuilder, UpgradeContext};
pub use handle::{IndexHandle, ObjectStoreHandle};
pub use key::{compare, is_valid_key, Key};
pub use key_generator::KeyGenerator;
pub use key_path::KeyPath;
pub use range::{KeyRange, Query};
pub use request::{FromResponse, Request, Response};
pub use schema::{IndexOptions, ObjectStoreOptions};
pub use transaction::{Transaction, TransactionMode, TransactionOutcome, TransactionState};

pub use shelfdb_codec::Value;
