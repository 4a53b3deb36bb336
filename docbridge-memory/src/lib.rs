//! In-memory document storage backend for docbridge.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It evaluates the same native filters and pipelines a document server would, which makes
//! it suitable for development and for testing adapters without a running database.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Native filters** - Comparison, set, regex and logical operators
//! - **Aggregation** - `$match` and `$group` with `$sum`, `$avg`, `$min` and `$max`
//! - **Unique indexes** - Enforced on insert and update
//!
//! # Quick Start
//!
//! ```ignore
//! use docbridge::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let adapter = DocumentAdapter::new(backend, AdapterConfig::default());
//!     let pets = adapter.register_collection(CollectionDefinition::new("Pet")).await?;
//!
//!     pets.insert(bson::doc! { "name": "Rex" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbridge_memory;

pub mod store;
pub(crate) mod evaluator;
pub(crate) mod pipeline;

pub use store::{InMemoryCollection, InMemoryStore, InMemoryStoreBuilder};
