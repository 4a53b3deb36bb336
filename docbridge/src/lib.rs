//! Relational criteria and schema coercion over JSON document stores.
//!
//! This crate is the primary entry point of docbridge. It re-exports the core types from the
//! sub-crates and gives access to the storage backends.
//!
//! # Features
//!
//! - **Schema coercion** - Collection definitions drive how identifiers, dates and UUIDs are stored
//! - **Index planning** - Unique and indexed attributes become index specs, installed on registration
//! - **Relational criteria** - Loose where-clause documents or a fluent builder, compiled to native filters
//! - **Aggregation** - Grouped sums, averages, minimums and maximums flattened into plain rows
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docbridge::{prelude::*, memory::InMemoryStore, bson::doc};
//!
//! #[tokio::main]
//! async fn main() -> AdapterResult<()> {
//!     let adapter = DocumentAdapter::new(InMemoryStore::new(), AdapterConfig::default());
//!
//!     let users = adapter
//!         .register_collection(
//!             CollectionDefinition::new("user")
//!                 .with_attribute("id", AttributeDescriptor::new(AttributeType::ObjectId).primary_key())
//!                 .with_attribute("email", AttributeDescriptor::new(AttributeType::String).unique())
//!                 .with_attribute("age", AttributeDescriptor::new(AttributeType::Integer)),
//!         )
//!         .await?;
//!
//!     users.insert(doc! { "email": "alice@example.com", "age": 31 }).await?;
//!
//!     // Loose criteria, as an ORM would hand them over
//!     let adults = users
//!         .find(&Criteria::parse(&doc! { "where": { "age": { ">=": 18 } }, "sort": "email ASC" })?)
//!         .await?;
//!
//!     // Or the fluent builder
//!     let same = users
//!         .find(&Criteria::builder().filter(Filter::gte("age", 18)).sort("email", SortDirection::Asc).build())
//!         .await?;
//!
//!     assert_eq!(adults, same);
//!
//!     adapter.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use docbridge_core::{adapter, backend, codec, collection, config, criteria, error, index, query, schema};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docbridge_memory::{InMemoryCollection, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docbridge_mongodb::{ConnectionConfig, MongoCollectionHandle, MongoDbStore, MongoDbStoreBuilder};
}
