//! Relational criteria and schema coercion over JSON document stores.
//!
//! This crate is the core of the docbridge project and provides:
//!
//! - **Schema model** ([`schema`]) - Collection definitions and their normalized schema
//! - **Index planning** ([`index`]) - Index specs derived from a schema
//! - **Document codec** ([`codec`]) - Conversion between logical and stored documents
//! - **Criteria model** ([`criteria`]) - Typed criteria, fluent filters and loose-document parsing
//! - **Criteria translation** ([`query`]) - Compilation into native filters and pipelines
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Collections** ([`collection`]) - The CRUD surface of a registered collection
//! - **Adapter** ([`adapter`]) - Backend ownership and the collection registry
//! - **Configuration** ([`config`]) - Adapter-wide options
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docbridge::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! let adapter = DocumentAdapter::new(InMemoryStore::new(), AdapterConfig::default());
//! let pets = adapter
//!     .register_collection(
//!         CollectionDefinition::new("Pet")
//!             .with_attribute("id", AttributeDescriptor::new(AttributeType::Integer).primary_key())
//!             .with_attribute("name", AttributeDescriptor::new(AttributeType::String).unique()),
//!     )
//!     .await?;
//!
//! pets.insert(doc! { "name": "Rex" }).await?;
//! let found = pets.find(&Criteria::parse(&doc! { "where": { "name": "Rex" } })?).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbridge_core;

pub mod adapter;
pub mod backend;
pub mod codec;
pub mod collection;
pub mod config;
pub mod criteria;
pub mod error;
pub mod index;
pub mod query;
pub mod schema;
