//! MongoDB backend implementation for docbridge.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! pipelines and index specs compiled by the adapter are handed to the driver unchanged.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docbridge = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! A store is built either from a connection string and database name, or from a
//! [`ConnectionConfig`] that assembles the connection string from its parts.
//!
//! Creating an index that already exists under a different name or with different
//! options is logged and otherwise ignored, so registering a collection twice is safe.
//!
//! # Example
//!
//! ```ignore
//! use docbridge::{backend::StoreBackendBuilder, mongodb::{ConnectionConfig, MongoDbStore, MongoDbStoreBuilder}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!
//!     let config = ConnectionConfig::from_json(r#"{ "host": "db", "database": "app" }"#)?;
//!     let other = MongoDbStoreBuilder::from_config(config)?.build().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docbridge_mongodb;

pub mod config;
pub mod store;

pub use config::ConnectionConfig;
pub use store::{MongoCollectionHandle, MongoDbStore, MongoDbStoreBuilder};
