//! Storage backend abstraction.
//!
//! This module defines the seam between the adapter and a concrete document store. The
//! adapter never talks to a driver directly: it asks a [`StoreBackend`] for a
//! [`CollectionHandle`] and issues native filters, pipelines and write batches through it.
//!
//! # Traits
//!
//! - [`StoreBackend`]: Hands out collection handles and manages collections
//! - [`CollectionHandle`]: Native operations on a single collection
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docbridge::backend::{CollectionHandle, StoreBackend};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//! let users = backend.collection("users");
//!
//! let outcome = users.insert_batch(vec![doc! { "name": "Alice", "age": 30 }]).await?;
//! let adults = users.query(doc! { "age": { "$gte": 18 } }, Default::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{error::AdapterResult, index::IndexSpec, query::QueryOptions};

/// A stream of native documents, pulled one at a time.
pub type DocumentStream = BoxStream<'static, AdapterResult<Document>>;

/// Result of a batch insert.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertOutcome {
    /// Native identifiers of the inserted documents, in insertion order.
    pub inserted_ids: Vec<Bson>,
}

/// Result of a bulk update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteAcknowledgement {
    /// Whether the store confirmed the write.
    pub acknowledged: bool,
    /// Documents matched by an update or removed by a delete.
    pub count: u64,
}

/// Native operations on a single collection.
///
/// Filters, options and pipelines are already in the store's native form; handles do no
/// translation or coercion of their own.
///
/// # Thread Safety
///
/// Handles are shared between concurrent operations on the same collection and must be
/// `Send + Sync`.
#[async_trait]
pub trait CollectionHandle: Send + Sync + Debug {
    /// Returns the storage name of the collection.
    fn name(&self) -> &str;

    /// Runs a filtered query and collects every result.
    async fn query(&self, filter: Document, options: QueryOptions) -> AdapterResult<Vec<Document>>;

    /// Runs a filtered query and yields results lazily.
    ///
    /// Implementations must not read ahead of the consumer by more than the driver's own
    /// batch buffering. A sorted query may be ordered in full before the first document
    /// is yielded.
    async fn query_stream(
        &self,
        filter: Document,
        options: QueryOptions,
    ) -> AdapterResult<DocumentStream>;

    /// Runs an aggregation pipeline.
    async fn run_aggregation(&self, pipeline: Vec<Document>) -> AdapterResult<Vec<Document>>;

    /// Inserts `documents` in one batch. Documents without `_id` are assigned one.
    async fn insert_batch(&self, documents: Vec<Document>) -> AdapterResult<InsertOutcome>;

    /// Sets the fields of `set` on every document matching `filter`.
    async fn bulk_update(
        &self,
        filter: Document,
        set: Document,
    ) -> AdapterResult<WriteAcknowledgement>;

    /// Deletes every document matching `filter`.
    async fn bulk_delete(&self, filter: Document) -> AdapterResult<WriteAcknowledgement>;

    /// Counts documents matching `filter`.
    async fn count(&self, filter: Document) -> AdapterResult<u64>;

    /// Creates an index. Creating an index that already exists succeeds.
    async fn create_index(&self, index: &IndexSpec) -> AdapterResult<()>;
}

/// Abstract interface for document storage backends.
///
/// A backend owns the connection (or, in memory, the data) and hands out cheap
/// [`CollectionHandle`]s by storage name. Collections are created lazily on first write.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// The handle type for a single collection.
    type Handle: CollectionHandle + 'static;

    /// Returns a handle to the named collection.
    fn collection(&self, name: &str) -> Self::Handle;

    /// Drops a collection and all of its documents and indexes.
    ///
    /// Dropping a collection that does not exist succeeds.
    async fn drop_collection(&self, name: &str) -> AdapterResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> AdapterResult<Vec<String>>;

    /// Gracefully shuts down the backend, releasing resources.
    ///
    /// The default implementation does nothing.
    async fn shutdown(self) -> AdapterResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    type Handle = B::Handle;

    fn collection(&self, name: &str) -> Self::Handle {
        (*self).collection(name)
    }

    async fn drop_collection(&self, name: &str) -> AdapterResult<()> {
        (*self).drop_collection(name).await
    }

    async fn list_collections(&self) -> AdapterResult<Vec<String>> {
        (*self).list_collections().await
    }
}

/// Factory for backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> AdapterResult<Self::Backend>;
}
