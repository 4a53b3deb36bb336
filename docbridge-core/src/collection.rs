//! Registered collections and their CRUD surface.
//!
//! A [`Collection`] binds a collection definition to a backend [`CollectionHandle`]. Every
//! operation compiles its criteria, encodes its values, talks to the store, and decodes
//! what comes back, so callers only ever see logical documents.
//!
//! Document stores do not return the documents touched by a bulk write. `update` and
//! `destroy` therefore look up the identifiers of the matching documents first and then
//! mutate, which lets them report exactly what was affected.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docbridge::{criteria::{Criteria, MutationCriteria}, prelude::*};
//!
//! let users = adapter.register_collection(definition).await?;
//!
//! let created = users.insert(doc! { "name": "Ada", "age": 36 }).await?;
//! let adults = users.find(&Criteria::parse(&doc! { "where": { "age": { ">=": 18 } } })?).await?;
//! let renamed = users
//!     .update(&MutationCriteria::parse(&doc! { "name": "Ada" })?, doc! { "name": "Ada L." })
//!     .await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::{StreamExt, TryStreamExt};

use crate::{
    backend::{CollectionHandle, DocumentStream, WriteAcknowledgement},
    codec::DocumentCodec,
    config::AdapterConfig,
    criteria::{Criteria, MutationCriteria},
    error::{AdapterError, AdapterResult},
    index::{IndexSpec, derive_indexes},
    query::{CriteriaTranslator, QueryOptions},
    schema::{CollectionDefinition, NATIVE_ID_FIELD, Schema},
};

/// Receives streamed documents one at a time.
///
/// The next document is not pulled from the store until the previous `write` has
/// completed, so a slow sink slows the query down instead of buffering results.
#[async_trait]
pub trait DocumentSink: Send {
    /// Accepts one decoded document. Returning an error stops the stream.
    async fn write(&mut self, document: Document) -> AdapterResult<()>;

    /// Called exactly once when the stream finishes, with the error that stopped it if any.
    async fn end(self, result: AdapterResult<()>)
    where
        Self: Sized;
}

/// A registered collection.
#[derive(Debug)]
pub struct Collection<H: CollectionHandle> {
    identity: String,
    schema: Schema,
    indexes: Vec<IndexSpec>,
    config: AdapterConfig,
    handle: H,
}

impl<H: CollectionHandle> Collection<H> {
    /// Builds a collection from its definition. No I/O is performed.
    pub fn new(definition: &CollectionDefinition, config: AdapterConfig, handle: H) -> Self {
        let schema = Schema::parse(&definition.attributes);
        let indexes = derive_indexes(&schema);

        Self {
            identity: definition.collection_identity(),
            schema,
            indexes,
            config,
            handle,
        }
    }

    /// Returns the storage name of this collection.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the indexes derived from the schema, in declaration order.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Returns the underlying store handle for operations the adapter does not cover.
    pub fn native(&self) -> &H {
        &self.handle
    }

    fn translator(&self) -> CriteriaTranslator<'_> {
        CriteriaTranslator::new(&self.schema, &self.config)
    }

    fn codec(&self) -> DocumentCodec<'_> {
        DocumentCodec::new(&self.schema)
    }

    /// Creates every derived index on the store.
    pub async fn install_indexes(&self) -> AdapterResult<()> {
        for index in &self.indexes {
            tracing::debug!(collection = %self.identity, index = %index.name(), "creating index");
            self.handle.create_index(index).await?;
        }

        Ok(())
    }

    /// Finds documents matching `criteria`.
    ///
    /// Grouped criteria return one row per group, with the grouping fields flattened into
    /// the row next to the aggregate values. Those rows are not documents and are not
    /// decoded.
    ///
    /// # Errors
    ///
    /// Compilation errors are returned before the store is contacted. Store errors are
    /// returned as-is.
    pub async fn find(&self, criteria: &Criteria) -> AdapterResult<Vec<Document>> {
        let compiled = self.translator().compile(criteria)?;

        match compiled.pipeline {
            Some(pipeline) => {
                tracing::debug!(collection = %self.identity, ?pipeline, "find (aggregate)");

                let rows = self.handle.run_aggregation(pipeline).await?;
                Ok(rows.into_iter().map(flatten_group).collect())
            }
            None => {
                tracing::debug!(
                    collection = %self.identity,
                    filter = %compiled.filter,
                    options = ?compiled.options,
                    "find"
                );

                let documents = self.handle.query(compiled.filter, compiled.options).await?;
                Ok(self.codec().decode(documents))
            }
        }
    }

    /// Streams documents matching `criteria`, decoded one at a time.
    ///
    /// Projection and grouping are ignored; the stream always yields whole documents.
    /// Nothing is read from the store until the consumer polls.
    pub async fn stream(&self, criteria: &Criteria) -> AdapterResult<DocumentStream> {
        let criteria = Criteria { aggregate: None, ..criteria.clone().without_projection() };
        let compiled = self.translator().compile(&criteria)?;

        tracing::debug!(collection = %self.identity, filter = %compiled.filter, "stream");

        let schema = self.schema.clone();
        let documents = self.handle.query_stream(compiled.filter, compiled.options).await?;

        Ok(documents
            .map_ok(move |document| DocumentCodec::new(&schema).decode_document(document))
            .boxed())
    }

    /// Streams documents matching `criteria` into `sink`.
    ///
    /// `sink.end` is called exactly once, including when compilation fails. The returned
    /// result is the one handed to `end`.
    pub async fn stream_into<S: DocumentSink>(&self, criteria: &Criteria, mut sink: S) -> AdapterResult<()> {
        let result = self.pump(criteria, &mut sink).await;
        sink.end(result.clone()).await;
        result
    }

    async fn pump<S: DocumentSink>(&self, criteria: &Criteria, sink: &mut S) -> AdapterResult<()> {
        let mut documents = self.stream(criteria).await?;

        while let Some(document) = documents.next().await {
            sink.write(document?).await?;
        }

        Ok(())
    }

    /// Inserts a single document and returns it as stored.
    pub async fn insert(&self, values: Document) -> AdapterResult<Document> {
        self.insert_many(vec![values])
            .await?
            .pop()
            .ok_or_else(|| AdapterError::Storage("inserted document could not be read back".to_string()))
    }

    /// Inserts a batch of documents in one write and returns them as stored, in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Encoding errors are returned before anything is written.
    pub async fn insert_many(&self, batch: Vec<Document>) -> AdapterResult<Vec<Document>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let codec = self.codec();
        let encoded = batch
            .into_iter()
            .map(|values| codec.encode(values))
            .collect::<AdapterResult<Vec<_>>>()?;

        tracing::debug!(collection = %self.identity, count = encoded.len(), "insert");

        let outcome = self.handle.insert_batch(encoded).await?;
        let mut stored = self
            .handle
            .query(by_identifiers(outcome.inserted_ids.clone()), QueryOptions::default())
            .await?
            .into_iter()
            .filter_map(|document| Some((document.get(NATIVE_ID_FIELD)?.to_string(), document)))
            .collect::<HashMap<_, _>>();

        let ordered = outcome
            .inserted_ids
            .iter()
            .filter_map(|id| stored.remove(&id.to_string()))
            .collect();

        Ok(codec.decode(ordered))
    }

    /// Sets `values` on every document matching `criteria` and returns the updated
    /// documents.
    ///
    /// The identifier can never be changed, so `id` and `_id` are dropped from `values`
    /// once they have been encoded. A malformed identifier still fails the update.
    /// Matching identifiers are captured before the write; a document that starts
    /// matching between the lookup and the write may be updated without being returned.
    /// No match is not an error: the result is empty and nothing is written.
    pub async fn update(&self, criteria: &MutationCriteria, values: Document) -> AdapterResult<Vec<Document>> {
        let filter = self.translator().compile_filter(criteria)?;

        let mut set = self.codec().encode(values)?;
        set.remove(NATIVE_ID_FIELD);

        let ids = self.capture_identifiers(filter.clone()).await?;
        if ids.is_empty() {
            tracing::debug!(collection = %self.identity, %filter, "update matched nothing");
            return Ok(Vec::new());
        }

        if !set.is_empty() {
            tracing::debug!(collection = %self.identity, %filter, %set, "update");
            ensure_acknowledged("update", self.handle.bulk_update(filter, set).await?)?;
        }

        let documents = self.handle.query(by_identifiers(ids), QueryOptions::default()).await?;
        Ok(self.codec().decode(documents))
    }

    /// Deletes every document matching `criteria` and returns the identifiers removed,
    /// each as a `{ id }` document.
    ///
    /// Matching identifiers are captured before the delete, with the same lookup race as
    /// [`Collection::update`].
    pub async fn destroy(&self, criteria: &MutationCriteria) -> AdapterResult<Vec<Document>> {
        let filter = self.translator().compile_filter(criteria)?;

        let ids = self.capture_identifiers(filter.clone()).await?;
        if ids.is_empty() {
            tracing::debug!(collection = %self.identity, %filter, "destroy matched nothing");
            return Ok(Vec::new());
        }

        tracing::debug!(collection = %self.identity, %filter, count = ids.len(), "destroy");
        ensure_acknowledged("destroy", self.handle.bulk_delete(filter).await?)?;

        Ok(self.codec().decode(
            ids.into_iter()
                .map(|id| doc! { NATIVE_ID_FIELD: id })
                .collect(),
        ))
    }

    /// Counts documents matching `criteria`.
    pub async fn count(&self, criteria: &MutationCriteria) -> AdapterResult<u64> {
        let filter = self.translator().compile_filter(criteria)?;

        tracing::debug!(collection = %self.identity, %filter, "count");
        self.handle.count(filter).await
    }

    async fn capture_identifiers(&self, filter: Document) -> AdapterResult<Vec<Bson>> {
        Ok(self
            .handle
            .query(filter, QueryOptions::identifiers_only())
            .await?
            .into_iter()
            .filter_map(|mut document| document.remove(NATIVE_ID_FIELD))
            .collect())
    }
}

fn by_identifiers(ids: Vec<Bson>) -> Document {
    doc! { NATIVE_ID_FIELD: { "$in": ids } }
}

fn ensure_acknowledged(operation: &str, acknowledgement: WriteAcknowledgement) -> AdapterResult<()> {
    if acknowledgement.acknowledged {
        return Ok(());
    }

    tracing::warn!("{} was not acknowledged by the store", operation);
    Err(AdapterError::Storage(format!("{} was not acknowledged by the store", operation)))
}

/// Moves the grouping keys out of `_id` and into the row itself.
fn flatten_group(mut row: Document) -> Document {
    match row.remove(NATIVE_ID_FIELD) {
        Some(Bson::Document(mut keys)) => {
            for (key, value) in row {
                keys.insert(key, value);
            }
            keys
        }
        _ => row,
    }
}
