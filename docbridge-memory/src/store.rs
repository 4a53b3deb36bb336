//! In-memory storage implementation.
//!
//! Documents are kept per collection in insertion order behind an async-aware read-write
//! lock. Filters and pipelines arrive in native form and are evaluated by
//! [`crate::evaluator`] and [`crate::pipeline`].

use std::{collections::{HashMap, HashSet}, sync::Arc};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use bson::{Bson, Document, oid::ObjectId};

use docbridge_core::{
    backend::{CollectionHandle, DocumentStream, InsertOutcome, StoreBackend, StoreBackendBuilder, WriteAcknowledgement},
    error::{AdapterError, AdapterResult},
    index::IndexSpec,
    query::QueryOptions,
    schema::NATIVE_ID_FIELD,
};

use crate::{
    evaluator::{DocumentEvaluator, lookup},
    pipeline::{run_pipeline, sort_order},
};

#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

type StoreMap = HashMap<String, CollectionData>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so clones
/// share the same data. Every query scans the whole collection; unique indexes are
/// enforced on insert and update.
///
/// # Example
///
/// ```ignore
/// use docbridge_memory::InMemoryStore;
/// use docbridge::backend::{CollectionHandle, StoreBackend};
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///     let users = store.collection("users");
///
///     users.insert_batch(vec![doc! { "name": "Alice", "age": 30 }]).await?;
///     assert_eq!(users.count(doc! {}).await?, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents and indexes
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Handle = InMemoryCollection;

    fn collection(&self, name: &str) -> Self::Handle {
        InMemoryCollection {
            name: name.to_string(),
            store: self.store.clone(),
        }
    }

    async fn drop_collection(&self, name: &str) -> AdapterResult<()> {
        self.store.write().await.remove(name);
        Ok(())
    }

    async fn list_collections(&self) -> AdapterResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();

        names.sort();
        Ok(names)
    }
}

/// Handle to one collection of an [`InMemoryStore`].
#[derive(Clone, Debug)]
pub struct InMemoryCollection {
    name: String,
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryCollection {
    /// Index specs created on this collection so far.
    pub async fn indexes(&self) -> Vec<IndexSpec> {
        self.store
            .read()
            .await
            .get(&self.name)
            .map(|data| data.indexes.clone())
            .unwrap_or_default()
    }

    async fn select(&self, filter: &Document, options: &QueryOptions) -> AdapterResult<Vec<Document>> {
        let store = self.store.read().await;
        let documents = match store.get(&self.name) {
            Some(data) => DocumentEvaluator::filter_documents(&data.documents, filter)?,
            None => return Ok(vec![]),
        };
        drop(store);

        let mut documents = documents;
        if let Some(sort) = options.sort_document() {
            documents.sort_by(|a, b| sort_order(a, b, &sort));
        }

        Ok(documents
            .into_iter()
            .skip(options.skip.unwrap_or(0) as usize)
            .take(options.limit.map(|limit| limit as usize).unwrap_or(usize::MAX))
            .map(|document| project(document, options.projection.as_ref()))
            .collect())
    }
}

fn project(document: Document, projection: Option<&Document>) -> Document {
    let projection = match projection {
        Some(projection) if !projection.is_empty() => projection,
        _ => return document,
    };

    // Inclusion unless every flag is falsy; `{ _id: 1 }` alone keeps only `_id`.
    let includes = projection.iter().any(|(_, flag)| is_truthy(flag));

    if includes {
        let keep_id = projection.get(NATIVE_ID_FIELD).is_none_or(is_truthy);

        document
            .into_iter()
            .filter(|(field, _)| {
                if field == NATIVE_ID_FIELD {
                    keep_id
                } else {
                    projection.get(field).is_some_and(is_truthy)
                }
            })
            .collect()
    } else {
        document
            .into_iter()
            .filter(|(field, _)| projection.get(field).is_none_or(is_truthy))
            .collect()
    }
}

fn is_truthy(flag: &Bson) -> bool {
    match flag {
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Boolean(b) => *b,
        _ => true,
    }
}

/// Hashable form of an indexed value. Numbers of different widths collapse together and
/// a missing field is null, matching how the evaluator compares them.
fn index_key(value: Option<&Bson>) -> String {
    match value {
        None | Some(Bson::Null) => "null".to_string(),
        Some(Bson::Int32(n)) => format!("number:{}", *n as f64),
        Some(Bson::Int64(n)) => format!("number:{}", *n as f64),
        Some(Bson::Double(n)) => format!("number:{}", n),
        Some(other) => format!("{:?}", other),
    }
}

/// Fails if any unique index has two documents with the same value.
///
/// Sparse indexes skip documents that lack the field.
fn check_unique(collection: &str, indexes: &[IndexSpec], documents: &[Document]) -> AdapterResult<()> {
    let mut seen_ids = HashSet::with_capacity(documents.len());
    for id in documents.iter().filter_map(|document| document.get(NATIVE_ID_FIELD)) {
        if !seen_ids.insert(index_key(Some(id))) {
            return Err(AdapterError::Storage(format!(
                "duplicate key in {}: _id {}",
                collection, id
            )));
        }
    }

    for index in indexes.iter().filter(|index| index.unique) {
        let mut seen = HashSet::with_capacity(documents.len());

        for document in documents {
            let values = index
                .keys
                .keys()
                .map(|field| lookup(document, field))
                .collect::<Vec<_>>();

            if index.sparse && values.iter().all(Option::is_none) {
                continue;
            }

            let key = values.into_iter().map(index_key).collect::<Vec<_>>();
            if !seen.insert(key) {
                return Err(AdapterError::Storage(format!(
                    "duplicate key in {} for index {}",
                    collection,
                    index.name()
                )));
            }
        }
    }

    Ok(())
}

/// Walks a collection one matching document at a time, taking the lock per step.
///
/// Positions are not stable under concurrent deletes; a document may be skipped or seen
/// twice if the collection shrinks while the cursor is open.
struct LazyCursor {
    store: Arc<RwLock<StoreMap>>,
    name: String,
    filter: Document,
    projection: Option<Document>,
    position: usize,
    skip: u64,
    remaining: Option<u64>,
}

impl LazyCursor {
    async fn advance(&mut self) -> AdapterResult<Option<Document>> {
        if self.remaining == Some(0) {
            return Ok(None);
        }

        let store = self.store.read().await;
        let documents = match store.get(&self.name) {
            Some(data) => &data.documents,
            None => return Ok(None),
        };

        while let Some(document) = documents.get(self.position) {
            self.position += 1;

            if !DocumentEvaluator::new(document).evaluate(&self.filter)? {
                continue;
            }
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }

            return Ok(Some(project(document.clone(), self.projection.as_ref())));
        }

        Ok(None)
    }
}

#[async_trait]
impl CollectionHandle for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, filter: Document, options: QueryOptions) -> AdapterResult<Vec<Document>> {
        self.select(&filter, &options).await
    }

    async fn query_stream(&self, filter: Document, options: QueryOptions) -> AdapterResult<DocumentStream> {
        // Sorting needs every match up front.
        if !options.sort.is_empty() {
            let documents = self.select(&filter, &options).await?;
            return Ok(stream::iter(documents.into_iter().map(Ok)).boxed());
        }

        let cursor = LazyCursor {
            store: self.store.clone(),
            name: self.name.clone(),
            filter,
            projection: options.projection,
            position: 0,
            skip: options.skip.unwrap_or(0),
            remaining: options.limit,
        };

        Ok(stream::try_unfold(cursor, |mut cursor| async move {
            Ok(cursor.advance().await?.map(|document| (document, cursor)))
        })
        .boxed())
    }

    async fn run_aggregation(&self, pipeline: Vec<Document>) -> AdapterResult<Vec<Document>> {
        let documents = self
            .store
            .read()
            .await
            .get(&self.name)
            .map(|data| data.documents.clone())
            .unwrap_or_default();

        run_pipeline(documents, &pipeline)
    }

    async fn insert_batch(&self, documents: Vec<Document>) -> AdapterResult<InsertOutcome> {
        let mut store = self.store.write().await;
        let data = store.entry(self.name.clone()).or_default();

        let documents = documents
            .into_iter()
            .map(|mut document| {
                if !document.contains_key(NATIVE_ID_FIELD) {
                    let mut with_id = Document::new();
                    with_id.insert(NATIVE_ID_FIELD, ObjectId::new());
                    for (field, value) in std::mem::take(&mut document) {
                        with_id.insert(field, value);
                    }
                    document = with_id;
                }
                document
            })
            .collect::<Vec<_>>();

        let inserted_ids = documents
            .iter()
            .filter_map(|document| document.get(NATIVE_ID_FIELD).cloned())
            .collect();

        let mut candidate = data.documents.clone();
        candidate.extend(documents);
        check_unique(&self.name, &data.indexes, &candidate)?;
        data.documents = candidate;

        Ok(InsertOutcome { inserted_ids })
    }

    async fn bulk_update(&self, filter: Document, set: Document) -> AdapterResult<WriteAcknowledgement> {
        let mut store = self.store.write().await;
        let data = match store.get_mut(&self.name) {
            Some(data) => data,
            None => return Ok(WriteAcknowledgement { acknowledged: true, count: 0 }),
        };

        let mut candidate = data.documents.clone();
        let mut count = 0;

        for document in candidate.iter_mut() {
            if DocumentEvaluator::new(document).evaluate(&filter)? {
                for (field, value) in &set {
                    document.insert(field.clone(), value.clone());
                }
                count += 1;
            }
        }

        check_unique(&self.name, &data.indexes, &candidate)?;
        data.documents = candidate;

        Ok(WriteAcknowledgement { acknowledged: true, count })
    }

    async fn bulk_delete(&self, filter: Document) -> AdapterResult<WriteAcknowledgement> {
        let mut store = self.store.write().await;
        let data = match store.get_mut(&self.name) {
            Some(data) => data,
            None => return Ok(WriteAcknowledgement { acknowledged: true, count: 0 }),
        };

        let mut kept = Vec::with_capacity(data.documents.len());
        let mut count = 0;

        for document in &data.documents {
            if DocumentEvaluator::new(document).evaluate(&filter)? {
                count += 1;
            } else {
                kept.push(document.clone());
            }
        }

        data.documents = kept;

        Ok(WriteAcknowledgement { acknowledged: true, count })
    }

    async fn count(&self, filter: Document) -> AdapterResult<u64> {
        let store = self.store.read().await;

        match store.get(&self.name) {
            Some(data) => Ok(DocumentEvaluator::filter_documents(&data.documents, &filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn create_index(&self, index: &IndexSpec) -> AdapterResult<()> {
        let mut store = self.store.write().await;
        let data = store.entry(self.name.clone()).or_default();

        if data.indexes.iter().any(|existing| existing.name() == index.name()) {
            tracing::debug!("Index {} already exists on {}", index.name(), self.name);
            return Ok(());
        }

        check_unique(&self.name, std::slice::from_ref(index), &data.documents)?;
        data.indexes.push(index.clone());

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docbridge_memory::InMemoryStore;
/// use docbridge::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> AdapterResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn seeded() -> InMemoryCollection {
        let users = InMemoryStore::new().collection("users");
        users
            .insert_batch(vec![
                doc! { "name": "Ada", "age": 36, "email": "ada@example.com" },
                doc! { "name": "Grace", "age": 45 },
                doc! { "name": "Linus", "age": 21, "email": "linus@example.com" },
            ])
            .await
            .unwrap();
        users
    }

    #[tokio::test]
    async fn insert_assigns_identifiers_in_order() {
        let users = InMemoryStore::new().collection("users");
        let outcome = users
            .insert_batch(vec![doc! { "name": "Ada" }, doc! { "name": "Grace" }])
            .await
            .unwrap();

        assert_eq!(outcome.inserted_ids.len(), 2);
        let stored = users.query(doc! {}, QueryOptions::default()).await.unwrap();
        assert_eq!(stored[0].get("_id"), Some(&outcome.inserted_ids[0]));
        assert_eq!(stored[1].get_str("name").unwrap(), "Grace");
    }

    #[tokio::test]
    async fn query_applies_sort_skip_limit_and_projection() {
        let users = seeded().await;
        let options = QueryOptions {
            sort: vec![("age".to_string(), docbridge_core::criteria::SortDirection::Desc)],
            skip: Some(1),
            limit: Some(1),
            projection: Some(doc! { "name": 1 }),
        };

        let found = users.query(doc! {}, options).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("name").unwrap(), "Ada");
        assert!(found[0].contains_key("_id"));
        assert!(!found[0].contains_key("age"));
    }

    #[tokio::test]
    async fn identifier_projection_keeps_only_the_identifier() {
        let users = seeded().await;
        let found = users.query(doc! {}, QueryOptions::identifiers_only()).await.unwrap();

        assert_eq!(found.len(), 3);
        for document in &found {
            assert_eq!(document.keys().collect::<Vec<_>>(), vec!["_id"]);
        }

        let found = users
            .query(doc! { "name": "Ada" }, QueryOptions { projection: Some(doc! { "_id": 0 }), ..Default::default() })
            .await
            .unwrap();
        assert!(!found[0].contains_key("_id"));
        assert!(found[0].contains_key("name"));
    }

    #[tokio::test]
    async fn exclusion_projection_drops_listed_fields() {
        let users = seeded().await;
        let found = users
            .query(doc! { "name": "Ada" }, QueryOptions { projection: Some(doc! { "email": 0 }), ..Default::default() })
            .await
            .unwrap();

        assert!(found[0].contains_key("age"));
        assert!(!found[0].contains_key("email"));
    }

    #[tokio::test]
    async fn bulk_update_and_delete_report_counts() {
        let users = seeded().await;

        let updated = users
            .bulk_update(doc! { "age": { "$gt": 30 } }, doc! { "senior": true })
            .await
            .unwrap();
        assert_eq!(updated, WriteAcknowledgement { acknowledged: true, count: 2 });
        assert_eq!(users.count(doc! { "senior": true }).await.unwrap(), 2);

        let deleted = users.bulk_delete(doc! { "senior": true }).await.unwrap();
        assert_eq!(deleted.count, 2);
        assert_eq!(users.count(doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unique_sparse_index_is_enforced() {
        let users = seeded().await;
        users.create_index(&IndexSpec::single("email", true, true)).await.unwrap();

        let duplicate = users
            .insert_batch(vec![doc! { "name": "Eve", "email": "ada@example.com" }])
            .await;
        assert!(matches!(duplicate, Err(AdapterError::Storage(_))));

        // documents without the field are not indexed
        users.insert_batch(vec![doc! { "name": "Bob" }]).await.unwrap();

        let clash = users
            .bulk_update(doc! { "name": "Linus" }, doc! { "email": "ada@example.com" })
            .await;
        assert!(clash.is_err());
        assert_eq!(users.count(doc! {}).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn creating_an_index_twice_is_a_no_op() {
        let users = seeded().await;
        let index = IndexSpec::single("age", false, true);

        users.create_index(&index).await.unwrap();
        users.create_index(&index).await.unwrap();

        assert_eq!(users.indexes().await, vec![index]);
    }

    #[tokio::test]
    async fn stream_yields_every_match() {
        use futures::TryStreamExt;

        let users = seeded().await;
        let names = users
            .query_stream(doc! { "age": { "$lt": 40 } }, QueryOptions::default())
            .await
            .unwrap()
            .map_ok(|document| document.get_str("name").unwrap().to_string())
            .try_collect::<Vec<_>>()
            .await
            .unwrap();

        assert_eq!(names, vec!["Ada", "Linus"]);
    }

    #[tokio::test]
    async fn unsorted_stream_reads_as_it_is_polled() {
        use futures::StreamExt;

        let users = seeded().await;
        let mut stream = users
            .query_stream(doc! { "age": { "$lt": 40 } }, QueryOptions { skip: Some(1), ..Default::default() })
            .await
            .unwrap();

        users.insert_batch(vec![doc! { "name": "Margaret", "age": 33 }]).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.get_str("name").unwrap(), "Linus");
        assert_eq!(second.get_str("name").unwrap(), "Margaret");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_honours_limit() {
        use futures::TryStreamExt;

        let users = seeded().await;
        let found = users
            .query_stream(doc! {}, QueryOptions { limit: Some(2), ..Default::default() })
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn unique_index_treats_equal_numbers_as_duplicates() {
        let users = InMemoryStore::new().collection("badges");
        users.create_index(&IndexSpec::single("number", true, true)).await.unwrap();
        users.insert_batch(vec![doc! { "number": 3 }]).await.unwrap();

        let duplicate = users.insert_batch(vec![doc! { "number": 3.0 }]).await;
        assert!(matches!(duplicate, Err(AdapterError::Storage(_))));

        users.insert_batch(vec![doc! { "number": 4_i64 }]).await.unwrap();
        assert_eq!(users.count(doc! {}).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn drop_and_list_collections() {
        let store = InMemoryStore::new();
        store.collection("b").insert_batch(vec![doc! {}]).await.unwrap();
        store.collection("a").insert_batch(vec![doc! {}]).await.unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["a", "b"]);

        store.drop_collection("a").await.unwrap();
        store.drop_collection("missing").await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["b"]);
    }
}
