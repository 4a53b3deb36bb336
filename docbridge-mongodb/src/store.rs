use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection as MongoCollection, Database, IndexModel,
    error::{Error as MongoError, ErrorKind},
    options::{ClientOptions, FindOptions, IndexOptions},
};
use docbridge_core::{
    backend::{CollectionHandle, DocumentStream, InsertOutcome, StoreBackend, StoreBackendBuilder, WriteAcknowledgement},
    error::{AdapterError, AdapterResult},
    index::IndexSpec,
    query::QueryOptions,
};

use crate::config::ConnectionConfig;

/// Server error codes for an index that already exists under another name or with other
/// options.
const INDEX_CONFLICT_CODES: [i32; 2] = [85, 86];

/// Server error code for a namespace that does not exist.
const NAMESPACE_NOT_FOUND: i32 = 26;

fn storage(e: MongoError) -> AdapterError {
    AdapterError::Storage(e.to_string())
}

fn command_code(e: &MongoError) -> Option<i32> {
    match e.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn database(&self) -> Database {
        self.client.database(&self.database)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Handle = MongoCollectionHandle;

    fn collection(&self, name: &str) -> Self::Handle {
        MongoCollectionHandle {
            name: name.to_string(),
            collection: self.database().collection(name),
        }
    }

    async fn drop_collection(&self, name: &str) -> AdapterResult<()> {
        match self.database().collection::<Document>(name).drop().await {
            Err(e) if command_code(&e) != Some(NAMESPACE_NOT_FOUND) => Err(storage(e)),
            _ => Ok(()),
        }
    }

    async fn list_collections(&self) -> AdapterResult<Vec<String>> {
        let mut names = self
            .database()
            .list_collection_names()
            .await
            .map_err(storage)?;

        names.sort();
        Ok(names)
    }

    async fn shutdown(self) -> AdapterResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Handle to one MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoCollectionHandle {
    name: String,
    collection: MongoCollection<Document>,
}

impl MongoCollectionHandle {
    /// The driver's collection, for operations the adapter does not cover.
    pub fn inner(&self) -> &MongoCollection<Document> {
        &self.collection
    }
}

fn find_options(options: QueryOptions) -> FindOptions {
    let mut find = FindOptions::default();

    find.sort = options.sort_document();
    find.skip = options.skip;
    find.limit = options
        .limit
        .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
    find.projection = options.projection;

    find
}

fn index_model(index: &IndexSpec) -> IndexModel {
    let keys = index
        .keys
        .iter()
        .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
        .collect::<Document>();

    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(index.name())
                .unique(index.unique)
                .sparse(index.sparse)
                .build(),
        )
        .build()
}

/// Orders driver-reported ids (keyed by batch position) by position.
fn ordered_ids(inserted: impl IntoIterator<Item = (usize, Bson)>) -> Vec<Bson> {
    let mut inserted = inserted.into_iter().collect::<Vec<_>>();
    inserted.sort_by_key(|(position, _)| *position);

    inserted.into_iter().map(|(_, id)| id).collect()
}

#[async_trait]
impl CollectionHandle for MongoCollectionHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, filter: Document, options: QueryOptions) -> AdapterResult<Vec<Document>> {
        self.collection
            .find(filter)
            .with_options(find_options(options))
            .await
            .map_err(storage)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(storage)
    }

    async fn query_stream(&self, filter: Document, options: QueryOptions) -> AdapterResult<DocumentStream> {
        let cursor = self
            .collection
            .find(filter)
            .with_options(find_options(options))
            .await
            .map_err(storage)?;

        Ok(cursor.map_err(storage).boxed())
    }

    async fn run_aggregation(&self, pipeline: Vec<Document>) -> AdapterResult<Vec<Document>> {
        self.collection
            .aggregate(pipeline)
            .await
            .map_err(storage)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(storage)
    }

    async fn insert_batch(&self, documents: Vec<Document>) -> AdapterResult<InsertOutcome> {
        let result = self
            .collection
            .insert_many(documents)
            .await
            .map_err(storage)?;

        Ok(InsertOutcome {
            inserted_ids: ordered_ids(result.inserted_ids),
        })
    }

    async fn bulk_update(&self, filter: Document, set: Document) -> AdapterResult<WriteAcknowledgement> {
        let result = self
            .collection
            .update_many(filter, doc! { "$set": set })
            .await
            .map_err(storage)?;

        Ok(WriteAcknowledgement { acknowledged: true, count: result.matched_count })
    }

    async fn bulk_delete(&self, filter: Document) -> AdapterResult<WriteAcknowledgement> {
        let result = self
            .collection
            .delete_many(filter)
            .await
            .map_err(storage)?;

        Ok(WriteAcknowledgement { acknowledged: true, count: result.deleted_count })
    }

    async fn count(&self, filter: Document) -> AdapterResult<u64> {
        self.collection
            .count_documents(filter)
            .await
            .map_err(storage)
    }

    async fn create_index(&self, index: &IndexSpec) -> AdapterResult<()> {
        match self.collection.create_index(index_model(index)).await {
            Ok(_) => Ok(()),
            Err(e) if command_code(&e).is_some_and(|code| INDEX_CONFLICT_CODES.contains(&code)) => {
                tracing::warn!(
                    "Keeping existing index on {} in place of {}: {}",
                    self.name,
                    index.name(),
                    e
                );
                Ok(())
            }
            Err(e) => Err(storage(e)),
        }
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: Option<String>,
    config: Option<ConnectionConfig>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: Some(database.to_string()),
            config: None,
        }
    }

    /// Builds from connection settings. When `url` is set it decides the database too;
    /// otherwise the database comes from the settings.
    pub fn from_config(config: ConnectionConfig) -> AdapterResult<Self> {
        let database = match config.url {
            Some(_) => None,
            None => config.database.clone(),
        };

        Ok(Self {
            dsn: config.connection_string()?,
            database,
            config: Some(config),
        })
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> AdapterResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| AdapterError::Initialization(e.to_string()))?;

        if let Some(config) = &self.config {
            config.apply(&mut options);
        }

        let database = self
            .database
            .or_else(|| options.default_database.clone())
            .ok_or_else(|| AdapterError::Initialization("no database was configured".to_string()))?;

        tracing::debug!("Connecting to MongoDB database {}", database);

        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| AdapterError::Initialization(e.to_string()))?,
            database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_core::criteria::SortDirection;

    #[test]
    fn find_options_carry_sort_paging_and_projection() {
        let options = find_options(QueryOptions {
            sort: vec![("age".into(), SortDirection::Desc), ("name".into(), SortDirection::Asc)],
            skip: Some(5),
            limit: Some(10),
            projection: Some(doc! { "_id": 1 }),
        });

        assert_eq!(options.sort, Some(doc! { "age": -1, "name": 1 }));
        assert_eq!(options.skip, Some(5));
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.projection, Some(doc! { "_id": 1 }));
    }

    #[test]
    fn empty_options_leave_the_driver_defaults() {
        let options = find_options(QueryOptions::default());

        assert!(options.sort.is_none());
        assert!(options.limit.is_none());
        assert!(options.projection.is_none());
    }

    #[test]
    fn index_models_are_named_unique_and_sparse() {
        let model = index_model(&IndexSpec::single("email", true, true));
        let options = model.options.unwrap();

        assert_eq!(model.keys, doc! { "email": 1 });
        assert_eq!(options.name.as_deref(), Some("email_1"));
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.sparse, Some(true));
    }

    #[test]
    fn url_decides_the_database() {
        let builder = MongoDbStoreBuilder::from_config(ConnectionConfig {
            url: Some("mongodb://cluster.example.net/app".into()),
            database: Some("other".into()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(builder.dsn, "mongodb://cluster.example.net/app");
        assert_eq!(builder.database, None);

        let builder = MongoDbStoreBuilder::from_config(ConnectionConfig {
            database: Some("inventory".into()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(builder.dsn, "mongodb://localhost:27017/inventory");
        assert_eq!(builder.database.as_deref(), Some("inventory"));
    }

    #[test]
    fn inserted_ids_follow_batch_position() {
        let ids = ordered_ids(vec![(2, Bson::Int32(30)), (0, Bson::Int32(10)), (1, Bson::Int32(20))]);

        assert_eq!(ids, vec![Bson::Int32(10), Bson::Int32(20), Bson::Int32(30)]);
    }
}
