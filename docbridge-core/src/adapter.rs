//! The adapter: a backend plus the registry of collections defined on it.

use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};

use crate::{
    backend::StoreBackend,
    collection::Collection,
    config::AdapterConfig,
    error::{AdapterError, AdapterResult},
    schema::CollectionDefinition,
};

type Registry<H> = HashMap<String, Arc<Collection<H>>>;

/// Owns a [`StoreBackend`] and the collections registered against it.
///
/// # Example
///
/// ```ignore
/// use docbridge::{prelude::*, memory::InMemoryStore};
///
/// let adapter = DocumentAdapter::new(InMemoryStore::new(), AdapterConfig::default());
/// let users = adapter
///     .register_collection(CollectionDefinition::from_json(USERS)?)
///     .await?;
///
/// assert!(adapter.collection("users").await.is_ok());
/// adapter.shutdown().await?;
/// ```
#[derive(Debug)]
pub struct DocumentAdapter<B: StoreBackend> {
    backend: B,
    config: AdapterConfig,
    collections: RwLock<Registry<B::Handle>>,
}

impl<B: StoreBackend> DocumentAdapter<B> {
    pub fn new(backend: B, config: AdapterConfig) -> Self {
        Self {
            backend,
            config,
            collections: RwLock::new(Registry::new()),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Registers a collection, replacing any earlier registration with the same identity.
    ///
    /// When [`AdapterConfig::install_indexes`] is set, the derived indexes are created on
    /// the store before the collection is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidDefinition`] if the definition has no identity, or
    /// the store's error if an index cannot be created.
    pub async fn register_collection(
        &self,
        definition: CollectionDefinition,
    ) -> AdapterResult<Arc<Collection<B::Handle>>> {
        let identity = definition.collection_identity();
        if identity.is_empty() {
            return Err(AdapterError::InvalidDefinition(
                "collection definition has no identity".to_string(),
            ));
        }

        let collection = Arc::new(Collection::new(
            &definition,
            self.config.clone(),
            self.backend.collection(&identity),
        ));

        if self.config.install_indexes {
            collection.install_indexes().await?;
        }

        tracing::debug!(
            "Registered collection {} with {} attributes and {} indexes",
            identity,
            definition.attributes.len(),
            collection.indexes().len()
        );

        self.collections
            .write()
            .await
            .insert(identity, collection.clone());

        Ok(collection)
    }

    /// Looks up a registered collection by identity.
    pub async fn collection(&self, identity: &str) -> AdapterResult<Arc<Collection<B::Handle>>> {
        self.collections
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(format!("collection '{}' is not registered", identity)))
    }

    /// Identities of all registered collections, sorted.
    pub async fn collections(&self) -> Vec<String> {
        let mut identities = self
            .collections
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();

        identities.sort();
        identities
    }

    /// Drops a collection from the store and forgets its registration.
    pub async fn drop_collection(&self, identity: &str) -> AdapterResult<()> {
        self.backend.drop_collection(identity).await?;
        self.collections.write().await.remove(identity);

        tracing::debug!("Dropped collection {}", identity);
        Ok(())
    }

    /// Shuts the backend down.
    pub async fn shutdown(self) -> AdapterResult<()> {
        self.backend.shutdown().await
    }
}
