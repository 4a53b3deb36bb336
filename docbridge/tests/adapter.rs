use docbridge::{
    bson::doc,
    index::IndexSpec,
    memory::InMemoryStore,
    prelude::*,
};

const USERS: &str = r#"{
    "identity": "User",
    "attributes": {
        "id": { "type": "integer", "primaryKey": true, "autoIncrement": true },
        "email": { "type": "string", "unique": true },
        "team": { "type": "integer", "foreignKey": true, "index": true },
        "name": { "type": "string" }
    }
}"#;

#[tokio::test]
async fn registration_installs_derived_indexes() {
    let store = InMemoryStore::new();
    let adapter = DocumentAdapter::new(&store, AdapterConfig::default());

    let users = adapter
        .register_collection(CollectionDefinition::from_json(USERS).unwrap())
        .await
        .unwrap();

    assert_eq!(users.identity(), "user");
    assert_eq!(
        users.native().indexes().await,
        vec![IndexSpec::single("email", true, true), IndexSpec::single("team", false, true)]
    );
    assert_eq!(store.list_collections().await.unwrap(), vec!["user".to_string()]);
}

#[tokio::test]
async fn registration_can_skip_index_installation() {
    let config = AdapterConfig::from_json(r#"{ "installIndexes": false }"#).unwrap();
    let adapter = DocumentAdapter::new(InMemoryStore::new(), config);

    let users = adapter
        .register_collection(CollectionDefinition::from_json(USERS).unwrap())
        .await
        .unwrap();

    assert!(users.native().indexes().await.is_empty());
    assert_eq!(users.indexes().len(), 2);
}

#[tokio::test]
async fn registering_twice_is_harmless() {
    let adapter = DocumentAdapter::new(InMemoryStore::new(), AdapterConfig::default());

    for _ in 0..2 {
        adapter
            .register_collection(CollectionDefinition::from_json(USERS).unwrap())
            .await
            .unwrap();
    }

    let users = adapter.collection("user").await.unwrap();
    assert_eq!(users.native().indexes().await.len(), 2);
    assert_eq!(adapter.collections().await, vec!["user".to_string()]);
}

#[tokio::test]
async fn definitions_without_identity_are_rejected() {
    let adapter = DocumentAdapter::new(InMemoryStore::new(), AdapterConfig::default());

    let result = adapter.register_collection(CollectionDefinition::new("")).await;

    assert!(matches!(result, Err(AdapterError::InvalidDefinition(_))));
}

#[tokio::test]
async fn table_name_overrides_identity() {
    let adapter = DocumentAdapter::new(InMemoryStore::new(), AdapterConfig::default());

    adapter
        .register_collection(CollectionDefinition::new("Person").with_table_name("People"))
        .await
        .unwrap();

    assert!(adapter.collection("People").await.is_ok());
    assert!(matches!(adapter.collection("person").await, Err(AdapterError::NotFound(_))));
}

#[tokio::test]
async fn registered_collections_share_the_store() {
    let adapter = DocumentAdapter::new(InMemoryStore::new(), AdapterConfig::default());
    let registered = adapter
        .register_collection(CollectionDefinition::from_json(USERS).unwrap())
        .await
        .unwrap();

    registered
        .insert(doc! { "email": "ada@example.com", "name": "Ada" })
        .await
        .unwrap();

    let looked_up = adapter.collection("user").await.unwrap();
    let found = looked_up
        .find(&Criteria::parse(&doc! { "where": { "email": { "contains": "ada" } } }).unwrap())
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_str("name").unwrap(), "Ada");
}

#[tokio::test]
async fn dropping_forgets_the_collection() {
    let store = InMemoryStore::new();
    let adapter = DocumentAdapter::new(&store, AdapterConfig::default());
    let users = adapter
        .register_collection(CollectionDefinition::from_json(USERS).unwrap())
        .await
        .unwrap();
    users.insert(doc! { "email": "ada@example.com" }).await.unwrap();

    adapter.drop_collection("user").await.unwrap();

    assert!(adapter.collections().await.is_empty());
    assert!(store.list_collections().await.unwrap().is_empty());
    assert!(matches!(adapter.collection("user").await, Err(AdapterError::NotFound(_))));

    adapter.drop_collection("user").await.unwrap();
    adapter.shutdown().await.unwrap();
}
