//! Schema model for registered collections.
//!
//! A [`Schema`] is parsed once from a [`CollectionDefinition`] when a collection is
//! registered and is read-only afterwards. Parsing folds the relational parts of the
//! definition into what a document store can represent natively:
//!
//! - an integer primary key becomes an `objectid` attribute,
//! - every foreign key becomes an `objectid` attribute,
//! - `autoIncrement` flags are dropped, since the store generates identifiers itself.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};

/// Name of the logical identifier field seen by callers.
pub const ID_FIELD: &str = "id";

/// Name of the store's native identifier field.
pub const NATIVE_ID_FIELD: &str = "_id";

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    #[default]
    String,
    Text,
    Integer,
    Float,
    Number,
    Boolean,
    Date,
    Datetime,
    Binary,
    Array,
    Json,
    /// The store's native identifier type.
    #[serde(alias = "objectId")]
    ObjectId,
    Uuid,
}

/// A single attribute definition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeDescriptor {
    #[serde(rename = "type")]
    pub kind: AttributeType,
    pub primary_key: bool,
    pub foreign_key: bool,
    pub unique: bool,
    #[serde(alias = "index")]
    pub indexed: bool,
    pub auto_increment: bool,
}

impl AttributeDescriptor {
    pub fn new(kind: AttributeType) -> Self {
        Self { kind, ..Default::default() }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn foreign_key(mut self) -> Self {
        self.foreign_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// The caller's description of a collection, as handed over at registration.
///
/// # Example
///
/// ```ignore
/// let definition = CollectionDefinition::from_json(r#"{
///     "identity": "User",
///     "attributes": {
///         "id": { "type": "integer", "primaryKey": true, "autoIncrement": true },
///         "email": { "type": "string", "unique": true },
///         "team": { "type": "integer", "foreignKey": true }
///     }
/// }"#)?;
///
/// assert_eq!(definition.collection_identity(), "user");
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    /// Logical collection name.
    pub identity: String,
    /// Explicit storage name, used verbatim when present.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Attribute definitions in declaration order.
    #[serde(default, alias = "definition")]
    pub attributes: IndexMap<String, AttributeDescriptor>,
}

impl CollectionDefinition {
    pub fn new(identity: impl Into<String>) -> Self {
        Self { identity: identity.into(), ..Default::default() }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: AttributeDescriptor) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    /// Parses a definition from a JSON string.
    pub fn from_json(input: &str) -> AdapterResult<Self> {
        serde_json::from_str(input).map_err(|e| AdapterError::InvalidDefinition(e.to_string()))
    }

    /// Returns the stable storage name for this collection.
    pub fn collection_identity(&self) -> String {
        match &self.table_name {
            Some(table_name) => table_name.clone(),
            None => self.identity.to_lowercase(),
        }
    }
}

/// Normalized, queryable view of a collection's attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    attributes: IndexMap<String, AttributeDescriptor>,
}

impl Schema {
    /// Parses attribute definitions into a schema, applying the native identifier coercions.
    pub fn parse(attributes: &IndexMap<String, AttributeDescriptor>) -> Self {
        let attributes = attributes
            .iter()
            .map(|(name, attribute)| {
                let mut attribute = attribute.clone();

                if attribute.primary_key && attribute.kind == AttributeType::Integer {
                    attribute.kind = AttributeType::ObjectId;
                }
                if attribute.foreign_key {
                    attribute.kind = AttributeType::ObjectId;
                }
                attribute.auto_increment = false;

                (name.clone(), attribute)
            })
            .collect();

        Self { attributes }
    }

    /// Returns the declared primary key, or [`ID_FIELD`] when none is declared.
    ///
    /// If several attributes are marked, the first one declared wins.
    pub fn primary_key_name(&self) -> &str {
        self.attributes
            .iter()
            .find(|(_, attribute)| attribute.primary_key)
            .map(|(name, _)| name.as_str())
            .unwrap_or(ID_FIELD)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.get(name)
    }

    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.attribute(name).map(|attribute| attribute.kind)
    }

    /// Iterates attributes in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeDescriptor)> {
        self.attributes
            .iter()
            .map(|(name, attribute)| (name.as_str(), attribute))
    }

    /// True when values of `field` are stored as native identifiers.
    pub fn is_identifier(&self, field: &str) -> bool {
        field == ID_FIELD
            || field == NATIVE_ID_FIELD
            || self.attribute_type(field) == Some(AttributeType::ObjectId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> CollectionDefinition {
        CollectionDefinition::new("User")
            .with_attribute(
                "id",
                AttributeDescriptor::new(AttributeType::Integer)
                    .primary_key()
                    .auto_increment(),
            )
            .with_attribute("email", AttributeDescriptor::new(AttributeType::String).unique())
            .with_attribute(
                "team",
                AttributeDescriptor::new(AttributeType::Integer).foreign_key(),
            )
            .with_attribute("age", AttributeDescriptor::new(AttributeType::Integer).auto_increment())
    }

    #[test]
    fn integer_primary_key_becomes_native_identifier() {
        let schema = Schema::parse(&definition().attributes);

        assert_eq!(schema.attribute_type("id"), Some(AttributeType::ObjectId));
        assert!(schema.attribute("id").unwrap().primary_key);
    }

    #[test]
    fn foreign_keys_become_native_identifiers() {
        let schema = Schema::parse(&definition().attributes);

        assert_eq!(schema.attribute_type("team"), Some(AttributeType::ObjectId));
        assert!(schema.is_identifier("team"));
        assert!(!schema.is_identifier("email"));
    }

    #[test]
    fn auto_increment_is_stripped_everywhere() {
        let schema = Schema::parse(&definition().attributes);

        assert!(schema.attributes().all(|(_, attribute)| !attribute.auto_increment));
        assert_eq!(schema.attribute_type("age"), Some(AttributeType::Integer));
    }

    #[test]
    fn parse_leaves_the_definition_untouched() {
        let definition = definition();
        let _ = Schema::parse(&definition.attributes);

        assert!(definition.attributes["id"].auto_increment);
        assert_eq!(definition.attributes["team"].kind, AttributeType::Integer);
    }

    #[test]
    fn primary_key_defaults_to_id() {
        let schema = Schema::parse(
            &CollectionDefinition::new("pets")
                .with_attribute("name", AttributeDescriptor::new(AttributeType::String))
                .attributes,
        );

        assert_eq!(schema.primary_key_name(), "id");
    }

    #[test]
    fn first_declared_primary_key_wins() {
        let schema = Schema::parse(
            &CollectionDefinition::new("pets")
                .with_attribute("code", AttributeDescriptor::new(AttributeType::String).primary_key())
                .with_attribute("slug", AttributeDescriptor::new(AttributeType::String).primary_key())
                .attributes,
        );

        assert_eq!(schema.primary_key_name(), "code");
    }

    #[test]
    fn identity_prefers_table_name() {
        assert_eq!(definition().collection_identity(), "user");
        assert_eq!(
            definition().with_table_name("App_Users").collection_identity(),
            "App_Users"
        );
    }

    #[test]
    fn definition_parses_from_json_in_declaration_order() {
        let definition = CollectionDefinition::from_json(
            r#"{
                "identity": "Order",
                "attributes": {
                    "total": { "type": "float", "index": true },
                    "customer": { "type": "integer", "foreignKey": true },
                    "placedAt": { "type": "datetime" }
                }
            }"#,
        )
        .unwrap();

        let names = definition.attributes.keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, vec!["total", "customer", "placedAt"]);
        assert!(definition.attributes["total"].indexed);
        assert_eq!(definition.attributes["placedAt"].kind, AttributeType::Datetime);
    }

    #[test]
    fn malformed_definition_is_rejected() {
        assert!(matches!(
            CollectionDefinition::from_json(r#"{ "identity": "x", "attributes": { "a": { "type": "quantum" } } }"#),
            Err(AdapterError::InvalidDefinition(_))
        ));
    }
}
