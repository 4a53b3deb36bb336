//! Schema-driven conversion between logical and physical documents.
//!
//! Callers see *logical* documents: the identifier lives in `id` and identifiers are hex
//! strings. The store holds *physical* documents: the identifier lives in `_id` and
//! identifiers (including foreign keys) are native `ObjectId`s. [`DocumentCodec`] is the
//! only place that crosses this boundary.
//!
//! Besides identifiers, the codec coerces `date`/`datetime` attributes between RFC 3339
//! strings and BSON datetimes, and `uuid` attributes between hyphenated strings and BSON
//! UUID binaries. Fields not declared in the schema pass through unchanged.

use bson::{Binary, Bson, DateTime, Document, Uuid, oid::ObjectId, spec::BinarySubtype};
use chrono::{NaiveDate, SecondsFormat};

use crate::{
    error::{AdapterError, AdapterResult},
    schema::{AttributeType, ID_FIELD, NATIVE_ID_FIELD, Schema},
};

/// Converts a caller-supplied identifier into the native identifier representation.
///
/// Hex strings become `ObjectId`s, arrays are converted element-wise and nulls are kept
/// so optional foreign keys can be cleared.
pub fn parse_identifier(value: &Bson) -> AdapterResult<Bson> {
    match value {
        Bson::ObjectId(_) | Bson::Null => Ok(value.clone()),
        Bson::String(s) => ObjectId::parse_str(s)
            .map(Bson::ObjectId)
            .map_err(|_| AdapterError::InvalidIdentifier(format!("'{}' is not a valid identifier", s))),
        Bson::Array(values) => Ok(Bson::Array(
            values
                .iter()
                .map(parse_identifier)
                .collect::<AdapterResult<Vec<_>>>()?,
        )),
        other => Err(AdapterError::InvalidIdentifier(format!(
            "{} cannot be used as an identifier",
            other
        ))),
    }
}

/// Renders a native identifier in its external string form. Other values are returned as-is.
pub fn render_identifier(value: Bson) -> Bson {
    match value {
        Bson::ObjectId(oid) => Bson::String(oid.to_hex()),
        Bson::Array(values) => Bson::Array(values.into_iter().map(render_identifier).collect()),
        other => other,
    }
}

/// Coerces a value destined for `kind` into its physical representation.
pub fn encode_value(kind: AttributeType, value: Bson) -> AdapterResult<Bson> {
    match kind {
        AttributeType::ObjectId => parse_identifier(&value),
        AttributeType::Date | AttributeType::Datetime => encode_datetime(value),
        AttributeType::Uuid => encode_uuid(value),
        _ => Ok(value),
    }
}

fn encode_datetime(value: Bson) -> AdapterResult<Bson> {
    match value {
        Bson::String(s) => {
            if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(&s) {
                return Ok(Bson::DateTime(DateTime::from_chrono(parsed)));
            }

            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|midnight| Bson::DateTime(DateTime::from_chrono(midnight.and_utc())))
                .ok_or_else(|| AdapterError::InvalidDocument(format!("'{}' is not a valid date", s)))
        }
        Bson::Int64(millis) => Ok(Bson::DateTime(DateTime::from_millis(millis))),
        other @ (Bson::DateTime(_) | Bson::Null) => Ok(other),
        other => Err(AdapterError::InvalidDocument(format!("{} is not a valid date", other))),
    }
}

fn encode_uuid(value: Bson) -> AdapterResult<Bson> {
    match value {
        Bson::String(s) => Uuid::parse_str(&s)
            .map(|uuid| Bson::Binary(Binary::from_uuid(uuid)))
            .map_err(|_| AdapterError::InvalidDocument(format!("'{}' is not a valid uuid", s))),
        other @ (Bson::Binary(_) | Bson::Null) => Ok(other),
        other => Err(AdapterError::InvalidDocument(format!("{} is not a valid uuid", other))),
    }
}

fn decode_value(kind: AttributeType, value: Bson) -> Bson {
    match (kind, value) {
        (AttributeType::ObjectId, value) => render_identifier(value),
        (AttributeType::Datetime, Bson::DateTime(dt)) => {
            Bson::String(dt.to_chrono().to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        (AttributeType::Date, Bson::DateTime(dt)) => {
            Bson::String(dt.to_chrono().format("%Y-%m-%d").to_string())
        }
        (AttributeType::Uuid, Bson::Binary(binary)) if binary.subtype == BinarySubtype::Uuid => {
            match binary.to_uuid() {
                Ok(uuid) => Bson::String(uuid.to_string()),
                Err(_) => Bson::Binary(binary),
            }
        }
        (_, value) => value,
    }
}

/// Schema-bound document encoder/decoder.
#[derive(Debug, Clone, Copy)]
pub struct DocumentCodec<'a> {
    schema: &'a Schema,
}

impl<'a> DocumentCodec<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Encodes logical values into a physical document.
    ///
    /// `id` is moved to `_id`; a null `id` is dropped so the store assigns one.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidIdentifier`] if an identifier value cannot be parsed,
    /// or [`AdapterError::InvalidDocument`] for unparsable dates and UUIDs.
    pub fn encode(&self, values: Document) -> AdapterResult<Document> {
        let mut encoded = Document::new();

        for (key, value) in values {
            if key == ID_FIELD || key == NATIVE_ID_FIELD {
                if value != Bson::Null {
                    encoded.insert(NATIVE_ID_FIELD, parse_identifier(&value)?);
                }
                continue;
            }

            let value = match self.schema.attribute_type(&key) {
                Some(kind) => encode_value(kind, value)?,
                None => value,
            };
            encoded.insert(key, value);
        }

        Ok(encoded)
    }

    /// Decodes physical documents into logical ones.
    pub fn decode(&self, documents: Vec<Document>) -> Vec<Document> {
        documents
            .into_iter()
            .map(|document| self.decode_document(document))
            .collect()
    }

    /// Decodes a single physical document.
    ///
    /// A document without `_id` is passed through without identifier rewriting.
    pub fn decode_document(&self, document: Document) -> Document {
        let mut decoded = Document::new();

        for (key, value) in document {
            if key == NATIVE_ID_FIELD {
                decoded.insert(ID_FIELD, render_identifier(value));
                continue;
            }

            let value = match self.schema.attribute_type(&key) {
                Some(kind) => decode_value(kind, value),
                None => value,
            };
            decoded.insert(key, value);
        }

        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDescriptor, CollectionDefinition};
    use bson::doc;

    fn schema() -> Schema {
        Schema::parse(
            &CollectionDefinition::new("pets")
                .with_attribute("id", AttributeDescriptor::new(AttributeType::Integer).primary_key())
                .with_attribute("name", AttributeDescriptor::new(AttributeType::String))
                .with_attribute("owner", AttributeDescriptor::new(AttributeType::Integer).foreign_key())
                .with_attribute("born", AttributeDescriptor::new(AttributeType::Datetime))
                .with_attribute("vaccinated", AttributeDescriptor::new(AttributeType::Date))
                .with_attribute("chip", AttributeDescriptor::new(AttributeType::Uuid))
                .attributes,
        )
    }

    const OWNER: &str = "64b7f0a2c3d4e5f601234567";
    const PET: &str = "64b7f0a2c3d4e5f6012345ff";

    #[test]
    fn encode_moves_id_and_parses_identifiers() {
        let schema = schema();
        let encoded = DocumentCodec::new(&schema)
            .encode(doc! { "id": PET, "name": "Rex", "owner": OWNER })
            .unwrap();

        assert_eq!(encoded.get("_id"), Some(&Bson::ObjectId(ObjectId::parse_str(PET).unwrap())));
        assert_eq!(encoded.get("owner"), Some(&Bson::ObjectId(ObjectId::parse_str(OWNER).unwrap())));
        assert!(encoded.get("id").is_none());
        assert_eq!(encoded.get_str("name").unwrap(), "Rex");
    }

    #[test]
    fn encode_passes_unknown_fields_through() {
        let schema = schema();
        let encoded = DocumentCodec::new(&schema)
            .encode(doc! { "nickname": "rexy", "tags": ["a", "b"] })
            .unwrap();

        assert_eq!(encoded, doc! { "nickname": "rexy", "tags": ["a", "b"] });
    }

    #[test]
    fn encode_drops_null_id_and_keeps_null_foreign_key() {
        let schema = schema();
        let encoded = DocumentCodec::new(&schema)
            .encode(doc! { "id": Bson::Null, "owner": Bson::Null })
            .unwrap();

        assert_eq!(encoded, doc! { "owner": Bson::Null });
    }

    #[test]
    fn encode_rejects_unparsable_identifiers() {
        let schema = schema();
        let codec = DocumentCodec::new(&schema);

        assert!(matches!(
            codec.encode(doc! { "owner": "not-an-id" }),
            Err(AdapterError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            codec.encode(doc! { "id": 42 }),
            Err(AdapterError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn encode_rejects_unparsable_dates() {
        let schema = schema();

        assert!(matches!(
            DocumentCodec::new(&schema).encode(doc! { "born": "yesterday" }),
            Err(AdapterError::InvalidDocument(_))
        ));
    }

    #[test]
    fn decode_renames_native_identifier() {
        let schema = schema();
        let oid = ObjectId::parse_str(PET).unwrap();
        let decoded = DocumentCodec::new(&schema).decode(vec![doc! { "_id": oid, "name": "Rex" }]);

        assert_eq!(decoded, vec![doc! { "id": PET, "name": "Rex" }]);
    }

    #[test]
    fn decode_of_nothing_is_nothing() {
        let schema = schema();

        assert!(DocumentCodec::new(&schema).decode(vec![]).is_empty());
    }

    #[test]
    fn decode_without_native_identifier_passes_through() {
        let schema = schema();
        let decoded = DocumentCodec::new(&schema).decode(vec![doc! { "name": "Rex" }]);

        assert_eq!(decoded, vec![doc! { "name": "Rex" }]);
    }

    #[test]
    fn round_trip_preserves_logical_values() {
        let schema = schema();
        let codec = DocumentCodec::new(&schema);
        let logical = doc! {
            "id": PET,
            "name": "Rex",
            "owner": OWNER,
            "born": "2020-01-02T03:04:05Z",
            "vaccinated": "2021-06-30",
            "chip": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "extra": { "nested": true },
        };

        let physical = codec.encode(logical.clone()).unwrap();
        assert!(matches!(physical.get("born"), Some(Bson::DateTime(_))));
        assert!(matches!(physical.get("chip"), Some(Bson::Binary(_))));

        assert_eq!(codec.decode_document(physical), logical);
    }

    #[test]
    fn identifier_arrays_convert_element_wise() {
        let parsed = parse_identifier(&Bson::Array(vec![OWNER.into(), PET.into()])).unwrap();

        assert_eq!(render_identifier(parsed), Bson::Array(vec![OWNER.into(), PET.into()]));
    }
}
