//! Native filter evaluation for in-memory document filtering.
//!
//! Filters arrive already compiled into the store's native form (`{ age: { $gt: 18 } }`,
//! `{ $or: [...] }`, ...). This module evaluates that form against stored documents
//! following the usual document-store rules: a missing field only equals null, and a
//! comparison against an array field matches when any element matches.

use std::{cmp::Ordering, collections::HashMap};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use docbridge_core::error::{AdapterError, AdapterResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `Int32(3)` and `Double(3.0)` compare
/// equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    /// All integers and floats normalized to f64
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Binary(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(binary) => Comparable::Binary(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl Comparable<'_> {
    /// Cross-type ordering rank, so mixed-type sorts are stable.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Binary(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    /// Only values of the same kind are ordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Total order used for sorting and for `$min`/`$max`. Missing sorts as null.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    left.partial_cmp(&right)
        .unwrap_or_else(|| left.rank().cmp(&right.rank()))
}

/// Resolves a possibly dotted field path.
pub(crate) fn lookup<'d>(document: &'d Document, path: &str) -> Option<&'d Bson> {
    match path.split_once('.') {
        Some((head, rest)) => match document.get(head) {
            Some(Bson::Document(inner)) => lookup(inner, rest),
            _ => None,
        },
        None => document.get(path),
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Evaluates a native filter. An empty filter matches everything.
    pub fn evaluate(&self, filter: &Document) -> AdapterResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all(condition)?,
                "$or" => self.any(condition)?,
                "$nor" => !self.any(condition)?,
                op if op.starts_with('$') => {
                    return Err(AdapterError::InvalidCriteria(format!(
                        "unsupported top-level operator '{}'",
                        op
                    )));
                }
                field => matches_condition(lookup(self.document, field), condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn branches<'f>(condition: &'f Bson) -> AdapterResult<impl Iterator<Item = &'f Document>> {
        match condition {
            Bson::Array(branches) => Ok(branches.iter().filter_map(Bson::as_document)),
            other => Err(AdapterError::InvalidCriteria(format!(
                "logical operator requires a list, got {}",
                other
            ))),
        }
    }

    fn all(&self, condition: &Bson) -> AdapterResult<bool> {
        for branch in Self::branches(condition)? {
            if !self.evaluate(branch)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any(&self, condition: &Bson) -> AdapterResult<bool> {
        for branch in Self::branches(condition)? {
            if self.evaluate(branch)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> AdapterResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(ops) if ops.keys().next().is_some_and(|key| key.starts_with('$')) => Some(ops),
        _ => None,
    }
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> AdapterResult<bool> {
    match is_operator_document(condition) {
        Some(ops) => matches_operators(value, ops),
        None => Ok(equals(value, condition)),
    }
}

fn matches_operators(value: Option<&Bson>, ops: &Document) -> AdapterResult<bool> {
    for (op, operand) in ops {
        let matched = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compares(value, operand, |o| o == Ordering::Greater),
            "$gte" => compares(value, operand, |o| o != Ordering::Less),
            "$lt" => compares(value, operand, |o| o == Ordering::Less),
            "$lte" => compares(value, operand, |o| o != Ordering::Greater),
            "$in" => one_of(value, operand)?,
            "$nin" => !one_of(value, operand)?,
            "$exists" => value.is_some() == matches!(operand, Bson::Boolean(true)),
            "$regex" => regex_matches(value, operand, ops.get_str("$options").unwrap_or(""))?,
            "$options" => true,
            "$not" => match operand {
                Bson::Document(inner) => !matches_operators(value, inner)?,
                other => {
                    return Err(AdapterError::InvalidCriteria(format!(
                        "$not requires an operator document, got {}",
                        other
                    )));
                }
            },
            other => {
                return Err(AdapterError::InvalidCriteria(format!(
                    "unsupported operator '{}'",
                    other
                )));
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality with array-any semantics. A missing field equals null.
fn equals(value: Option<&Bson>, operand: &Bson) -> bool {
    let expected = Comparable::from(operand);

    match value {
        None => expected == Comparable::Null,
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => {
            items.iter().any(|item| Comparable::from(item) == expected)
        }
        Some(value) => Comparable::from(value) == expected,
    }
}

fn compares(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);
    let check = |item: &Bson| {
        Comparable::from(item)
            .partial_cmp(&expected)
            .is_some_and(&accept)
    };

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn one_of(value: Option<&Bson>, operand: &Bson) -> AdapterResult<bool> {
    match operand {
        Bson::Array(candidates) => Ok(candidates.iter().any(|candidate| equals(value, candidate))),
        other => Err(AdapterError::InvalidCriteria(format!(
            "$in/$nin require a list, got {}",
            other
        ))),
    }
}

fn regex_matches(value: Option<&Bson>, pattern: &Bson, options: &str) -> AdapterResult<bool> {
    let pattern = match pattern {
        Bson::String(pattern) => pattern,
        other => {
            return Err(AdapterError::InvalidCriteria(format!(
                "$regex requires a pattern, got {}",
                other
            )));
        }
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|e| AdapterError::InvalidCriteria(format!("invalid regex '{}': {}", pattern, e)))?;

    Ok(match value {
        Some(Bson::String(s)) => regex.is_match(s),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if regex.is_match(s))),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: Document, filter: Document) -> bool {
        DocumentEvaluator::new(&document).evaluate(&filter).unwrap()
    }

    #[test]
    fn comparison_operators() {
        let person = doc! { "name": "Ada", "age": 36 };

        assert!(matches(person.clone(), doc! { "age": { "$gt": 18 } }));
        assert!(matches(person.clone(), doc! { "age": { "$gte": 36.0 } }));
        assert!(!matches(person.clone(), doc! { "age": { "$lt": 36 } }));
        assert!(matches(person.clone(), doc! { "name": { "$ne": "Grace" } }));
        assert!(!matches(person, doc! { "age": { "$gt": "18" } }));
    }

    #[test]
    fn logical_operators_nest() {
        let person = doc! { "name": "Ada", "age": 36 };

        assert!(matches(
            person.clone(),
            doc! { "$or": [{ "age": { "$eq": 18 } }, { "$and": [{ "name": "Ada" }, { "age": 36 }] }] }
        ));
        assert!(!matches(person, doc! { "$nor": [{ "name": { "$eq": "Ada" } }] }));
    }

    #[test]
    fn missing_fields_only_equal_null() {
        let person = doc! { "name": "Ada" };

        assert!(matches(person.clone(), doc! { "age": Bson::Null }));
        assert!(matches(person.clone(), doc! { "age": { "$ne": 3 } }));
        assert!(!matches(person.clone(), doc! { "age": { "$gt": 3 } }));
        assert!(matches(person, doc! { "age": { "$exists": false } }));
    }

    #[test]
    fn arrays_match_any_element() {
        let post = doc! { "tags": ["rust", "db"] };

        assert!(matches(post.clone(), doc! { "tags": "db" }));
        assert!(matches(post.clone(), doc! { "tags": { "$in": ["go", "rust"] } }));
        assert!(!matches(post, doc! { "tags": { "$nin": ["db"] } }));
    }

    #[test]
    fn regex_honours_options() {
        let person = doc! { "name": "Ada Lovelace" };

        assert!(matches(person.clone(), doc! { "name": { "$regex": "^ada", "$options": "i" } }));
        assert!(!matches(person.clone(), doc! { "name": { "$regex": "^ada" } }));
        assert!(matches(person, doc! { "name": { "$not": { "$regex": "^Grace" } } }));
    }

    #[test]
    fn object_ids_compare_by_value() {
        let oid = ObjectId::new();

        assert!(matches(doc! { "_id": oid }, doc! { "_id": { "$in": [oid] } }));
        assert!(!matches(doc! { "_id": oid }, doc! { "_id": oid.to_hex() }));
    }

    #[test]
    fn dotted_paths_reach_into_subdocuments() {
        assert!(matches(
            doc! { "address": { "city": "Paris" } },
            doc! { "address.city": "Paris" }
        ));
    }

    #[test]
    fn unknown_operators_are_errors() {
        let document = doc! { "a": 1 };

        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "a": { "$near": 1 } }).is_err());
        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "$where": "1" }).is_err());
    }

    #[test]
    fn mixed_types_sort_by_rank() {
        assert_eq!(compare_values(None, Some(&Bson::Int32(1))), Ordering::Less);
        assert_eq!(compare_values(Some(&Bson::String("a".into())), Some(&Bson::Int32(1))), Ordering::Greater);
        assert_eq!(compare_values(Some(&Bson::Int32(2)), Some(&Bson::Double(2.0))), Ordering::Equal);
    }
}
