//! Aggregation pipeline evaluation for the in-memory store.
//!
//! Supports the stages the adapter emits (`$match`, `$group`) plus `$sort`, `$skip` and
//! `$limit`. Groups are emitted in order of first appearance.

use std::cmp::Ordering;
use bson::{Bson, Document};

use docbridge_core::error::{AdapterError, AdapterResult};

use crate::evaluator::{Comparable, DocumentEvaluator, compare_values, lookup};

pub(crate) fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> AdapterResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(AdapterError::InvalidCriteria(format!(
                    "pipeline stage must have exactly one operator: {}",
                    stage
                )));
            }
        };

        documents = match (name.as_str(), spec) {
            ("$match", Bson::Document(filter)) => DocumentEvaluator::filter_documents(&documents, filter)?,
            ("$group", Bson::Document(spec)) => group(&documents, spec)?,
            ("$sort", Bson::Document(keys)) => {
                documents.sort_by(|a, b| sort_order(a, b, keys));
                documents
            }
            ("$skip", skip) => documents.into_iter().skip(count(skip)?).collect(),
            ("$limit", limit) => documents.into_iter().take(count(limit)?).collect(),
            (name, _) => {
                return Err(AdapterError::InvalidCriteria(format!(
                    "unsupported pipeline stage '{}'",
                    name
                )));
            }
        };
    }

    Ok(documents)
}

/// Compares two documents by a native sort document.
pub(crate) fn sort_order(a: &Document, b: &Document, keys: &Document) -> Ordering {
    for (field, direction) in keys {
        let ordering = compare_values(lookup(a, field), lookup(b, field));
        let ordering = match direction {
            Bson::Int32(d) if *d < 0 => ordering.reverse(),
            Bson::Int64(d) if *d < 0 => ordering.reverse(),
            _ => ordering,
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn count(value: &Bson) -> AdapterResult<usize> {
    match value {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        other => Err(AdapterError::InvalidCriteria(format!(
            "expected a non-negative count, got {}",
            other
        ))),
    }
}

/// Evaluates `"$field"` references; anything else is a literal.
fn resolve<'d>(document: &'d Document, expression: &'d Bson) -> Option<&'d Bson> {
    match expression {
        Bson::String(path) if path.starts_with('$') => lookup(document, &path[1..]),
        literal => Some(literal),
    }
}

fn group_key(document: &Document, key: &Bson) -> Bson {
    match key {
        Bson::Document(fields) => Bson::Document(
            fields
                .iter()
                .map(|(name, expression)| {
                    (name.clone(), resolve(document, expression).cloned().unwrap_or(Bson::Null))
                })
                .collect(),
        ),
        expression => resolve(document, expression).cloned().unwrap_or(Bson::Null),
    }
}

/// Group keys match the way the store compares values, so `3` and `3.0` share a group.
fn same_key(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

enum Accumulator {
    Sum { int: i64, float: f64, is_float: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
}

impl Accumulator {
    fn new(operator: &str) -> AdapterResult<Self> {
        Ok(match operator {
            "$sum" => Accumulator::Sum { int: 0, float: 0.0, is_float: false },
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            other => {
                return Err(AdapterError::InvalidCriteria(format!(
                    "unsupported accumulator '{}'",
                    other
                )));
            }
        })
    }

    fn add(&mut self, value: Option<&Bson>) {
        match (self, value) {
            (Accumulator::Sum { int, float, is_float }, Some(value)) => {
                let addend = match value {
                    Bson::Int32(n) => *n as i64,
                    Bson::Int64(n) => *n,
                    Bson::Double(n) => {
                        *float += n;
                        *is_float = true;
                        return;
                    }
                    _ => return,
                };

                // Integer overflow promotes the sum to a double.
                match int.checked_add(addend) {
                    Some(sum) => *int = sum,
                    None => {
                        *float += addend as f64;
                        *is_float = true;
                    }
                }
            }
            (Accumulator::Avg { total, count }, Some(value)) => {
                let number = match value {
                    Bson::Int32(n) => *n as f64,
                    Bson::Int64(n) => *n as f64,
                    Bson::Double(n) => *n,
                    _ => return,
                };
                *total += number;
                *count += 1;
            }
            (Accumulator::Min(current), Some(value)) if !matches!(value, Bson::Null) => {
                if current
                    .as_ref()
                    .is_none_or(|current| compare_values(Some(value), Some(current)) == Ordering::Less)
                {
                    *current = Some(value.clone());
                }
            }
            (Accumulator::Max(current), Some(value)) if !matches!(value, Bson::Null) => {
                if current
                    .as_ref()
                    .is_none_or(|current| compare_values(Some(value), Some(current)) == Ordering::Greater)
                {
                    *current = Some(value.clone());
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum { int, float, is_float: true } => Bson::Double(int as f64 + float),
            Accumulator::Sum { int, .. } => match i32::try_from(int) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(int),
            },
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(value) | Accumulator::Max(value) => value.unwrap_or(Bson::Null),
        }
    }
}

fn group(documents: &[Document], spec: &Document) -> AdapterResult<Vec<Document>> {
    let key = spec.get("_id").ok_or_else(|| {
        AdapterError::InvalidCriteria("$group requires an _id expression".to_string())
    })?;

    let outputs = spec
        .iter()
        .filter(|(name, _)| name.as_str() != "_id")
        .map(|(name, accumulator)| match accumulator {
            Bson::Document(accumulator) if accumulator.len() == 1 => {
                let (operator, expression) = accumulator.iter().next().ok_or_else(|| {
                    AdapterError::InvalidCriteria(format!("empty accumulator for '{}'", name))
                })?;
                Ok((name.clone(), operator.clone(), expression.clone()))
            }
            other => Err(AdapterError::InvalidCriteria(format!(
                "invalid accumulator for '{}': {}",
                name, other
            ))),
        })
        .collect::<AdapterResult<Vec<_>>>()?;

    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();

    for document in documents {
        let key = group_key(document, key);
        let position = match groups.iter().position(|(existing, _)| same_key(existing, &key)) {
            Some(position) => position,
            None => {
                let accumulators = outputs
                    .iter()
                    .map(|(_, operator, _)| Accumulator::new(operator))
                    .collect::<AdapterResult<Vec<_>>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };

        for ((_, _, expression), accumulator) in outputs.iter().zip(groups[position].1.iter_mut()) {
            accumulator.add(resolve(document, expression));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut row = Document::new();
            row.insert("_id", key);
            for ((name, _, _), accumulator) in outputs.iter().zip(accumulators) {
                row.insert(name.clone(), accumulator.finish());
            }
            row
        })
        .collect())
}
