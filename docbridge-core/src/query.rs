//! Criteria compilation into the store's native query language.
//!
//! [`CriteriaTranslator`] walks a [`Criteria`] and produces a [`CompiledQuery`]: a native
//! filter document, query options, and for grouped criteria a `[$match, $group]`
//! pipeline. Compilation is pure and deterministic, so the same criteria and schema
//! always compile to the same query.

use bson::{Bson, Document, doc};

use crate::{
    codec::{encode_value, parse_identifier},
    config::AdapterConfig,
    criteria::{Accumulator, Aggregate, Criteria, Expr, FieldOp, MutationCriteria, Projection, QueryVisitor, SortDirection},
    error::{AdapterError, AdapterResult},
    schema::{AttributeType, ID_FIELD, NATIVE_ID_FIELD, Schema},
};

/// Options applied to a plain (non-aggregate) query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOptions {
    /// Sort keys in priority order.
    pub sort: Vec<(String, SortDirection)>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// `None` returns every field.
    pub projection: Option<Document>,
}

impl QueryOptions {
    /// Options that select only the native identifier.
    pub fn identifiers_only() -> Self {
        Self {
            projection: Some(doc! { NATIVE_ID_FIELD: 1 }),
            ..Default::default()
        }
    }

    /// Sort keys as a native sort document, if any are set.
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }

        Some(
            self.sort
                .iter()
                .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
                .collect(),
        )
    }
}

/// The native form of a [`Criteria`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledQuery {
    pub filter: Document,
    pub options: QueryOptions,
    /// Present when the criteria asked for grouped results.
    pub pipeline: Option<Vec<Document>>,
}

impl CompiledQuery {
    pub fn is_aggregate(&self) -> bool {
        self.pipeline.is_some()
    }
}

/// Compiles criteria against a collection's schema.
#[derive(Debug, Clone, Copy)]
pub struct CriteriaTranslator<'a> {
    schema: &'a Schema,
    config: &'a AdapterConfig,
}

impl<'a> CriteriaTranslator<'a> {
    pub fn new(schema: &'a Schema, config: &'a AdapterConfig) -> Self {
        Self { schema, config }
    }

    /// Compiles a full criteria.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidCriteria`] for conflicting aggregate outputs or
    /// unusable literals, and [`AdapterError::InvalidIdentifier`] when an identifier
    /// literal cannot be parsed.
    pub fn compile(&self, criteria: &Criteria) -> AdapterResult<CompiledQuery> {
        let filter = self.compile_expr(criteria.filter.as_ref())?;

        let pipeline = match &criteria.aggregate {
            Some(aggregate) => {
                let group = self.group_stage(aggregate)?;
                Some(vec![doc! { "$match": filter.clone() }, doc! { "$group": group }])
            }
            None => None,
        };

        let options = QueryOptions {
            sort: criteria
                .sort
                .iter()
                .map(|sort| (native_field(&sort.field), sort.direction))
                .collect(),
            skip: criteria.skip,
            limit: criteria.limit,
            projection: match &criteria.projection {
                Projection::All => None,
                Projection::Include(fields) => Some(projection(fields, 1)),
                Projection::Exclude(fields) => Some(projection(fields, 0)),
            },
        };

        Ok(CompiledQuery { filter, options, pipeline })
    }

    /// Compiles the filter of a mutation criteria.
    pub fn compile_filter(&self, criteria: &MutationCriteria) -> AdapterResult<Document> {
        self.compile_expr(criteria.filter.as_ref())
    }

    fn compile_expr(&self, expr: Option<&Expr>) -> AdapterResult<Document> {
        match expr {
            Some(expr) => FilterCompiler { translator: *self }.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    fn group_stage(&self, aggregate: &Aggregate) -> AdapterResult<Document> {
        let key = if aggregate.group_by.is_empty() {
            Bson::Null
        } else {
            Bson::Document(
                aggregate
                    .group_by
                    .iter()
                    .map(|field| (field.clone(), Bson::String(format!("${}", native_field(field)))))
                    .collect(),
            )
        };

        let mut group = doc! { NATIVE_ID_FIELD: key };

        for accumulator in &aggregate.accumulators {
            let output = accumulator.output_field();
            if group.contains_key(output) || aggregate.group_by.iter().any(|field| field == output) {
                return Err(AdapterError::InvalidCriteria(format!(
                    "aggregate output '{}' is requested more than once",
                    output
                )));
            }

            let operation = match accumulator {
                Accumulator::Count => doc! { "$sum": 1 },
                Accumulator::Sum(field) => doc! { "$sum": format!("${}", native_field(field)) },
                Accumulator::Average(field) => doc! { "$avg": format!("${}", native_field(field)) },
                Accumulator::Min(field) => doc! { "$min": format!("${}", native_field(field)) },
                Accumulator::Max(field) => doc! { "$max": format!("${}", native_field(field)) },
            };
            group.insert(output, operation);
        }

        Ok(group)
    }

    /// Converts a comparison literal into the representation stored for `field`.
    fn encode_operand(&self, field: &str, value: &Bson) -> AdapterResult<Bson> {
        if self.schema.is_identifier(field) {
            return parse_identifier(value);
        }

        let kind = match self.schema.attribute_type(field) {
            Some(kind @ (AttributeType::Date | AttributeType::Datetime | AttributeType::Uuid)) => kind,
            _ => return Ok(value.clone()),
        };

        let encoded = match value {
            Bson::Array(items) => items
                .iter()
                .map(|item| encode_value(kind, item.clone()))
                .collect::<AdapterResult<Vec<_>>>()
                .map(Bson::Array),
            other => encode_value(kind, other.clone()),
        };

        encoded.map_err(|e| match e {
            AdapterError::InvalidDocument(message) => AdapterError::InvalidCriteria(message),
            other => other,
        })
    }

    fn regex(&self, pattern: String) -> Document {
        let mut regex = doc! { "$regex": pattern };
        if !self.config.case_sensitive {
            regex.insert("$options", "i");
        }
        regex
    }
}

struct FilterCompiler<'a> {
    translator: CriteriaTranslator<'a>,
}

impl FilterCompiler<'_> {
    fn visit_all(&mut self, exprs: &[Expr]) -> AdapterResult<Vec<Document>> {
        if exprs.is_empty() {
            return Err(AdapterError::InvalidCriteria(
                "logical combinator without operands".to_string(),
            ));
        }

        exprs.iter().map(|expr| self.visit_expr(expr)).collect()
    }

    fn string_operand<'v>(op: &FieldOp, field: &str, value: &'v Bson) -> AdapterResult<&'v str> {
        match value {
            Bson::String(s) => Ok(s),
            other => Err(AdapterError::InvalidCriteria(format!(
                "{:?} on '{}' requires a string, got {}",
                op, field, other
            ))),
        }
    }
}

impl QueryVisitor for FilterCompiler<'_> {
    type Output = Document;
    type Error = AdapterError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$and": self.visit_all(exprs)? })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$or": self.visit_all(exprs)? })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        let negated = self.visit_expr(expr)?;
        Ok(doc! { "$nor": [negated] })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let translator = self.translator;
        let folds_case = !translator.config.case_sensitive
            && !translator.schema.is_identifier(field)
            && matches!(
                translator.schema.attribute_type(field),
                None | Some(AttributeType::String | AttributeType::Text)
            );

        let condition = match op {
            FieldOp::Eq => match value {
                Bson::String(s) if folds_case => translator.regex(format!("^{}$", regex::escape(s))),
                _ => doc! { "$eq": translator.encode_operand(field, value)? },
            },
            FieldOp::Ne => match value {
                Bson::String(s) if folds_case => {
                    doc! { "$not": translator.regex(format!("^{}$", regex::escape(s))) }
                }
                _ => doc! { "$ne": translator.encode_operand(field, value)? },
            },
            FieldOp::Gt => doc! { "$gt": translator.encode_operand(field, value)? },
            FieldOp::Gte => doc! { "$gte": translator.encode_operand(field, value)? },
            FieldOp::Lt => doc! { "$lt": translator.encode_operand(field, value)? },
            FieldOp::Lte => doc! { "$lte": translator.encode_operand(field, value)? },
            FieldOp::AnyOf | FieldOp::NoneOf => {
                if !matches!(value, Bson::Array(_)) {
                    return Err(AdapterError::InvalidCriteria(format!(
                        "{:?} on '{}' requires a list, got {}",
                        op, field, value
                    )));
                }

                let key = if *op == FieldOp::AnyOf { "$in" } else { "$nin" };
                let operand = translator.encode_operand(field, value)?;
                doc! { key: operand }
            }
            FieldOp::Like => translator.regex(like_to_regex(Self::string_operand(op, field, value)?)),
            FieldOp::Contains => translator.regex(regex::escape(Self::string_operand(op, field, value)?)),
            FieldOp::StartsWith => {
                translator.regex(format!("^{}", regex::escape(Self::string_operand(op, field, value)?)))
            }
            FieldOp::EndsWith => {
                translator.regex(format!("{}$", regex::escape(Self::string_operand(op, field, value)?)))
            }
            FieldOp::Matches => translator.regex(Self::string_operand(op, field, value)?.to_string()),
        };

        let native = native_field(field);
        Ok(doc! { native: condition })
    }
}

/// Maps the logical identifier to the native one; other names are unchanged.
pub fn native_field(field: &str) -> String {
    if field == ID_FIELD {
        NATIVE_ID_FIELD.to_string()
    } else {
        field.to_string()
    }
}

fn projection(fields: &[String], flag: i32) -> Document {
    fields
        .iter()
        .map(|field| (native_field(field), Bson::Int32(flag)))
        .collect()
}

/// Converts a SQL-style `like` pattern into an anchored regular expression.
fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');

    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }

    regex.push('$');
    regex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        criteria::Filter,
        schema::{AttributeDescriptor, CollectionDefinition},
    };
    use bson::oid::ObjectId;

    const OWNER: &str = "64b7f0a2c3d4e5f601234567";

    fn schema() -> Schema {
        Schema::parse(
            &CollectionDefinition::new("pets")
                .with_attribute("id", AttributeDescriptor::new(AttributeType::Integer).primary_key())
                .with_attribute("name", AttributeDescriptor::new(AttributeType::String))
                .with_attribute("age", AttributeDescriptor::new(AttributeType::Integer))
                .with_attribute("owner", AttributeDescriptor::new(AttributeType::Integer).foreign_key())
                .with_attribute("born", AttributeDescriptor::new(AttributeType::Datetime))
                .attributes,
        )
    }

    fn compile(criteria: bson::Document) -> AdapterResult<CompiledQuery> {
        compile_with(criteria, &AdapterConfig::default())
    }

    fn compile_with(criteria: bson::Document, config: &AdapterConfig) -> AdapterResult<CompiledQuery> {
        let schema = schema();
        CriteriaTranslator::new(&schema, config).compile(&Criteria::parse(&criteria)?)
    }

    #[test]
    fn greater_than_maps_to_native_operator() {
        let compiled = compile(doc! { "where": { "age": { ">": 18 } } }).unwrap();

        assert_eq!(compiled.filter, doc! { "age": { "$gt": 18 } });
        assert!(!compiled.is_aggregate());
    }

    #[test]
    fn disjunction_keeps_both_branches() {
        let compiled = compile(doc! { "where": { "or": [{ "age": 18 }, { "age": 21 }] } }).unwrap();

        assert_eq!(
            compiled.filter,
            doc! { "$or": [{ "age": { "$eq": 18 } }, { "age": { "$eq": 21 } }] }
        );
    }

    #[test]
    fn negation_compiles_to_nor() {
        let compiled = compile(doc! { "where": { "not": { "age": { "<": 3 } } } }).unwrap();

        assert_eq!(compiled.filter, doc! { "$nor": [{ "age": { "$lt": 3 } }] });
    }

    #[test]
    fn translation_is_idempotent() {
        let criteria = doc! {
            "where": { "name": { "like": "R%" }, "age": [1, 2] },
            "sort": "age desc",
            "limit": 3,
        };

        assert_eq!(compile(criteria.clone()).unwrap(), compile(criteria).unwrap());
    }

    #[test]
    fn identifier_references_are_rewritten() {
        let compiled = compile(doc! {
            "where": { "id": OWNER, "owner": { "in": [OWNER] } },
            "sort": { "id": -1 },
            "select": ["id", "name"],
        })
        .unwrap();
        let oid = ObjectId::parse_str(OWNER).unwrap();

        assert_eq!(
            compiled.filter,
            doc! { "$and": [{ "_id": { "$eq": oid } }, { "owner": { "$in": [oid] } }] }
        );
        assert_eq!(compiled.options.sort, vec![("_id".to_string(), SortDirection::Desc)]);
        assert_eq!(compiled.options.projection, Some(doc! { "_id": 1, "name": 1 }));
    }

    #[test]
    fn bad_identifier_literal_is_rejected() {
        assert!(matches!(
            compile(doc! { "where": { "owner": "nope" } }),
            Err(AdapterError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(matches!(
            compile(doc! { "where": { "age": { "between": [1, 2] } } }),
            Err(AdapterError::InvalidCriteria(_))
        ));
    }

    #[test]
    fn pattern_operators_are_escaped() {
        let compiled = compile(doc! {
            "where": {
                "name": { "like": "a.b%_" },
                "nickname": { "contains": "x+y" },
            }
        })
        .unwrap();

        assert_eq!(
            compiled.filter,
            doc! { "$and": [
                { "name": { "$regex": "^a\\.b.*.$" } },
                { "nickname": { "$regex": "x\\+y" } },
            ] }
        );
    }

    #[test]
    fn case_insensitive_config_folds_string_equality() {
        let config = AdapterConfig { case_sensitive: false, ..Default::default() };
        let compiled = compile_with(doc! { "where": { "name": "Rex", "age": 3 } }, &config).unwrap();

        assert_eq!(
            compiled.filter,
            doc! { "$and": [
                { "name": { "$regex": "^Rex$", "$options": "i" } },
                { "age": { "$eq": 3 } },
            ] }
        );
    }

    #[test]
    fn datetime_literals_are_encoded() {
        let compiled = compile(doc! { "where": { "born": { ">=": "2020-01-01T00:00:00Z" } } }).unwrap();

        assert!(matches!(
            compiled.filter.get_document("born").unwrap().get("$gte"),
            Some(Bson::DateTime(_))
        ));
        assert!(matches!(
            compile(doc! { "where": { "born": "whenever" } }),
            Err(AdapterError::InvalidCriteria(_))
        ));
    }

    #[test]
    fn grouping_builds_match_and_group_stages() {
        let compiled = compile(doc! {
            "where": { "age": { ">": 1 } },
            "groupBy": ["country"],
            "sum": "amount",
            "count": true,
        })
        .unwrap();

        assert_eq!(
            compiled.pipeline,
            Some(vec![
                doc! { "$match": { "age": { "$gt": 1 } } },
                doc! { "$group": {
                    "_id": { "country": "$country" },
                    "amount": { "$sum": "$amount" },
                    "count": { "$sum": 1 },
                } },
            ])
        );
    }

    #[test]
    fn grouping_without_keys_uses_a_single_group() {
        let compiled = compile(doc! { "average": "age" }).unwrap();

        assert_eq!(
            compiled.pipeline.unwrap()[1],
            doc! { "$group": { "_id": Bson::Null, "age": { "$avg": "$age" } } }
        );
    }

    #[test]
    fn conflicting_aggregate_outputs_are_rejected() {
        assert!(matches!(
            compile(doc! { "sum": "age", "max": "age" }),
            Err(AdapterError::InvalidCriteria(_))
        ));
    }

    #[test]
    fn mutation_filter_ignores_everything_but_the_filter() {
        let schema = schema();
        let config = AdapterConfig::default();
        let filter = CriteriaTranslator::new(&schema, &config)
            .compile_filter(&MutationCriteria::from(Filter::eq("name", "Rex")))
            .unwrap();

        assert_eq!(filter, doc! { "name": { "$eq": "Rex" } });
    }

    #[test]
    fn omit_builds_exclusion_projection() {
        let compiled = compile(doc! { "omit": ["secret"] }).unwrap();

        assert_eq!(compiled.options.projection, Some(doc! { "secret": 0 }));
        assert_eq!(compiled.filter, Document::new());
    }
}
