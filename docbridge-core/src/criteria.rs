//! Criteria model: the typed form of an ORM query.
//!
//! A [`Criteria`] describes what to fetch (filter, sort, pagination, projection and an
//! optional grouping). It can be built fluently or parsed from the loose document shape
//! ORMs hand over:
//!
//! ```ignore
//! use bson::doc;
//! use docbridge::criteria::{Criteria, Filter, SortDirection};
//!
//! let parsed = Criteria::parse(&doc! {
//!     "where": { "age": { ">": 18 }, "or": [{ "name": "Ada" }, { "name": "Grace" }] },
//!     "sort": "age desc",
//!     "limit": 10,
//! })?;
//!
//! let built = Criteria::builder()
//!     .filter(Filter::gt("age", 18).and(Filter::or([
//!         Filter::eq("name", "Ada"),
//!         Filter::eq("name", "Grace"),
//!     ])))
//!     .sort("age", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! Unknown operators are rejected here, so nothing unrecognized ever reaches the store.

use bson::{Bson, Document};

use crate::error::{AdapterError, AdapterResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Native direction value (`1` or `-1`).
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// A single sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators. The set is closed; anything else is an invalid criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOp {
    /// Equal to.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Value is one of the listed values.
    AnyOf,
    /// Value is none of the listed values.
    NoneOf,
    /// SQL-style pattern where `%` matches any run and `_` a single character.
    Like,
    /// String contains the value.
    Contains,
    /// String starts with the value.
    StartsWith,
    /// String ends with the value.
    EndsWith,
    /// String matches a regular expression.
    Matches,
}

impl FieldOp {
    /// Resolves an operator key as written in a where-clause.
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "=" | "eq" | "equals" => FieldOp::Eq,
            "!" | "!=" | "ne" | "not" => FieldOp::Ne,
            ">" | "gt" | "greaterThan" => FieldOp::Gt,
            ">=" | "gte" | "greaterThanOrEqual" => FieldOp::Gte,
            "<" | "lt" | "lessThan" => FieldOp::Lt,
            "<=" | "lte" | "lessThanOrEqual" => FieldOp::Lte,
            "in" => FieldOp::AnyOf,
            "nin" | "!in" | "notIn" => FieldOp::NoneOf,
            "like" => FieldOp::Like,
            "contains" => FieldOp::Contains,
            "startsWith" => FieldOp::StartsWith,
            "endsWith" => FieldOp::EndsWith,
            "regex" | "matches" => FieldOp::Matches,
            _ => return None,
        })
    }

    fn requires_string(&self) -> bool {
        matches!(
            self,
            FieldOp::Like | FieldOp::Contains | FieldOp::StartsWith | FieldOp::EndsWith | FieldOp::Matches
        )
    }

    fn requires_list(&self) -> bool {
        matches!(self, FieldOp::AnyOf | FieldOp::NoneOf)
    }
}

/// A filter expression.
///
/// Logical combinators nest arbitrarily; operand order is preserved all the way to the
/// compiled filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression.
    Not(Box<Expr>),
    /// Field comparison expression.
    Field {
        field: String,
        op: FieldOp,
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression.
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Static constructors for filter expressions.
///
/// ```ignore
/// let expr = Filter::eq("name", "Alice").and(Filter::gte("age", 18));
/// ```
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents whose field equals any of `values`.
    pub fn any_of<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::AnyOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents whose field equals none of `values`.
    pub fn none_of<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::NoneOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Like, Bson::String(pattern.into()))
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, Bson::String(value.into()))
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, Bson::String(value.into()))
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, Bson::String(value.into()))
    }

    /// Matches documents whose field matches the regular expression `pattern`.
    pub fn matches(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Matches, Bson::String(pattern.into()))
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }
}

/// Which fields to return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Every field.
    #[default]
    All,
    /// Only the listed fields (plus the identifier).
    Include(Vec<String>),
    /// Every field except the listed ones.
    Exclude(Vec<String>),
}

/// An aggregate function applied per group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accumulator {
    /// Number of documents in the group, reported as `count`.
    Count,
    Sum(String),
    Average(String),
    Min(String),
    Max(String),
}

impl Accumulator {
    /// Name of the output field carrying this accumulator's result.
    pub fn output_field(&self) -> &str {
        match self {
            Accumulator::Count => "count",
            Accumulator::Sum(field)
            | Accumulator::Average(field)
            | Accumulator::Min(field)
            | Accumulator::Max(field) => field,
        }
    }
}

/// A grouping request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Aggregate {
    /// Grouping keys. Empty means a single group over every match.
    pub group_by: Vec<String>,
    pub accumulators: Vec<Accumulator>,
}

/// A complete query description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Criteria {
    /// Optional filter expression; `None` matches every document.
    pub filter: Option<Expr>,
    pub sort: Vec<Sort>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    pub projection: Projection,
    /// Present when the caller asked for grouped results.
    pub aggregate: Option<Aggregate>,
}

/// Criteria accepted by update, destroy and count. It carries no projection, so a
/// mutation can never be asked to project.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationCriteria {
    pub filter: Option<Expr>,
}

impl MutationCriteria {
    pub fn new(filter: Option<Expr>) -> Self {
        Self { filter }
    }

    /// Matches every document.
    pub fn all() -> Self {
        Self { filter: None }
    }

    /// Parses the where-clause of a loose criteria document, ignoring everything else.
    pub fn parse(criteria: &Document) -> AdapterResult<Self> {
        Ok(Criteria::parse(criteria)?.into())
    }
}

impl From<Criteria> for MutationCriteria {
    fn from(criteria: Criteria) -> Self {
        Self { filter: criteria.filter }
    }
}

impl From<Expr> for MutationCriteria {
    fn from(filter: Expr) -> Self {
        Self { filter: Some(filter) }
    }
}

const CRITERIA_KEYS: [&str; 12] = [
    "where", "sort", "skip", "limit", "select", "omit", "groupBy", "sum", "average", "min", "max",
    "count",
];

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new criteria builder for fluent construction.
    pub fn builder() -> CriteriaBuilder {
        CriteriaBuilder::new()
    }

    /// Criteria matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// True when the caller asked for grouped results.
    pub fn is_aggregate(&self) -> bool {
        self.aggregate.is_some()
    }

    /// Drops the projection, keeping everything else.
    pub fn without_projection(mut self) -> Self {
        self.projection = Projection::All;
        self
    }

    /// Parses a loose criteria document.
    ///
    /// Recognized top-level keys are `where`, `sort`, `skip`, `limit`, `select`, `omit`,
    /// `groupBy`, `sum`, `average`, `min`, `max` and `count`. When `where` is absent, the
    /// remaining top-level keys are read as a where-clause.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidCriteria`] on unknown operators, malformed nesting,
    /// negative or fractional `skip`/`limit`, and malformed sort or field lists.
    pub fn parse(criteria: &Document) -> AdapterResult<Self> {
        let filter = match criteria.get("where") {
            Some(Bson::Document(clause)) => parse_where(clause)?,
            Some(Bson::Null) => None,
            Some(other) => {
                return Err(AdapterError::InvalidCriteria(format!(
                    "where must be a document, got {}",
                    other
                )));
            }
            None => {
                let shorthand = criteria
                    .iter()
                    .filter(|(key, _)| !CRITERIA_KEYS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect::<Document>();

                parse_where(&shorthand)?
            }
        };

        let projection = match (criteria.get("select"), criteria.get("omit")) {
            (Some(select), None) => match parse_fields("select", select)? {
                fields if fields.is_empty() => Projection::All,
                fields => Projection::Include(fields),
            },
            (None, Some(omit)) => match parse_fields("omit", omit)? {
                fields if fields.is_empty() => Projection::All,
                fields => Projection::Exclude(fields),
            },
            (None, None) => Projection::All,
            (Some(_), Some(_)) => {
                return Err(AdapterError::InvalidCriteria(
                    "select and omit cannot be combined".to_string(),
                ));
            }
        };

        Ok(Criteria {
            filter,
            sort: match criteria.get("sort") {
                Some(sort) => parse_sort(sort)?,
                None => Vec::new(),
            },
            skip: parse_count("skip", criteria.get("skip"))?,
            limit: parse_count("limit", criteria.get("limit"))?,
            projection,
            aggregate: parse_aggregate(criteria)?,
        })
    }
}

/// Fluent builder for [`Criteria`].
#[derive(Debug, Clone, Default)]
pub struct CriteriaBuilder {
    criteria: Criteria,
}

impl CriteriaBuilder {
    pub fn new() -> Self {
        CriteriaBuilder { criteria: Criteria::default() }
    }

    /// Sets the filter expression.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.criteria.filter = Some(filter);
        self
    }

    /// Appends a sort key. Keys apply in the order they are added.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.criteria.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.criteria.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.criteria.limit = Some(limit);
        self
    }

    /// Returns only the listed fields.
    pub fn select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.criteria.projection = Projection::Include(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Returns every field except the listed ones.
    pub fn omit<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.criteria.projection = Projection::Exclude(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Groups results by the listed fields.
    pub fn group_by<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.aggregate()
            .group_by
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn count(mut self) -> Self {
        self.aggregate().accumulators.push(Accumulator::Count);
        self
    }

    pub fn sum(mut self, field: impl Into<String>) -> Self {
        self.aggregate().accumulators.push(Accumulator::Sum(field.into()));
        self
    }

    pub fn average(mut self, field: impl Into<String>) -> Self {
        self.aggregate().accumulators.push(Accumulator::Average(field.into()));
        self
    }

    pub fn min(mut self, field: impl Into<String>) -> Self {
        self.aggregate().accumulators.push(Accumulator::Min(field.into()));
        self
    }

    pub fn max(mut self, field: impl Into<String>) -> Self {
        self.aggregate().accumulators.push(Accumulator::Max(field.into()));
        self
    }

    fn aggregate(&mut self) -> &mut Aggregate {
        self.criteria.aggregate.get_or_insert_with(Aggregate::default)
    }

    /// Builds and returns the final criteria.
    pub fn build(self) -> Criteria {
        self.criteria
    }
}

/// Visitor over [`Expr`] trees.
pub trait QueryVisitor {
    type Output;
    type Error: Into<AdapterError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

fn invalid(message: impl Into<String>) -> AdapterError {
    AdapterError::InvalidCriteria(message.into())
}

/// Parses a where-clause document. An empty clause yields `None`.
fn parse_where(clause: &Document) -> AdapterResult<Option<Expr>> {
    let mut exprs = clause
        .iter()
        .map(|(key, value)| match key.as_str() {
            "or" => parse_branches(key, value).map(Expr::Or),
            "and" => parse_branches(key, value).map(Expr::And),
            "not" => match value {
                Bson::Document(inner) => parse_where(inner)?
                    .map(Expr::not)
                    .ok_or_else(|| invalid("not requires a non-empty clause")),
                other => Err(invalid(format!("not requires a clause, got {}", other))),
            },
            field => parse_field(field, value),
        })
        .collect::<AdapterResult<Vec<_>>>()?;

    Ok(match exprs.len() {
        0 => None,
        1 => exprs.pop(),
        _ => Some(Expr::And(exprs)),
    })
}

fn parse_branches(key: &str, value: &Bson) -> AdapterResult<Vec<Expr>> {
    let branches = match value {
        Bson::Array(branches) if !branches.is_empty() => branches,
        other => return Err(invalid(format!("{} requires a non-empty list of clauses, got {}", key, other))),
    };

    branches
        .iter()
        .map(|branch| match branch {
            Bson::Document(inner) => {
                parse_where(inner)?.ok_or_else(|| invalid(format!("{} contains an empty clause", key)))
            }
            other => Err(invalid(format!("{} branches must be clauses, got {}", key, other))),
        })
        .collect()
}

fn parse_field(field: &str, value: &Bson) -> AdapterResult<Expr> {
    match value {
        Bson::Document(ops) => {
            if ops.is_empty() {
                return Err(invalid(format!("empty operator list for '{}'", field)));
            }

            let mut exprs = ops
                .iter()
                .map(|(key, operand)| {
                    let op = FieldOp::from_key(key)
                        .ok_or_else(|| invalid(format!("unknown operator '{}' on '{}'", key, field)))?;

                    // `{ not: [..] }` reads as "not in".
                    let op = match (op, operand) {
                        (FieldOp::Ne, Bson::Array(_)) => FieldOp::NoneOf,
                        (op, _) => op,
                    };

                    if op.requires_list() && !matches!(operand, Bson::Array(_)) {
                        return Err(invalid(format!("'{}' on '{}' requires a list", key, field)));
                    }
                    if op.requires_string() && !matches!(operand, Bson::String(_)) {
                        return Err(invalid(format!("'{}' on '{}' requires a string", key, field)));
                    }

                    Ok(Expr::field(field.to_string(), op, operand.clone()))
                })
                .collect::<AdapterResult<Vec<_>>>()?;

            Ok(match exprs.len() {
                1 => exprs.remove(0),
                _ => Expr::And(exprs),
            })
        }
        Bson::Array(_) => Ok(Expr::field(field.to_string(), FieldOp::AnyOf, value.clone())),
        _ => Ok(Expr::field(field.to_string(), FieldOp::Eq, value.clone())),
    }
}

fn parse_direction(field: &str, value: &Bson) -> AdapterResult<SortDirection> {
    match value {
        Bson::Int32(1) | Bson::Int64(1) => Ok(SortDirection::Asc),
        Bson::Int32(-1) | Bson::Int64(-1) => Ok(SortDirection::Desc),
        Bson::Double(d) if *d == 1.0 => Ok(SortDirection::Asc),
        Bson::Double(d) if *d == -1.0 => Ok(SortDirection::Desc),
        Bson::String(s) if s.eq_ignore_ascii_case("asc") => Ok(SortDirection::Asc),
        Bson::String(s) if s.eq_ignore_ascii_case("desc") => Ok(SortDirection::Desc),
        other => Err(invalid(format!("invalid sort direction {} for '{}'", other, field))),
    }
}

fn parse_sort(value: &Bson) -> AdapterResult<Vec<Sort>> {
    match value {
        Bson::Null => Ok(Vec::new()),
        Bson::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut words = part.split_whitespace();
                let field = words.next().unwrap_or_default().to_string();
                let direction = match words.next() {
                    Some(direction) => parse_direction(&field, &Bson::String(direction.to_string()))?,
                    None => SortDirection::Asc,
                };

                match words.next() {
                    Some(extra) => Err(invalid(format!("unexpected '{}' in sort", extra))),
                    None => Ok(Sort { field, direction }),
                }
            })
            .collect(),
        Bson::Document(keys) => keys
            .iter()
            .map(|(field, direction)| {
                Ok(Sort { field: field.clone(), direction: parse_direction(field, direction)? })
            })
            .collect(),
        Bson::Array(items) => Ok(items
            .iter()
            .map(parse_sort)
            .collect::<AdapterResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect()),
        other => Err(invalid(format!("invalid sort {}", other))),
    }
}

fn parse_count(key: &str, value: Option<&Bson>) -> AdapterResult<Option<u64>> {
    match value {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Int32(n)) if *n >= 0 => Ok(Some(*n as u64)),
        Some(Bson::Int64(n)) if *n >= 0 => Ok(Some(*n as u64)),
        Some(Bson::Double(n)) if *n >= 0.0 && n.fract() == 0.0 && n.is_finite() => Ok(Some(*n as u64)),
        Some(other) => Err(invalid(format!("{} must be a non-negative integer, got {}", key, other))),
    }
}

fn parse_fields(key: &str, value: &Bson) -> AdapterResult<Vec<String>> {
    match value {
        Bson::String(field) => Ok(vec![field.clone()]),
        Bson::Array(fields) => fields
            .iter()
            .map(|field| match field {
                Bson::String(field) => Ok(field.clone()),
                other => Err(invalid(format!("{} entries must be field names, got {}", key, other))),
            })
            .collect(),
        other => Err(invalid(format!("{} must be a field name or list, got {}", key, other))),
    }
}

fn parse_aggregate(criteria: &Document) -> AdapterResult<Option<Aggregate>> {
    let mut aggregate = Aggregate::default();
    let mut requested = false;

    if let Some(value) = criteria.get("groupBy") {
        aggregate.group_by = parse_fields("groupBy", value)?;
        requested = true;
    }

    let functions: [(&str, fn(String) -> Accumulator); 4] = [
        ("sum", Accumulator::Sum),
        ("average", Accumulator::Average),
        ("min", Accumulator::Min),
        ("max", Accumulator::Max),
    ];

    for (key, accumulator) in functions {
        if let Some(value) = criteria.get(key) {
            aggregate
                .accumulators
                .extend(parse_fields(key, value)?.into_iter().map(accumulator));
            requested = true;
        }
    }

    match criteria.get("count") {
        None | Some(Bson::Boolean(false)) => {}
        Some(Bson::Boolean(true)) => {
            aggregate.accumulators.push(Accumulator::Count);
            requested = true;
        }
        Some(other) => return Err(invalid(format!("count must be a boolean, got {}", other))),
    }

    Ok(requested.then_some(aggregate))
}
