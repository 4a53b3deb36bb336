//! Index planning.
//!
//! Derives the indexes a collection needs from its [`Schema`]. The output is declarative;
//! applying it to a live store is the job of [`CollectionHandle::create_index`].
//!
//! [`CollectionHandle::create_index`]: crate::backend::CollectionHandle::create_index

use indexmap::IndexMap;

use crate::{
    criteria::SortDirection,
    schema::{ID_FIELD, Schema},
};

/// A declarative index specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Indexed fields and their sort direction, in key order.
    pub keys: IndexMap<String, SortDirection>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Whether documents missing the field are left out of the index.
    pub sparse: bool,
}

impl IndexSpec {
    /// Creates a single-field ascending index.
    pub fn single(field: impl Into<String>, unique: bool, sparse: bool) -> Self {
        let mut keys = IndexMap::new();
        keys.insert(field.into(), SortDirection::Asc);

        Self { keys, unique, sparse }
    }

    /// Returns a conventional index name, e.g. `email_1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, direction)| format!("{}_{}", field, direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Derives the ordered index specs for `schema`.
///
/// The identifier field is skipped since the store indexes it natively. A `unique`
/// attribute yields a sparse unique index and takes precedence over `indexed`, which
/// yields a sparse non-unique index.
pub fn derive_indexes(schema: &Schema) -> Vec<IndexSpec> {
    schema
        .attributes()
        .filter(|(name, _)| *name != ID_FIELD)
        .filter_map(|(name, attribute)| {
            if attribute.unique {
                Some(IndexSpec::single(name, true, true))
            } else if attribute.indexed {
                Some(IndexSpec::single(name, false, true))
            } else {
                None
            }
        })
        .collect()
}
