//! Convenient re-exports of commonly used types from docbridge.
//!
//! ```ignore
//! use docbridge::prelude::*;
//! ```

pub use docbridge_core::{
    adapter::DocumentAdapter,
    collection::{Collection, DocumentSink},
    backend::{CollectionHandle, StoreBackend, StoreBackendBuilder},
    criteria::{Criteria, CriteriaBuilder, MutationCriteria, QueryVisitor, Expr, Filter, FieldOp, Sort, SortDirection, Projection},
    config::AdapterConfig,
    schema::{AttributeDescriptor, AttributeType, CollectionDefinition, Schema},
    error::{AdapterError, AdapterResult},
};
