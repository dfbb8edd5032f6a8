//! Core abstractions shared by every component.
//!
//! - [`dates`]: normalization of hand-entered date attributes
//! - [`schema`]: static table declarations forming the dependency graph
//! - [`value`]: schemaless record representation
//! - [`traits`]: the [`StoreAdapter`] interface over source and target stores

pub mod dates;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{DependencyField, TableDescriptor, TARGET_ID_FIELD};
pub use traits::{
    DeleteOutcome, PageToken, ScanPage, StoreAdapter, StoreResult, TableDescription,
};
pub use value::Record;
