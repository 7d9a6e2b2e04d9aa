//! Matching irregular CSV input against loaded schemas.
//!
//! Most callers should use [`SchemaRegistry::match_and_validate`], which:
//!
//! - picks the schema(s) to try (named explicitly, or by `targetFiles` and then every other
//!   loaded schema in try-all mode)
//! - tokenizes the input with the schema's dialect and matches its tables region by region
//! - validates every matched cell and renders its properties
//! - optionally reports success/failure/alerts to a [`ValidationObserver`]
//!
//! For in-memory input, [`validate_str`] and [`validate_reader`] match against one schema.

mod bindings;
mod dataset;
mod engine;
mod observability;
mod registry;
mod validate;

pub use bindings::{Binding, Bindings};
pub use dataset::{MatchedCell, ResolvedInvocation, Triple, ValidatedDataset, ValidatedTable, ValidationReport};
pub use observability::{
    FileObserver, SectionStats, TracingObserver, ValidationContext, ValidationFailure, ValidationObserver,
    ValidationSeverity, ValidationStats,
};
pub use registry::{validate_reader, validate_str, MatchOptions, SchemaRegistry, SchemaSelection};

/// What to do once a value issue is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop at the first table region with an issue and report only that issue.
    AbortOnFirst,
    /// Validate the whole input and report every issue.
    #[default]
    CollectAll,
}
