//! `csvx` is a schema language and matching engine for CSV-like files that are not uniformly
//! rectangular.
//!
//! A schema (written as JSON) describes a grid of tables, rows and cells: sections recognised by
//! identity rows, row and column patterns that repeat an unknown number of times, cells whose
//! emptiness is meaningful, typed cells with regex constraints, and `${name}` references between
//! cells. The engine tokenizes an input file with the schema's dialect, matches each region of
//! the input to one of the schema's tables, validates every cell, and hands back a typed
//! [`matching::ValidatedDataset`] ready for template/RDF emission.
//!
//! The primary entrypoint is [`matching::SchemaRegistry::match_and_validate`].
//!
//! ## Quick example: validate a file
//!
//! ```no_run
//! use csvx::matching::{MatchOptions, SchemaRegistry, SchemaSelection};
//!
//! # fn main() -> Result<(), csvx::CsvxError> {
//! // Files, directories (walked for `*.json`) and glob patterns are all accepted.
//! let registry = SchemaRegistry::from_paths(&["schemas/"])?;
//! let ds = registry.match_and_validate("station.csv", &SchemaSelection::Auto, &MatchOptions::default())?;
//! for table in &ds.tables {
//!     println!("{}: {} cells from record {}", table.name, table.cells.len(), table.start_record);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## In-memory example
//!
//! ```rust
//! use csvx::matching::{validate_str, ErrorPolicy};
//! use csvx::schema::loader::load_schema_from_str;
//! use csvx::types::Coordinate;
//!
//! let schema = load_schema_from_str(r#"{
//!     "rows": {
//!         "0": [{ "@name": "label" }],
//!         "1": { "@repeat": true, "cols": [{ "@datatype": "integer", "@id": "ex:${label}/${.}" }] }
//!     }
//! }"#).unwrap();
//!
//! let report = validate_str(&schema, "x\n1\n2\n3\n", ErrorPolicy::CollectAll).unwrap();
//! assert!(report.is_valid());
//! let table = &report.dataset.tables[0];
//! let ids: Vec<_> = table
//!     .instances_of(Coordinate::new(1, 0))
//!     .map(|c| c.properties.id.clone().unwrap_or_default())
//!     .collect();
//! assert_eq!(ids, vec!["ex:x/1", "ex:x/2", "ex:x/3"]);
//! ```
//!
//! ## Modules
//!
//! - [`schema`]: the schema object model, JSON loader, datatypes and name scopes
//! - [`tokenizer`]: pull-based delimited-text tokenizer
//! - [`matching`]: schema registry, matching/validation engine, observers and output types
//! - [`execution`]: parallel validation of many files
//! - [`types`]: coordinates, repeat descriptors, selectors and typed values
//! - [`error`]: error types and exit-status categories
//!
//! ## Error categories
//!
//! Every [`CsvxError`] maps to an [`ErrorCategory`], so callers can tell apart a malformed
//! schema, an input no schema fits, and an input that fits but carries invalid values.

pub mod error;
pub mod execution;
pub mod matching;
pub mod schema;
pub mod tokenizer;
pub mod types;

pub use error::{CsvxError, CsvxResult, ErrorCategory, SchemaError, StructuralMismatch, TokenizeError, ValueIssue};
