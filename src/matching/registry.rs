//! Loaded schemas and the path-based validation entrypoint.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{CsvxError, CsvxResult, SchemaError};
use crate::schema::loader::load_schemas;
use crate::schema::Schema;

use super::dataset::{ValidatedDataset, ValidationReport};
use super::engine::{MatchError, Matcher};
use super::observability::{ValidationContext, ValidationFailure, ValidationObserver, ValidationSeverity, ValidationStats};
use super::ErrorPolicy;

/// Which schema(s) to match an input against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchemaSelection {
    /// Schemas whose `targetFiles` match the input first, then (in try-all mode) every other
    /// schema in load order.
    #[default]
    Auto,
    /// Exactly one schema, by id.
    Named(String),
}

/// Options controlling matching and validation.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct MatchOptions {
    pub error_policy: ErrorPolicy,
    /// Under [`SchemaSelection::Auto`], also try schemas that do not target the input.
    pub try_all: bool,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn ValidationObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: ValidationSeverity,
}

impl fmt::Debug for MatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchOptions")
            .field("error_policy", &self.error_policy)
            .field("try_all", &self.try_all)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            try_all: true,
            observer: None,
            alert_at_or_above: ValidationSeverity::Critical,
        }
    }
}

/// Every schema available for matching, in load order.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: Vec<Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every schema found under `paths`.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> CsvxResult<Self> {
        let mut registry = Self::new();
        registry.load_schemas(paths)?;
        Ok(registry)
    }

    /// Load every schema found under `paths` (files, directories or glob patterns).
    ///
    /// Returns the number of schemas added. Nothing is added when any source fails.
    pub fn load_schemas<P: AsRef<Path>>(&mut self, paths: &[P]) -> CsvxResult<usize> {
        let loaded = load_schemas(paths)?;
        for schema in &loaded {
            if self.get(schema.id()).is_some() || loaded.iter().filter(|s| s.id() == schema.id()).count() > 1 {
                return Err(SchemaError::DuplicateName {
                    name: schema.id().to_string(),
                    scope: "schema registry".to_string(),
                }
                .into());
            }
        }
        let count = loaded.len();
        for schema in loaded {
            self.insert(schema)?;
        }
        Ok(count)
    }

    /// Add a finalized schema. Ids are unique across the registry.
    pub fn insert(&mut self, schema: Schema) -> Result<(), SchemaError> {
        if self.get(schema.id()).is_some() {
            return Err(SchemaError::DuplicateName {
                name: schema.id().to_string(),
                scope: "schema registry".to_string(),
            });
        }
        info!(schema = schema.id(), tables = schema.tables().len(), "registered schema");
        self.schemas.push(schema);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.id() == id)
    }

    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// First schema whose `targetFiles` match `path`.
    pub fn find_matching_schema(&self, path: impl AsRef<Path>) -> Option<&Schema> {
        let path = path.as_ref();
        self.schemas.iter().find(|s| s.matches_file(path))
    }

    /// Schemas to try for `path`, in order.
    fn candidates(&self, path: &Path, selection: &SchemaSelection, try_all: bool) -> CsvxResult<Vec<&Schema>> {
        match selection {
            SchemaSelection::Named(id) => self
                .get(id)
                .map(|s| vec![s])
                .ok_or_else(|| CsvxError::UnknownSchema(id.clone())),
            SchemaSelection::Auto => {
                let (mut targeted, rest): (Vec<&Schema>, Vec<&Schema>) =
                    self.schemas.iter().partition(|s| s.matches_file(path));
                if try_all {
                    targeted.extend(rest);
                }
                Ok(targeted)
            }
        }
    }

    /// Match `path` and return the report, value issues included.
    ///
    /// Structural failures move on to the next candidate schema; the first schema that matches
    /// structurally produces the report, whatever its value issues.
    pub fn validate_report(
        &self,
        path: impl AsRef<Path>,
        selection: &SchemaSelection,
        options: &MatchOptions,
    ) -> CsvxResult<ValidationReport> {
        let path = path.as_ref();
        let candidates = self.candidates(path, selection, options.try_all)?;
        let mut attempts = Vec::new();
        for schema in &candidates {
            let reader = BufReader::new(File::open(path)?);
            match Matcher::new(schema, reader, options.error_policy).run(Some(path)) {
                Ok(report) => {
                    info!(
                        path = %path.display(),
                        schema = schema.id(),
                        tables = report.dataset.tables.len(),
                        issues = report.issues.len(),
                        "schema matched"
                    );
                    return Ok(report);
                }
                Err(MatchError::Structure(mismatch)) => {
                    debug!(path = %path.display(), schema = schema.id(), %mismatch, "schema rejected");
                    attempts.push((schema.id().to_string(), mismatch));
                }
                Err(MatchError::Tokenize(e)) => return Err(e.into()),
            }
        }
        match (selection, attempts.pop()) {
            (SchemaSelection::Named(_), Some((schema, mismatch))) => Err(CsvxError::Structure { schema, mismatch }),
            (_, last) => {
                attempts.extend(last);
                Err(CsvxError::NoSchemaMatched {
                    path: path.to_path_buf(),
                    attempts,
                })
            }
        }
    }

    /// Match and validate `path`; any value issue fails the file.
    ///
    /// When an observer is configured, this function reports:
    ///
    /// - `on_success` on success, with per-section record/cell counts
    /// - `on_failure` on failure, classified by category and severity
    /// - `on_alert` on failure when the computed severity is >= `options.alert_at_or_above`
    ///
    /// ```no_run
    /// use csvx::matching::{MatchOptions, SchemaRegistry, SchemaSelection};
    ///
    /// # fn main() -> Result<(), csvx::CsvxError> {
    /// let registry = SchemaRegistry::from_paths(&["schemas/"])?;
    /// let ds = registry.match_and_validate("station.csv", &SchemaSelection::Auto, &MatchOptions::default())?;
    /// println!("schema={} cells={}", ds.schema_id, ds.cell_count());
    /// # Ok(())
    /// # }
    /// ```
    pub fn match_and_validate(
        &self,
        path: impl AsRef<Path>,
        selection: &SchemaSelection,
        options: &MatchOptions,
    ) -> CsvxResult<ValidatedDataset> {
        let path = path.as_ref();
        let result = self
            .validate_report(path, selection, options)
            .and_then(|report| {
                if report.is_valid() {
                    Ok(report.dataset)
                } else {
                    Err(CsvxError::InvalidData {
                        schema: report.dataset.schema_id,
                        issues: report.issues,
                    })
                }
            });

        if let Some(obs) = options.observer.as_ref() {
            let ctx = ValidationContext {
                path: path.to_path_buf(),
                schema: match (&result, selection) {
                    (Ok(ds), _) => Some(ds.schema_id.clone()),
                    (Err(CsvxError::InvalidData { schema, .. } | CsvxError::Structure { schema, .. }), _) => {
                        Some(schema.clone())
                    }
                    (Err(_), SchemaSelection::Named(id)) => Some(id.clone()),
                    (Err(_), SchemaSelection::Auto) => None,
                },
            };
            match &result {
                Ok(ds) => obs.on_success(&ctx, &ValidationStats::from_dataset(ds)),
                Err(e) => {
                    let failure = ValidationFailure::new(e);
                    obs.on_failure(&ctx, &failure);
                    if failure.severity >= options.alert_at_or_above {
                        obs.on_alert(&ctx, &failure);
                    }
                }
            }
        }

        result
    }
}

/// Match `reader` against one schema.
pub fn validate_reader<R: BufRead>(schema: &Schema, reader: R, policy: ErrorPolicy) -> CsvxResult<ValidationReport> {
    Matcher::new(schema, reader, policy)
        .run(None)
        .map_err(|e| match e {
            MatchError::Structure(mismatch) => CsvxError::Structure {
                schema: schema.id().to_string(),
                mismatch,
            },
            MatchError::Tokenize(e) => CsvxError::Tokenize(e),
        })
}

/// Match an in-memory string against one schema.
pub fn validate_str(schema: &Schema, input: &str, policy: ErrorPolicy) -> CsvxResult<ValidationReport> {
    validate_reader(schema, input.as_bytes(), policy)
}
