use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::Coordinate;

/// Convenience result type for matching operations.
pub type CsvxResult<T> = Result<T, CsvxError>;

/// Errors raised while loading or building a schema.
///
/// These are authoring errors: always fatal and reported before any data is processed.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema source could not be read.
    #[error("failed to read schema '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The schema source is not valid JSON (or does not have the expected shape).
    #[error("malformed schema source '{origin}': {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// A definition is structurally invalid.
    #[error("invalid schema definition at {at}: {message}")]
    Invalid { at: String, message: String },

    /// A name is already registered in the scope.
    #[error("duplicate name '{name}' in {scope}")]
    DuplicateName { name: String, scope: String },

    /// A name is not registered in the scope.
    #[error("unknown name '{name}' in {scope}")]
    UnknownName { name: String, scope: String },

    /// The datatype is not one of the recognised XSD simple types.
    #[error("unrecognized datatype '{datatype}' at {at}")]
    UnrecognizedDatatype { datatype: String, at: String },

    /// The regex does not compile.
    #[error("invalid regex at {at}: {source}")]
    InvalidRegex {
        at: String,
        #[source]
        source: regex::Error,
    },

    /// A `${...}` reference names nothing reachable from its scope.
    #[error("unresolved reference '{reference}' at {at}")]
    UnresolvedReference { reference: String, at: String },

    /// The implicit default table keeps its name.
    #[error("the default table cannot be renamed")]
    DefaultTableRename,

    /// The `encoding` option names no known encoding.
    #[error("unknown encoding label '{0}'")]
    UnknownEncoding(String),

    /// A fragment was invoked with the wrong number of arguments.
    #[error("fragment '{name}' expects {expected} argument(s), got {actual}")]
    FragmentArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A schema path pattern is not a valid glob.
    #[error("invalid schema path pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Walking a schema directory failed.
    #[error("failed to walk schema directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Errors raised by the delimited-text tokenizer.
#[derive(Debug, Error)]
pub enum TokenizeError {
    /// An unescaped quote was found inside a value under the `RaiseError` policy.
    #[error("unescaped quote '{ch}' at line {line}, column {column}")]
    UnescapedQuote { ch: char, line: usize, column: usize },

    /// End of input was reached inside a quoted value.
    #[error("unterminated quoted value starting at line {line}, column {column}")]
    UnterminatedQuote { line: usize, column: usize },

    /// Underlying read error.
    #[error("io error while tokenizing: {0}")]
    Io(#[from] std::io::Error),
}

/// A structural disagreement between a table schema and the input.
///
/// Fatal for the current candidate schema; in try-all mode the next candidate is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralMismatch {
    /// A declared cell has no corresponding input cell.
    #[error("table '{table}': schema cell {schema} expects input at {coordinate}, but none is present")]
    MissingInput {
        table: String,
        schema: Coordinate,
        coordinate: Coordinate,
    },

    /// A populated input cell has no schema.
    #[error("table '{table}': input at {coordinate} has no schema (value '{value}')")]
    UnexpectedInput {
        table: String,
        coordinate: Coordinate,
        value: String,
    },

    /// An identity row does not recognise the input at this coordinate.
    #[error("table '{table}': identity cell {schema} does not recognise input at {coordinate} ('{observed}')")]
    IdentityMismatch {
        table: String,
        schema: Coordinate,
        coordinate: Coordinate,
        observed: String,
    },

    /// No table of the schema recognises the input starting at this record.
    #[error("no table matches input record {record}")]
    NoTableMatched { record: usize },

    /// The input contains no records at all.
    #[error("input contains no records")]
    EmptyInput,
}

impl StructuralMismatch {
    /// Table the mismatch was found in, when one was being matched.
    pub fn table(&self) -> Option<&str> {
        match self {
            StructuralMismatch::MissingInput { table, .. }
            | StructuralMismatch::UnexpectedInput { table, .. }
            | StructuralMismatch::IdentityMismatch { table, .. } => Some(table),
            StructuralMismatch::NoTableMatched { .. } | StructuralMismatch::EmptyInput => None,
        }
    }

    /// Input coordinate the mismatch points at.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            StructuralMismatch::MissingInput { coordinate, .. }
            | StructuralMismatch::UnexpectedInput { coordinate, .. }
            | StructuralMismatch::IdentityMismatch { coordinate, .. } => Some(*coordinate),
            StructuralMismatch::NoTableMatched { record } => Some(Coordinate::new(*record, 0)),
            StructuralMismatch::EmptyInput => None,
        }
    }
}

/// Kind of a per-cell value issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueIssueKind {
    /// An Empty cell received a non-null value.
    NotEmpty { observed: String },
    /// The value does not contain a match of the declared regex.
    RegexMismatch { regex: String, observed: String },
    /// The value is not a lexical form of the declared datatype.
    DatatypeMismatch {
        datatype: String,
        observed: String,
        message: String,
    },
    /// A deferred reference could not be bound from the matched input.
    UnboundVariable { reference: String },
    /// A fragment call on the cell could not be rendered.
    FragmentFailed { fragment: String, message: String },
}

impl fmt::Display for ValueIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueIssueKind::NotEmpty { observed } => {
                write!(f, "expected an empty cell, found '{observed}'")
            }
            ValueIssueKind::RegexMismatch { regex, observed } => {
                write!(f, "value '{observed}' does not match /{regex}/")
            }
            ValueIssueKind::DatatypeMismatch {
                datatype,
                observed,
                message,
            } => write!(f, "value '{observed}' is not a valid {datatype}: {message}"),
            ValueIssueKind::UnboundVariable { reference } => {
                write!(f, "reference '{reference}' is not bound by the input")
            }
            ValueIssueKind::FragmentFailed { fragment, message } => {
                write!(f, "fragment '#{fragment}' failed to render: {message}")
            }
        }
    }
}

/// A value error reported for one cell, with coordinate context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("table '{table}' input {coordinate} (schema {schema}): {kind}")]
pub struct ValueIssue {
    pub table: String,
    /// Physical input coordinate.
    pub coordinate: Coordinate,
    /// Declaring schema coordinate.
    pub schema: Coordinate,
    pub kind: ValueIssueKind,
}

/// Coarse error classification, used for exit statuses and observer severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The schema itself is malformed.
    SchemaMalformed,
    /// No schema structurally fits the input.
    NoSchemaMatched,
    /// A schema matched but the data is invalid.
    DataInvalid,
    /// Infrastructure failure.
    Io,
}

impl ErrorCategory {
    /// Process exit status for this category.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::DataInvalid => 1,
            ErrorCategory::NoSchemaMatched => 2,
            ErrorCategory::SchemaMalformed => 3,
            ErrorCategory::Io => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::DataInvalid => "data-invalid",
            ErrorCategory::NoSchemaMatched => "no-schema-matched",
            ErrorCategory::SchemaMalformed => "schema-malformed",
            ErrorCategory::Io => "io",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error returned by registry and matching operations.
#[derive(Debug, Error)]
pub enum CsvxError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Underlying I/O error (e.g. input file not found).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tokenizer error: {0}")]
    Tokenize(#[from] TokenizeError),

    /// The requested schema id is not loaded.
    #[error("unknown schema '{0}'")]
    UnknownSchema(String),

    /// The selected schema does not fit the input structurally.
    #[error("schema '{schema}' does not match: {mismatch}")]
    Structure {
        schema: String,
        mismatch: StructuralMismatch,
    },

    /// Every candidate schema was rejected.
    #[error("no schema matched '{path}' ({} candidate(s) tried)", attempts.len())]
    NoSchemaMatched {
        path: PathBuf,
        attempts: Vec<(String, StructuralMismatch)>,
    },

    /// The schema matched but one or more cells are invalid.
    #[error("schema '{schema}' matched but data is invalid: {} issue(s), first: {}", issues.len(), first_issue(issues))]
    InvalidData {
        schema: String,
        issues: Vec<ValueIssue>,
    },
}

fn first_issue(issues: &[ValueIssue]) -> String {
    issues.first().map(ToString::to_string).unwrap_or_default()
}

impl CsvxError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CsvxError::Schema(SchemaError::Io { .. }) => ErrorCategory::Io,
            CsvxError::Schema(_) => ErrorCategory::SchemaMalformed,
            CsvxError::Io(_) | CsvxError::Tokenize(TokenizeError::Io(_)) => ErrorCategory::Io,
            CsvxError::Tokenize(_) | CsvxError::InvalidData { .. } => ErrorCategory::DataInvalid,
            CsvxError::UnknownSchema(_)
            | CsvxError::Structure { .. }
            | CsvxError::NoSchemaMatched { .. } => ErrorCategory::NoSchemaMatched,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_distinguish_exit_statuses() {
        let invalid = CsvxError::InvalidData {
            schema: "s".into(),
            issues: vec![],
        };
        let unmatched = CsvxError::NoSchemaMatched {
            path: "a.csv".into(),
            attempts: vec![],
        };
        let malformed = CsvxError::Schema(SchemaError::DefaultTableRename);
        assert_eq!(invalid.exit_code(), 1);
        assert_eq!(unmatched.exit_code(), 2);
        assert_eq!(malformed.exit_code(), 3);
        assert_eq!(
            CsvxError::Io(std::io::Error::other("x")).category(),
            ErrorCategory::Io
        );
    }

    #[test]
    fn structural_mismatch_names_coordinate() {
        let e = StructuralMismatch::MissingInput {
            table: "t".into(),
            schema: Coordinate::new(1, 2),
            coordinate: Coordinate::new(4, 2),
        };
        let msg = e.to_string();
        assert!(msg.contains("(1, 2)"));
        assert!(msg.contains("(4, 2)"));
    }
}
