use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CsvxError, ErrorCategory};
use crate::types::Coordinate;

use super::dataset::ValidatedDataset;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the file was rejected).
    Error,
    /// Critical error (I/O or other infrastructure failures).
    Critical,
}

impl From<ErrorCategory> for ValidationSeverity {
    fn from(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Io => ValidationSeverity::Critical,
            ErrorCategory::SchemaMalformed | ErrorCategory::NoSchemaMatched | ErrorCategory::DataInvalid => {
                ValidationSeverity::Error
            }
        }
    }
}

/// Context about one validation attempt.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// The input file.
    pub path: PathBuf,
    /// Schema the input was validated against, when one was selected or matched.
    pub schema: Option<String>,
}

/// One matched table region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionStats {
    pub table: String,
    /// First physical record of the region.
    pub start_record: usize,
    pub records: usize,
    pub cells: usize,
}

/// Per-section counts reported on a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationStats {
    /// Matched regions in input order; a table appears once per section.
    pub sections: Vec<SectionStats>,
}

impl ValidationStats {
    pub fn from_dataset(ds: &ValidatedDataset) -> Self {
        Self {
            sections: ds
                .tables
                .iter()
                .map(|t| SectionStats {
                    table: t.name.clone(),
                    start_record: t.start_record,
                    records: t.records,
                    cells: t.cells.len(),
                })
                .collect(),
        }
    }

    pub fn tables(&self) -> usize {
        self.sections.len()
    }

    pub fn records(&self) -> usize {
        self.sections.iter().map(|s| s.records).sum()
    }

    pub fn cells(&self) -> usize {
        self.sections.iter().map(|s| s.cells).sum()
    }

    /// Number of sections matched to `table`.
    pub fn sections_of(&self, table: &str) -> usize {
        self.sections.iter().filter(|s| s.table == table).count()
    }
}

/// A rejected file, classified for reporting.
#[derive(Debug, Clone, Copy)]
pub struct ValidationFailure<'a> {
    pub error: &'a CsvxError,
    pub category: ErrorCategory,
    pub severity: ValidationSeverity,
}

impl<'a> ValidationFailure<'a> {
    pub fn new(error: &'a CsvxError) -> Self {
        let category = error.category();
        Self {
            error,
            category,
            severity: category.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    /// Table and input coordinate the failure points at, when it points at one place.
    ///
    /// Invalid data points at its first issue; a structural failure at its mismatch.
    pub fn location(&self) -> Option<(Option<&'a str>, Coordinate)> {
        match self.error {
            CsvxError::InvalidData { issues, .. } => {
                issues.first().map(|i| (Some(i.table.as_str()), i.coordinate))
            }
            CsvxError::Structure { mismatch, .. } => mismatch.coordinate().map(|c| (mismatch.table(), c)),
            _ => None,
        }
    }

    /// Value issues carried by the failure.
    pub fn issue_count(&self) -> usize {
        match self.error {
            CsvxError::InvalidData { issues, .. } => issues.len(),
            _ => 0,
        }
    }

    fn location_label(&self) -> String {
        match self.location() {
            Some((Some(table), at)) => format!("{table}:{}:{}", at.row, at.col),
            Some((None, at)) => format!("{}:{}", at.row, at.col),
            None => "-".to_string(),
        }
    }
}

/// Observer interface for validation outcomes.
pub trait ValidationObserver: Send + Sync {
    /// Called when a file validates.
    fn on_success(&self, _ctx: &ValidationContext, _stats: &ValidationStats) {}

    /// Called when a file is rejected.
    fn on_failure(&self, _ctx: &ValidationContext, _failure: &ValidationFailure<'_>) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &ValidationContext, failure: &ValidationFailure<'_>) {
        self.on_failure(ctx, failure)
    }
}

/// Several observers share one run.
impl ValidationObserver for Vec<Arc<dyn ValidationObserver>> {
    fn on_success(&self, ctx: &ValidationContext, stats: &ValidationStats) {
        self.iter().for_each(|o| o.on_success(ctx, stats));
    }

    fn on_failure(&self, ctx: &ValidationContext, failure: &ValidationFailure<'_>) {
        self.iter().for_each(|o| o.on_failure(ctx, failure));
    }

    fn on_alert(&self, ctx: &ValidationContext, failure: &ValidationFailure<'_>) {
        self.iter().for_each(|o| o.on_alert(ctx, failure));
    }
}

/// Emits validation events as `tracing` events under the `csvx` target.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ValidationObserver for TracingObserver {
    fn on_success(&self, ctx: &ValidationContext, stats: &ValidationStats) {
        tracing::info!(
            target: "csvx",
            path = %ctx.path.display(),
            schema = ctx.schema.as_deref().unwrap_or("-"),
            sections = %section_list(stats),
            records = stats.records(),
            cells = stats.cells(),
            "validated"
        );
    }

    fn on_failure(&self, ctx: &ValidationContext, failure: &ValidationFailure<'_>) {
        tracing::warn!(
            target: "csvx",
            path = %ctx.path.display(),
            schema = ctx.schema.as_deref().unwrap_or("-"),
            category = %failure.category,
            at = %failure.location_label(),
            issues = failure.issue_count(),
            error = %failure.error,
            "validation failed"
        );
    }

    fn on_alert(&self, ctx: &ValidationContext, failure: &ValidationFailure<'_>) {
        tracing::error!(
            target: "csvx",
            path = %ctx.path.display(),
            schema = ctx.schema.as_deref().unwrap_or("-"),
            category = %failure.category,
            severity = ?failure.severity,
            error = %failure.error,
            "validation alert"
        );
    }
}

/// Appends one line per validated or rejected file to a log.
///
/// Success lines list the matched sections as `table@start+records`; failure lines carry the
/// category, exit status and location. Writes are best-effort.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", unix_ts());
        }
    }

    fn failure_line(tag: &str, ctx: &ValidationContext, failure: &ValidationFailure<'_>) -> String {
        format!(
            "{tag} severity={:?} category={} exit={} schema={} path={} at={} err={}",
            failure.severity,
            failure.category,
            failure.exit_code(),
            ctx.schema.as_deref().unwrap_or("-"),
            ctx.path.display(),
            failure.location_label(),
            failure.error
        )
    }
}

impl ValidationObserver for FileObserver {
    fn on_success(&self, ctx: &ValidationContext, stats: &ValidationStats) {
        self.append_line(&format!(
            "ok schema={} path={} tables={} records={} cells={} sections={}",
            ctx.schema.as_deref().unwrap_or("-"),
            ctx.path.display(),
            stats.tables(),
            stats.records(),
            stats.cells(),
            section_list(stats)
        ));
    }

    fn on_failure(&self, ctx: &ValidationContext, failure: &ValidationFailure<'_>) {
        self.append_line(&Self::failure_line("fail", ctx, failure));
    }

    fn on_alert(&self, ctx: &ValidationContext, failure: &ValidationFailure<'_>) {
        self.append_line(&Self::failure_line("ALERT", ctx, failure));
    }
}

fn section_list(stats: &ValidationStats) -> String {
    stats
        .sections
        .iter()
        .map(|s| format!("{}@{}+{}", s.table, s.start_record, s.records))
        .collect::<Vec<_>>()
        .join(",")
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StructuralMismatch, ValueIssue, ValueIssueKind};

    #[test]
    fn failure_points_at_first_issue_or_mismatch() {
        let invalid = CsvxError::InvalidData {
            schema: "s".into(),
            issues: vec![ValueIssue {
                table: "data".into(),
                coordinate: Coordinate::new(4, 2),
                schema: Coordinate::new(1, 2),
                kind: ValueIssueKind::NotEmpty { observed: "x".into() },
            }],
        };
        let f = ValidationFailure::new(&invalid);
        assert_eq!(f.severity, ValidationSeverity::Error);
        assert_eq!(f.exit_code(), 1);
        assert_eq!(f.location(), Some((Some("data"), Coordinate::new(4, 2))));
        assert_eq!(f.issue_count(), 1);

        let unmatched = CsvxError::Structure {
            schema: "s".into(),
            mismatch: StructuralMismatch::NoTableMatched { record: 7 },
        };
        assert_eq!(
            ValidationFailure::new(&unmatched).location(),
            Some((None, Coordinate::new(7, 0)))
        );

        let io = CsvxError::Io(std::io::Error::other("disk"));
        let f = ValidationFailure::new(&io);
        assert_eq!(f.severity, ValidationSeverity::Critical);
        assert_eq!(f.location(), None);
        assert_eq!(f.location_label(), "-");
    }

    #[test]
    fn stats_count_sections_per_table() {
        let stats = ValidationStats {
            sections: vec![
                SectionStats { table: "a".into(), start_record: 0, records: 2, cells: 3 },
                SectionStats { table: "b".into(), start_record: 2, records: 1, cells: 1 },
                SectionStats { table: "a".into(), start_record: 3, records: 4, cells: 5 },
            ],
        };
        assert_eq!(stats.tables(), 3);
        assert_eq!(stats.sections_of("a"), 2);
        assert_eq!(stats.records(), 7);
        assert_eq!(stats.cells(), 9);
        assert_eq!(section_list(&stats), "a@0+2,b@2+1,a@3+4");
    }
}
