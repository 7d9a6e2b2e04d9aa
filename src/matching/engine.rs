//! Structural matching: which table applies where, repeat expansion, cell placement.
//!
//! The engine pulls records from the tokenizer through a small look-ahead buffer. A table is
//! matched against the buffered records without consuming them; only a successful match commits
//! its records. There is no backtracking across committed regions.

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{StructuralMismatch, TokenizeError, ValueIssue};
use crate::schema::row::RowSchema;
use crate::schema::table::TableSchema;
use crate::schema::Schema;
use crate::tokenizer::Tokenizer;
use crate::types::{Coordinate, Value};

use super::bindings::{render_cell, Binding, Bindings};
use super::dataset::{MatchedCell, ValidatedDataset, ValidatedTable, ValidationReport};
use super::validate::{check_cell, identity_literal, is_unpopulated};
use super::ErrorPolicy;

/// Failure of one matching run.
#[derive(Debug)]
pub(crate) enum MatchError {
    Structure(StructuralMismatch),
    Tokenize(TokenizeError),
}

impl From<StructuralMismatch> for MatchError {
    fn from(e: StructuralMismatch) -> Self {
        MatchError::Structure(e)
    }
}

impl From<TokenizeError> for MatchError {
    fn from(e: TokenizeError) -> Self {
        MatchError::Tokenize(e)
    }
}

/// One input record after skipped rows/columns are removed.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    /// Physical record number in the file.
    pub index: usize,
    /// Position among the records the engine sees.
    pub ordinal: usize,
    pub fields: Vec<String>,
}

/// Look-ahead buffer over the tokenizer.
pub(crate) struct RecordCursor<R> {
    tokenizer: Tokenizer<R>,
    buffer: VecDeque<Record>,
    skip_rows: usize,
    skip_columns: usize,
    skip_blank_rows: bool,
    yielded: usize,
    exhausted: bool,
}

impl<R: BufRead> RecordCursor<R> {
    pub(crate) fn new(tokenizer: Tokenizer<R>, schema: &Schema) -> Self {
        let format = schema.format();
        Self {
            tokenizer,
            buffer: VecDeque::new(),
            skip_rows: format.skip_rows,
            skip_columns: format.skip_columns,
            skip_blank_rows: format.skip_blank_rows,
            yielded: 0,
            exhausted: false,
        }
    }

    fn fill(&mut self, len: usize) -> Result<(), TokenizeError> {
        while self.buffer.len() < len && !self.exhausted {
            let Some(mut fields) = self.tokenizer.next_record()? else {
                self.exhausted = true;
                break;
            };
            let index = self.tokenizer.records_read().saturating_sub(1);
            if self.skip_rows > 0 {
                self.skip_rows -= 1;
                continue;
            }
            if self.skip_blank_rows && fields.iter().all(String::is_empty) {
                continue;
            }
            fields.drain(..self.skip_columns.min(fields.len()));
            self.buffer.push_back(Record {
                index,
                ordinal: self.yielded,
                fields,
            });
            self.yielded += 1;
        }
        Ok(())
    }

    /// Record `offset` positions ahead of the current one.
    pub(crate) fn peek(&mut self, offset: usize) -> Result<Option<&Record>, TokenizeError> {
        self.fill(offset + 1)?;
        Ok(self.buffer.get(offset))
    }

    /// Physical number the record at `offset` has or would have.
    fn index_at(&mut self, offset: usize) -> Result<usize, TokenizeError> {
        self.fill(offset + 1)?;
        Ok(match self.buffer.get(offset) {
            Some(r) => r.index,
            None => self
                .buffer
                .back()
                .map(|r| r.index + 1 + (offset - self.buffer.len()))
                .unwrap_or_else(|| self.tokenizer.records_read() + offset - self.buffer.len()),
        })
    }

    fn commit(&mut self, count: usize) {
        self.buffer.drain(..count.min(self.buffer.len()));
    }
}

/// Cells and value issues of one row instance.
#[derive(Debug, Default)]
struct RowMatch {
    cells: Vec<MatchedCell>,
    issues: Vec<ValueIssue>,
}

/// A candidate table region, not yet committed.
struct RegionMatch {
    records: usize,
    cells: Vec<MatchedCell>,
    issues: Vec<ValueIssue>,
}

/// Outcome of checking a table's identity rows ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precheck {
    Recognised,
    Rejected,
    /// No identity row sits at a known offset, or only some of them matched.
    Undecided,
}

pub(crate) struct Matcher<'s, R> {
    schema: &'s Schema,
    cursor: RecordCursor<R>,
    policy: ErrorPolicy,
}

impl<'s, R: BufRead> Matcher<'s, R> {
    pub(crate) fn new(schema: &'s Schema, reader: R, policy: ErrorPolicy) -> Self {
        let tokenizer = Tokenizer::new(reader, schema.format().tokenizer_config());
        Self {
            schema,
            cursor: RecordCursor::new(tokenizer, schema),
            policy,
        }
    }

    /// Match the whole input, then bind variables and render properties.
    pub(crate) fn run(mut self, path: Option<&Path>) -> Result<ValidationReport, MatchError> {
        let schema = self.schema;
        if self.cursor.peek(0)?.is_none() {
            return Err(StructuralMismatch::EmptyInput.into());
        }

        let mut tables = Vec::new();
        let mut issues = Vec::new();
        while let Some(first) = self.cursor.peek(0)? {
            let start = first.index;
            let (table, region) = self.next_region()?;
            debug!(
                schema = schema.id(),
                table = table.name(),
                start_record = start,
                records = region.records,
                "matched table region"
            );
            if !region.issues.is_empty() {
                warn!(
                    schema = schema.id(),
                    table = table.name(),
                    issues = region.issues.len(),
                    "value issues in table region"
                );
            }
            self.cursor.commit(region.records);
            issues.extend(region.issues);
            tables.push(ValidatedTable {
                table: table.id(),
                name: table.name().to_string(),
                start_record: start,
                records: region.records,
                cells: region.cells,
                fragments: table
                    .fragments()
                    .iter()
                    .chain(schema.fragments().iter())
                    .cloned()
                    .collect(),
            });
            if self.policy == ErrorPolicy::AbortOnFirst && !issues.is_empty() {
                break;
            }
        }

        let mut bindings = Bindings::default();
        for (region, validated) in tables.iter().enumerate() {
            for cell in &validated.cells {
                let declared = schema
                    .table(validated.table)
                    .and_then(|t| t.cell(cell.schema));
                if let Some(declared) = declared.filter(|c| c.name().is_some()) {
                    bindings.bind(
                        declared.entity_ref(),
                        Binding {
                            region,
                            sub_row: cell.sub_row,
                            sub_col: cell.sub_col,
                            text: cell.text.clone(),
                        },
                    );
                }
            }
        }

        for (region, validated) in tables.iter_mut().enumerate() {
            let Some(table) = schema.table(validated.table) else {
                continue;
            };
            for matched in &mut validated.cells {
                let Some(declared) = table.cell(matched.schema) else {
                    continue;
                };
                for kind in render_cell(schema, declared, matched, region, &bindings) {
                    issues.push(ValueIssue {
                        table: validated.name.clone(),
                        coordinate: matched.input,
                        schema: matched.schema,
                        kind,
                    });
                }
            }
        }
        if self.policy == ErrorPolicy::AbortOnFirst {
            issues.truncate(1);
        }

        Ok(ValidationReport {
            dataset: ValidatedDataset {
                schema_id: schema.id().to_string(),
                path: path.map(Path::to_path_buf),
                tables,
                bindings,
            },
            issues,
        })
    }

    /// Pick the table that matches at the current record.
    ///
    /// Tables recognised by their identity rows go first, then tables that cannot be ruled out,
    /// each in declaration order. The first structural success wins.
    fn next_region(&mut self) -> Result<(&'s TableSchema, RegionMatch), MatchError> {
        let schema = self.schema;
        let mut recognised = Vec::new();
        let mut open = Vec::new();
        for table in schema.tables() {
            match self.precheck(table, 0)? {
                Precheck::Recognised => recognised.push(table),
                Precheck::Undecided => open.push(table),
                Precheck::Rejected => {}
            }
        }
        let record = self.cursor.index_at(0)?;
        debug!(
            record,
            recognised = recognised.len(),
            open = open.len(),
            "candidate tables"
        );

        let single = recognised.len() + open.len() == 1;
        let mut first_failure = None;
        for table in recognised.iter().chain(open.iter()).copied() {
            match self.match_table(table) {
                Ok(region) if region.records > 0 => return Ok((table, region)),
                Ok(_) => {}
                Err(MatchError::Structure(m)) => {
                    debug!(table = table.name(), mismatch = %m, "table rejected");
                    first_failure.get_or_insert(m);
                }
                Err(e) => return Err(e),
            }
        }
        Err(match first_failure {
            Some(m) if single || !recognised.is_empty() => m.into(),
            _ => StructuralMismatch::NoTableMatched { record }.into(),
        })
    }

    /// Check the identity rows of `table` that sit at a fixed offset from `pos`.
    fn precheck(&mut self, table: &'s TableSchema, pos: usize) -> Result<Precheck, TokenizeError> {
        if !table.has_identity_rows() {
            return Ok(Precheck::Undecided);
        }
        let skip_blank = self.schema.format().skip_blank_rows;
        let mut checked = false;
        for (declared, row) in table.rows().enumerate() {
            if row.is_identity_row() {
                let offset = pos + if skip_blank { declared } else { row.row_number() };
                let index = self.cursor.index_at(offset)?;
                let record = self.cursor.peek(offset)?;
                let recognised = record.is_some()
                    && validate_row(self.schema, table, row, record, index, 0)
                        .and_then(|m| require_identity(self.schema, table, row, &m))
                        .is_ok();
                // Once an earlier identity row matched, let the full match report what is wrong.
                if !recognised {
                    return Ok(if checked { Precheck::Undecided } else { Precheck::Rejected });
                }
                checked = true;
            }
            if row.repeat().is_repeating() {
                break;
            }
        }
        Ok(if checked {
            Precheck::Recognised
        } else {
            Precheck::Undecided
        })
    }

    /// Whether a new table region is recognised starting at `pos` while `row` of `current`
    /// repeats.
    ///
    /// A fresh section of `current` itself counts, unless `row` is one of its identity rows.
    fn section_starts(&mut self, current: &TableSchema, row: &RowSchema, pos: usize) -> Result<bool, TokenizeError> {
        let schema = self.schema;
        for table in schema.tables() {
            if table.id() == current.id() && row.is_identity_row() {
                continue;
            }
            if self.precheck(table, pos)? == Precheck::Recognised {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the row declared after `row` validates without issues at `pos`.
    fn next_row_fits(&mut self, table: &'s TableSchema, row: &RowSchema, pos: usize) -> Result<bool, TokenizeError> {
        let Some(next) = table.rows().find(|r| r.row_number() > row.row_number()) else {
            return Ok(false);
        };
        let index = self.cursor.index_at(pos)?;
        let record = self.cursor.peek(pos)?;
        Ok(validate_row(self.schema, table, next, record, index, 0).is_ok_and(|m| m.issues.is_empty()))
    }

    fn match_table(&mut self, table: &'s TableSchema) -> Result<RegionMatch, MatchError> {
        let schema = self.schema;
        let mut pos = 0;
        let mut expected_row = 0;
        let mut region = RegionMatch {
            records: 0,
            cells: Vec::new(),
            issues: Vec::new(),
        };

        let skip_blank = schema.format().skip_blank_rows;
        for row in table.rows() {
            // Blank records were already dropped by the cursor when skipping blank rows.
            while !skip_blank && expected_row < row.row_number() {
                if let Some(record) = self.cursor.peek(pos)? {
                    check_gap_record(schema, table, record)?;
                    pos += 1;
                }
                expected_row += 1;
            }

            let index = self.cursor.index_at(pos)?;
            let record = self.cursor.peek(pos)?;
            let present = record.is_some();
            let first = validate_row(schema, table, row, record, index, 0)?;
            if row.is_identity_row() {
                require_identity(schema, table, row, &first)?;
            }
            region.cells.extend(first.cells);
            region.issues.extend(first.issues);
            if present {
                pos += 1;
            }

            let aborted = self.policy == ErrorPolicy::AbortOnFirst && !region.issues.is_empty();
            if present && !aborted && row.repeat().is_repeating() {
                let max = row.repeat().max_occurrences();
                let mut sub_row = 1;
                while max.is_none_or(|m| sub_row < m) {
                    if self.section_starts(table, row, pos)? {
                        break;
                    }
                    let index = self.cursor.index_at(pos)?;
                    let Some(record) = self.cursor.peek(pos)? else {
                        break;
                    };
                    let Ok(instance) = validate_row(schema, table, row, Some(record), index, sub_row) else {
                        break;
                    };
                    if row.is_identity_row() && require_identity(schema, table, row, &instance).is_err() {
                        break;
                    }
                    // A record with bad values stays in the repeat unless the table's next row
                    // claims it cleanly.
                    if !instance.issues.is_empty() && self.next_row_fits(table, row, pos)? {
                        break;
                    }
                    region.cells.extend(instance.cells);
                    region.issues.extend(instance.issues);
                    pos += 1;
                    sub_row += 1;
                    if self.policy == ErrorPolicy::AbortOnFirst && !region.issues.is_empty() {
                        break;
                    }
                }
                debug!(
                    table = table.name(),
                    row = row.row_number(),
                    instances = sub_row,
                    "expanded repeating row"
                );
            }
            expected_row = row.row_number() + 1;

            if self.policy == ErrorPolicy::AbortOnFirst && !region.issues.is_empty() {
                break;
            }
        }

        region.records = pos;
        Ok(region)
    }
}

/// Records covering undeclared rows must carry no data.
fn check_gap_record(schema: &Schema, table: &TableSchema, record: &Record) -> Result<(), StructuralMismatch> {
    for (col, field) in record.fields.iter().enumerate() {
        if !is_unpopulated(schema, table, field) {
            return Err(StructuralMismatch::UnexpectedInput {
                table: table.name().to_string(),
                coordinate: Coordinate::new(record.index, col),
                value: field.clone(),
            });
        }
    }
    Ok(())
}

/// Identity rows must validate cleanly and reproduce their literal values.
fn require_identity(
    schema: &Schema,
    table: &TableSchema,
    row: &RowSchema,
    matched: &RowMatch,
) -> Result<(), StructuralMismatch> {
    if let Some(issue) = matched.issues.first() {
        return Err(StructuralMismatch::IdentityMismatch {
            table: table.name().to_string(),
            schema: issue.schema,
            coordinate: issue.coordinate,
            observed: issue.kind.to_string(),
        });
    }
    let fill = schema.empty_fill(table);
    for cell in row.cells() {
        let Some(literal) = identity_literal(cell) else {
            continue;
        };
        if cell.is_empty(fill) {
            continue;
        }
        match matched.cells.iter().find(|m| m.schema == cell.coordinate()) {
            Some(m) if m.text == literal => {}
            observed => {
                return Err(StructuralMismatch::IdentityMismatch {
                    table: table.name().to_string(),
                    schema: cell.coordinate(),
                    coordinate: observed.map_or(cell.coordinate(), |m| m.input),
                    observed: observed.map(|m| m.raw.clone()).unwrap_or_default(),
                });
            }
        }
    }
    Ok(())
}

/// Validate one row instance against `record` (or its absence at end of input).
fn validate_row(
    schema: &Schema,
    table: &TableSchema,
    row: &RowSchema,
    record: Option<&Record>,
    index: usize,
    sub_row: usize,
) -> Result<RowMatch, StructuralMismatch> {
    let fill = schema.empty_fill(table);
    let mut out = RowMatch::default();

    let Some(record) = record else {
        for cell in row.cells() {
            if !cell.is_empty(fill) {
                return Err(StructuralMismatch::MissingInput {
                    table: table.name().to_string(),
                    schema: cell.coordinate(),
                    coordinate: Coordinate::new(index, cell.coordinate().col),
                });
            }
        }
        return Ok(out);
    };

    let fields = &record.fields;
    let last_col = table.last_col();
    let mut pos = 0;

    if let Some(last_col) = last_col {
        for col in 0..=last_col {
            let cell = row.cell(col);
            let repeat = table.column_repeat(col);
            let max = repeat.max_occurrences();
            let reserve = (col + 1..=last_col)
                .filter(|c| row.cell(*c).is_some_and(|cell| !cell.is_empty(fill)))
                .count();

            let mut sub_col = 0;
            while max.is_none_or(|m| sub_col < m) {
                let field = fields.get(pos);
                if sub_col > 0 {
                    let Some(raw) = field else { break };
                    if fields.len() - pos <= reserve {
                        break;
                    }
                    let accepted = match cell {
                        Some(cell) => check_cell(schema, table, cell, raw).1.is_ok(),
                        None => is_unpopulated(schema, table, raw),
                    };
                    if !accepted {
                        break;
                    }
                }

                match (cell, field) {
                    (Some(cell), Some(raw)) => {
                        let input = Coordinate::new(record.index, pos);
                        let (text, result) = check_cell(schema, table, cell, raw);
                        let value = match result {
                            Ok(value) => value,
                            Err(kind) => {
                                out.issues.push(ValueIssue {
                                    table: table.name().to_string(),
                                    coordinate: input,
                                    schema: cell.coordinate(),
                                    kind,
                                });
                                Value::Utf8(text.to_string())
                            }
                        };
                        out.cells.push(MatchedCell {
                            input,
                            schema: cell.coordinate(),
                            sub_row,
                            sub_col,
                            raw: raw.clone(),
                            text: text.to_string(),
                            value,
                            datatype: cell.datatype(),
                            language: cell.language().map(str::to_string),
                            variables: cell.name().map(str::to_string).into_iter().collect(),
                            properties: cell.effective().clone(),
                            invocations: Vec::new(),
                            is_header: record.ordinal < schema.format().header_row_count,
                        });
                    }
                    (Some(cell), None) => {
                        if !cell.is_empty(fill) {
                            return Err(StructuralMismatch::MissingInput {
                                table: table.name().to_string(),
                                schema: cell.coordinate(),
                                coordinate: Coordinate::new(record.index, pos),
                            });
                        }
                    }
                    (None, Some(raw)) => {
                        if !is_unpopulated(schema, table, raw) {
                            return Err(StructuralMismatch::UnexpectedInput {
                                table: table.name().to_string(),
                                coordinate: Coordinate::new(record.index, pos),
                                value: raw.clone(),
                            });
                        }
                    }
                    (None, None) => {}
                }

                if field.is_none() || !repeat.is_repeating() {
                    if field.is_some() {
                        pos += 1;
                    }
                    break;
                }
                pos += 1;
                sub_col += 1;
            }
        }
    }

    for (col, raw) in fields.iter().enumerate().skip(pos) {
        if !is_unpopulated(schema, table, raw) {
            return Err(StructuralMismatch::UnexpectedInput {
                table: table.name().to_string(),
                coordinate: Coordinate::new(record.index, col),
                value: raw.clone(),
            });
        }
    }
    Ok(out)
}
