//! Validated output handed to downstream template/RDF emission.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use crate::error::ValueIssue;
use crate::schema::datatype::Datatype;
use crate::schema::entity::{EntityRef, Properties, TableId};
use crate::schema::fragment::ReusableFragment;
use crate::types::{Coordinate, Value};

use super::bindings::Bindings;

/// A fragment call with its arguments resolved and its output rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInvocation {
    /// Property key the call was written under.
    pub key: String,
    pub fragment: EntityRef,
    pub name: String,
    pub args: Vec<String>,
    pub output: String,
}

/// One validated input cell.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedCell {
    /// Physical input coordinate (record number, field index after skipped columns).
    pub input: Coordinate,
    /// Declaring schema coordinate.
    pub schema: Coordinate,
    /// Instance of a repeating row this cell belongs to; 0 for non-repeating rows.
    pub sub_row: usize,
    /// Instance of a repeating column; 0 for non-repeating columns.
    pub sub_col: usize,
    /// Field as tokenized.
    pub raw: String,
    /// Field after replace-value substitution.
    pub text: String,
    pub value: Value,
    pub datatype: Option<Datatype>,
    pub language: Option<String>,
    /// Names this cell is bound to as a variable.
    pub variables: Vec<String>,
    /// Effective properties with references expanded and fragment calls rendered.
    pub properties: Properties,
    pub invocations: Vec<ResolvedInvocation>,
    pub is_header: bool,
}

impl MatchedCell {
    /// Triples described by this cell: one per user property, plus `a <@maptype>`.
    ///
    /// The subject is the rendered `@id`; cells without one describe nothing. A property whose
    /// template is exactly `${.}` is typed with the cell's datatype and language.
    pub fn triples(&self, templates: &Properties) -> Vec<Triple> {
        let Some(subject) = self.properties.id.clone() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if let Some(map_type) = &self.properties.map_type {
            out.push(Triple {
                subject: subject.clone(),
                predicate: "a".to_string(),
                object: map_type.clone(),
                datatype: None,
                language: None,
            });
        }
        for (predicate, object) in &self.properties.extra {
            let is_self = templates.get(predicate).map(str::trim) == Some("${.}");
            out.push(Triple {
                subject: subject.clone(),
                predicate: predicate.clone(),
                object: object.clone(),
                datatype: is_self
                    .then(|| self.datatype.map(|d| d.name().to_string()))
                    .flatten(),
                language: is_self.then(|| self.language.clone()).flatten(),
            });
        }
        out
    }
}

/// One matched region of the input, validated against one table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTable {
    pub table: TableId,
    pub name: String,
    /// First record of the region.
    pub start_record: usize,
    /// Records consumed by the region.
    pub records: usize,
    /// Cells in input order.
    pub cells: Vec<MatchedCell>,
    /// Fragments visible from the table (table scope, then schema scope).
    pub fragments: Vec<ReusableFragment>,
}

impl ValidatedTable {
    pub fn cell_at(&self, input: Coordinate) -> Option<&MatchedCell> {
        self.cells.iter().find(|c| c.input == input)
    }

    /// Cells grouped by input record.
    pub fn rows(&self) -> BTreeMap<usize, Vec<&MatchedCell>> {
        let mut rows: BTreeMap<usize, Vec<&MatchedCell>> = BTreeMap::new();
        for cell in &self.cells {
            rows.entry(cell.input.row).or_default().push(cell);
        }
        rows
    }

    /// All cells that instantiate the schema cell at `schema`, in input order.
    pub fn instances_of(&self, schema: Coordinate) -> impl Iterator<Item = &MatchedCell> {
        self.cells.iter().filter(move |c| c.schema == schema)
    }

    /// Write the matched grid as CSV: one record per input record, substituted text per field.
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut w = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        for cells in self.rows().values() {
            let width = cells.iter().map(|c| c.input.col + 1).max().unwrap_or(0);
            let mut record = vec![""; width];
            for cell in cells {
                record[cell.input.col] = cell.text.as_str();
            }
            w.write_record(&record)?;
        }
        w.flush()?;
        Ok(())
    }
}

/// Result of matching one input file.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDataset {
    pub schema_id: String,
    pub path: Option<PathBuf>,
    pub tables: Vec<ValidatedTable>,
    pub bindings: Bindings,
}

impl ValidatedDataset {
    pub fn table(&self, name: &str) -> Option<&ValidatedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn cell_count(&self) -> usize {
        self.tables.iter().map(|t| t.cells.len()).sum()
    }

    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.records).sum()
    }
}

/// A matched dataset together with every value issue found.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub dataset: ValidatedDataset,
    pub issues: Vec<ValueIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// `(subject, predicate, object, datatype, language)` as handed to an RDF formatter.
///
/// `datatype` is an XSD type name; see [`Datatype::literal_suffix`] for the literal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entity::ID;

    fn cell(row: usize, col: usize, text: &str) -> MatchedCell {
        MatchedCell {
            input: Coordinate::new(row, col),
            schema: Coordinate::new(0, col),
            sub_row: row,
            sub_col: 0,
            raw: text.to_string(),
            text: text.to_string(),
            value: Value::Utf8(text.to_string()),
            datatype: None,
            language: None,
            variables: Vec::new(),
            properties: Properties::default(),
            invocations: Vec::new(),
            is_header: false,
        }
    }

    #[test]
    fn write_csv_fills_gaps() {
        let table = ValidatedTable {
            table: TableId(0),
            name: "t".into(),
            start_record: 0,
            records: 2,
            cells: vec![cell(0, 0, "a"), cell(0, 2, "c,d"), cell(1, 1, "x")],
            fragments: Vec::new(),
        };
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a,,\"c,d\"\n,x\n");
    }

    #[test]
    fn triples_type_self_references() {
        let mut c = cell(0, 0, "42");
        c.datatype = Some(Datatype::Integer);
        c.properties = Properties::new()
            .with(ID, "ex:s1")
            .with("@maptype", "ex:Station")
            .with("ex:height", "42")
            .with("ex:note", "fixed");
        let templates = Properties::new().with("ex:height", "${.}").with("ex:note", "fixed");
        let triples = c.triples(&templates);
        assert_eq!(triples.len(), 3);
        assert_eq!(triples[0].predicate, "a");
        let height = triples.iter().find(|t| t.predicate == "ex:height").unwrap();
        assert_eq!(height.datatype.as_deref(), Some("integer"));
        let note = triples.iter().find(|t| t.predicate == "ex:note").unwrap();
        assert_eq!(note.datatype, None);
    }
}
