//! Schema source (JSON) → schema object graph.
//!
//! ```json
//! {
//!   "@id": "stations",
//!   "delimiter": ";",
//!   "missingValue": "NA",
//!   "targetFiles": ["station-*.csv"],
//!   "tables": {
//!     "header": { "rows": { "0": { "@isIdentityRow": true, "cols": ["Station", { "@name": "station" }] } } },
//!     "data":   { "rows": { "0": { "@repeat": true, "cols": { "0": { "@datatype": "date" }, "1-3": { "@regex": "\\d" } } } } }
//!   }
//! }
//! ```
//!
//! Row and column keys are selectors (`"3"`, `"1-4"`, `"0,2,5"`). A schema with top-level `rows`
//! and no `tables` gets a single `@default` table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::SchemaError;
use crate::tokenizer::{LineSeparator, QuoteHandling};
use crate::types::{Coordinate, IndexSelector, Repeat};

use super::entity::{EntityRef, Properties, Scope, TableId, LANG, VALUE};
use super::fragment::{FragmentKind, ReusableFragment};
use super::{FormatOptions, Schema, Trim};

const REPEAT: &str = "@repeat";
const IDENTITY: &str = "@isIdentityRow";
const COLS: &str = "cols";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    delimiter: Option<String>,
    collapse_delimiters: Option<bool>,
    quote_char: Option<String>,
    escape_char: Option<String>,
    double_quote: Option<bool>,
    #[serde(alias = "lineTerminator")]
    line_separator: Option<String>,
    encoding: Option<String>,
    header: Option<bool>,
    header_row_count: Option<usize>,
    skip_rows: Option<usize>,
    skip_columns: Option<usize>,
    skip_blank_rows: Option<bool>,
    trim: Option<Json>,
    quote_handling: Option<String>,
    keep_quotes: Option<bool>,
    keep_escape: Option<bool>,

    #[serde(default)]
    replace_values: HashMap<String, String>,
    missing_value: Option<String>,
    #[serde(default)]
    target_files: Vec<String>,

    #[serde(default)]
    tables: Map<String, Json>,
    rows: Option<Map<String, Json>>,
    #[serde(default)]
    columns: Map<String, Json>,
    #[serde(flatten)]
    fragments: RawFragments,

    /// `@`-prefixed schema properties.
    #[serde(flatten)]
    extra: Map<String, Json>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTable {
    #[serde(default)]
    rows: Map<String, Json>,
    #[serde(default)]
    columns: Map<String, Json>,
    empty_cell_fill: Option<String>,
    #[serde(default)]
    replace_values: HashMap<String, String>,
    #[serde(default)]
    common_properties: Map<String, Json>,
    #[serde(flatten)]
    fragments: RawFragments,
    #[serde(flatten)]
    extra: Map<String, Json>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFragments {
    #[serde(default)]
    templates: Map<String, Json>,
    #[serde(default)]
    functions: Map<String, Json>,
    #[serde(default)]
    properties: Map<String, Json>,
}

/// A fragment is either its body alone or an object with parameters.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFragment {
    Body(String),
    Full {
        #[serde(default, alias = "parameters")]
        params: Vec<String>,
        body: String,
        #[serde(flatten)]
        extra: Map<String, Json>,
    },
}

/// Parse a schema from JSON text. The id comes from `@id`, else a generated one.
pub fn load_schema_from_str(source: &str) -> Result<Schema, SchemaError> {
    build_schema(source, "<string>", None)
}

/// Read and parse one schema file. Without `@id`, the file stem is the schema id.
pub fn load_schema_from_path(path: impl AsRef<Path>) -> Result<Schema, SchemaError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
    build_schema(&source, &path.display().to_string(), stem)
}

/// Load every schema reachable from `paths`: files, directories (`*.json`, recursively) and
/// glob patterns.
pub fn load_schemas<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Schema>, SchemaError> {
    let mut schemas = Vec::new();
    for file in expand_schema_paths(paths)? {
        schemas.push(load_schema_from_path(&file)?);
    }
    Ok(schemas)
}

/// Resolve files, directories and glob patterns into a sorted, de-duplicated file list.
pub fn expand_schema_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>, SchemaError> {
    let mut out = Vec::new();
    for p in paths {
        let p = p.as_ref();
        if p.is_dir() {
            for entry in WalkDir::new(p).sort_by_file_name() {
                let entry = entry?;
                let is_json = entry
                    .path()
                    .extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("json"));
                if entry.file_type().is_file() && is_json {
                    out.push(entry.into_path());
                }
            }
        } else if !p.exists() && is_glob(p) {
            for entry in glob::glob(&p.to_string_lossy())? {
                let file = entry.map_err(|e| SchemaError::Io {
                    path: e.path().to_path_buf(),
                    source: e.into_error(),
                })?;
                if file.is_file() {
                    out.push(file);
                }
            }
        } else {
            out.push(p.to_path_buf());
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

fn is_glob(path: &Path) -> bool {
    path.to_string_lossy().contains(['*', '?', '['])
}

fn build_schema(source: &str, origin: &str, fallback_id: Option<String>) -> Result<Schema, SchemaError> {
    let raw: RawSchema = serde_json::from_str(source).map_err(|source| SchemaError::Json {
        origin: origin.to_string(),
        source,
    })?;

    let schema_props = properties_from(&raw.extra, origin, &[])?;
    let id = schema_props
        .id
        .clone()
        .or(fallback_id)
        .unwrap_or_else(|| format!("schema-{}", uuid::Uuid::new_v4()));

    let mut schema = Schema::new(id);
    schema.format = format_options(&raw, origin)?;
    schema.format.language = schema_props.language.clone();
    schema.replace_values = raw.replace_values;
    schema.missing_value = raw.missing_value;
    schema.target_files = raw.target_files;
    let schema_name = schema_props.name.clone();
    schema.properties = schema_props;
    schema.properties.name = None;
    if let Some(name) = schema_name {
        schema.rename(&EntityRef::Schema, &name)?;
    }

    add_fragments(&mut schema, &raw.fragments, Scope::Schema, origin)?;

    if let Some(rows) = &raw.rows {
        let table = schema.default_table()?;
        declare_columns(&mut schema, table, &raw.columns, origin)?;
        declare_rows(&mut schema, table, rows, origin)?;
    } else if !raw.columns.is_empty() {
        return Err(SchemaError::Invalid {
            at: origin.to_string(),
            message: "top-level 'columns' requires top-level 'rows'".to_string(),
        });
    }

    for (name, body) in &raw.tables {
        let at = format!("{origin}: table '{name}'");
        let table: RawTable = serde_json::from_value(body.clone()).map_err(|source| SchemaError::Json {
            origin: at.clone(),
            source,
        })?;
        let id = schema.add_table(Some(name))?;
        build_table(&mut schema, id, table, &at)?;
    }

    if schema.tables().is_empty() {
        return Err(SchemaError::Invalid {
            at: origin.to_string(),
            message: "schema declares no tables and no rows".to_string(),
        });
    }

    schema.finalize()?;
    info!(
        schema = schema.id(),
        tables = schema.tables().len(),
        origin,
        "loaded schema"
    );
    Ok(schema)
}

fn build_table(schema: &mut Schema, id: TableId, raw: RawTable, at: &str) -> Result<(), SchemaError> {
    let mut props = properties_from(&raw.extra, at, &[])?;
    props.name = None;
    let common = properties_from(&raw.common_properties, at, &[])?;
    if let Some(table) = schema.tables.get_mut(id.index()) {
        let name = table.properties.name.take();
        table.properties = props;
        table.properties.name = name;
        table.empty_cell_fill = raw.empty_cell_fill;
        table.replace_values = raw.replace_values;
        table.common_properties = common;
    }
    add_fragments(schema, &raw.fragments, Scope::Table(id), at)?;
    declare_columns(schema, id, &raw.columns, at)?;
    declare_rows(schema, id, &raw.rows, at)?;
    debug!(table = at, rows = raw.rows.len(), "declared table");
    Ok(())
}

fn declare_columns(
    schema: &mut Schema,
    table: TableId,
    columns: &Map<String, Json>,
    at: &str,
) -> Result<(), SchemaError> {
    for (key, body) in columns {
        let at = format!("{at}: columns '{key}'");
        let selector = selector(key, &at)?;
        let obj = body.as_object().ok_or_else(|| invalid(&at, "column must be an object"))?;
        let repeat = obj.get(REPEAT).map(|v| repeat_from(v, &at)).transpose()?;
        let props = properties_from(obj, &at, &[REPEAT])?;
        for &col in selector.indexes() {
            schema.declare_column(table, col, repeat, &props)?;
        }
    }
    Ok(())
}

fn declare_rows(
    schema: &mut Schema,
    table: TableId,
    rows: &Map<String, Json>,
    at: &str,
) -> Result<(), SchemaError> {
    for (key, body) in rows {
        let at = format!("{at}: rows '{key}'");
        let selector = selector(key, &at)?;
        let (repeat, identity, props, cols) = match body {
            Json::Array(_) => (None, None, Properties::default(), Some(body)),
            Json::Object(obj) => {
                let repeat = obj.get(REPEAT).map(|v| repeat_from(v, &at)).transpose()?;
                let identity = obj
                    .get(IDENTITY)
                    .map(|v| v.as_bool().ok_or_else(|| invalid(&at, "@isIdentityRow must be a boolean")))
                    .transpose()?;
                let props = properties_from(obj, &at, &[REPEAT, IDENTITY, COLS])?;
                (repeat, identity, props, obj.get(COLS))
            }
            _ => return Err(invalid(&at, "row must be an object or an array of cells")),
        };
        for &row in selector.indexes() {
            schema.declare_row(table, row, repeat, identity, &props)?;
            if let Some(cols) = cols {
                declare_cells(schema, table, row, cols, &at)?;
            }
        }
    }
    Ok(())
}

fn declare_cells(schema: &mut Schema, table: TableId, row: usize, cols: &Json, at: &str) -> Result<(), SchemaError> {
    let fill = schema
        .table(table)
        .map(|t| schema.empty_fill(t).to_string())
        .unwrap_or_default();
    match cols {
        Json::Array(cells) => {
            for (col, cell) in cells.iter().enumerate() {
                let props = cell_properties(cell, &fill, &format!("{at}: col {col}"))?;
                schema.declare_cell(table, Coordinate::new(row, col), &props)?;
            }
        }
        Json::Object(cells) => {
            for (key, cell) in cells {
                let at = format!("{at}: cols '{key}'");
                let props = cell_properties(cell, &fill, &at)?;
                for &col in selector(key, &at)?.indexes() {
                    schema.declare_cell(table, Coordinate::new(row, col), &props)?;
                }
            }
        }
        _ => return Err(invalid(at, "'cols' must be an array or an object")),
    }
    Ok(())
}

/// `null` is an Empty cell, a string is a literal `@value`, an object is a property bag.
fn cell_properties(cell: &Json, fill: &str, at: &str) -> Result<Properties, SchemaError> {
    match cell {
        Json::Null => Ok(Properties::new().with(VALUE, fill)),
        Json::String(s) => Ok(Properties::new().with(VALUE, s.as_str())),
        Json::Object(obj) => properties_from(obj, at, &[]),
        other => Ok(Properties::new().with(VALUE, other.to_string())),
    }
}

fn add_fragments(schema: &mut Schema, raw: &RawFragments, scope: Scope, at: &str) -> Result<(), SchemaError> {
    let groups = [
        (FragmentKind::Property, &raw.properties),
        (FragmentKind::Template, &raw.templates),
        (FragmentKind::Function, &raw.functions),
    ];
    for (kind, entries) in groups {
        for (name, body) in entries {
            let at = format!("{at}: {} '{name}'", kind.as_str());
            let parsed: RawFragment = serde_json::from_value(body.clone()).map_err(|source| SchemaError::Json {
                origin: at.clone(),
                source,
            })?;
            let fragment = match parsed {
                RawFragment::Body(body) => ReusableFragment::new(kind, name, Vec::new(), body, scope),
                RawFragment::Full { params, body, extra } => {
                    ReusableFragment::new(kind, name, params, body, scope)
                        .with_properties(properties_from(&extra, &at, &[])?)
                }
            };
            schema.add_fragment(fragment)?;
        }
    }
    Ok(())
}

fn format_options(raw: &RawSchema, at: &str) -> Result<FormatOptions, SchemaError> {
    let mut format = FormatOptions::default();
    if let Some(d) = &raw.delimiter {
        if d == "whitespace" {
            format.delimiter = ' ';
            format.collapse_delimiters = true;
        } else {
            format.delimiter = single_char(d, "delimiter", at)?;
        }
    }
    if let Some(c) = raw.collapse_delimiters {
        format.collapse_delimiters = c;
    }
    if let Some(q) = &raw.quote_char {
        format.quote_char = single_char(q, "quoteChar", at)?;
    }
    if let Some(e) = &raw.escape_char {
        format.escape_char = Some(single_char(e, "escapeChar", at)?);
    }
    if let Some(d) = raw.double_quote {
        format.double_quote = d;
    }
    if let Some(sep) = &raw.line_separator {
        format.line_separator = LineSeparator::from_text(sep)
            .ok_or_else(|| invalid(at, format!("unsupported lineSeparator {sep:?}")))?;
    }
    if let Some(label) = &raw.encoding {
        format.encoding = encoding_rs::Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| SchemaError::UnknownEncoding(label.clone()))?;
    }
    format.header_row_count = match raw.header {
        Some(true) => raw.header_row_count.unwrap_or(1),
        Some(false) => 0,
        None => raw.header_row_count.unwrap_or(0),
    };
    format.skip_rows = raw.skip_rows.unwrap_or(0);
    format.skip_columns = raw.skip_columns.unwrap_or(0);
    if let Some(skip) = raw.skip_blank_rows {
        format.skip_blank_rows = skip;
    }
    if let Some(trim) = &raw.trim {
        format.trim = match trim {
            Json::Bool(true) => Trim::Both,
            Json::Bool(false) => Trim::None,
            Json::String(s) => match s.as_str() {
                "start" => Trim::Start,
                "end" => Trim::End,
                "both" | "true" => Trim::Both,
                "none" | "false" => Trim::None,
                other => return Err(invalid(at, format!("unsupported trim {other:?}"))),
            },
            other => return Err(invalid(at, format!("unsupported trim {other}"))),
        };
    }
    if let Some(name) = &raw.quote_handling {
        format.quote_handling = QuoteHandling::from_name(name)
            .ok_or_else(|| invalid(at, format!("unknown quoteHandling '{name}'")))?;
    }
    if let Some(k) = raw.keep_quotes {
        format.keep_quotes = k;
    }
    if let Some(k) = raw.keep_escape {
        format.keep_escape = k;
    }
    Ok(format)
}

/// Convert a JSON object into a property bag, skipping structural keys.
fn properties_from(obj: &Map<String, Json>, at: &str, skip: &[&str]) -> Result<Properties, SchemaError> {
    let mut props = Properties::new();
    for (key, value) in obj {
        if skip.contains(&key.as_str()) {
            continue;
        }
        match value {
            Json::Null => {}
            Json::String(s) => props.set(key, s.as_str()),
            Json::Number(n) => props.set(key, n.to_string()),
            Json::Bool(b) => props.set(key, b.to_string()),
            _ => return Err(invalid(at, format!("property '{key}' must be a scalar"))),
        }
    }
    if props.name.as_deref().is_some_and(|n| n.starts_with('@')) {
        return Err(invalid(at, "names beginning with '@' are reserved"));
    }
    if let Some(lang) = &props.language {
        if lang.is_empty() {
            return Err(invalid(at, format!("{LANG} must not be empty")));
        }
    }
    Ok(props)
}

fn repeat_from(value: &Json, at: &str) -> Result<Repeat, SchemaError> {
    match value {
        Json::Bool(true) => Ok(Repeat::Unbounded),
        Json::Bool(false) => Ok(Repeat::None),
        Json::Number(n) => match n.as_u64() {
            Some(0) | None => Err(invalid(at, format!("{REPEAT} must be a positive integer or a boolean"))),
            Some(1) => Ok(Repeat::None),
            Some(n) => Ok(Repeat::Fixed(n as usize)),
        },
        _ => Err(invalid(at, format!("{REPEAT} must be a positive integer or a boolean"))),
    }
}

fn selector(key: &str, at: &str) -> Result<IndexSelector, SchemaError> {
    key.parse::<IndexSelector>().map_err(|message| invalid(at, message))
}

fn single_char(text: &str, option: &str, at: &str) -> Result<char, SchemaError> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(invalid(at, format!("{option} must be a single character, got {text:?}"))),
    }
}

fn invalid(at: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        at: at.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::datatype::Datatype;

    const SOURCE: &str = r#"{
        "@id": "stations",
        "@lang": "en",
        "delimiter": ";",
        "missingValue": "NA",
        "replaceValues": { "n/a": "NA" },
        "targetFiles": ["station-*.csv"],
        "templates": { "label": { "params": ["x"], "body": "Station {x}" } },
        "tables": {
            "header": {
                "rows": {
                    "0": { "@isIdentityRow": true, "cols": ["Station", { "@name": "station", "@regex": "^[A-Z]+$" }] }
                }
            },
            "data": {
                "columns": { "1": { "@datatype": "decimal" } },
                "rows": {
                    "0": { "@repeat": true, "cols": { "0": { "@datatype": "date" }, "1-2": { "unit": "mm" } } }
                }
            }
        }
    }"#;

    #[test]
    fn loads_tables_rows_and_dialect() {
        let schema = load_schema_from_str(SOURCE).unwrap();
        assert_eq!(schema.id(), "stations");
        assert_eq!(schema.format().delimiter, ';');
        assert_eq!(schema.format().language.as_deref(), Some("en"));
        assert_eq!(schema.missing_value(), Some("NA"));
        assert_eq!(schema.tables().len(), 2);

        let header = schema.table_by_name("header").unwrap();
        assert!(header.row(0).unwrap().is_identity_row());
        assert_eq!(
            header.cell(Coordinate::new(0, 0)).unwrap().properties().value.as_deref(),
            Some("Station")
        );

        let data = schema.table_by_name("data").unwrap();
        assert_eq!(data.row(0).unwrap().repeat(), Repeat::Unbounded);
        let c2 = data.cell(Coordinate::new(0, 2)).unwrap();
        assert_eq!(c2.properties().get("unit"), Some("mm"));
        assert_eq!(data.cell(Coordinate::new(0, 1)).unwrap().datatype(), Some(Datatype::Decimal));
        assert_eq!(c2.language(), Some("en"));
        assert_eq!(schema.fragments().len(), 1);
    }

    #[test]
    fn top_level_rows_make_a_default_table() {
        let schema = load_schema_from_str(r#"{ "rows": { "0": ["a", null] } }"#).unwrap();
        let table = &schema.tables()[0];
        assert!(table.is_default());
        assert!(table.cell(Coordinate::new(0, 1)).unwrap().is_empty(""));
        assert!(!table.cell(Coordinate::new(0, 0)).unwrap().is_empty(""));
    }

    #[test]
    fn null_cell_uses_the_table_fill() {
        let schema = load_schema_from_str(
            r#"{ "tables": { "t": { "emptyCellFill": "-", "rows": { "0": [null] } } } }"#,
        )
        .unwrap();
        let table = schema.table_by_name("t").unwrap();
        assert!(table.cell(Coordinate::new(0, 0)).unwrap().is_empty("-"));
    }

    #[test]
    fn authoring_errors() {
        for (source, what) in [
            (r#"{ "rows": { "0": [{ "@datatype": "nope" }] } }"#, "datatype"),
            (r#"{ "rows": { "0": [{ "@regex": "(" }] } }"#, "regex"),
            (r#"{ "rows": { "x": [] } }"#, "selector"),
            (r#"{ "rows": { "0": { "@repeat": 0 } } }"#, "repeat"),
            (r#"{ "delimiter": ";;", "rows": {} }"#, "delimiter"),
            (r#"{ "encoding": "klingon", "rows": {} }"#, "encoding"),
            (r#"{ "rows": { "0": [{ "@name": "a" }, { "@name": "a" }] } }"#, "duplicate"),
            (r#"{ "tables": { "@t": { "rows": {} } } }"#, "reserved"),
            (r#"{ }"#, "no tables"),
            (r#"{ "rows": "#, "json"),
        ] {
            assert!(load_schema_from_str(source).is_err(), "expected {what} error");
        }
    }

    #[test]
    fn selector_statements_merge_later_wins() {
        let schema = load_schema_from_str(
            r#"{ "rows": { "0-1": { "cols": { "0-2": { "@regex": "a" } } }, "1": { "cols": { "1": { "@regex": "b" } } } } }"#,
        )
        .unwrap();
        let t = &schema.tables()[0];
        assert_eq!(t.cell(Coordinate::new(1, 1)).unwrap().properties().regex.as_deref(), Some("b"));
        assert_eq!(t.cell(Coordinate::new(1, 2)).unwrap().properties().regex.as_deref(), Some("a"));
        assert_eq!(t.cell(Coordinate::new(0, 1)).unwrap().properties().regex.as_deref(), Some("a"));
    }

    #[test]
    fn header_and_whitespace_options() {
        let schema = load_schema_from_str(
            r#"{ "delimiter": "whitespace", "header": true, "trim": "start", "quoteHandling": "raiseError", "rows": { "0": ["h"] } }"#,
        )
        .unwrap();
        let f = schema.format();
        assert_eq!(f.delimiter, ' ');
        assert!(f.collapse_delimiters);
        assert_eq!(f.header_row_count, 1);
        assert_eq!(f.trim, Trim::Start);
        assert_eq!(f.quote_handling, QuoteHandling::RaiseError);
    }

    #[test]
    fn fragment_forms() {
        let schema = load_schema_from_str(
            r#"{ "properties": { "unit": "kg" }, "functions": { "f": { "parameters": ["a"], "body": "return a" } }, "rows": { "0": [{ "q": "${unit}" }] } }"#,
        )
        .unwrap();
        assert_eq!(schema.fragments().len(), 2);
        assert_eq!(schema.fragments().by_name("f").unwrap().parameters(), ["a".to_string()]);
    }

    #[test]
    fn load_schemas_walks_directories_and_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{ "rows": { "0": ["x"] } }"#).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.json"), r#"{ "@id": "bee", "rows": { "0": ["y"] } }"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let schemas = load_schemas(&[dir.path()]).unwrap();
        let ids: Vec<_> = schemas.iter().map(Schema::id).collect();
        assert_eq!(ids, vec!["a", "bee"]);

        let pattern = dir.path().join("*.json");
        let schemas = load_schemas(&[pattern]).unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].id(), "a");
    }
}
