//! The schema object model.
//!
//! A [`Schema`] owns an arena of [`TableSchema`]s; tables own their rows, rows own their cells.
//! Nothing holds a back-pointer: "parent" accessors take an [`EntityRef`] and resolve it through
//! the owning schema (see [`Schema::entity`] and [`Schema::parent_table`]).
//!
//! Schemas are built by the [`loader`] and are read-only afterwards, so one loaded schema can be
//! shared by any number of matching runs.

pub mod cell;
pub mod datatype;
pub mod entity;
pub mod fragment;
pub mod loader;
pub mod row;
pub mod symbols;
pub mod table;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::error::SchemaError;
use crate::tokenizer::{LineSeparator, QuoteHandling, TokenizerConfig};
use crate::types::{Coordinate, Repeat};

use self::cell::{CellSchema, Invocation, Link, LinkTarget};
use self::datatype::Datatype;
use self::entity::{Entity, EntityRef, Properties, Scope, TableId};
use self::fragment::{FragmentCall, FragmentRegistry, ReusableFragment};
use self::symbols::SymbolTable;
use self::table::{DEFAULT_TABLE_NAME, GENERATED_TABLE_PREFIX, TableSchema};

static REFERENCE: Lazy<Regex> = Lazy::new(|| datatype::re(r"\$\{([^}]*)\}"));

/// Which ends of an unquoted value have whitespace trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trim {
    #[default]
    None,
    Start,
    End,
    Both,
}

/// Dialect of the files a schema describes.
#[derive(Clone)]
pub struct FormatOptions {
    pub delimiter: char,
    /// Treat runs of delimiters as one (always on for the whitespace dialect).
    pub collapse_delimiters: bool,
    pub quote_char: char,
    /// Explicit quote escape. When unset, `double_quote` decides between `""` and `\"`.
    pub escape_char: Option<char>,
    pub double_quote: bool,
    pub line_separator: LineSeparator,
    pub encoding: &'static Encoding,
    /// Default language tag for every cell.
    pub language: Option<String>,
    /// Number of leading matched records flagged as header cells.
    pub header_row_count: usize,
    /// Records dropped before matching starts.
    pub skip_rows: usize,
    /// Leading fields dropped from every record.
    pub skip_columns: usize,
    /// Skip records that contain nothing at all.
    pub skip_blank_rows: bool,
    pub trim: Trim,
    pub quote_handling: QuoteHandling,
    pub keep_quotes: bool,
    pub keep_escape: bool,
}

impl fmt::Debug for FormatOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatOptions")
            .field("delimiter", &self.delimiter)
            .field("collapse_delimiters", &self.collapse_delimiters)
            .field("quote_char", &self.quote_char)
            .field("escape_char", &self.escape_char)
            .field("double_quote", &self.double_quote)
            .field("line_separator", &self.line_separator)
            .field("encoding", &self.encoding.name())
            .field("language", &self.language)
            .field("header_row_count", &self.header_row_count)
            .field("skip_rows", &self.skip_rows)
            .field("skip_columns", &self.skip_columns)
            .field("skip_blank_rows", &self.skip_blank_rows)
            .field("trim", &self.trim)
            .field("quote_handling", &self.quote_handling)
            .finish()
    }
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            collapse_delimiters: false,
            quote_char: '"',
            escape_char: None,
            double_quote: true,
            line_separator: LineSeparator::Any,
            encoding: encoding_rs::UTF_8,
            language: None,
            header_row_count: 0,
            skip_rows: 0,
            skip_columns: 0,
            skip_blank_rows: true,
            trim: Trim::None,
            quote_handling: QuoteHandling::default(),
            keep_quotes: false,
            keep_escape: false,
        }
    }
}

impl FormatOptions {
    /// Tokenizer configuration for this dialect.
    pub fn tokenizer_config(&self) -> TokenizerConfig {
        let quote_escape = self
            .escape_char
            .unwrap_or(if self.double_quote { self.quote_char } else { '\\' });
        TokenizerConfig {
            delimiter: self.delimiter,
            quote: self.quote_char,
            quote_escape,
            escape_escape: (quote_escape != self.quote_char).then_some(quote_escape),
            normalized_newline: '\n',
            line_separator: self.line_separator,
            ignore_leading_ws: matches!(self.trim, Trim::Start | Trim::Both),
            ignore_trailing_ws: matches!(self.trim, Trim::End | Trim::Both),
            keep_quotes: self.keep_quotes,
            keep_escape: self.keep_escape,
            quote_handling: self.quote_handling,
            collapse_delimiters: self.collapse_delimiters,
            encoding: self.encoding,
        }
    }
}

/// The root of a schema: tables, dialect, global value rules and the symbol table.
#[derive(Debug, Clone)]
pub struct Schema {
    id: String,
    pub(crate) properties: Properties,
    pub(crate) format: FormatOptions,
    pub(crate) replace_values: HashMap<String, String>,
    pub(crate) missing_value: Option<String>,
    pub(crate) target_files: Vec<String>,
    tables: Vec<TableSchema>,
    table_index: HashMap<String, TableId>,
    fragments: FragmentRegistry,
    symbols: SymbolTable,
}

impl Schema {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: Properties::default(),
            format: FormatOptions::default(),
            replace_values: HashMap::new(),
            missing_value: None,
            target_files: Vec::new(),
            tables: Vec::new(),
            table_index: HashMap::new(),
            fragments: FragmentRegistry::default(),
            symbols: SymbolTable::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn format(&self) -> &FormatOptions {
        &self.format
    }

    pub fn replace_values(&self) -> &HashMap<String, String> {
        &self.replace_values
    }

    pub fn missing_value(&self) -> Option<&str> {
        self.missing_value.as_deref()
    }

    pub fn target_files(&self) -> &[String] {
        &self.target_files
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn fragments(&self) -> &FragmentRegistry {
        &self.fragments
    }

    /// Tables in declaration order.
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, id: TableId) -> Option<&TableSchema> {
        self.tables.get(id.0)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&TableSchema> {
        self.table_index.get(name).and_then(|id| self.table(*id))
    }

    /// Create a table. Without a name, a generated `@table-<uuid>` name is used.
    pub fn add_table(&mut self, name: Option<&str>) -> Result<TableId, SchemaError> {
        let name = match name {
            Some(n) => {
                check_user_name(n, "table")?;
                n.to_string()
            }
            None => format!("{GENERATED_TABLE_PREFIX}{}", uuid::Uuid::new_v4()),
        };
        self.push_table(name, false)
    }

    /// The implicit `@default` table, created on first use.
    pub fn default_table(&mut self) -> Result<TableId, SchemaError> {
        if let Some(t) = self.tables.iter().find(|t| t.is_default()) {
            return Ok(t.id());
        }
        self.push_table(DEFAULT_TABLE_NAME.to_string(), true)
    }

    fn push_table(&mut self, name: String, is_default: bool) -> Result<TableId, SchemaError> {
        let id = TableId(self.tables.len());
        self.symbols
            .register(Scope::Schema, &name, EntityRef::Table(id))?;
        self.table_index.insert(name.clone(), id);
        self.tables.push(TableSchema::new(id, name, is_default));
        Ok(id)
    }

    fn table_mut(&mut self, id: TableId) -> Result<&mut TableSchema, SchemaError> {
        self.tables.get_mut(id.0).ok_or_else(|| SchemaError::UnknownName {
            name: format!("table #{}", id.0),
            scope: Scope::Schema.to_string(),
        })
    }

    /// Record one statement about a cell. Statements for the same coordinate accumulate.
    pub fn declare_cell(
        &mut self,
        table: TableId,
        coordinate: Coordinate,
        properties: &Properties,
    ) -> Result<EntityRef, SchemaError> {
        let target = self
            .table_mut(table)?
            .ensure_row(coordinate.row)
            .ensure_cell(coordinate.col)
            .entity_ref();
        if let Some(cell) = self.table_mut(table)?.cell_mut(coordinate) {
            cell.merge_statement(properties);
        }
        if let Some(name) = &properties.name {
            self.rename(&target, name)?;
        }
        Ok(target)
    }

    /// Record row-level facts. `None` leaves the current value alone.
    pub fn declare_row(
        &mut self,
        table: TableId,
        row: usize,
        repeat: Option<Repeat>,
        is_identity: Option<bool>,
        properties: &Properties,
    ) -> Result<EntityRef, SchemaError> {
        let schema_row = self.table_mut(table)?.ensure_row(row);
        if let Some(repeat) = repeat {
            schema_row.repeat = repeat;
        }
        if let Some(identity) = is_identity {
            schema_row.is_identity = identity;
        }
        let name = schema_row.properties.name.take();
        schema_row.properties.merge(properties);
        schema_row.properties.name = name;
        let target = schema_row.entity_ref();
        if let Some(name) = &properties.name {
            self.rename(&target, name)?;
        }
        Ok(target)
    }

    pub fn declare_column(
        &mut self,
        table: TableId,
        col: usize,
        repeat: Option<Repeat>,
        properties: &Properties,
    ) -> Result<EntityRef, SchemaError> {
        let column = self.table_mut(table)?.ensure_column(col);
        if let Some(repeat) = repeat {
            column.repeat = repeat;
        }
        let name = column.properties.name.take();
        column.properties.merge(properties);
        column.properties.name = name;
        let target = column.entity_ref();
        if let Some(name) = &properties.name {
            self.rename(&target, name)?;
        }
        Ok(target)
    }

    /// Register a fragment in its declaring scope.
    pub fn add_fragment(&mut self, fragment: ReusableFragment) -> Result<EntityRef, SchemaError> {
        let scope = fragment.scope();
        let name = fragment.name().to_string();
        if self.symbols.lookup(scope, &name).is_some() {
            return Err(SchemaError::DuplicateName {
                name,
                scope: scope.to_string(),
            });
        }
        let index = self.fragment_registry_mut(scope)?.insert(fragment)?;
        let target = EntityRef::Fragment { scope, index };
        self.symbols.register(scope, &name, target.clone())?;
        Ok(target)
    }

    fn fragment_registry_mut(&mut self, scope: Scope) -> Result<&mut FragmentRegistry, SchemaError> {
        match scope {
            Scope::Schema => Ok(&mut self.fragments),
            Scope::Table(t) => Ok(&mut self.table_mut(t)?.fragments),
        }
    }

    fn fragment_registry(&self, scope: Scope) -> Option<&FragmentRegistry> {
        match scope {
            Scope::Schema => Some(&self.fragments),
            Scope::Table(t) => self.table(t).map(TableSchema::fragments),
        }
    }

    pub fn fragment(&self, target: &EntityRef) -> Option<&ReusableFragment> {
        match target {
            EntityRef::Fragment { scope, index } => self.fragment_registry(*scope)?.get(*index),
            _ => None,
        }
    }

    /// Find a fragment by name from a table, falling back to the schema scope.
    pub fn resolve_fragment(&self, table: TableId, name: &str) -> Option<EntityRef> {
        [Scope::Table(table), Scope::Schema].into_iter().find_map(|scope| {
            self.fragment_registry(scope)?
                .index_of(name)
                .map(|index| EntityRef::Fragment { scope, index })
        })
    }

    /// Give `target` a new name, keeping the symbol table consistent.
    ///
    /// On failure nothing changes: the old name stays registered.
    pub fn rename(&mut self, target: &EntityRef, new: &str) -> Result<(), SchemaError> {
        if new.is_empty() {
            return Err(SchemaError::Invalid {
                at: self.reference_expression(target),
                message: "name must not be empty".to_string(),
            });
        }
        let scope = target.declaring_scope();
        let old = self
            .entity(target)
            .ok_or_else(|| SchemaError::UnknownName {
                name: format!("{target:?}"),
                scope: scope.to_string(),
            })?
            .name()
            .map(str::to_string);

        if let EntityRef::Table(t) = target {
            if self.table(*t).is_some_and(TableSchema::is_default) {
                return Err(SchemaError::DefaultTableRename);
            }
            check_user_name(new, "table")?;
        }

        if let Some(existing) = self.symbols.lookup(scope, new) {
            if existing != target {
                return Err(SchemaError::DuplicateName {
                    name: new.to_string(),
                    scope: scope.to_string(),
                });
            }
        }

        match target {
            EntityRef::Schema => self.properties.name = Some(new.to_string()),
            EntityRef::Table(t) => {
                if let Some(old) = &old {
                    self.table_index.remove(old);
                }
                self.table_index.insert(new.to_string(), *t);
                self.table_mut(*t)?.set_name(new.to_string());
            }
            EntityRef::Row { table, row } => {
                if let Some(r) = self.table_mut(*table)?.row_mut(*row) {
                    r.properties.name = Some(new.to_string());
                }
            }
            EntityRef::Column { table, col } => {
                if let Some(c) = self.table_mut(*table)?.column_mut(*col) {
                    c.properties.name = Some(new.to_string());
                }
            }
            EntityRef::Cell { table, coordinate } => {
                if let Some(c) = self.table_mut(*table)?.cell_mut(*coordinate) {
                    c.set_name(Some(new.to_string()));
                }
            }
            EntityRef::Fragment { scope, index } => {
                self.fragment_registry_mut(*scope)?.rename(*index, new)?;
            }
        }
        self.symbols
            .rename(scope, old.as_deref(), new, target.clone())
    }

    /// Borrowed view of the entity behind `target`.
    pub fn entity(&self, target: &EntityRef) -> Option<Entity<'_>> {
        match target {
            EntityRef::Schema => Some(Entity::Schema(self)),
            EntityRef::Table(t) => self.table(*t).map(Entity::Table),
            EntityRef::Row { table, row } => self.table(*table)?.row(*row).map(Entity::Row),
            EntityRef::Column { table, col } => {
                self.table(*table)?.column(*col).map(Entity::Column)
            }
            EntityRef::Cell { table, coordinate } => {
                self.table(*table)?.cell(*coordinate).map(Entity::Cell)
            }
            EntityRef::Fragment { .. } => self.fragment(target).map(Entity::Fragment),
        }
    }

    /// Owning table of an entity, looked up through the arena.
    pub fn parent_table(&self, target: &EntityRef) -> Option<&TableSchema> {
        target.table().and_then(|t| self.table(t))
    }

    /// Canonical path of an entity, e.g. `people/row[3]/col[2]`.
    pub fn reference_expression(&self, target: &EntityRef) -> String {
        let table_name = |t: &TableId| {
            self.table(*t)
                .map(|t| t.name().to_string())
                .unwrap_or_else(|| format!("#{}", t.0))
        };
        match target {
            EntityRef::Schema => self.id.clone(),
            EntityRef::Table(t) => table_name(t),
            EntityRef::Row { table, row } => format!("{}/row[{row}]", table_name(table)),
            EntityRef::Column { table, col } => format!("{}/col[{col}]", table_name(table)),
            EntityRef::Cell { table, coordinate } => format!(
                "{}/row[{}]/col[{}]",
                table_name(table),
                coordinate.row,
                coordinate.col
            ),
            EntityRef::Fragment { scope, index } => {
                let name = self
                    .fragment(target)
                    .map(|f| f.name().to_string())
                    .unwrap_or_else(|| index.to_string());
                match scope {
                    Scope::Schema => format!("#{name}"),
                    Scope::Table(t) => format!("{}/#{name}", table_name(t)),
                }
            }
        }
    }

    /// The string that stands for "no value" in a table.
    pub fn empty_fill<'a>(&'a self, table: &'a TableSchema) -> &'a str {
        table
            .empty_cell_fill()
            .or(self.missing_value.as_deref())
            .unwrap_or("")
    }

    /// Apply the replace-value maps (table first, then schema) to a raw input value.
    pub fn substitute<'a>(&'a self, table: &'a TableSchema, raw: &'a str) -> &'a str {
        table
            .replace_values()
            .get(raw)
            .or_else(|| self.replace_values.get(raw))
            .map(String::as_str)
            .unwrap_or(raw)
    }

    /// Whether this schema claims `path` through its `targetFiles` (exact names or glob patterns).
    pub fn matches_file(&self, path: &Path) -> bool {
        let file_name = path.file_name().map(|n| n.to_string_lossy());
        let full = path.to_string_lossy();
        self.target_files.iter().any(|target| {
            if file_name.as_deref() == Some(target.as_str()) || full == target.as_str() {
                return true;
            }
            match glob::Pattern::new(target) {
                Ok(pattern) => {
                    pattern.matches_path(path)
                        || file_name.as_deref().is_some_and(|n| pattern.matches(n))
                }
                Err(_) => false,
            }
        })
    }

    /// Compute effective cell properties and resolve regexes, datatypes, references and
    /// fragment calls. Run once, after the last declaration.
    pub fn finalize(&mut self) -> Result<(), SchemaError> {
        let mut plans = Vec::new();
        for table in &self.tables {
            for cell in table.cells() {
                plans.push((table.id(), cell.coordinate(), self.plan_cell(table, cell)?));
            }
        }
        for (table, coordinate, plan) in plans {
            if let Some(cell) = self.table_mut(table)?.cell_mut(coordinate) {
                cell.finalize(
                    plan.effective,
                    plan.regex,
                    plan.datatype,
                    plan.links,
                    plan.invocations,
                );
            }
        }
        Ok(())
    }

    fn plan_cell(&self, table: &TableSchema, cell: &CellSchema) -> Result<CellPlan, SchemaError> {
        let at = self.reference_expression(&cell.entity_ref());

        let mut effective = table.common_properties().clone();
        if let Some(column) = table.column(cell.coordinate().col) {
            effective.merge(column.properties());
        }
        effective.merge(cell.properties());
        effective.name = cell.properties().name.clone();
        if effective.language.is_none() {
            effective.language = table
                .properties()
                .language
                .clone()
                .or_else(|| self.properties.language.clone())
                .or_else(|| self.format.language.clone());
        }

        let regex = effective
            .regex
            .as_deref()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .dot_matches_new_line(true)
                    .build()
                    .map_err(|source| SchemaError::InvalidRegex {
                        at: at.clone(),
                        source,
                    })
            })
            .transpose()?;

        let datatype = effective
            .datatype
            .as_deref()
            .map(|name| {
                Datatype::from_name(name).ok_or_else(|| SchemaError::UnrecognizedDatatype {
                    datatype: name.to_string(),
                    at: at.clone(),
                })
            })
            .transpose()?;

        let mut links: Vec<Link> = Vec::new();
        let mut invocations = Vec::new();
        for (key, value) in effective.entries() {
            if key == entity::NAME || key == entity::REGEX || key == entity::DATATYPE {
                continue;
            }
            for capture in REFERENCE.captures_iter(value) {
                let token = capture[0].to_string();
                if links.iter().any(|l| l.token == token) {
                    continue;
                }
                let target = self.resolve_reference(table.id(), &capture[1], &at)?;
                links.push(Link { token, target });
            }
            if let Some(call) = FragmentCall::parse(value) {
                let fragment = self.resolve_fragment(table.id(), &call.name).ok_or_else(|| {
                    SchemaError::UnresolvedReference {
                        reference: format!("#{}", call.name),
                        at: at.clone(),
                    }
                })?;
                if let Some(f) = self.fragment(&fragment) {
                    if f.parameters().len() != call.args.len() {
                        return Err(SchemaError::FragmentArity {
                            name: call.name,
                            expected: f.parameters().len(),
                            actual: call.args.len(),
                        });
                    }
                }
                invocations.push(Invocation {
                    key: key.to_string(),
                    fragment,
                    name: call.name,
                    args: call.args,
                });
            }
        }

        Ok(CellPlan {
            effective,
            regex,
            datatype,
            links,
            invocations,
        })
    }

    /// Resolve the inside of a `${...}` token written in `table`.
    fn resolve_reference(&self, table: TableId, inner: &str, at: &str) -> Result<LinkTarget, SchemaError> {
        let inner = inner.trim();
        if inner == "." {
            return Ok(LinkTarget::SelfValue);
        }
        let unresolved = || SchemaError::UnresolvedReference {
            reference: format!("${{{inner}}}"),
            at: at.to_string(),
        };
        let target = match inner.split_once('/') {
            Some((table_name, name)) => {
                let t = self.table_by_name(table_name).ok_or_else(unresolved)?;
                self.symbols.lookup(Scope::Table(t.id()), name)
            }
            None => self.symbols.resolve(Scope::Table(table), inner),
        }
        .ok_or_else(unresolved)?;

        match target {
            EntityRef::Cell { .. } => Ok(LinkTarget::Deferred(target.clone())),
            other => {
                let entity = self.entity(other).ok_or_else(unresolved)?;
                let value = entity
                    .static_value()
                    .or_else(|| entity.id())
                    .or_else(|| entity.name())
                    .unwrap_or_default();
                Ok(LinkTarget::Static(value.to_string()))
            }
        }
    }
}

struct CellPlan {
    effective: Properties,
    regex: Option<Regex>,
    datatype: Option<Datatype>,
    links: Vec<Link>,
    invocations: Vec<Invocation>,
}

fn check_user_name(name: &str, kind: &str) -> Result<(), SchemaError> {
    if name.starts_with('@') {
        return Err(SchemaError::Invalid {
            at: format!("{kind} '{name}'"),
            message: "names beginning with '@' are reserved".to_string(),
        });
    }
    Ok(())
}

/// Replace every `${...}` token in `text` using `lookup`; unknown tokens are left as written.
pub(crate) fn expand_references<'a>(
    text: &'a str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Cow<'a, str> {
    REFERENCE.replace_all(text, |caps: &regex::Captures<'_>| {
        lookup(&caps[0]).unwrap_or_else(|| caps[0].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entity::{DATATYPE, NAME, REGEX, VALUE};
    use crate::schema::fragment::FragmentKind;

    fn schema_with_table() -> (Schema, TableId) {
        let mut s = Schema::new("s");
        let t = s.add_table(Some("people")).unwrap();
        (s, t)
    }

    #[test]
    fn generated_table_names_are_reserved() {
        let mut s = Schema::new("s");
        let t = s.add_table(None).unwrap();
        assert!(s.table(t).unwrap().name().starts_with("@table-"));
        assert!(s.add_table(Some("@mine")).is_err());
    }

    #[test]
    fn default_table_cannot_be_renamed() {
        let mut s = Schema::new("s");
        let t = s.default_table().unwrap();
        assert_eq!(s.default_table().unwrap(), t);
        assert!(matches!(
            s.rename(&EntityRef::Table(t), "other"),
            Err(SchemaError::DefaultTableRename)
        ));
        assert_eq!(s.table(t).unwrap().name(), "@default");
    }

    #[test]
    fn cell_rename_updates_symbols() {
        let (mut s, t) = schema_with_table();
        let c = s
            .declare_cell(t, Coordinate::new(0, 1), &Properties::new().with(NAME, "old"))
            .unwrap();
        s.rename(&c, "new").unwrap();
        assert_eq!(s.symbols().lookup(Scope::Table(t), "old"), None);
        assert_eq!(s.symbols().lookup(Scope::Table(t), "new"), Some(&c));
        assert_eq!(s.entity(&c).and_then(|e| e.name()), Some("new"));
    }

    #[test]
    fn table_rename_updates_index() {
        let (mut s, t) = schema_with_table();
        s.rename(&EntityRef::Table(t), "persons").unwrap();
        assert!(s.table_by_name("people").is_none());
        assert_eq!(s.table_by_name("persons").map(TableSchema::id), Some(t));
    }

    #[test]
    fn failed_rename_changes_nothing() {
        let (mut s, t) = schema_with_table();
        let a = s
            .declare_cell(t, Coordinate::new(0, 0), &Properties::new().with(NAME, "a"))
            .unwrap();
        s.declare_cell(t, Coordinate::new(0, 1), &Properties::new().with(NAME, "b"))
            .unwrap();
        assert!(s.rename(&a, "b").is_err());
        assert_eq!(s.entity(&a).and_then(|e| e.name()), Some("a"));
        assert_eq!(s.symbols().lookup(Scope::Table(t), "a"), Some(&a));
    }

    #[test]
    fn statements_for_one_coordinate_merge() {
        let (mut s, t) = schema_with_table();
        let at = Coordinate::new(2, 0);
        s.declare_cell(t, at, &Properties::new().with(REGEX, "a").with("k", "1"))
            .unwrap();
        s.declare_cell(t, at, &Properties::new().with(REGEX, "b")).unwrap();
        let cell = s.table(t).unwrap().cell(at).unwrap();
        assert_eq!(cell.properties().regex.as_deref(), Some("b"));
        assert_eq!(cell.properties().get("k"), Some("1"));
    }

    #[test]
    fn finalize_rejects_unknown_datatype_and_bad_regex() {
        let (mut s, t) = schema_with_table();
        s.declare_cell(t, Coordinate::new(0, 0), &Properties::new().with(DATATYPE, "xsd:nope"))
            .unwrap();
        assert!(matches!(
            s.finalize(),
            Err(SchemaError::UnrecognizedDatatype { .. })
        ));

        let (mut s, t) = schema_with_table();
        s.declare_cell(t, Coordinate::new(0, 0), &Properties::new().with(REGEX, "("))
            .unwrap();
        assert!(matches!(s.finalize(), Err(SchemaError::InvalidRegex { .. })));
    }

    #[test]
    fn effective_properties_layer_common_column_cell() {
        let (mut s, t) = schema_with_table();
        s.tables[t.0].common_properties = Properties::new().with("unit", "kg").with("src", "common");
        s.declare_column(t, 1, None, &Properties::new().with("src", "column").with(DATATYPE, "integer"))
            .unwrap();
        s.declare_cell(t, Coordinate::new(0, 1), &Properties::new().with(VALUE, "v"))
            .unwrap();
        s.format.language = Some("en".into());
        s.finalize().unwrap();
        let cell = s.table(t).unwrap().cell(Coordinate::new(0, 1)).unwrap();
        assert_eq!(cell.effective().get("unit"), Some("kg"));
        assert_eq!(cell.effective().get("src"), Some("column"));
        assert_eq!(cell.datatype(), Some(Datatype::Integer));
        assert_eq!(cell.language(), Some("en"));
        assert!(cell.properties().datatype.is_none());
    }

    #[test]
    fn references_resolve_static_and_deferred() {
        let (mut s, t) = schema_with_table();
        s.properties.value = Some("http://example.org/".into());
        s.rename(&EntityRef::Schema, "base").unwrap();
        s.declare_cell(t, Coordinate::new(0, 0), &Properties::new().with(NAME, "station"))
            .unwrap();
        s.declare_cell(
            t,
            Coordinate::new(1, 0),
            &Properties::new().with("@id", "${base}${station}/${.}"),
        )
        .unwrap();
        s.finalize().unwrap();
        let cell = s.table(t).unwrap().cell(Coordinate::new(1, 0)).unwrap();
        let targets: Vec<_> = cell.links().iter().map(|l| l.target.clone()).collect();
        assert_eq!(
            targets,
            vec![
                LinkTarget::Static("http://example.org/".into()),
                LinkTarget::Deferred(EntityRef::Cell {
                    table: t,
                    coordinate: Coordinate::new(0, 0)
                }),
                LinkTarget::SelfValue,
            ]
        );
    }

    #[test]
    fn unresolved_reference_is_a_schema_error() {
        let (mut s, t) = schema_with_table();
        s.declare_cell(t, Coordinate::new(0, 0), &Properties::new().with(VALUE, "${ghost}"))
            .unwrap();
        assert!(matches!(
            s.finalize(),
            Err(SchemaError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn fragment_calls_resolve_and_check_arity() {
        let (mut s, t) = schema_with_table();
        s.add_fragment(ReusableFragment::new(
            FragmentKind::Template,
            "label",
            vec!["x".into()],
            "<{x}>",
            Scope::Schema,
        ))
        .unwrap();
        s.declare_cell(t, Coordinate::new(0, 0), &Properties::new().with("rdfs:label", "#label(${.})"))
            .unwrap();
        s.finalize().unwrap();
        let cell = s.table(t).unwrap().cell(Coordinate::new(0, 0)).unwrap();
        assert_eq!(cell.invocations().len(), 1);
        assert_eq!(cell.invocations()[0].key, "rdfs:label");

        s.declare_cell(t, Coordinate::new(0, 1), &Properties::new().with("p", "#label(a, b)"))
            .unwrap();
        assert!(matches!(s.finalize(), Err(SchemaError::FragmentArity { .. })));
    }

    #[test]
    fn substitution_prefers_table_map() {
        let (mut s, t) = schema_with_table();
        s.replace_values.insert("n/a".into(), "".into());
        s.replace_values.insert("-".into(), "none".into());
        s.tables[t.0].replace_values.insert("-".into(), "".into());
        let table = s.table(t).unwrap();
        assert_eq!(s.substitute(table, "n/a"), "");
        assert_eq!(s.substitute(table, "-"), "");
        assert_eq!(s.substitute(table, "x"), "x");
    }

    #[test]
    fn empty_fill_falls_back_to_missing_value() {
        let (mut s, t) = schema_with_table();
        assert_eq!(s.empty_fill(s.table(t).unwrap()), "");
        s.missing_value = Some("NA".into());
        assert_eq!(s.empty_fill(s.table(t).unwrap()), "NA");
        s.tables[t.0].empty_cell_fill = Some("-".into());
        assert_eq!(s.empty_fill(s.table(t).unwrap()), "-");
    }

    #[test]
    fn target_files_accept_globs() {
        let mut s = Schema::new("s");
        s.target_files = vec!["station-*.csv".into(), "exact.txt".into()];
        assert!(s.matches_file(Path::new("/data/station-12.csv")));
        assert!(s.matches_file(Path::new("exact.txt")));
        assert!(!s.matches_file(Path::new("/data/other.csv")));
    }

    #[test]
    fn reference_expressions() {
        let (mut s, t) = schema_with_table();
        let c = s
            .declare_cell(t, Coordinate::new(3, 2), &Properties::new())
            .unwrap();
        assert_eq!(s.reference_expression(&c), "people/row[3]/col[2]");
        assert_eq!(
            s.parent_table(&c).map(TableSchema::name),
            Some("people")
        );
    }

    #[test]
    fn backslash_escape_when_quotes_are_not_doubled() {
        let format = FormatOptions {
            double_quote: false,
            ..FormatOptions::default()
        };
        let config = format.tokenizer_config();
        assert_eq!(config.quote_escape, '\\');
        assert_eq!(config.escape_escape, Some('\\'));
        let config = FormatOptions::default().tokenizer_config();
        assert_eq!(config.quote_escape, '"');
        assert_eq!(config.escape_escape, None);
    }
}
