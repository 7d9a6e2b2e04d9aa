//! Table schema: the unit of matching.

use std::collections::{BTreeMap, HashMap};

use crate::types::{Coordinate, Repeat};

use super::cell::CellSchema;
use super::entity::{EntityRef, Properties, TableId};
use super::fragment::FragmentRegistry;
use super::row::{ColumnSchema, RowSchema};

/// Name of the implicit table created for schemas that declare rows without tables.
pub const DEFAULT_TABLE_NAME: &str = "@default";

/// Prefix of generated table names; `@` is reserved so these never collide with user names.
pub const GENERATED_TABLE_PREFIX: &str = "@table-";

#[derive(Debug, Clone)]
pub struct TableSchema {
    id: TableId,
    pub(crate) properties: Properties,
    is_default: bool,
    rows: BTreeMap<usize, RowSchema>,
    columns: BTreeMap<usize, ColumnSchema>,
    pub(crate) empty_cell_fill: Option<String>,
    /// Raw input value -> substituted value. The empty key stands for "nothing between delimiters".
    pub(crate) replace_values: HashMap<String, String>,
    pub(crate) common_properties: Properties,
    pub(crate) fragments: FragmentRegistry,
}

impl TableSchema {
    pub(crate) fn new(id: TableId, name: String, is_default: bool) -> Self {
        Self {
            id,
            properties: Properties {
                name: Some(name),
                ..Properties::default()
            },
            is_default,
            rows: BTreeMap::new(),
            columns: BTreeMap::new(),
            empty_cell_fill: None,
            replace_values: HashMap::new(),
            common_properties: Properties::default(),
            fragments: FragmentRegistry::default(),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Table(self.id)
    }

    /// Table name; always present (user-chosen, generated, or the default table name).
    pub fn name(&self) -> &str {
        self.properties.name.as_deref().unwrap_or(DEFAULT_TABLE_NAME)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn empty_cell_fill(&self) -> Option<&str> {
        self.empty_cell_fill.as_deref()
    }

    pub fn replace_values(&self) -> &HashMap<String, String> {
        &self.replace_values
    }

    pub fn common_properties(&self) -> &Properties {
        &self.common_properties
    }

    pub fn fragments(&self) -> &FragmentRegistry {
        &self.fragments
    }

    pub fn row(&self, row: usize) -> Option<&RowSchema> {
        self.rows.get(&row)
    }

    /// Declared rows in ascending row order.
    pub fn rows(&self) -> impl Iterator<Item = &RowSchema> {
        self.rows.values()
    }

    pub fn column(&self, col: usize) -> Option<&ColumnSchema> {
        self.columns.get(&col)
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }

    pub fn cell(&self, coordinate: Coordinate) -> Option<&CellSchema> {
        self.rows
            .get(&coordinate.row)
            .and_then(|r| r.cell(coordinate.col))
    }

    pub fn cells(&self) -> impl Iterator<Item = &CellSchema> {
        self.rows.values().flat_map(RowSchema::cells)
    }

    /// Rows flagged as identity rows, ascending.
    pub fn identity_rows(&self) -> impl Iterator<Item = &RowSchema> {
        self.rows.values().filter(|r| r.is_identity)
    }

    pub fn has_identity_rows(&self) -> bool {
        self.identity_rows().next().is_some()
    }

    /// Repeat descriptor of a column; undeclared columns do not repeat.
    pub fn column_repeat(&self, col: usize) -> Repeat {
        self.columns.get(&col).map(|c| c.repeat).unwrap_or_default()
    }

    /// Highest column index declared by any row or column schema.
    pub fn last_col(&self) -> Option<usize> {
        let from_cells = self.rows.values().filter_map(RowSchema::max_col).max();
        let from_columns = self.columns.keys().next_back().copied();
        from_cells.max(from_columns)
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.properties.name = Some(name);
    }

    pub(crate) fn ensure_row(&mut self, row: usize) -> &mut RowSchema {
        let id = self.id;
        self.rows.entry(row).or_insert_with(|| RowSchema::new(row, id))
    }

    pub(crate) fn ensure_column(&mut self, col: usize) -> &mut ColumnSchema {
        let id = self.id;
        self.columns
            .entry(col)
            .or_insert_with(|| ColumnSchema::new(col, id))
    }

    pub(crate) fn row_mut(&mut self, row: usize) -> Option<&mut RowSchema> {
        self.rows.get_mut(&row)
    }

    pub(crate) fn column_mut(&mut self, col: usize) -> Option<&mut ColumnSchema> {
        self.columns.get_mut(&col)
    }

    pub(crate) fn cell_mut(&mut self, coordinate: Coordinate) -> Option<&mut CellSchema> {
        self.rows
            .get_mut(&coordinate.row)
            .and_then(|r| r.cell_mut(coordinate.col))
    }
}
