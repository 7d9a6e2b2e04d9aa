//! Row and column schemas.

use std::collections::BTreeMap;

use crate::types::{Coordinate, Repeat};

use super::cell::CellSchema;
use super::entity::{EntityRef, Properties, TableId};

/// A sparse mapping from column index to cell schema, plus repetition and identity flags.
#[derive(Debug, Clone)]
pub struct RowSchema {
    row_number: usize,
    table: TableId,
    cells: BTreeMap<usize, CellSchema>,
    pub(crate) is_identity: bool,
    pub(crate) repeat: Repeat,
    pub(crate) properties: Properties,
}

impl RowSchema {
    pub fn new(row_number: usize, table: TableId) -> Self {
        Self {
            row_number,
            table,
            cells: BTreeMap::new(),
            is_identity: false,
            repeat: Repeat::None,
            properties: Properties::default(),
        }
    }

    pub fn row_number(&self) -> usize {
        self.row_number
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Row {
            table: self.table,
            row: self.row_number,
        }
    }

    pub fn is_identity_row(&self) -> bool {
        self.is_identity
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn cell(&self, col: usize) -> Option<&CellSchema> {
        self.cells.get(&col)
    }

    pub fn cells(&self) -> impl Iterator<Item = &CellSchema> {
        self.cells.values()
    }

    /// Highest declared column, if any cell is declared.
    pub fn max_col(&self) -> Option<usize> {
        self.cells.keys().next_back().copied()
    }

    pub(crate) fn cell_mut(&mut self, col: usize) -> Option<&mut CellSchema> {
        self.cells.get_mut(&col)
    }

    pub(crate) fn ensure_cell(&mut self, col: usize) -> &mut CellSchema {
        let coordinate = Coordinate::new(self.row_number, col);
        let table = self.table;
        self.cells
            .entry(col)
            .or_insert_with(|| CellSchema::new(coordinate, table))
    }
}

/// Column-axis counterpart of [`RowSchema`]: repetition plus defaults for cells in the column.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    col_number: usize,
    table: TableId,
    pub(crate) repeat: Repeat,
    pub(crate) properties: Properties,
}

impl ColumnSchema {
    pub fn new(col_number: usize, table: TableId) -> Self {
        Self {
            col_number,
            table,
            repeat: Repeat::None,
            properties: Properties::default(),
        }
    }

    pub fn col_number(&self) -> usize {
        self.col_number
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Column {
            table: self.table,
            col: self.col_number,
        }
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}
