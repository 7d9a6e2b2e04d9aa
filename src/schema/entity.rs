//! The property bag shared by every schema construct, plus stable references into the schema.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::Coordinate;

use super::cell::CellSchema;
use super::fragment::ReusableFragment;
use super::row::{ColumnSchema, RowSchema};
use super::table::TableSchema;
use super::Schema;

pub const NAME: &str = "@name";
pub const VALUE: &str = "@value";
pub const ID: &str = "@id";
pub const LANG: &str = "@lang";
pub const MAP_TYPE: &str = "@maptype";
pub const REGEX: &str = "@regex";
pub const DATATYPE: &str = "@datatype";

/// Named accessors plus an open mapping for any other key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub name: Option<String>,
    pub value: Option<String>,
    pub id: Option<String>,
    /// ISO 639-1 language tag.
    pub language: Option<String>,
    pub regex: Option<String>,
    /// XSD simple type name.
    pub datatype: Option<String>,
    /// Target data-model type.
    pub map_type: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            NAME => Some(&mut self.name),
            VALUE => Some(&mut self.value),
            ID => Some(&mut self.id),
            LANG => Some(&mut self.language),
            REGEX => Some(&mut self.regex),
            DATATYPE => Some(&mut self.datatype),
            MAP_TYPE => Some(&mut self.map_type),
            _ => None,
        }
    }

    /// Set a property by its source key (`@name`, `@regex`, ... or any user key).
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.slot_mut(key) {
            Some(slot) => *slot = Some(value),
            None => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let slot = match key {
            NAME => &self.name,
            VALUE => &self.value,
            ID => &self.id,
            LANG => &self.language,
            REGEX => &self.regex,
            DATATYPE => &self.datatype,
            MAP_TYPE => &self.map_type,
            _ => return self.extra.get(key).map(String::as_str),
        };
        slot.as_deref()
    }

    /// Overlay `other` onto `self`; every key set in `other` replaces the existing value whole.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in other.entries() {
            self.set(k, v);
        }
    }

    /// All set entries keyed by their source key, named accessors first.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let named = [
            (NAME, &self.name),
            (VALUE, &self.value),
            (ID, &self.id),
            (LANG, &self.language),
            (REGEX, &self.regex),
            (DATATYPE, &self.datatype),
            (MAP_TYPE, &self.map_type),
        ];
        named
            .into_iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
            .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// True when nothing but `@value` is declared.
    pub fn only_value(&self) -> bool {
        self.name.is_none()
            && self.id.is_none()
            && self.language.is_none()
            && self.regex.is_none()
            && self.datatype.is_none()
            && self.map_type.is_none()
            && self.extra.is_empty()
    }
}

/// Index of a table inside its schema's table arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub(crate) usize);

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The scope a name is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Schema,
    Table(TableId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Schema => f.write_str("schema scope"),
            Scope::Table(t) => write!(f, "table #{}", t.0),
        }
    }
}

/// A stable key identifying one entity of a schema.
///
/// Used instead of back-pointers: "parent" accessors resolve through the owning [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Schema,
    Table(TableId),
    Row { table: TableId, row: usize },
    Column { table: TableId, col: usize },
    Cell { table: TableId, coordinate: Coordinate },
    Fragment { scope: Scope, index: usize },
}

impl EntityRef {
    /// The table this entity is declared in, if any.
    pub fn table(&self) -> Option<TableId> {
        match self {
            EntityRef::Schema => None,
            EntityRef::Table(t)
            | EntityRef::Row { table: t, .. }
            | EntityRef::Column { table: t, .. }
            | EntityRef::Cell { table: t, .. } => Some(*t),
            EntityRef::Fragment { scope, .. } => match scope {
                Scope::Schema => None,
                Scope::Table(t) => Some(*t),
            },
        }
    }

    /// Scope a name of this entity is registered in.
    pub fn declaring_scope(&self) -> Scope {
        match self {
            EntityRef::Schema | EntityRef::Table(_) => Scope::Schema,
            EntityRef::Fragment { scope, .. } => *scope,
            other => other.table().map(Scope::Table).unwrap_or(Scope::Schema),
        }
    }
}

/// Borrowed view of one concrete schema construct.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Schema(&'a Schema),
    Table(&'a TableSchema),
    Row(&'a RowSchema),
    Column(&'a ColumnSchema),
    Cell(&'a CellSchema),
    Fragment(&'a ReusableFragment),
}

impl<'a> Entity<'a> {
    pub fn properties(&self) -> &'a Properties {
        match *self {
            Entity::Schema(s) => s.properties(),
            Entity::Table(t) => t.properties(),
            Entity::Row(r) => r.properties(),
            Entity::Column(c) => c.properties(),
            Entity::Cell(c) => c.properties(),
            Entity::Fragment(f) => f.properties(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match *self {
            Entity::Schema(_) => "schema",
            Entity::Table(_) => "table",
            Entity::Row(_) => "row",
            Entity::Column(_) => "column",
            Entity::Cell(_) => "cell",
            Entity::Fragment(f) => f.kind().as_str(),
        }
    }

    pub fn name(&self) -> Option<&'a str> {
        match *self {
            Entity::Fragment(f) => Some(f.name()),
            other => other.properties().name.as_deref(),
        }
    }

    pub fn value(&self) -> Option<&'a str> {
        self.properties().value.as_deref()
    }

    pub fn id(&self) -> Option<&'a str> {
        match *self {
            Entity::Schema(s) => Some(s.id()),
            other => other.properties().id.as_deref(),
        }
    }

    pub fn language(&self) -> Option<&'a str> {
        self.properties().language.as_deref()
    }

    pub fn regex(&self) -> Option<&'a str> {
        self.properties().regex.as_deref()
    }

    pub fn datatype(&self) -> Option<&'a str> {
        self.properties().datatype.as_deref()
    }

    pub fn map_type(&self) -> Option<&'a str> {
        self.properties().map_type.as_deref()
    }

    /// Value a `${...}` reference to this entity resolves to when it is known at load time.
    ///
    /// Cells are bound from the input instead and return `None`.
    pub fn static_value(&self) -> Option<&'a str> {
        match *self {
            Entity::Cell(_) => None,
            Entity::Fragment(f) => Some(f.body()),
            Entity::Schema(s) => Some(s.properties().value.as_deref().unwrap_or(s.id())),
            other => other.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_routes_reserved_keys_to_accessors() {
        let p = Properties::new()
            .with(REGEX, "\\d+")
            .with(LANG, "en")
            .with("unit", "kg");
        assert_eq!(p.regex.as_deref(), Some("\\d+"));
        assert_eq!(p.language.as_deref(), Some("en"));
        assert_eq!(p.get("unit"), Some("kg"));
        assert_eq!(p.get(REGEX), Some("\\d+"));
        assert_eq!(p.entries().len(), 3);
    }

    #[test]
    fn merge_overrides_whole_values() {
        let mut base = Properties::new().with(VALUE, "a").with("x", "1");
        base.merge(&Properties::new().with("x", "2").with(ID, "id"));
        assert_eq!(base.value.as_deref(), Some("a"));
        assert_eq!(base.get("x"), Some("2"));
        assert_eq!(base.id.as_deref(), Some("id"));
    }

    #[test]
    fn only_value_ignores_value_but_not_extras() {
        assert!(Properties::new().with(VALUE, "").only_value());
        assert!(!Properties::new().with(VALUE, "").with("k", "v").only_value());
        assert!(!Properties::new().with(NAME, "n").only_value());
    }

    #[test]
    fn entity_refs_know_their_scope() {
        let t = TableId(2);
        let cell = EntityRef::Cell {
            table: t,
            coordinate: Coordinate::new(0, 1),
        };
        assert_eq!(cell.table(), Some(t));
        assert_eq!(cell.declaring_scope(), Scope::Table(t));
        assert_eq!(EntityRef::Table(t).declaring_scope(), Scope::Schema);
    }
}
