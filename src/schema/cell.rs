//! Per-coordinate constraints.

use regex::Regex;

use crate::types::Coordinate;

use super::datatype::Datatype;
use super::entity::{EntityRef, Properties, TableId};

/// Where a `${...}` reference in a property value points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Known when the schema is loaded.
    Static(String),
    /// A cell whose value is only known once the input is matched.
    Deferred(EntityRef),
    /// `${.}`: the referencing cell's own value.
    SelfValue,
}

/// A reference token found in a property value, resolved to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// The literal token, e.g. `${table/name}`.
    pub token: String,
    pub target: LinkTarget,
}

/// A fragment call found in a property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Property key the call was written under.
    pub key: String,
    pub fragment: EntityRef,
    pub name: String,
    /// Raw arguments; may contain reference tokens.
    pub args: Vec<String>,
}

/// Constraints for one coordinate of a table.
///
/// Two comparison functions exist on purpose: [`CellSchema::same_slot`] is the merge identity
/// (coordinate + declaring table, ignoring properties), [`CellSchema::content_eq`] compares
/// everything.
#[derive(Debug, Clone)]
pub struct CellSchema {
    coordinate: Coordinate,
    table: TableId,
    declared: Properties,
    effective: Properties,
    regex: Option<Regex>,
    datatype: Option<Datatype>,
    links: Vec<Link>,
    invocations: Vec<Invocation>,
}

impl CellSchema {
    pub fn new(coordinate: Coordinate, table: TableId) -> Self {
        Self {
            coordinate,
            table,
            declared: Properties::default(),
            effective: Properties::default(),
            regex: None,
            datatype: None,
            links: Vec::new(),
            invocations: Vec::new(),
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Cell {
            table: self.table,
            coordinate: self.coordinate,
        }
    }

    /// Properties declared on this cell itself.
    pub fn properties(&self) -> &Properties {
        &self.declared
    }

    /// Declared properties over table/column defaults, as used for validation and rendering.
    pub fn effective(&self) -> &Properties {
        &self.effective
    }

    pub fn name(&self) -> Option<&str> {
        self.declared.name.as_deref()
    }

    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    pub fn datatype(&self) -> Option<Datatype> {
        self.datatype
    }

    pub fn language(&self) -> Option<&str> {
        self.effective.language.as_deref()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn invocations(&self) -> &[Invocation] {
        &self.invocations
    }

    /// Whether this is an Empty cell for the given empty-fill string.
    ///
    /// Empty means nothing but `@value` is declared and that value equals the fill.
    pub fn is_empty(&self, fill: &str) -> bool {
        self.declared.only_value() && self.declared.value.as_deref() == Some(fill)
    }

    /// Merge identity: same coordinate in the same table, regardless of properties.
    pub fn same_slot(&self, other: &CellSchema) -> bool {
        self.coordinate == other.coordinate && self.table == other.table
    }

    /// Full comparison, including declared and effective properties.
    pub fn content_eq(&self, other: &CellSchema) -> bool {
        self.same_slot(other)
            && self.declared == other.declared
            && self.effective == other.effective
            && self.datatype == other.datatype
            && self.regex.as_ref().map(Regex::as_str) == other.regex.as_ref().map(Regex::as_str)
    }

    /// Accumulate another statement about this coordinate; later keys win.
    ///
    /// `@name` is not merged here: renames go through the schema so the symbol table stays
    /// consistent.
    pub(crate) fn merge_statement(&mut self, properties: &Properties) {
        let name = self.declared.name.take();
        self.declared.merge(properties);
        self.declared.name = name;
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.declared.name = name;
    }

    pub(crate) fn finalize(
        &mut self,
        effective: Properties,
        regex: Option<Regex>,
        datatype: Option<Datatype>,
        links: Vec<Link>,
        invocations: Vec<Invocation>,
    ) {
        self.effective = effective;
        self.regex = regex;
        self.datatype = datatype;
        self.links = links;
        self.invocations = invocations;
    }
}

#[cfg(test)]
mod tests {
    use super::CellSchema;
    use crate::schema::entity::{Properties, TableId, REGEX, VALUE};
    use crate::types::Coordinate;

    #[test]
    fn empty_requires_only_the_fill_value() {
        let mut c = CellSchema::new(Coordinate::new(0, 0), TableId(0));
        assert!(!c.is_empty(""), "no @value declared means unconstrained, not empty");
        c.merge_statement(&Properties::new().with(VALUE, ""));
        assert!(c.is_empty(""));
        assert!(!c.is_empty("NA"));
        c.merge_statement(&Properties::new().with(REGEX, "x"));
        assert!(!c.is_empty(""));
    }

    #[test]
    fn same_slot_ignores_properties_but_content_eq_does_not() {
        let mut a = CellSchema::new(Coordinate::new(1, 2), TableId(0));
        let b = CellSchema::new(Coordinate::new(1, 2), TableId(0));
        a.merge_statement(&Properties::new().with("k", "v"));
        assert!(a.same_slot(&b));
        assert!(!a.content_eq(&b));
        assert!(!a.same_slot(&CellSchema::new(Coordinate::new(1, 2), TableId(1))));
    }

    #[test]
    fn merge_statement_keeps_name() {
        let mut a = CellSchema::new(Coordinate::new(0, 0), TableId(0));
        a.set_name(Some("x".into()));
        a.merge_statement(&Properties::new().with("@name", "y").with(VALUE, "v"));
        assert_eq!(a.name(), Some("x"));
        assert_eq!(a.properties().value.as_deref(), Some("v"));
    }
}
