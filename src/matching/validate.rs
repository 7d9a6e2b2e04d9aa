//! Cell-level checks: substitution, emptiness, datatype, regex.

use crate::error::ValueIssueKind;
use crate::schema::cell::CellSchema;
use crate::schema::table::TableSchema;
use crate::schema::Schema;
use crate::types::Value;

/// Validate one present input field against its cell schema.
///
/// Returns the substituted text alongside the typed value or the issue found. Substitution
/// happens first, so a replace-map entry can turn any raw value into the empty fill.
pub(crate) fn check_cell<'a>(
    schema: &'a Schema,
    table: &'a TableSchema,
    cell: &CellSchema,
    raw: &'a str,
) -> (&'a str, Result<Value, ValueIssueKind>) {
    let fill = schema.empty_fill(table);
    let text = schema.substitute(table, raw);

    if cell.is_empty(fill) {
        let result = if text == fill {
            Ok(Value::Null)
        } else {
            Err(ValueIssueKind::NotEmpty {
                observed: raw.to_string(),
            })
        };
        return (text, result);
    }

    let is_null = text == fill;
    let value = match cell.datatype() {
        _ if is_null => Value::Null,
        Some(datatype) => match datatype.parse_value(text) {
            Ok(v) => v,
            Err(message) => {
                return (
                    text,
                    Err(ValueIssueKind::DatatypeMismatch {
                        datatype: datatype.name().to_string(),
                        observed: text.to_string(),
                        message,
                    }),
                );
            }
        },
        None => Value::Utf8(text.to_string()),
    };

    if let Some(regex) = cell.regex() {
        if !regex.is_match(text) {
            return (
                text,
                Err(ValueIssueKind::RegexMismatch {
                    regex: regex.as_str().to_string(),
                    observed: text.to_string(),
                }),
            );
        }
    }
    (text, Ok(value))
}

/// Whether a field carries no data: blank, or the empty fill once substituted.
pub(crate) fn is_unpopulated(schema: &Schema, table: &TableSchema, raw: &str) -> bool {
    raw.trim().is_empty() || schema.substitute(table, raw) == schema.empty_fill(table)
}

/// The literal an identity cell expects, if its `@value` is plain text.
pub(crate) fn identity_literal(cell: &CellSchema) -> Option<&str> {
    let value = cell.properties().value.as_deref()?;
    if value.contains("${") || value.trim_start().starts_with('#') {
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entity::{Properties, DATATYPE, REGEX, VALUE};
    use crate::schema::entity::TableId;
    use crate::types::Coordinate;

    fn schema_with(props: Properties) -> (Schema, TableId) {
        let mut s = Schema::new("s");
        let t = s.add_table(Some("t")).unwrap();
        s.declare_cell(t, Coordinate::new(0, 0), &props).unwrap();
        s.finalize().unwrap();
        (s, t)
    }

    fn check(s: &Schema, t: TableId, raw: &str) -> Result<Value, ValueIssueKind> {
        let table = s.table(t).unwrap();
        let cell = table.cell(Coordinate::new(0, 0)).unwrap();
        check_cell(s, table, cell, raw).1
    }

    #[test]
    fn regex_is_a_substring_search() {
        let (s, t) = schema_with(Properties::new().with(REGEX, r"\d+"));
        assert_eq!(check(&s, t, "abc123"), Ok(Value::Utf8("abc123".into())));
        assert!(matches!(check(&s, t, "abc"), Err(ValueIssueKind::RegexMismatch { .. })));
    }

    #[test]
    fn regex_dot_matches_newline() {
        let (s, t) = schema_with(Properties::new().with(REGEX, "^a.b$"));
        assert!(check(&s, t, "a\nb").is_ok());
    }

    #[test]
    fn empty_cell_accepts_only_the_fill() {
        let (s, t) = schema_with(Properties::new().with(VALUE, ""));
        assert_eq!(check(&s, t, ""), Ok(Value::Null));
        assert!(matches!(check(&s, t, "x"), Err(ValueIssueKind::NotEmpty { .. })));
    }

    #[test]
    fn empty_string_is_rejected_when_fill_differs() {
        let (mut s, t) = schema_with(Properties::new().with(VALUE, "NA"));
        s.missing_value = Some("NA".into());
        assert!(matches!(check(&s, t, ""), Err(ValueIssueKind::NotEmpty { .. })));
        assert_eq!(check(&s, t, "NA"), Ok(Value::Null));
    }

    #[test]
    fn substitution_precedes_emptiness() {
        let (mut s, t) = schema_with(Properties::new().with(VALUE, ""));
        s.replace_values.insert("n/a".into(), "".into());
        assert_eq!(check(&s, t, "n/a"), Ok(Value::Null));
    }

    #[test]
    fn datatype_produces_typed_values() {
        let (s, t) = schema_with(Properties::new().with(DATATYPE, "integer"));
        assert_eq!(check(&s, t, "42"), Ok(Value::Int64(42)));
        assert!(matches!(check(&s, t, "4x"), Err(ValueIssueKind::DatatypeMismatch { .. })));
        assert_eq!(check(&s, t, ""), Ok(Value::Null));
    }

    #[test]
    fn identity_literals_skip_templates() {
        let (s, t) = schema_with(Properties::new().with(VALUE, "Station"));
        let cell = s.table(t).unwrap().cell(Coordinate::new(0, 0)).unwrap();
        assert_eq!(identity_literal(cell), Some("Station"));
        let (s, t) = schema_with(Properties::new().with(VALUE, "${.}"));
        let cell = s.table(t).unwrap().cell(Coordinate::new(0, 0)).unwrap();
        assert_eq!(identity_literal(cell), None);
    }
}
