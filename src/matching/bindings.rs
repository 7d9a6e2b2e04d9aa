//! Deferred variable bindings and property rendering.
//!
//! References to cells can only be resolved once the input is matched. Every named cell that
//! matched is recorded here; the render pass then expands `${...}` tokens and fragment calls in
//! the effective properties of every matched cell.

use std::collections::HashMap;

use crate::error::ValueIssueKind;
use crate::schema::cell::{CellSchema, LinkTarget};
use crate::schema::entity::{EntityRef, Properties, DATATYPE, NAME, REGEX};
use crate::schema::{expand_references, Schema};

use super::dataset::{MatchedCell, ResolvedInvocation};

/// One observed value of a named cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Index of the matched table region in the dataset.
    pub region: usize,
    pub sub_row: usize,
    pub sub_col: usize,
    pub text: String,
}

/// Values bound to named cells during one matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: HashMap<EntityRef, Vec<Binding>>,
}

impl Bindings {
    pub(crate) fn bind(&mut self, target: EntityRef, binding: Binding) {
        self.values.entry(target).or_default().push(binding);
    }

    /// Every value bound to `target`, in match order.
    pub fn all(&self, target: &EntityRef) -> &[Binding] {
        self.values.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    /// Value of `target` as seen from a cell in `region` at `sub_row`.
    ///
    /// Looks in the nearest region at or before `region` that bound `target`, preferring the same
    /// row instance there. A target only bound after `region` resolves to its earliest value.
    pub fn lookup(&self, target: &EntityRef, region: usize, sub_row: usize) -> Option<&str> {
        let bound = self.values.get(target)?;
        let nearest = bound.iter().map(|b| b.region).filter(|r| *r <= region).max();
        let found = match nearest {
            Some(nearest) => bound
                .iter()
                .find(|b| b.region == nearest && b.sub_row == sub_row)
                .or_else(|| bound.iter().find(|b| b.region == nearest)),
            None => bound.iter().min_by_key(|b| b.region),
        };
        found.map(|b| b.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Expand references and fragment calls for one matched cell.
///
/// Returns the references that could not be bound from the input and the fragment calls that
/// failed to render.
pub(crate) fn render_cell(
    schema: &Schema,
    cell: &CellSchema,
    matched: &mut MatchedCell,
    region: usize,
    bindings: &Bindings,
) -> Vec<ValueIssueKind> {
    let own = matched.text.clone();
    let sub_row = matched.sub_row;
    let mut unbound: Vec<String> = Vec::new();

    let mut lookup = |token: &str| -> Option<String> {
        let link = cell.links().iter().find(|l| l.token == token)?;
        match &link.target {
            LinkTarget::Static(value) => Some(value.clone()),
            LinkTarget::SelfValue => Some(own.clone()),
            LinkTarget::Deferred(target) => {
                let found = bindings.lookup(target, region, sub_row).map(str::to_string);
                if found.is_none() && !unbound.iter().any(|u| u == token) {
                    unbound.push(token.to_string());
                }
                found
            }
        }
    };

    let mut rendered = Properties::new();
    for (key, template) in cell.effective().entries() {
        if key == NAME || key == REGEX || key == DATATYPE {
            rendered.set(key, template);
            continue;
        }
        rendered.set(key, expand_references(template, &mut lookup).into_owned());
    }

    let mut invocations = Vec::new();
    let mut failures = Vec::new();
    for invocation in cell.invocations() {
        let args: Vec<String> = invocation
            .args
            .iter()
            .map(|a| expand_references(a, &mut lookup).into_owned())
            .collect();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = match schema.fragment(&invocation.fragment).map(|f| f.render(&arg_refs)) {
            Some(Ok(output)) => output,
            Some(Err(e)) => {
                failures.push(ValueIssueKind::FragmentFailed {
                    fragment: invocation.name.clone(),
                    message: e.to_string(),
                });
                String::new()
            }
            None => {
                failures.push(ValueIssueKind::FragmentFailed {
                    fragment: invocation.name.clone(),
                    message: "fragment is not declared".to_string(),
                });
                String::new()
            }
        };
        rendered.set(&invocation.key, output.clone());
        invocations.push(ResolvedInvocation {
            key: invocation.key.clone(),
            fragment: invocation.fragment.clone(),
            name: invocation.name.clone(),
            args,
            output,
        });
    }

    matched.properties = rendered;
    matched.invocations = invocations;
    unbound
        .into_iter()
        .map(|reference| ValueIssueKind::UnboundVariable { reference })
        .chain(failures)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entity::TableId;
    use crate::types::Coordinate;

    fn target() -> EntityRef {
        EntityRef::Cell {
            table: TableId(0),
            coordinate: Coordinate::new(0, 0),
        }
    }

    fn bound(region: usize, sub_row: usize, text: &str) -> Binding {
        Binding {
            region,
            sub_row,
            sub_col: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn lookup_prefers_same_region_and_instance() {
        let mut b = Bindings::default();
        b.bind(target(), bound(0, 0, "a"));
        b.bind(target(), bound(1, 0, "b"));
        b.bind(target(), bound(1, 1, "c"));
        assert_eq!(b.lookup(&target(), 1, 1), Some("c"));
        assert_eq!(b.lookup(&target(), 1, 5), Some("b"));
        assert_eq!(b.all(&target()).len(), 3);
    }

    #[test]
    fn lookup_uses_the_nearest_preceding_region() {
        let mut b = Bindings::default();
        b.bind(target(), bound(1, 0, "first"));
        b.bind(target(), bound(4, 0, "second"));
        assert_eq!(b.lookup(&target(), 3, 2), Some("first"));
        assert_eq!(b.lookup(&target(), 7, 0), Some("second"));
        assert_eq!(b.lookup(&target(), 0, 0), Some("first"));
    }

    #[test]
    fn failed_fragment_call_is_reported() {
        use crate::schema::cell::Invocation;
        use crate::schema::loader::load_schema_from_str;
        use crate::types::Value;

        let schema = load_schema_from_str(
            r##"{ "templates": { "t": { "params": ["a"], "body": "<{a}>" } }, "rows": { "0": [{ "ex:p": "#t(x)" }] } }"##,
        )
        .unwrap();
        let declared = schema.tables()[0].cell(Coordinate::new(0, 0)).unwrap();
        let mut cell = declared.clone();
        let call = declared.invocations()[0].clone();
        cell.finalize(
            declared.effective().clone(),
            None,
            None,
            Vec::new(),
            vec![Invocation {
                args: vec!["x".into(), "y".into()],
                ..call
            }],
        );
        let mut matched = MatchedCell {
            input: Coordinate::new(0, 0),
            schema: Coordinate::new(0, 0),
            sub_row: 0,
            sub_col: 0,
            raw: "v".into(),
            text: "v".into(),
            value: Value::Utf8("v".into()),
            datatype: None,
            language: None,
            variables: Vec::new(),
            properties: Properties::new(),
            invocations: Vec::new(),
            is_header: false,
        };

        assert!(render_cell(&schema, declared, &mut matched.clone(), 0, &Bindings::default()).is_empty());
        let issues = render_cell(&schema, &cell, &mut matched, 0, &Bindings::default());
        assert!(matches!(
            issues.as_slice(),
            [ValueIssueKind::FragmentFailed { fragment, .. }] if fragment == "t"
        ));
        assert_eq!(matched.properties.get("ex:p"), Some(""));
    }

    #[test]
    fn unknown_target_is_unbound() {
        assert_eq!(Bindings::default().lookup(&target(), 0, 0), None);
    }
}
