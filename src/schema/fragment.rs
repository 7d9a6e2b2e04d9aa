//! Named, parameterised bodies (properties, functions, templates) addressable from any cell.

use std::collections::HashMap;

use crate::error::SchemaError;

use super::entity::{Properties, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Property,
    Function,
    Template,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Property => "property",
            FragmentKind::Function => "function",
            FragmentKind::Template => "template",
        }
    }
}

/// A reusable fragment: ordered parameters plus a body (template text or script source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReusableFragment {
    kind: FragmentKind,
    name: String,
    parameters: Vec<String>,
    body: String,
    scope: Scope,
    properties: Properties,
}

impl ReusableFragment {
    pub fn new(
        kind: FragmentKind,
        name: impl Into<String>,
        parameters: Vec<String>,
        body: impl Into<String>,
        scope: Scope,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            parameters,
            body: body.into(),
            scope,
            properties: Properties::default(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Substitute `{param}` placeholders in the body with `args`, positionally.
    ///
    /// Function bodies are scripts for the emission layer and are returned unchanged.
    pub fn render(&self, args: &[&str]) -> Result<String, SchemaError> {
        if args.len() != self.parameters.len() {
            return Err(SchemaError::FragmentArity {
                name: self.name.clone(),
                expected: self.parameters.len(),
                actual: args.len(),
            });
        }
        if self.kind == FragmentKind::Function {
            return Ok(self.body.clone());
        }
        let mut out = self.body.clone();
        for (param, arg) in self.parameters.iter().zip(args) {
            out = out.replace(&format!("{{{param}}}"), arg);
        }
        Ok(out)
    }
}

/// Fragments of one scope, addressable by name and by stable index.
#[derive(Debug, Clone, Default)]
pub struct FragmentRegistry {
    items: Vec<ReusableFragment>,
    by_name: HashMap<String, usize>,
}

impl FragmentRegistry {
    pub fn insert(&mut self, fragment: ReusableFragment) -> Result<usize, SchemaError> {
        if self.by_name.contains_key(fragment.name()) {
            return Err(SchemaError::DuplicateName {
                name: fragment.name().to_string(),
                scope: fragment.scope().to_string(),
            });
        }
        let index = self.items.len();
        self.by_name.insert(fragment.name().to_string(), index);
        self.items.push(fragment);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&ReusableFragment> {
        self.items.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&ReusableFragment> {
        self.index_of(name).and_then(|i| self.items.get(i))
    }

    /// Rename the fragment at `index`; the old name is released only if the new one is free.
    pub fn rename(&mut self, index: usize, new: &str) -> Result<String, SchemaError> {
        let fragment = self.items.get_mut(index).ok_or_else(|| SchemaError::UnknownName {
            name: format!("#{index}"),
            scope: "fragment registry".to_string(),
        })?;
        if fragment.name == new {
            return Ok(new.to_string());
        }
        if self.by_name.contains_key(new) {
            return Err(SchemaError::DuplicateName {
                name: new.to_string(),
                scope: fragment.scope.to_string(),
            });
        }
        let old = std::mem::replace(&mut fragment.name, new.to_string());
        self.by_name.remove(&old);
        self.by_name.insert(new.to_string(), index);
        Ok(old)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReusableFragment> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A call such as `#label(${name}, en)` written in a cell property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentCall {
    pub name: String,
    pub args: Vec<String>,
}

impl FragmentCall {
    /// Parse `#name(arg, ...)`; anything else is not a call.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix('#')?;
        let open = rest.find('(')?;
        let inner = rest[open + 1..].strip_suffix(')')?;
        let name = rest[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return None;
        }
        let args = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner.split(',').map(|a| a.trim().to_string()).collect()
        };
        Some(Self {
            name: name.to_string(),
            args,
        })
    }
}
