//! Name registry for cross-reference variables.
//!
//! One [`SymbolTable`] per schema, keyed by [`Scope`]. Table-scoped lookups fall back to the
//! schema scope.

use std::collections::HashMap;

use crate::error::SchemaError;

use super::entity::{EntityRef, Scope};

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<(Scope, String), EntityRef>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` in `scope`. Fails if the name is already taken in that scope.
    pub fn register(&mut self, scope: Scope, name: &str, target: EntityRef) -> Result<(), SchemaError> {
        let key = (scope, name.to_string());
        if self.entries.contains_key(&key) {
            return Err(SchemaError::DuplicateName {
                name: name.to_string(),
                scope: scope.to_string(),
            });
        }
        self.entries.insert(key, target);
        Ok(())
    }

    /// Move `target` from `old` (if it had a name) to `new`.
    ///
    /// Either both the removal and the insertion happen or neither does.
    pub fn rename(
        &mut self,
        scope: Scope,
        old: Option<&str>,
        new: &str,
        target: EntityRef,
    ) -> Result<(), SchemaError> {
        if old == Some(new) {
            return Ok(());
        }
        if let Some(existing) = self.entries.get(&(scope, new.to_string())) {
            if *existing != target {
                return Err(SchemaError::DuplicateName {
                    name: new.to_string(),
                    scope: scope.to_string(),
                });
            }
        }
        if let Some(old) = old {
            let old_key = (scope, old.to_string());
            if self.entries.get(&old_key) == Some(&target) {
                self.entries.remove(&old_key);
            }
        }
        self.entries.insert((scope, new.to_string()), target);
        Ok(())
    }

    /// Exact lookup in one scope.
    pub fn lookup(&self, scope: Scope, name: &str) -> Option<&EntityRef> {
        self.entries.get(&(scope, name.to_string()))
    }

    /// Lookup from `scope`, falling back to the schema scope.
    pub fn resolve(&self, scope: Scope, name: &str) -> Option<&EntityRef> {
        self.lookup(scope, name).or_else(|| match scope {
            Scope::Schema => None,
            Scope::Table(_) => self.lookup(Scope::Schema, name),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
