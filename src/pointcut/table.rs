//! Named pointcut definitions, stored per scope.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{EntityId, ProgramModel};

use super::{Formal, NameLookup, PointcutExpr, PointcutId};

#[derive(Debug, Clone)]
pub struct PointcutDef {
    pub name: String,
    /// Namespace or aspect the pointcut is declared in.
    pub scope: EntityId,
    pub params: Vec<Formal>,
    /// `None` for pure virtual pointcuts and definitions that failed to parse.
    pub expr: Option<PointcutExpr>,
    pub is_virtual: bool,
}

/// Pointcuts and attributes of one translation unit, keyed by (scope, name).
#[derive(Debug, Default)]
pub struct PointcutTable {
    defs: Vec<PointcutDef>,
    by_scope: HashMap<(EntityId, String), PointcutId>,
    attributes: HashSet<(EntityId, String)>,
}

impl PointcutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a pointcut. Returns `None` if the scope already has one of that name.
    pub fn define(&mut self, def: PointcutDef) -> Option<PointcutId> {
        let key = (def.scope, def.name.clone());
        if self.by_scope.contains_key(&key) {
            return None;
        }
        let id = PointcutId(self.defs.len());
        self.defs.push(def);
        self.by_scope.insert(key, id);
        Some(id)
    }

    pub fn declare_attribute(&mut self, scope: EntityId, name: &str) {
        self.attributes.insert((scope, name.to_string()));
    }

    pub fn get(&self, id: PointcutId) -> &PointcutDef {
        &self.defs[id.0]
    }

    pub fn set_expr(&mut self, id: PointcutId, expr: PointcutExpr) {
        self.defs[id.0].expr = Some(expr);
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// `name` declared in `scope` or inherited from one of its bases.
    fn find_in(&self, model: &ProgramModel, scope: EntityId, name: &str) -> Option<PointcutId> {
        std::iter::once(scope)
            .chain(model.all_bases(scope))
            .find_map(|s| self.by_scope.get(&(s, name.to_string())).copied())
    }

    /// The scope a possibly qualified name prefix refers to, seen from `from`.
    fn find_scope(&self, model: &ProgramModel, from: EntityId, prefix: &str) -> Option<EntityId> {
        if let Some(absolute) = prefix.strip_prefix("::") {
            return model.lookup(absolute);
        }
        std::iter::once(from)
            .chain(model.scopes_of(from))
            .find_map(|s| {
                let base = if s == model.root() {
                    prefix.to_string()
                } else {
                    format!("{}::{prefix}", model.qualified_name(s))
                };
                model.lookup(&base)
            })
    }

    /// Lexical-then-inheritance lookup: the scope and its bases first, then
    /// each enclosing scope outward.
    pub fn find(&self, model: &ProgramModel, scope: EntityId, name: &str) -> Option<PointcutId> {
        match name.rsplit_once("::") {
            Some((prefix, simple)) => {
                let target = if prefix.is_empty() {
                    model.root()
                } else {
                    self.find_scope(model, scope, prefix)?
                };
                self.find_in(model, target, simple)
            }
            None => std::iter::once(scope)
                .chain(model.scopes_of(scope))
                .find_map(|s| self.find_in(model, s, name)),
        }
    }

    fn find_attribute(&self, model: &ProgramModel, scope: EntityId, name: &str) -> Option<String> {
        let (prefix, simple) = match name.rsplit_once("::") {
            Some((p, s)) => (Some(p), s),
            None => (None, name),
        };
        let scopes: Vec<EntityId> = match prefix {
            Some("") => vec![model.root()],
            Some(p) => vec![self.find_scope(model, scope, p)?],
            None => std::iter::once(scope).chain(model.scopes_of(scope)).collect(),
        };
        scopes
            .into_iter()
            .find(|&s| self.attributes.contains(&(s, simple.to_string())))
            .map(|s| {
                if s == model.root() {
                    simple.to_string()
                } else {
                    format!("{}::{simple}", model.qualified_name(s))
                }
            })
    }

    /// The most-derived override of a virtual pointcut reachable from the
    /// concrete aspect `aspect`, searching toward its bases. Same-named
    /// pointcuts of aspects outside the declaring aspect's hierarchy are
    /// not overrides.
    pub fn resolve_virtual(
        &self,
        model: &ProgramModel,
        id: PointcutId,
        aspect: Option<EntityId>,
    ) -> PointcutId {
        let def = &self.defs[id.0];
        let Some(aspect) = aspect else { return id };
        if !def.is_virtual {
            return id;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([aspect]);
        while let Some(cur) = queue.pop_front() {
            if !seen.insert(cur) {
                continue;
            }
            // only aspects derived from the declaring one can override
            if let Some(&found) = self.by_scope.get(&(cur, def.name.clone())) {
                if model.is_derived_from(cur, def.scope) {
                    return found;
                }
            }
            queue.extend(model.entity(cur).bases.iter().copied());
        }
        id
    }

    /// Bind this table to a model for name resolution.
    pub fn lookup<'a>(&'a self, model: &'a ProgramModel) -> TableLookup<'a> {
        TableLookup { table: self, model }
    }
}

pub struct TableLookup<'a> {
    table: &'a PointcutTable,
    model: &'a ProgramModel,
}

impl NameLookup for TableLookup<'_> {
    fn pointcut(&self, scope: EntityId, name: &str) -> Option<(PointcutId, usize)> {
        let id = self.table.find(self.model, scope, name)?;
        Some((id, self.table.get(id).params.len()))
    }

    fn attribute(&self, scope: EntityId, name: &str) -> Option<String> {
        self.table.find_attribute(self.model, scope, name)
    }
}
