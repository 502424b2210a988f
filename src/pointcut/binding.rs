//! Context variable bindings and runtime conditions produced by matching.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundRole {
    That,
    Target,
    Result,
    Arg(usize),
}

impl fmt::Display for BoundRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundRole::That => f.write_str("that"),
            BoundRole::Target => f.write_str("target"),
            BoundRole::Result => f.write_str("result"),
            BoundRole::Arg(n) => write!(f, "arg{n}"),
        }
    }
}

/// Formal parameter name → (role, bound type). A name holds at most one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Binding {
    entries: BTreeMap<String, (BoundRole, String)>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(name: &str, role: BoundRole, ty: &str) -> Self {
        let mut b = Self::new();
        b.bind(name, role, ty);
        b
    }

    /// Returns false if `name` is already bound to a different role.
    pub fn bind(&mut self, name: &str, role: BoundRole, ty: &str) -> bool {
        match self.entries.get(name) {
            Some((existing, _)) => *existing == role,
            None => {
                self.entries.insert(name.to_string(), (role, ty.to_string()));
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<(BoundRole, &str)> {
        self.entries.get(name).map(|(r, t)| (*r, t.as_str()))
    }

    /// Union of two bindings; `None` when they disagree on a name.
    pub fn merged(mut self, other: Binding) -> Option<Binding> {
        for (name, (role, ty)) in other.entries {
            if !self.bind(&name, role, &ty) {
                return None;
            }
        }
        Some(self)
    }

    /// Re-key a named pointcut's binding from its formals to the caller's
    /// argument names. Formals not passed on are dropped.
    pub fn renamed<'a>(&self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<Binding> {
        let mut out = Binding::new();
        for (inner, outer) in pairs {
            let Some((role, ty)) = self.entries.get(inner) else {
                continue;
            };
            if !out.bind(outer, *role, ty) {
                return None;
            }
        }
        Some(out)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, BoundRole, &str)> {
        self.entries
            .iter()
            .map(|(n, (r, t))| (n.as_str(), *r, t.as_str()))
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(name, role, _)| format!("{name}={role}"))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Runtime guard attached to a match. Never evaluated while weaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Inside the control flow of the join points of cflow `id`.
    CFlow(usize),
    /// `this` is an instance of one of the named classes.
    That(Vec<String>),
    /// The call or access target is an instance of one of the named classes.
    Target(Vec<String>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Conjunction of two optional guards; `None` means unconditional.
    pub fn and(a: Option<Condition>, b: Option<Condition>) -> Option<Condition> {
        match (a, b) {
            (None, c) | (c, None) => c,
            (Some(a), Some(b)) => Some(Condition::And(Box::new(a), Box::new(b))),
        }
    }

    /// Disjunction; unconditional if either side is.
    pub fn or(a: Option<Condition>, b: Option<Condition>) -> Option<Condition> {
        match (a, b) {
            (Some(a), Some(b)) => Some(Condition::Or(Box::new(a), Box::new(b))),
            _ => None,
        }
    }

    /// Every cflow id the condition depends on.
    pub fn cflow_ids(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_cflows(&mut out);
        out
    }

    fn collect_cflows(&self, out: &mut Vec<usize>) {
        match self {
            Condition::CFlow(id) => out.push(*id),
            Condition::That(_) | Condition::Target(_) => {}
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.collect_cflows(out);
                b.collect_cflows(out);
            }
            Condition::Not(c) => c.collect_cflows(out),
        }
    }
}

fn type_check(classes: &[String], object: &str) -> String {
    let checks: Vec<String> = classes
        .iter()
        .map(|c| format!("dynamic_cast<{c} *>({object})"))
        .collect();
    if checks.len() == 1 {
        checks[0].clone()
    } else {
        format!("({})", checks.join(" || "))
    }
}

/// Renders the guard as the C++ expression inserted by code generation.
impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::CFlow(id) => write!(f, "__cflow_{id}::active()"),
            Condition::That(classes) => f.write_str(&type_check(classes, "this")),
            Condition::Target(classes) => f.write_str(&type_check(classes, "__target")),
            Condition::And(a, b) => write!(f, "({a} && {b})"),
            Condition::Or(a, b) => write!(f, "({a} || {b})"),
            Condition::Not(c) => write!(f, "!{c}"),
        }
    }
}
