//! Aspect declarations bound to a translation unit.

pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MemberDecl;
use crate::model::EntityId;
use crate::pointcut::{Formal, PointcutExpr};

pub use registry::{AspectInfo, AspectRegistry, CFlowTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdviceKind {
    Before,
    After,
    Around,
}

impl AdviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::Around => "around",
        }
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks where around advice continues with the wrapped code.
pub const PROCEED: &str = "proceed()";

#[derive(Debug, Clone)]
pub struct Advice {
    /// Aspect the advice is declared in.
    pub aspect: EntityId,
    /// Position among the declaring aspect's advice.
    pub index: usize,
    pub kind: AdviceKind,
    pub pointcut: PointcutExpr,
    pub body: String,
    pub params: Vec<Formal>,
}

impl Advice {
    pub fn calls_proceed(&self) -> bool {
        self.body.contains(PROCEED)
    }
}

/// Precedence declaration: `groups` are pointcuts over aspects, highest first.
#[derive(Debug, Clone)]
pub struct OrderRule {
    pub aspect: EntityId,
    pub pointcut: Option<PointcutExpr>,
    pub groups: Vec<PointcutExpr>,
}

#[derive(Debug, Clone)]
pub struct Introduction {
    pub aspect: EntityId,
    pub index: usize,
    pub pointcut: PointcutExpr,
    pub slice: String,
    pub members: Vec<MemberDecl>,
    pub bases: Vec<String>,
}

/// A declaration instantiated for one concrete aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instance {
    pub concrete: EntityId,
    /// Index into the registry's advice, order or introduction list.
    pub decl: usize,
}
