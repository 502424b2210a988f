//! Pointcut language: lexer, parser, name resolution and matching.

pub mod binding;
pub mod lexer;
pub mod match_expr;
pub mod matcher;
pub mod parser;
pub mod table;

use thiserror::Error;

use crate::model::EntityId;

pub use binding::{Binding, BoundRole, Condition};
pub use lexer::Combinator;
pub use match_expr::{MatchExpr, MatchKind};
pub use matcher::{MatchContext, Matched, Subject};
pub use parser::{NamedTarget, PointcutExpr, pointcut_summary};
pub use table::{PointcutDef, PointcutTable};

/// Handle of a named pointcut definition in a `PointcutTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointcutId(pub usize);

/// Typed formal parameter of an advice or named pointcut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formal {
    pub name: String,
    pub ty: String,
}

impl Formal {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointcutError {
    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated match expression")]
    UnterminatedString { offset: usize },
    #[error("pointcut expression parser failed: {message}")]
    Syntax { offset: usize, message: String },
    #[error("closing bracket missing")]
    ClosingBracketMissing { offset: usize },
    #[error("input after end of pointcut expression")]
    TrailingInput { offset: usize },
    #[error("'{combinator}' expects exactly one argument, found {found}")]
    Arity {
        combinator: &'static str,
        found: usize,
        offset: usize,
    },
    #[error("invalid match expression \"{expr}\": {message}")]
    MatchExpr {
        expr: String,
        message: String,
        offset: usize,
    },
    #[error("named pointcut or attribute '{name}' not found")]
    NotFound { name: String },
    #[error("'{name}' is ambiguous: it names both a pointcut and an attribute")]
    Ambiguous { name: String },
    #[error("'{name}' expects {expected} argument(s), found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("'{name}' is not a formal parameter")]
    UnknownContextVariable { name: String },
}

impl PointcutError {
    /// Byte offset in the pointcut text, for lexical and syntax errors.
    pub fn offset(&self) -> Option<usize> {
        match self {
            PointcutError::UnexpectedChar { offset, .. }
            | PointcutError::UnterminatedString { offset }
            | PointcutError::Syntax { offset, .. }
            | PointcutError::ClosingBracketMissing { offset }
            | PointcutError::TrailingInput { offset }
            | PointcutError::Arity { offset, .. }
            | PointcutError::MatchExpr { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Name resolution for `name(args)` references.
pub trait NameLookup {
    /// A named pointcut visible from `scope`, with its number of formals.
    fn pointcut(&self, scope: EntityId, name: &str) -> Option<(PointcutId, usize)>;

    /// An attribute visible from `scope`, returned by qualified name.
    fn attribute(&self, scope: EntityId, name: &str) -> Option<String>;
}

/// Parse `text` and resolve its named references from `scope`.
///
/// `formals` are the context variable names the expression may bind.
/// Attribute references are only considered when `attributes` is set.
pub fn parse_pointcut(
    text: &str,
    lookup: &dyn NameLookup,
    scope: EntityId,
    formals: &[Formal],
    attributes: bool,
) -> Result<PointcutExpr, PointcutError> {
    let tokens = lexer::Lexer::new(text).tokenize()?;
    let mut expr = parser::Parser::new(tokens).parse()?;
    resolve_names(&mut expr, lookup, scope, formals, attributes)?;
    Ok(expr)
}

fn resolve_names(
    expr: &mut PointcutExpr,
    lookup: &dyn NameLookup,
    scope: EntityId,
    formals: &[Formal],
    attributes: bool,
) -> Result<(), PointcutError> {
    let is_formal = |name: &str| formals.iter().any(|f| f.name == name);
    let mut error = None;

    expr.walk_mut(&mut |node| {
        if error.is_some() {
            return;
        }
        match node {
            PointcutExpr::ContextVar(name) if !is_formal(name) => {
                error = Some(PointcutError::UnknownContextVariable { name: name.clone() });
            }
            PointcutExpr::Named { name, args, target } => {
                if let Some(unknown) = args.iter().find(|a| !is_formal(a)) {
                    error = Some(PointcutError::UnknownContextVariable {
                        name: unknown.clone(),
                    });
                    return;
                }
                let pointcut = lookup.pointcut(scope, name);
                let attribute = if attributes {
                    lookup.attribute(scope, name)
                } else {
                    None
                };
                *target = match (pointcut, attribute) {
                    (Some(_), Some(_)) => {
                        error = Some(PointcutError::Ambiguous { name: name.clone() });
                        return;
                    }
                    (Some((id, expected)), None) => {
                        if expected != args.len() {
                            error = Some(PointcutError::ArgumentCount {
                                name: name.clone(),
                                expected,
                                found: args.len(),
                            });
                            return;
                        }
                        NamedTarget::Pointcut(id)
                    }
                    (None, Some(qualified)) => {
                        if !args.is_empty() {
                            error = Some(PointcutError::ArgumentCount {
                                name: name.clone(),
                                expected: 0,
                                found: args.len(),
                            });
                            return;
                        }
                        NamedTarget::Attribute(qualified)
                    }
                    (None, None) => {
                        error = Some(PointcutError::NotFound { name: name.clone() });
                        return;
                    }
                };
            }
            _ => {}
        }
    });

    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Give every `cflow` node a fresh id from `next`; returns the ids handed out.
pub fn number_cflows(expr: &mut PointcutExpr, next: &mut usize) -> Vec<usize> {
    let mut ids = Vec::new();
    expr.walk_mut(&mut |node| {
        if let PointcutExpr::CFlow { id, .. } = node {
            *id = *next;
            ids.push(*next);
            *next += 1;
        }
    });
    ids
}
