//! Pointcut expression parser.
//!
//! Recursive descent over the lexer's token stream:
//! `parse_or_expr → parse_and_expr → parse_unary_expr → parse_primary_expr`.

use super::lexer::{Combinator, Lexeme, Token};
use super::match_expr::MatchExpr;
use super::{PointcutError, PointcutId};

/// What a `name(args)` reference resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum NamedTarget {
    Unresolved,
    Pointcut(PointcutId),
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointcutExpr {
    /// "match expression"
    Match(MatchExpr),
    /// name(arg, ...): named pointcut or attribute
    Named {
        name: String,
        args: Vec<String>,
        target: NamedTarget,
    },
    /// Bare identifier: binds a formal parameter of the enclosing advice or pointcut.
    ContextVar(String),
    Execution(Box<PointcutExpr>),
    Call(Box<PointcutExpr>),
    Construction(Box<PointcutExpr>),
    Destruction(Box<PointcutExpr>),
    Get(Box<PointcutExpr>),
    Set(Box<PointcutExpr>),
    Ref(Box<PointcutExpr>),
    Alias(Box<PointcutExpr>),
    Builtin(Box<PointcutExpr>),
    Base(Box<PointcutExpr>),
    Derived(Box<PointcutExpr>),
    That(Box<PointcutExpr>),
    Target(Box<PointcutExpr>),
    Result(Box<PointcutExpr>),
    Classes(Box<PointcutExpr>),
    Within(Box<PointcutExpr>),
    Member(Box<PointcutExpr>),
    /// cflow(expr); `id` is assigned when the expression is registered.
    CFlow {
        id: usize,
        inner: Box<PointcutExpr>,
    },
    Args(Vec<PointcutExpr>),
    Not(Box<PointcutExpr>),
    And(Box<PointcutExpr>, Box<PointcutExpr>),
    Or(Box<PointcutExpr>, Box<PointcutExpr>),
}

impl PointcutExpr {
    /// Build a single-argument combinator node.
    pub fn unary(c: Combinator, arg: PointcutExpr) -> PointcutExpr {
        let arg = Box::new(arg);
        match c {
            Combinator::Execution => PointcutExpr::Execution(arg),
            Combinator::Call => PointcutExpr::Call(arg),
            Combinator::Construction => PointcutExpr::Construction(arg),
            Combinator::Destruction => PointcutExpr::Destruction(arg),
            Combinator::Get => PointcutExpr::Get(arg),
            Combinator::Set => PointcutExpr::Set(arg),
            Combinator::Ref => PointcutExpr::Ref(arg),
            Combinator::Alias => PointcutExpr::Alias(arg),
            Combinator::Builtin => PointcutExpr::Builtin(arg),
            Combinator::Base => PointcutExpr::Base(arg),
            Combinator::Derived => PointcutExpr::Derived(arg),
            Combinator::That => PointcutExpr::That(arg),
            Combinator::Target => PointcutExpr::Target(arg),
            Combinator::Result => PointcutExpr::Result(arg),
            Combinator::Classes => PointcutExpr::Classes(arg),
            Combinator::Within => PointcutExpr::Within(arg),
            Combinator::Member => PointcutExpr::Member(arg),
            Combinator::CFlow => PointcutExpr::CFlow { id: 0, inner: arg },
            Combinator::Args => PointcutExpr::Args(vec![*arg]),
        }
    }

    /// The combinator and its argument, for single-argument combinator nodes.
    pub fn as_unary(&self) -> Option<(Combinator, &PointcutExpr)> {
        let pair = match self {
            PointcutExpr::Execution(a) => (Combinator::Execution, a),
            PointcutExpr::Call(a) => (Combinator::Call, a),
            PointcutExpr::Construction(a) => (Combinator::Construction, a),
            PointcutExpr::Destruction(a) => (Combinator::Destruction, a),
            PointcutExpr::Get(a) => (Combinator::Get, a),
            PointcutExpr::Set(a) => (Combinator::Set, a),
            PointcutExpr::Ref(a) => (Combinator::Ref, a),
            PointcutExpr::Alias(a) => (Combinator::Alias, a),
            PointcutExpr::Builtin(a) => (Combinator::Builtin, a),
            PointcutExpr::Base(a) => (Combinator::Base, a),
            PointcutExpr::Derived(a) => (Combinator::Derived, a),
            PointcutExpr::That(a) => (Combinator::That, a),
            PointcutExpr::Target(a) => (Combinator::Target, a),
            PointcutExpr::Result(a) => (Combinator::Result, a),
            PointcutExpr::Classes(a) => (Combinator::Classes, a),
            PointcutExpr::Within(a) => (Combinator::Within, a),
            PointcutExpr::Member(a) => (Combinator::Member, a),
            PointcutExpr::CFlow { inner, .. } => (Combinator::CFlow, inner),
            _ => return None,
        };
        Some((pair.0, pair.1.as_ref()))
    }

    /// Visit every node, parents before children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a PointcutExpr)) {
        f(self);
        match self {
            PointcutExpr::Args(items) => items.iter().for_each(|i| i.walk(f)),
            PointcutExpr::Not(inner) => inner.walk(f),
            PointcutExpr::And(l, r) | PointcutExpr::Or(l, r) => {
                l.walk(f);
                r.walk(f);
            }
            other => {
                if let Some((_, inner)) = other.as_unary() {
                    inner.walk(f);
                }
            }
        }
    }

    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut PointcutExpr)) {
        f(self);
        match self {
            PointcutExpr::Args(items) => items.iter_mut().for_each(|i| i.walk_mut(f)),
            PointcutExpr::Not(inner) => inner.walk_mut(f),
            PointcutExpr::And(l, r) | PointcutExpr::Or(l, r) => {
                l.walk_mut(f);
                r.walk_mut(f);
            }
            PointcutExpr::Execution(a)
            | PointcutExpr::Call(a)
            | PointcutExpr::Construction(a)
            | PointcutExpr::Destruction(a)
            | PointcutExpr::Get(a)
            | PointcutExpr::Set(a)
            | PointcutExpr::Ref(a)
            | PointcutExpr::Alias(a)
            | PointcutExpr::Builtin(a)
            | PointcutExpr::Base(a)
            | PointcutExpr::Derived(a)
            | PointcutExpr::That(a)
            | PointcutExpr::Target(a)
            | PointcutExpr::Result(a)
            | PointcutExpr::Classes(a)
            | PointcutExpr::Within(a)
            | PointcutExpr::Member(a)
            | PointcutExpr::CFlow { inner: a, .. } => a.walk_mut(f),
            PointcutExpr::Match(_) | PointcutExpr::Named { .. } | PointcutExpr::ContextVar(_) => {}
        }
    }
}

pub struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Lexeme>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn advance(&mut self) -> Option<&Lexeme> {
        let tok = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(tok)
    }

    fn expect(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Offset of the current token, or just past the last one at end of input.
    fn offset(&self) -> usize {
        match self.tokens.get(self.pos) {
            Some(l) => l.offset,
            None => self.tokens.last().map_or(0, |l| l.offset + 1),
        }
    }

    fn syntax(&self, message: impl Into<String>) -> PointcutError {
        PointcutError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    pub fn parse(&mut self) -> Result<PointcutExpr, PointcutError> {
        let expr = self.parse_or_expr()?;
        if self.pos < self.tokens.len() {
            return Err(PointcutError::TrailingInput {
                offset: self.offset(),
            });
        }
        Ok(expr)
    }

    fn parse_or_expr(&mut self) -> Result<PointcutExpr, PointcutError> {
        let mut left = self.parse_and_expr()?;
        while self.expect(&Token::Or) {
            let right = self.parse_and_expr()?;
            left = PointcutExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<PointcutExpr, PointcutError> {
        let mut left = self.parse_unary_expr()?;
        while self.expect(&Token::And) {
            let right = self.parse_unary_expr()?;
            left = PointcutExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<PointcutExpr, PointcutError> {
        if self.expect(&Token::Not) {
            let inner = self.parse_unary_expr()?;
            return Ok(PointcutExpr::Not(Box::new(inner)));
        }
        self.parse_primary_expr()
    }

    fn parse_primary_expr(&mut self) -> Result<PointcutExpr, PointcutError> {
        let offset = self.offset();
        let Some(tok) = self.peek().cloned() else {
            return Err(self.syntax("unexpected end of pointcut expression"));
        };

        match tok {
            Token::LParen => {
                self.advance();
                let inner = self.parse_or_expr()?;
                if !self.expect(&Token::RParen) {
                    return Err(PointcutError::ClosingBracketMissing {
                        offset: self.offset(),
                    });
                }
                Ok(inner)
            }
            Token::MatchExpr(text) => {
                self.advance();
                MatchExpr::parse(&text)
                    .map(PointcutExpr::Match)
                    .map_err(|message| PointcutError::MatchExpr {
                        expr: text,
                        message,
                        offset,
                    })
            }
            Token::Keyword(c) => {
                self.advance();
                self.parse_combinator(c, offset)
            }
            Token::Ident(_) | Token::ScopeSep => self.parse_name_ref(),
            _ => Err(self.syntax("unexpected token")),
        }
    }

    fn parse_combinator(&mut self, c: Combinator, offset: usize) -> Result<PointcutExpr, PointcutError> {
        if !self.expect(&Token::LParen) {
            return Err(self.syntax(format!("expected '(' after '{}'", c.keyword())));
        }
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or_expr()?);
                if !self.expect(&Token::Comma) {
                    break;
                }
            }
        }
        if !self.expect(&Token::RParen) {
            return Err(PointcutError::ClosingBracketMissing {
                offset: self.offset(),
            });
        }

        if c == Combinator::Args {
            return Ok(PointcutExpr::Args(args));
        }
        if args.len() != 1 {
            return Err(PointcutError::Arity {
                combinator: c.keyword(),
                found: args.len(),
                offset,
            });
        }
        let arg = args.pop().ok_or_else(|| self.syntax("missing argument"))?;
        Ok(PointcutExpr::unary(c, arg))
    }

    fn parse_name_ref(&mut self) -> Result<PointcutExpr, PointcutError> {
        let mut name = String::new();
        if self.expect(&Token::ScopeSep) {
            name.push_str("::");
        }
        loop {
            match self.peek().cloned() {
                Some(Token::Ident(part)) => {
                    self.advance();
                    name.push_str(&part);
                }
                _ => return Err(self.syntax("expected identifier")),
            }
            if self.expect(&Token::ScopeSep) {
                name.push_str("::");
            } else {
                break;
            }
        }

        if !self.expect(&Token::LParen) {
            if name.contains("::") {
                return Err(self.syntax(format!("expected '(' after pointcut name '{name}'")));
            }
            return Ok(PointcutExpr::ContextVar(name));
        }

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                match self.peek().cloned() {
                    Some(Token::Ident(arg)) => {
                        self.advance();
                        args.push(arg);
                    }
                    _ => return Err(self.syntax("expected context variable name")),
                }
                if !self.expect(&Token::Comma) {
                    break;
                }
            }
        }
        if !self.expect(&Token::RParen) {
            return Err(PointcutError::ClosingBracketMissing {
                offset: self.offset(),
            });
        }
        Ok(PointcutExpr::Named {
            name,
            args,
            target: NamedTarget::Unresolved,
        })
    }
}

fn precedence(expr: &PointcutExpr) -> u8 {
    match expr {
        PointcutExpr::Or(..) => 1,
        PointcutExpr::And(..) => 2,
        _ => 3,
    }
}

fn wrap(expr: &PointcutExpr, parens: bool) -> String {
    let s = pointcut_summary(expr);
    if parens { format!("({s})") } else { s }
}

/// Print a pointcut AST in canonical syntax. Parsing the result gives back an equal AST.
pub fn pointcut_summary(expr: &PointcutExpr) -> String {
    match expr {
        PointcutExpr::Match(m) => m.to_string(),
        PointcutExpr::Named { name, args, .. } => format!("{name}({})", args.join(", ")),
        PointcutExpr::ContextVar(name) => name.clone(),
        PointcutExpr::Args(items) => {
            let inner: Vec<String> = items.iter().map(pointcut_summary).collect();
            format!("args({})", inner.join(", "))
        }
        PointcutExpr::Not(inner) => format!("!{}", wrap(inner, precedence(inner) < 3)),
        PointcutExpr::And(l, r) => format!(
            "{} && {}",
            wrap(l, precedence(l) < 2),
            wrap(r, precedence(r) <= 2)
        ),
        PointcutExpr::Or(l, r) => format!(
            "{} || {}",
            wrap(l, precedence(l) < 1),
            wrap(r, precedence(r) <= 1)
        ),
        other => match other.as_unary() {
            Some((c, inner)) => format!("{}({})", c.keyword(), pointcut_summary(inner)),
            None => String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcut::lexer::Lexer;

    fn parse(input: &str) -> Result<PointcutExpr, PointcutError> {
        let tokens = Lexer::new(input).tokenize()?;
        Parser::new(tokens).parse()
    }

    #[test]
    fn test_parser_execution() {
        let ast = parse(r#"execution("% main(...)")"#).unwrap();
        match ast {
            PointcutExpr::Execution(inner) => match *inner {
                PointcutExpr::Match(m) => assert_eq!(m.source(), "% main(...)"),
                _ => panic!("Expected Match inside Execution"),
            },
            _ => panic!("Expected Execution"),
        }
    }

    #[test]
    fn test_parser_precedence() {
        // a || b && !c  ==  a || (b && (!c))
        let ast = parse("a || b && !c").unwrap();
        match ast {
            PointcutExpr::Or(l, r) => {
                assert!(matches!(*l, PointcutExpr::ContextVar(ref n) if n == "a"));
                match *r {
                    PointcutExpr::And(bl, br) => {
                        assert!(matches!(*bl, PointcutExpr::ContextVar(ref n) if n == "b"));
                        assert!(matches!(*br, PointcutExpr::Not(_)));
                    }
                    _ => panic!("Expected And on the right"),
                }
            }
            _ => panic!("Expected Or"),
        }
    }

    #[test]
    fn test_parser_left_associative() {
        let ast = parse("a && b && c").unwrap();
        match ast {
            PointcutExpr::And(l, _) => assert!(matches!(*l, PointcutExpr::And(..))),
            _ => panic!("Expected And"),
        }
    }

    #[test]
    fn test_parser_args_is_variadic() {
        assert_eq!(parse("args()").unwrap(), PointcutExpr::Args(vec![]));
        match parse(r#"args("int", x, "...::%*")"#).unwrap() {
            PointcutExpr::Args(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(&items[1], PointcutExpr::ContextVar(n) if n == "x"));
            }
            _ => panic!("Expected Args"),
        }
    }

    #[test]
    fn test_parser_named_reference() {
        let ast = parse("Base::pc(x, y) && ::global()").unwrap();
        match ast {
            PointcutExpr::And(l, r) => {
                assert_eq!(
                    *l,
                    PointcutExpr::Named {
                        name: "Base::pc".to_string(),
                        args: vec!["x".to_string(), "y".to_string()],
                        target: NamedTarget::Unresolved,
                    }
                );
                assert!(matches!(*r, PointcutExpr::Named { ref name, ref args, .. } if name == "::global" && args.is_empty()));
            }
            _ => panic!("Expected And"),
        }
    }

    #[test]
    fn test_parser_arity_errors() {
        assert_eq!(
            parse(r#"call("a", "b")"#).unwrap_err(),
            PointcutError::Arity {
                combinator: "call",
                found: 2,
                offset: 0
            }
        );
        assert!(matches!(
            parse("that()").unwrap_err(),
            PointcutError::Arity { combinator: "that", found: 0, .. }
        ));
    }

    #[test]
    fn test_parser_missing_bracket() {
        assert!(matches!(
            parse(r#"(call("% f()")"#).unwrap_err(),
            PointcutError::ClosingBracketMissing { .. }
        ));
        assert!(matches!(
            parse(r#"within("A""#).unwrap_err(),
            PointcutError::ClosingBracketMissing { .. }
        ));
    }

    #[test]
    fn test_parser_trailing_input() {
        assert_eq!(
            parse(r#""A" "B" )"#).unwrap_err(),
            PointcutError::TrailingInput { offset: 8 }
        );
        assert!(matches!(parse("a b").unwrap_err(), PointcutError::TrailingInput { offset: 2 }));
    }

    #[test]
    fn test_parser_bad_match_expression() {
        match parse(r#"call("% f(")"#).unwrap_err() {
            PointcutError::MatchExpr { expr, offset, .. } => {
                assert_eq!(expr, "% f(");
                assert_eq!(offset, 5);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parser_other_syntax_errors() {
        for bad in ["", "&& a", "call", "!", "A::B", "pc(x,)", "pc(\"x\")"] {
            assert!(parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_pointcut_summary() {
        let ast = parse(r#"execution("% ...::%(...)") && !cflow(call("% lock()")) || that(obj)"#).unwrap();
        assert_eq!(
            pointcut_summary(&ast),
            r#"execution("% ...::%(...)") && !cflow(call("% lock()")) || that(obj)"#
        );
    }

    #[test]
    fn test_pointcut_summary_parenthesizes() {
        let ast = parse("(a || b) && !(c && d) && (e && f)").unwrap();
        assert_eq!(pointcut_summary(&ast), "(a || b) && !(c && d) && (e && f)");
        assert_eq!(parse(&pointcut_summary(&ast)).unwrap(), ast);
    }

    #[test]
    fn test_walk_visits_every_node() {
        let ast = parse(r#"call("% f()") && args(a, b) && !cflow(x)"#).unwrap();
        let mut count = 0;
        ast.walk(&mut |_| count += 1);
        // And, And, call, "..", args, a, b, !, cflow, x
        assert_eq!(count, 10);
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        const MATCH_EXPRS: &[&str] = &[
            "% ...::%(...)",
            "A",
            "ns::%",
            "int",
            "const char *",
            "virtual void %::run%(int, ...) const",
            "int ...::count",
            "::",
        ];

        fn leaf() -> impl Strategy<Value = PointcutExpr> {
            prop_oneof![
                prop::sample::select(MATCH_EXPRS)
                    .prop_map(|s| PointcutExpr::Match(MatchExpr::parse(s).unwrap())),
                "v[a-z]{0,3}".prop_map(PointcutExpr::ContextVar),
                ("p[a-z]{0,3}(::p[a-z]{0,3})?", prop::collection::vec("v[a-z]{0,3}", 0..3))
                    .prop_map(|(name, args)| PointcutExpr::Named {
                        name,
                        args,
                        target: NamedTarget::Unresolved,
                    }),
            ]
        }

        fn unary_combinator() -> impl Strategy<Value = Combinator> {
            prop::sample::select(
                Combinator::ALL
                    .into_iter()
                    .filter(|c| *c != Combinator::Args)
                    .collect::<Vec<_>>(),
            )
        }

        fn expr() -> impl Strategy<Value = PointcutExpr> {
            leaf().prop_recursive(5, 48, 4, |inner| {
                prop_oneof![
                    (unary_combinator(), inner.clone()).prop_map(|(c, e)| PointcutExpr::unary(c, e)),
                    prop::collection::vec(inner.clone(), 0..4).prop_map(PointcutExpr::Args),
                    inner.clone().prop_map(|e| PointcutExpr::Not(Box::new(e))),
                    (inner.clone(), inner.clone())
                        .prop_map(|(l, r)| PointcutExpr::And(Box::new(l), Box::new(r))),
                    (inner.clone(), inner)
                        .prop_map(|(l, r)| PointcutExpr::Or(Box::new(l), Box::new(r))),
                ]
            })
        }

        proptest! {
            #[test]
            fn summary_reparses_to_equal_ast(ast in expr()) {
                let text = pointcut_summary(&ast);
                let reparsed = parse(&text);
                prop_assert!(reparsed.is_ok(), "{text} failed: {:?}", reparsed);
                prop_assert_eq!(reparsed.unwrap(), ast);
            }

            #[test]
            fn parser_never_panics(input in "[a-z\"%():,!&| ]{0,40}") {
                let _ = parse(&input);
            }
        }
    }
}
