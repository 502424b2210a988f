//! Match expressions: the quoted name and signature patterns of the pointcut language.
//!
//! A match expression is written like a declaration: `"A"`, `"ns::%"`,
//! `"const char *"`, `"virtual % ...::run%(int, ...) const"`, `"int ...::count"`.
//! `%` matches any character sequence inside one name segment (a lone `%` in
//! type position is "any type"), `...` stands for any number of scopes or
//! arguments, and `"::"` denotes the root namespace.

use std::fmt;

use regex::Regex;

use crate::model::{EntityId, EntityKind, ProgramModel};

const BUILTIN_WORDS: &[&str] = &[
    "void", "bool", "char", "wchar_t", "short", "int", "long", "signed", "unsigned", "float",
    "double",
];

#[derive(Debug, Clone, PartialEq)]
enum MTok {
    Word(String),
    Scope,
    Ellipsis,
    Star,
    Amp,
    LParen,
    RParen,
    Comma,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '%'
}

fn tokenize(input: &str) -> Result<Vec<MTok>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push(MTok::Scope);
                i += 2;
            }
            '.' if chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') => {
                out.push(MTok::Ellipsis);
                i += 3;
            }
            '*' => {
                out.push(MTok::Star);
                i += 1;
            }
            '&' => {
                out.push(MTok::Amp);
                i += 1;
            }
            '(' => {
                out.push(MTok::LParen);
                i += 1;
            }
            ')' => {
                out.push(MTok::RParen);
                i += 1;
            }
            ',' => {
                out.push(MTok::Comma);
                i += 1;
            }
            '~' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && is_word_char(chars[j]) {
                    j += 1;
                }
                if j == start {
                    return Err("expected a class name after '~'".to_string());
                }
                out.push(MTok::Word(format!("~{}", chars[start..j].iter().collect::<String>())));
                i = j;
            }
            _ if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let mut word: String = chars[start..i].iter().collect();
                if word == "operator" {
                    i = read_operator_name(&chars, i, &mut word)?;
                } else if chars.get(i) == Some(&'<') {
                    // template arguments stay part of the name segment
                    let mut depth = 0;
                    let start = i;
                    while i < chars.len() {
                        match chars[i] {
                            '<' => depth += 1,
                            '>' => {
                                depth -= 1;
                                if depth == 0 {
                                    i += 1;
                                    break;
                                }
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                    if depth != 0 {
                        return Err("unbalanced template argument list".to_string());
                    }
                    let args: String = chars[start..i].iter().filter(|c| !c.is_whitespace()).collect();
                    word.push_str(&args);
                }
                out.push(MTok::Word(word));
            }
            _ => return Err(format!("unexpected character '{c}'")),
        }
    }
    Ok(out)
}

/// Reads the symbol after `operator` and appends it as `operator <sym>`.
fn read_operator_name(chars: &[char], mut i: usize, word: &mut String) -> Result<usize, String> {
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    let start = i;
    if chars.get(i) == Some(&'(') && chars.get(i + 1) == Some(&')') {
        i += 2;
    } else if chars.get(i) == Some(&'[') && chars.get(i + 1) == Some(&']') {
        i += 2;
    } else {
        while chars
            .get(i)
            .is_some_and(|c| "+-*/%^&|~!=<>".contains(*c))
        {
            i += 1;
        }
    }
    if i == start {
        return Err("expected an operator symbol after 'operator'".to_string());
    }
    word.push(' ');
    word.extend(&chars[start..i]);
    Ok(i)
}

/// One name segment, possibly containing `%` wildcards.
#[derive(Debug, Clone)]
struct Segment {
    raw: String,
    regex: Option<Regex>,
}

impl Segment {
    fn new(raw: &str) -> Result<Self, String> {
        let regex = if raw.contains('%') {
            let body: Vec<String> = raw.split('%').map(regex::escape).collect();
            let re = Regex::new(&format!("^{}$", body.join(".*"))).map_err(|e| e.to_string())?;
            Some(re)
        } else {
            None
        };
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(name),
            None => self.raw == name,
        }
    }
}

#[derive(Debug, Clone)]
enum ScopePart {
    Seg(Segment),
    AnyScopes,
}

#[derive(Debug, Clone)]
struct NamePattern {
    scopes: Vec<ScopePart>,
    name: Segment,
}

impl NamePattern {
    fn matches(&self, scopes: &[&str], name: &str) -> bool {
        self.name.matches(name) && glob_scopes(&self.scopes, scopes)
    }

    fn literal_parts(&self) -> (Vec<&str>, &str) {
        let scopes = self
            .scopes
            .iter()
            .map(|s| match s {
                ScopePart::Seg(seg) => seg.raw.as_str(),
                ScopePart::AnyScopes => "...",
            })
            .collect();
        (scopes, self.name.raw.as_str())
    }

    fn is_any(&self) -> bool {
        self.scopes.is_empty() && self.name.raw == "%"
    }
}

fn glob_scopes(pattern: &[ScopePart], scopes: &[&str]) -> bool {
    match pattern.split_first() {
        None => scopes.is_empty(),
        Some((ScopePart::AnyScopes, rest)) => {
            (0..=scopes.len()).any(|k| glob_scopes(rest, &scopes[k..]))
        }
        Some((ScopePart::Seg(seg), rest)) => {
            !scopes.is_empty() && seg.matches(scopes[0]) && glob_scopes(rest, &scopes[1..])
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cv {
    is_const: bool,
    is_volatile: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PtrOp {
    Pointer(Cv),
    Reference,
}

#[derive(Debug, Clone)]
enum BaseType {
    Any,
    Builtin(String),
    Named(NamePattern),
}

#[derive(Debug, Clone)]
struct TypePattern {
    cv: Cv,
    base: BaseType,
    ops: Vec<PtrOp>,
}

impl TypePattern {
    fn is_plain_name(&self) -> Option<&NamePattern> {
        match &self.base {
            BaseType::Named(n) if self.ops.is_empty() && self.cv == Cv::default() => Some(n),
            _ => None,
        }
    }

    fn is_any(&self) -> bool {
        matches!(self.base, BaseType::Any) && self.ops.is_empty()
    }

    /// `self` is a pattern, `ty` a concrete type parsed from the model.
    fn matches(&self, ty: &TypePattern) -> bool {
        match &self.base {
            BaseType::Any => {
                if self.ops.len() > ty.ops.len() {
                    return false;
                }
                let split = ty.ops.len() - self.ops.len();
                if ty.ops[split..] != self.ops[..] {
                    return false;
                }
                if !self.cv.is_const && !self.cv.is_volatile {
                    return true;
                }
                let inner = if split == 0 {
                    ty.cv
                } else {
                    match ty.ops[split - 1] {
                        PtrOp::Pointer(cv) => cv,
                        PtrOp::Reference => Cv::default(),
                    }
                };
                (!self.cv.is_const || inner.is_const) && (!self.cv.is_volatile || inner.is_volatile)
            }
            BaseType::Builtin(name) => {
                self.cv == ty.cv
                    && self.ops == ty.ops
                    && matches!(&ty.base, BaseType::Builtin(other) if other == name)
            }
            BaseType::Named(pattern) => {
                if self.cv != ty.cv || self.ops != ty.ops {
                    return false;
                }
                match &ty.base {
                    BaseType::Named(concrete) => {
                        let (scopes, name) = concrete.literal_parts();
                        pattern.matches(&scopes, name)
                    }
                    _ => false,
                }
            }
        }
    }

    /// Structural equality of two concrete types.
    fn same_as(&self, other: &TypePattern) -> bool {
        let base_eq = match (&self.base, &other.base) {
            (BaseType::Builtin(a), BaseType::Builtin(b)) => a == b,
            (BaseType::Named(a), BaseType::Named(b)) => a.literal_parts() == b.literal_parts(),
            _ => false,
        };
        base_eq && self.cv == other.cv && self.ops == other.ops
    }
}

#[derive(Debug, Clone)]
enum ParamPattern {
    Type(TypePattern),
    Ellipsis,
}

#[derive(Debug, Clone)]
struct FunctionPattern {
    is_virtual: bool,
    is_static: bool,
    result: Option<TypePattern>,
    name: NamePattern,
    params: Vec<ParamPattern>,
    quals: Cv,
}

#[derive(Debug, Clone)]
struct VariablePattern {
    ty: TypePattern,
    name: NamePattern,
}

#[derive(Debug, Clone)]
enum Pattern {
    Root,
    Type(TypePattern),
    Function(FunctionPattern),
    Variable(VariablePattern),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Type,
    Function,
    Variable,
}

#[derive(Debug, Clone)]
pub struct MatchExpr {
    source: String,
    pattern: Pattern,
}

impl PartialEq for MatchExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for MatchExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.source)
    }
}

struct DeclParser {
    tokens: Vec<MTok>,
    pos: usize,
    wildcards: bool,
}

#[derive(Default)]
struct DeclSpecs {
    cv: Cv,
    builtin: Vec<String>,
    name: Option<NamePattern>,
    is_virtual: bool,
    is_static: bool,
}

impl DeclParser {
    fn peek(&self) -> Option<&MTok> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(MTok::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<MTok> {
        let tok = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(tok)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn segment(&self, raw: &str) -> Result<Segment, String> {
        if raw.contains('%') && !self.wildcards {
            return Err(format!("wildcard in concrete type '{raw}'"));
        }
        Segment::new(raw)
    }

    /// qualified-name: [::] part (:: part)*, where part is a word or `...`.
    fn parse_name(&mut self) -> Result<NamePattern, String> {
        if self.peek() == Some(&MTok::Scope) {
            self.advance();
        }
        let mut parts = Vec::new();
        loop {
            match self.advance() {
                Some(MTok::Word(w)) => parts.push(ScopePart::Seg(self.segment(&w)?)),
                Some(MTok::Ellipsis) if self.wildcards => parts.push(ScopePart::AnyScopes),
                _ => return Err("expected a name".to_string()),
            }
            if self.peek() == Some(&MTok::Scope) {
                self.advance();
            } else {
                break;
            }
        }
        match parts.pop() {
            Some(ScopePart::Seg(name)) => Ok(NamePattern { scopes: parts, name }),
            _ => Err("'...' cannot be the last part of a name".to_string()),
        }
    }

    fn parse_decl_specs(&mut self) -> Result<DeclSpecs, String> {
        let mut ds = DeclSpecs::default();
        while let Some(word) = self.peek_word() {
            match word {
                "const" => ds.cv.is_const = true,
                "volatile" => ds.cv.is_volatile = true,
                "virtual" => ds.is_virtual = true,
                "static" => ds.is_static = true,
                w if BUILTIN_WORDS.contains(&w) => {
                    if ds.name.is_some() {
                        break;
                    }
                    ds.builtin.push(w.to_string())
                }
                _ => {
                    if ds.name.is_some() || !ds.builtin.is_empty() {
                        break;
                    }
                    ds.name = Some(self.parse_name()?);
                    continue;
                }
            }
            self.advance();
        }
        if ds.name.is_none() && ds.builtin.is_empty() && self.peek() == Some(&MTok::Scope) {
            ds.name = Some(self.parse_name()?);
            while let Some(word) = self.peek_word() {
                match word {
                    "const" => ds.cv.is_const = true,
                    "volatile" => ds.cv.is_volatile = true,
                    _ => break,
                }
                self.advance();
            }
        }
        if ds.name.is_none()
            && ds.builtin.is_empty()
            && self.wildcards
            && self.peek() == Some(&MTok::Ellipsis)
        {
            ds.name = Some(self.parse_name()?);
        }
        Ok(ds)
    }

    fn parse_ptr_ops(&mut self) -> Vec<PtrOp> {
        let mut ops = Vec::new();
        loop {
            match self.peek() {
                Some(MTok::Star) => {
                    self.advance();
                    let mut cv = Cv::default();
                    while let Some(word) = self.peek_word() {
                        match word {
                            "const" => cv.is_const = true,
                            "volatile" => cv.is_volatile = true,
                            _ => break,
                        }
                        self.advance();
                    }
                    ops.push(PtrOp::Pointer(cv));
                }
                Some(MTok::Amp) => {
                    self.advance();
                    ops.push(PtrOp::Reference);
                }
                _ => return ops,
            }
        }
    }

    fn base_of(&self, ds: DeclSpecs) -> Result<(Cv, BaseType), String> {
        if let Some(name) = ds.name {
            if name.is_any() {
                if !self.wildcards {
                    return Err("wildcard in concrete type".to_string());
                }
                return Ok((ds.cv, BaseType::Any));
            }
            return Ok((ds.cv, BaseType::Named(name)));
        }
        Ok((ds.cv, BaseType::Builtin(canonical_builtin(&ds.builtin))))
    }

    fn parse_type(&mut self) -> Result<TypePattern, String> {
        let ds = self.parse_decl_specs()?;
        if ds.name.is_none() && ds.builtin.is_empty() {
            return Err("expected a type".to_string());
        }
        let (cv, base) = self.base_of(ds)?;
        let ops = self.parse_ptr_ops();
        Ok(TypePattern { cv, base, ops })
    }

    fn parse_params(&mut self) -> Result<Vec<ParamPattern>, String> {
        let mut params = Vec::new();
        if self.peek() == Some(&MTok::RParen) {
            self.advance();
            return Ok(params);
        }
        loop {
            if self.peek() == Some(&MTok::Ellipsis) {
                self.advance();
                params.push(ParamPattern::Ellipsis);
            } else {
                let ty = self.parse_type()?;
                // parameter names are allowed and ignored
                if self.peek_word().is_some() {
                    self.advance();
                }
                params.push(ParamPattern::Type(ty));
            }
            match self.advance() {
                Some(MTok::Comma) => continue,
                Some(MTok::RParen) => break,
                _ => return Err("expected ',' or ')' in argument list".to_string()),
            }
        }
        // `(void)` is the empty argument list
        if let [ParamPattern::Type(t)] = params.as_slice() {
            if matches!(&t.base, BaseType::Builtin(b) if b == "void") && t.ops.is_empty() {
                params.clear();
            }
        }
        Ok(params)
    }

    fn parse_quals(&mut self) -> Cv {
        let mut cv = Cv::default();
        while let Some(word) = self.peek_word() {
            match word {
                "const" => cv.is_const = true,
                "volatile" => cv.is_volatile = true,
                _ => break,
            }
            self.advance();
        }
        cv
    }

    fn parse_pattern(&mut self) -> Result<Pattern, String> {
        let ds = self.parse_decl_specs()?;
        let (is_virtual, is_static) = (ds.is_virtual, ds.is_static);
        let has_type = ds.name.is_some() || !ds.builtin.is_empty();

        // `A::A(...)`, `~A()`: the declarator name ended up in the decl-specs
        if self.peek() == Some(&MTok::LParen) && ds.builtin.is_empty() && ds.cv == Cv::default() {
            if let Some(name) = ds.name {
                self.advance();
                let params = self.parse_params()?;
                let quals = self.parse_quals();
                return Ok(Pattern::Function(FunctionPattern {
                    is_virtual,
                    is_static,
                    result: None,
                    name,
                    params,
                    quals,
                }));
            }
        }

        let ty = if has_type {
            let (cv, base) = self.base_of(ds)?;
            let ops = self.parse_ptr_ops();
            Some(TypePattern { cv, base, ops })
        } else {
            None
        };

        let declarator = match self.peek() {
            Some(MTok::Word(_)) | Some(MTok::Scope) | Some(MTok::Ellipsis) => Some(self.parse_name()?),
            _ => None,
        };

        match (ty, declarator) {
            (ty, Some(name)) if self.peek() == Some(&MTok::LParen) => {
                self.advance();
                let params = self.parse_params()?;
                let quals = self.parse_quals();
                Ok(Pattern::Function(FunctionPattern {
                    is_virtual,
                    is_static,
                    result: ty,
                    name,
                    params,
                    quals,
                }))
            }
            (Some(ty), Some(name)) => {
                if is_virtual {
                    return Err("'virtual' is only valid for functions".to_string());
                }
                Ok(Pattern::Variable(VariablePattern { ty, name }))
            }
            (Some(ty), None) => {
                if is_virtual || is_static {
                    return Err("function specifier without a function".to_string());
                }
                Ok(Pattern::Type(ty))
            }
            (None, _) => Err("expected a type or a name".to_string()),
        }
    }
}

fn canonical_builtin(words: &[String]) -> String {
    let count = |w: &str| words.iter().filter(|x| x.as_str() == w).count();
    let unsigned = count("unsigned") > 0;
    let signed = count("signed") > 0;
    let longs = count("long");
    let short = count("short") > 0;
    let base = ["char", "wchar_t", "bool", "void", "float", "double"]
        .into_iter()
        .find(|b| count(b) > 0);
    match base {
        Some("char") if unsigned => "unsigned char".to_string(),
        Some("char") if signed => "signed char".to_string(),
        Some("double") if longs > 0 => "long double".to_string(),
        Some(b) => b.to_string(),
        None => {
            let width = if short {
                "short"
            } else if longs >= 2 {
                "long long"
            } else if longs == 1 {
                "long"
            } else {
                "int"
            };
            if unsigned {
                format!("unsigned {width}")
            } else {
                width.to_string()
            }
        }
    }
}

fn parse_concrete_type(ty: &str) -> Option<TypePattern> {
    let tokens = tokenize(ty).ok()?;
    let mut p = DeclParser {
        tokens,
        pos: 0,
        wildcards: false,
    };
    let parsed = p.parse_type().ok()?;
    p.at_end().then_some(parsed)
}

/// Compare two type spellings from the model after normalization
/// (`unsigned` vs `unsigned int`, `char*` vs `char *`).
pub fn same_type(a: &str, b: &str) -> bool {
    match (parse_concrete_type(a), parse_concrete_type(b)) {
        (Some(x), Some(y)) => x.same_as(&y),
        _ => a.trim() == b.trim(),
    }
}

/// Class name a formal parameter type refers to, with pointer/reference
/// operators and cv-qualifiers stripped (`const A *` gives `A`).
pub fn class_name_of(ty: &str) -> Option<String> {
    let parsed = parse_concrete_type(ty)?;
    match parsed.base {
        BaseType::Named(n) => {
            let (scopes, name) = n.literal_parts();
            let mut parts: Vec<&str> = scopes;
            parts.push(name);
            Some(parts.join("::"))
        }
        _ => None,
    }
}

/// True for `void *`-like types that accept any object.
pub fn is_void_pointer(ty: &str) -> bool {
    parse_concrete_type(ty).is_some_and(|t| {
        matches!(&t.base, BaseType::Builtin(b) if b == "void") && !t.ops.is_empty()
    })
}

impl MatchExpr {
    pub fn parse(source: &str) -> Result<Self, String> {
        if source.trim() == "::" {
            return Ok(Self {
                source: source.to_string(),
                pattern: Pattern::Root,
            });
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err("empty match expression".to_string());
        }
        let mut p = DeclParser {
            tokens,
            pos: 0,
            wildcards: true,
        };
        let pattern = p.parse_pattern()?;
        if !p.at_end() {
            return Err("tokens after the end of the match expression".to_string());
        }
        Ok(Self {
            source: source.to_string(),
            pattern,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> MatchKind {
        match self.pattern {
            Pattern::Root | Pattern::Type(_) => MatchKind::Type,
            Pattern::Function(_) => MatchKind::Function,
            Pattern::Variable(_) => MatchKind::Variable,
        }
    }

    /// Match a model entity. Name patterns match scopes by qualified name;
    /// functions and variables match a name pattern if any enclosing scope does.
    pub fn matches_entity(&self, model: &ProgramModel, id: EntityId) -> bool {
        let entity = model.entity(id);
        match &self.pattern {
            Pattern::Root | Pattern::Type(_) => match entity.kind {
                EntityKind::Function | EntityKind::Variable => model
                    .scopes_of(id)
                    .into_iter()
                    .any(|s| self.matches_scope(model, s)),
                _ => self.matches_scope(model, id),
            },
            Pattern::Function(fp) => {
                let Some(info) = &entity.function else {
                    return false;
                };
                if fp.is_virtual && !info.kind.is_virtual() {
                    return false;
                }
                if fp.is_static && !info.kind.is_static() {
                    return false;
                }
                let quals = Cv {
                    is_const: info.is_const,
                    is_volatile: info.is_volatile,
                };
                if quals != fp.quals {
                    return false;
                }
                if !fp.name.matches(&model.scope_names(id), &entity.name) {
                    return false;
                }
                let result_ok = match (&fp.result, &info.result) {
                    (None, None) => true,
                    (Some(p), None) => p.is_any(),
                    (None, Some(_)) => false,
                    (Some(p), Some(r)) => parse_concrete_type(r).is_some_and(|t| p.matches(&t)),
                };
                result_ok && params_match(&fp.params, &info.params)
            }
            Pattern::Variable(vp) => {
                let Some(info) = &entity.variable else {
                    return false;
                };
                vp.name.matches(&model.scope_names(id), &entity.name)
                    && parse_concrete_type(&info.ty).is_some_and(|t| vp.ty.matches(&t))
            }
        }
    }

    fn matches_scope(&self, model: &ProgramModel, id: EntityId) -> bool {
        let entity = model.entity(id);
        match &self.pattern {
            Pattern::Root => id == model.root(),
            Pattern::Type(tp) => {
                if !entity.kind.is_scope() || id == model.root() {
                    return false;
                }
                match tp.is_plain_name() {
                    Some(name) => name.matches(&model.scope_names(id), &entity.name),
                    None => tp.is_any(),
                }
            }
            _ => false,
        }
    }

    /// Match a type spelling (argument, result or variable type).
    pub fn matches_type(&self, ty: &str) -> bool {
        let Pattern::Type(tp) = &self.pattern else {
            return false;
        };
        parse_concrete_type(ty).is_some_and(|t| tp.matches(&t))
    }
}

fn params_match(pattern: &[ParamPattern], params: &[String]) -> bool {
    match pattern.split_first() {
        None => params.is_empty(),
        Some((ParamPattern::Ellipsis, rest)) => {
            (0..=params.len()).any(|k| params_match(rest, &params[k..]))
        }
        Some((ParamPattern::Type(tp), rest)) => {
            !params.is_empty()
                && parse_concrete_type(&params[0]).is_some_and(|t| tp.matches(&t))
                && params_match(rest, &params[1..])
        }
    }
}
