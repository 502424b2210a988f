//! Pointcut evaluation against the program model.
//!
//! `match(expr, subject)` yields `None` for no match, or the context
//! variable binding plus an optional runtime condition. A missing condition
//! means the match holds unconditionally.

use crate::model::{EntityId, EntityKind, JoinPoint, JoinPointId, JoinPointKind, ProgramModel, VariableKind};

use super::binding::{Binding, BoundRole, Condition};
use super::match_expr::{class_name_of, is_void_pointer, same_type};
use super::parser::{NamedTarget, PointcutExpr};
use super::table::PointcutTable;
use super::Formal;

pub type Matched = Option<(Binding, Option<Condition>)>;

/// What a pointcut is matched against.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'s> {
    Entity(EntityId),
    JoinPoint(JoinPointId),
    /// A type spelling, for `args`/`result` arguments.
    Type(&'s str),
}

// Named pointcuts may refer to each other; deeper nesting is treated as no match.
const MAX_DEPTH: usize = 64;

#[derive(Clone, Copy)]
struct Env<'a> {
    formals: &'a [Formal],
    role: Option<BoundRole>,
    depth: usize,
}

impl Env<'_> {
    fn plain(self) -> Self {
        Self { role: None, ..self }
    }

    fn with_role(self, role: BoundRole) -> Self {
        Self {
            role: Some(role),
            ..self
        }
    }
}

fn check(matched: bool) -> Matched {
    matched.then(|| (Binding::new(), None))
}

pub struct MatchContext<'a> {
    model: &'a ProgramModel,
    table: &'a PointcutTable,
    aspect: Option<EntityId>,
    formals: &'a [Formal],
}

impl<'a> MatchContext<'a> {
    pub fn new(model: &'a ProgramModel, table: &'a PointcutTable) -> Self {
        Self {
            model,
            table,
            aspect: None,
            formals: &[],
        }
    }

    /// Concrete aspect used to resolve virtual pointcuts.
    pub fn with_aspect(mut self, aspect: EntityId) -> Self {
        self.aspect = Some(aspect);
        self
    }

    /// Formal parameters the expression's context variables refer to.
    pub fn with_formals(mut self, formals: &'a [Formal]) -> Self {
        self.formals = formals;
        self
    }

    pub fn matches(&self, expr: &PointcutExpr, subject: Subject<'_>) -> Matched {
        let env = Env {
            formals: self.formals,
            role: None,
            depth: 0,
        };
        self.eval(expr, subject, env)
    }

    fn eval(&self, expr: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        match expr {
            PointcutExpr::Match(m) => match subject {
                Subject::Entity(id) => check(m.matches_entity(self.model, id)),
                Subject::Type(ty) => check(m.matches_type(ty)),
                Subject::JoinPoint(_) => None,
            },
            PointcutExpr::ContextVar(name) => self.eval_context_var(name, subject, env),
            PointcutExpr::Named { args, target, .. } => self.eval_named(args, target, subject, env),
            PointcutExpr::Execution(x) => self.code(JoinPointKind::Execution, x, subject, env),
            PointcutExpr::Call(x) => self.code(JoinPointKind::Call, x, subject, env),
            PointcutExpr::Builtin(x) => self.code(JoinPointKind::Builtin, x, subject, env),
            PointcutExpr::Get(x) => self.code(JoinPointKind::Get, x, subject, env),
            PointcutExpr::Set(x) => self.code(JoinPointKind::Set, x, subject, env),
            PointcutExpr::Ref(x) => self.code(JoinPointKind::Ref, x, subject, env),
            PointcutExpr::Construction(x) => self.structor(JoinPointKind::Construction, x, subject, env),
            PointcutExpr::Destruction(x) => self.structor(JoinPointKind::Destruction, x, subject, env),
            PointcutExpr::Within(x) => self.eval_within(x, subject, env),
            PointcutExpr::Member(x) => match subject {
                Subject::Entity(id) => self
                    .model
                    .scopes_of(id)
                    .into_iter()
                    .find_map(|s| self.eval(x, Subject::Entity(s), env.plain())),
                _ => None,
            },
            PointcutExpr::Classes(x) => match subject {
                Subject::Entity(id) if self.model.entity(id).kind.is_class_like() => {
                    self.eval(x, subject, env.plain())
                }
                _ => None,
            },
            PointcutExpr::Alias(x) => match subject {
                Subject::Entity(id) => {
                    let var = self.model.entity(id).variable.as_ref()?;
                    var.aliases
                        .iter()
                        .find_map(|&a| self.eval(x, Subject::Entity(a), env.plain()))
                }
                _ => None,
            },
            PointcutExpr::Base(x) => self.eval_base(x, subject, env),
            PointcutExpr::Derived(x) => self.eval_derived(x, subject, env),
            PointcutExpr::That(x) => self.eval_that(x, subject, env),
            PointcutExpr::Target(x) => self.eval_target(x, subject, env),
            PointcutExpr::Result(x) => self.eval_result(x, subject, env),
            PointcutExpr::Args(items) => self.eval_args(items, subject, env),
            PointcutExpr::CFlow { id, inner } => match subject {
                // entry points of the flow match without a runtime check
                Subject::JoinPoint(_) => {
                    if self.eval(inner, subject, env.plain()).is_some() {
                        check(true)
                    } else {
                        Some((Binding::new(), Some(Condition::CFlow(*id))))
                    }
                }
                _ => None,
            },
            PointcutExpr::Not(x) => match self.eval(x, subject, env) {
                None => check(true),
                Some((_, None)) => None,
                Some((_, Some(c))) => Some((Binding::new(), Some(Condition::Not(Box::new(c))))),
            },
            PointcutExpr::And(l, r) => {
                let (lb, lc) = self.eval(l, subject, env)?;
                let (rb, rc) = self.eval(r, subject, env)?;
                Some((lb.merged(rb)?, Condition::and(lc, rc)))
            }
            PointcutExpr::Or(l, r) => match (self.eval(l, subject, env), self.eval(r, subject, env)) {
                (None, None) => None,
                (Some(m), None) | (None, Some(m)) => Some(m),
                (Some((lb, lc)), Some((rb, rc))) => {
                    // on conflicting bindings the left branch wins
                    let binding = lb.clone().merged(rb).unwrap_or(lb);
                    Some((binding, Condition::or(lc, rc)))
                }
            },
        }
    }

    fn eval_context_var(&self, name: &str, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let role = env.role?;
        let formal = env.formals.iter().find(|f| f.name == name)?;
        let ok = match subject {
            Subject::Entity(id) => {
                self.model.entity(id).kind.is_class_like()
                    && (is_void_pointer(&formal.ty)
                        || class_name_of(&formal.ty).is_some_and(|c| {
                            c.trim_start_matches("::") == self.model.qualified_name(id)
                        }))
            }
            Subject::Type(ty) => {
                same_type(&formal.ty, ty) || (is_void_pointer(&formal.ty) && ty.contains('*'))
            }
            Subject::JoinPoint(_) => false,
        };
        ok.then(|| (Binding::single(name, role, &formal.ty), None))
    }

    fn eval_named(
        &self,
        args: &[String],
        target: &NamedTarget,
        subject: Subject<'_>,
        env: Env<'a>,
    ) -> Matched {
        match target {
            NamedTarget::Unresolved => None,
            NamedTarget::Attribute(attr) => {
                let simple = attr.rsplit("::").next().unwrap_or(attr);
                let has = |attrs: &[String]| attrs.iter().any(|a| a == attr || a == simple);
                match subject {
                    Subject::Entity(id) => check(has(&self.model.entity(id).attributes)),
                    Subject::JoinPoint(id) => check(has(&self.model.join_point(id).attributes)),
                    Subject::Type(_) => None,
                }
            }
            NamedTarget::Pointcut(id) => {
                if env.depth >= MAX_DEPTH {
                    return None;
                }
                let resolved = self.table.resolve_virtual(self.model, *id, self.aspect);
                let def = self.table.get(resolved);
                let body = def.expr.as_ref()?;
                let inner = Env {
                    formals: &def.params,
                    role: env.role,
                    depth: env.depth + 1,
                };
                let (binding, cond) = self.eval(body, subject, inner)?;
                let pairs = def
                    .params
                    .iter()
                    .map(|f| f.name.as_str())
                    .zip(args.iter().map(String::as_str));
                Some((binding.renamed(pairs)?, cond))
            }
        }
    }

    fn join_point_of(&self, subject: Subject<'_>) -> Option<&'a JoinPoint> {
        match subject {
            Subject::JoinPoint(id) => Some(self.model.join_point(id)),
            _ => None,
        }
    }

    fn code(&self, kind: JoinPointKind, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let jp = self.join_point_of(subject)?;
        if jp.kind != kind {
            return None;
        }
        self.eval(x, Subject::Entity(jp.target), env.plain())
    }

    /// Class under construction or destruction.
    fn constructed_class(&self, jp: &JoinPoint) -> Option<EntityId> {
        let target = self.model.entity(jp.target);
        if target.kind.is_class_like() {
            Some(jp.target)
        } else {
            self.model.enclosing_class(jp.target)
        }
    }

    fn structor(&self, kind: JoinPointKind, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let jp = self.join_point_of(subject)?;
        if jp.kind != kind {
            return None;
        }
        let class = self.constructed_class(jp)?;
        self.eval(x, Subject::Entity(class), env.plain())
    }

    fn eval_within(&self, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let scope = match subject {
            Subject::JoinPoint(id) => {
                let jp = self.model.join_point(id);
                match jp.kind {
                    JoinPointKind::Construction | JoinPointKind::Destruction => self.constructed_class(jp)?,
                    _ => jp.parent,
                }
            }
            Subject::Entity(id) => self.model.entity(id).parent?,
            Subject::Type(_) => return None,
        };
        self.eval(x, Subject::Entity(scope), env.plain())
    }

    /// Same-named member functions of `classes`.
    fn same_named<'m>(&'m self, function: EntityId, classes: Vec<EntityId>) -> impl Iterator<Item = EntityId> + 'm {
        let name = self.model.entity(function).name.clone();
        classes
            .into_iter()
            .filter_map(move |c| self.model.member_named(c, &name, EntityKind::Function))
    }

    fn eval_base(&self, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let Subject::Entity(id) = subject else { return None };
        let entity = self.model.entity(id);
        if entity.kind.is_class_like() {
            self.model
                .all_derived(id)
                .into_iter()
                .find_map(|d| self.eval(x, Subject::Entity(d), env.plain()))
        } else if entity.kind == EntityKind::Function {
            let class = self.model.enclosing_class(id)?;
            let derived = self.model.all_derived(class);
            self.same_named(id, derived)
                .find_map(|m| self.eval(x, Subject::Entity(m), env.plain()))
        } else {
            None
        }
    }

    fn eval_derived(&self, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let Subject::Entity(id) = subject else { return None };
        let entity = self.model.entity(id);
        if entity.kind.is_class_like() {
            std::iter::once(id)
                .chain(self.model.all_bases(id))
                .find_map(|b| self.eval(x, Subject::Entity(b), env.plain()))
        } else if entity.kind == EntityKind::Function {
            if let Some(m) = self.eval(x, subject, env.plain()) {
                return Some(m);
            }
            let class = self.model.enclosing_class(id)?;
            let bases = self.model.all_bases(class);
            self.same_named(id, bases)
                .find_map(|m| self.eval(x, Subject::Entity(m), env.plain()))
        } else {
            None
        }
    }

    /// Static check against `class` and its bases, else a runtime check over
    /// the derived classes that match.
    fn type_check(
        &self,
        x: &PointcutExpr,
        class: EntityId,
        env: Env<'a>,
        role: BoundRole,
        guard: fn(Vec<String>) -> Condition,
    ) -> Matched {
        let env = env.with_role(role);
        let statically = std::iter::once(class)
            .chain(self.model.all_bases(class))
            .find_map(|c| self.eval(x, Subject::Entity(c), env));
        if let Some((binding, _)) = statically {
            return Some((binding, None));
        }

        let mut binding = None;
        let mut classes = Vec::new();
        for d in self.model.all_derived(class) {
            if let Some((b, _)) = self.eval(x, Subject::Entity(d), env) {
                binding.get_or_insert(b);
                classes.push(self.model.qualified_name(d));
            }
        }
        Some((binding?, Some(guard(classes))))
    }

    fn eval_that(&self, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let jp = self.join_point_of(subject)?;
        let info = self.model.entity(jp.parent).function.as_ref()?;
        if !info.kind.has_this() {
            return None;
        }
        let class = self.model.enclosing_class(jp.parent)?;
        let matched = self.type_check(x, class, env, BoundRole::That, Condition::That)?;
        // no dynamic type to test while the object is being built or torn down
        if matched.1.is_some() && info.kind.is_structor() {
            return None;
        }
        Some(matched)
    }

    fn eval_target(&self, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let jp = self.join_point_of(subject)?;
        let target = self.model.entity(jp.target);
        let class = match jp.kind {
            JoinPointKind::Call => {
                let f = target.function.as_ref()?;
                if !f.kind.has_this() || f.kind.is_structor() {
                    return None;
                }
                self.model.enclosing_class(jp.target)?
            }
            JoinPointKind::Get | JoinPointKind::Set | JoinPointKind::Ref => {
                let v = target.variable.as_ref()?;
                if v.kind != VariableKind::Member {
                    return None;
                }
                self.model.enclosing_class(jp.target)?
            }
            _ => return None,
        };
        self.type_check(x, class, env, BoundRole::Target, Condition::Target)
    }

    fn eval_result(&self, x: &PointcutExpr, subject: Subject<'_>, env: Env<'a>) -> Matched {
        let jp = self.join_point_of(subject)?;
        let target = self.model.entity(jp.target);
        let ty = match jp.kind {
            JoinPointKind::Execution | JoinPointKind::Call | JoinPointKind::Builtin => {
                target.function.as_ref()?.result.as_deref()?
            }
            JoinPointKind::Get => target.variable.as_ref()?.ty.as_str(),
            _ => return None,
        };
        self.eval(x, Subject::Type(ty), env.with_role(BoundRole::Result))
    }

    fn eval_args(&self, items: &[PointcutExpr], subject: Subject<'_>, env: Env<'a>) -> Matched {
        let jp = self.join_point_of(subject)?;
        let target = self.model.entity(jp.target);
        let params: Vec<&str> = match jp.kind {
            JoinPointKind::Execution
            | JoinPointKind::Call
            | JoinPointKind::Builtin
            | JoinPointKind::Construction => target
                .function
                .as_ref()?
                .params
                .iter()
                .map(String::as_str)
                .collect(),
            JoinPointKind::Set => vec![target.variable.as_ref()?.ty.as_str()],
            JoinPointKind::Get | JoinPointKind::Ref | JoinPointKind::Destruction => Vec::new(),
        };
        if params.len() != items.len() {
            return None;
        }

        let mut binding = Binding::new();
        let mut cond = None;
        for (i, (item, ty)) in items.iter().zip(params).enumerate() {
            let (b, c) = self.eval(item, Subject::Type(ty), env.with_role(BoundRole::Arg(i)))?;
            binding = binding.merged(b)?;
            cond = Condition::and(cond, c);
        }
        Some((binding, cond))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FunctionKind, ModelBuilder};
    use crate::pointcut::{PointcutDef, parse_pointcut};

    struct Fixture {
        model: ProgramModel,
        table: PointcutTable,
        shape: EntityId,
        circle: EntityId,
        shape_draw: EntityId,
        circle_draw: EntityId,
        area: EntityId,
        jps: Vec<JoinPointId>,
    }

    // app::Shape { virtual void draw(); int area(); static int count(); Shape(); }
    // app::Circle : Shape { void draw(); double radius; }
    // app::Square : Shape {}
    // int main(); int counter;
    fn fixture() -> Fixture {
        let mut b = ModelBuilder::new();
        let root = b.root();
        let app = b.namespace("app", root);
        let shape = b.class("Shape", app, &[]);
        let circle = b.class("Circle", app, &[shape]);
        let _square = b.class("Square", app, &[shape]);
        let shape_draw = b.function("draw", shape, FunctionKind::VirtualMember, Some("void"), &[]);
        let area = b.function("area", shape, FunctionKind::Member, Some("int"), &[]);
        let count = b.function("count", shape, FunctionKind::StaticMember, Some("int"), &[]);
        let ctor = b.function("Shape", shape, FunctionKind::Constructor, None, &[]);
        let circle_draw = b.function("draw", circle, FunctionKind::VirtualMember, Some("void"), &[]);
        let radius = b.variable("radius", circle, "double", VariableKind::Member);
        let main = b.function("main", root, FunctionKind::NonMember, Some("int"), &[]);
        let counter = b.variable("counter", root, "int", VariableKind::NonMember);
        b.entity_mut(main).attributes.push("hot".to_string());

        let jps = vec![
            b.join_point(JoinPointKind::Execution, shape_draw, shape_draw, None), // 0
            b.join_point(JoinPointKind::Execution, circle_draw, circle_draw, None), // 1
            b.join_point(JoinPointKind::Call, shape_draw, main, None),            // 2
            b.join_point(JoinPointKind::Call, area, circle_draw, None),           // 3
            b.join_point(JoinPointKind::Get, radius, circle_draw, None),          // 4
            b.join_point(JoinPointKind::Set, counter, main, None),                // 5
            b.join_point(JoinPointKind::Execution, main, main, None),             // 6
            b.join_point(JoinPointKind::Construction, ctor, ctor, None),          // 7
            b.join_point(JoinPointKind::Execution, count, count, None),           // 8
            b.join_point(JoinPointKind::Call, count, main, None),                 // 9
        ];
        Fixture {
            model: b.build(),
            table: PointcutTable::new(),
            shape,
            circle,
            shape_draw,
            circle_draw,
            area,
            jps,
        }
    }

    fn pc(fx: &Fixture, text: &str, formals: &[Formal]) -> PointcutExpr {
        parse_pointcut(text, &fx.table.lookup(&fx.model), fx.model.root(), formals, true)
            .unwrap_or_else(|e| panic!("{text}: {e}"))
    }

    fn matching_jps(fx: &Fixture, text: &str) -> Vec<usize> {
        let expr = pc(fx, text, &[]);
        let ctx = MatchContext::new(&fx.model, &fx.table);
        fx.jps
            .iter()
            .enumerate()
            .filter(|(_, jp)| ctx.matches(&expr, Subject::JoinPoint(**jp)).is_some())
            .map(|(i, _)| i)
            .collect()
    }

    fn at(fx: &Fixture, text: &str, jp: usize) -> Matched {
        let expr = pc(fx, text, &[]);
        MatchContext::new(&fx.model, &fx.table).matches(&expr, Subject::JoinPoint(fx.jps[jp]))
    }

    fn on_entity(fx: &Fixture, text: &str, id: EntityId) -> bool {
        let expr = pc(fx, text, &[]);
        MatchContext::new(&fx.model, &fx.table)
            .matches(&expr, Subject::Entity(id))
            .is_some()
    }

    #[test]
    fn code_join_point_kinds() {
        let fx = fixture();
        assert_eq!(matching_jps(&fx, r#"execution("% app::Shape::%(...)")"#), vec![0, 8]);
        assert_eq!(matching_jps(&fx, r#"call("% ...::%(...)")"#), vec![2, 3, 9]);
        assert_eq!(matching_jps(&fx, r#"get("double ...::radius")"#), vec![4]);
        assert_eq!(matching_jps(&fx, r#"set("int counter")"#), vec![5]);
        assert_eq!(matching_jps(&fx, r#"construction("app::Shape")"#), vec![7]);
        assert!(matching_jps(&fx, r#"destruction("app::%")"#).is_empty());
    }

    #[test]
    fn within_uses_lexical_parent() {
        let fx = fixture();
        assert_eq!(
            matching_jps(&fx, r#"call("% ...::%(...)") && within("% main()")"#),
            vec![2, 9]
        );
        assert_eq!(matching_jps(&fx, r#"within("app::Circle")"#), vec![1, 3, 4]);
        assert_eq!(matching_jps(&fx, r#"construction("%") && within("app::Shape")"#), vec![7]);
    }

    #[test]
    fn that_is_static_when_class_or_base_matches() {
        let fx = fixture();
        assert_eq!(at(&fx, r#"that("app::Circle")"#, 3), Some((Binding::new(), None)));
        assert_eq!(at(&fx, r#"that("app::Shape")"#, 3), Some((Binding::new(), None)));
    }

    #[test]
    fn that_becomes_runtime_check_over_derived_classes() {
        let fx = fixture();
        let (_, cond) = at(&fx, r#"that("app::Circle")"#, 0).unwrap();
        assert_eq!(cond, Some(Condition::That(vec!["app::Circle".to_string()])));
        let (_, cond) = at(&fx, r#"that("app::%e")"#, 0).unwrap();
        // Shape itself matches, so no check is needed
        assert_eq!(cond, None);
    }

    #[test]
    fn that_needs_a_member_function_parent() {
        let fx = fixture();
        assert!(at(&fx, r#"that("app::Shape")"#, 2).is_none());
        assert!(at(&fx, r#"that("app::Shape")"#, 8).is_none());
        // constructors cannot be checked at runtime
        assert!(at(&fx, r#"that("app::Circle")"#, 7).is_none());
        assert!(at(&fx, r#"that("app::Shape")"#, 7).is_some());
    }

    #[test]
    fn target_applies_to_member_calls_and_accesses() {
        let fx = fixture();
        assert_eq!(at(&fx, r#"target("app::Shape")"#, 2), Some((Binding::new(), None)));
        assert_eq!(
            at(&fx, r#"target("app::Square")"#, 2).unwrap().1,
            Some(Condition::Target(vec!["app::Square".to_string()]))
        );
        assert!(at(&fx, r#"target("app::Circle")"#, 4).is_some());
        assert!(at(&fx, r#"target("app::Shape")"#, 9).is_none());
        assert!(at(&fx, r#"target("%")"#, 5).is_none());
    }

    #[test]
    fn result_and_args() {
        let fx = fixture();
        assert_eq!(matching_jps(&fx, r#"execution("% ...::%(...)") && result("int")"#), vec![6, 8]);
        assert_eq!(matching_jps(&fx, r#"result("double")"#), vec![4]);
        assert_eq!(matching_jps(&fx, r#"args("int")"#), vec![5]);
        assert!(matching_jps(&fx, "args()").contains(&6));
        assert!(!matching_jps(&fx, "args()").contains(&5));
    }

    #[test]
    fn cflow_conditions_except_at_entry_points() {
        let fx = fixture();
        let text = r#"cflow(execution("% main()"))"#;
        assert_eq!(at(&fx, text, 6), Some((Binding::new(), None)));
        let (_, cond) = at(&fx, text, 2).unwrap();
        assert_eq!(cond, Some(Condition::CFlow(0)));
        let (_, cond) = at(&fx, &format!("!{text}"), 2).unwrap();
        assert_eq!(cond, Some(Condition::Not(Box::new(Condition::CFlow(0)))));
        assert!(at(&fx, &format!("!{text}"), 6).is_none());
    }

    #[test]
    fn or_is_unconditional_if_either_side_is() {
        let fx = fixture();
        let (_, cond) = at(&fx, r#"that("app::Circle") || call("% ...::draw()")"#, 0).unwrap();
        assert_eq!(cond, Some(Condition::That(vec!["app::Circle".to_string()])));
        let (_, cond) = at(&fx, r#"that("app::Circle") || execution("% ...::draw()")"#, 0).unwrap();
        assert_eq!(cond, None);
    }

    #[test]
    fn base_and_derived() {
        let fx = fixture();
        assert!(on_entity(&fx, r#"base("app::Circle")"#, fx.shape));
        assert!(!on_entity(&fx, r#"base("app::Circle")"#, fx.circle));
        assert!(on_entity(&fx, r#"derived("app::Shape")"#, fx.circle));
        assert!(on_entity(&fx, r#"derived("app::Shape")"#, fx.shape));
        assert!(on_entity(&fx, r#"base("% app::Circle::draw()")"#, fx.shape_draw));
        assert!(on_entity(&fx, r#"derived("% app::Shape::draw()")"#, fx.circle_draw));
        assert!(!on_entity(&fx, r#"derived("% app::Shape::draw()")"#, fx.area));
    }

    #[test]
    fn name_combinators() {
        let fx = fixture();
        assert!(on_entity(&fx, r#"classes("app::%")"#, fx.circle));
        assert!(!on_entity(&fx, r#"classes("app::%")"#, fx.circle_draw));
        assert!(on_entity(&fx, r#"member("app::Shape")"#, fx.area));
        assert!(on_entity(&fx, r#"within("app")"#, fx.shape));
        assert!(!on_entity(&fx, r#"within("app")"#, fx.area));
    }

    #[test]
    fn context_variables_bind_roles() {
        let fx = fixture();
        let formals = vec![Formal::new("s", "app::Shape *"), Formal::new("n", "int")];
        let ctx = MatchContext::new(&fx.model, &fx.table).with_formals(&formals);

        let expr = pc(&fx, "that(s)", &formals);
        let (binding, cond) = ctx.matches(&expr, Subject::JoinPoint(fx.jps[3])).unwrap();
        assert_eq!(binding.get("s"), Some((BoundRole::That, "app::Shape *")));
        assert_eq!(cond, None);

        let expr = pc(&fx, r#"set("% ...::%") && args(n)"#, &formals);
        let (binding, _) = ctx.matches(&expr, Subject::JoinPoint(fx.jps[5])).unwrap();
        assert_eq!(binding.get("n"), Some((BoundRole::Arg(0), "int")));

        let expr = pc(&fx, "result(n)", &formals);
        assert!(ctx.matches(&expr, Subject::JoinPoint(fx.jps[4])).is_none());
    }

    #[test]
    fn or_keeps_left_binding_on_conflict() {
        let fx = fixture();
        let formals = vec![Formal::new("s", "app::Shape *")];
        let ctx = MatchContext::new(&fx.model, &fx.table).with_formals(&formals);

        let expr = pc(&fx, "that(s) || target(s)", &formals);
        let (binding, cond) = ctx.matches(&expr, Subject::JoinPoint(fx.jps[3])).unwrap();
        assert_eq!(binding.get("s"), Some((BoundRole::That, "app::Shape *")));
        assert_eq!(cond, None);

        let expr = pc(&fx, "target(s) || that(s)", &formals);
        let (binding, _) = ctx.matches(&expr, Subject::JoinPoint(fx.jps[3])).unwrap();
        assert_eq!(binding.get("s"), Some((BoundRole::Target, "app::Shape *")));
    }

    #[test]
    fn named_pointcuts_bind_positionally() {
        let mut fx = fixture();
        let root = fx.model.root();
        let id = fx
            .table
            .define(PointcutDef {
                name: "drawing".to_string(),
                scope: root,
                params: vec![Formal::new("obj", "app::Shape *")],
                expr: None,
                is_virtual: false,
            })
            .unwrap();
        let body = pc(&fx, "that(obj)", &[Formal::new("obj", "app::Shape *")]);
        fx.table.set_expr(id, body);

        let formals = vec![Formal::new("s", "app::Shape *")];
        let expr = pc(&fx, r#"drawing(s) && call("% ...::%(...)")"#, &formals);
        let ctx = MatchContext::new(&fx.model, &fx.table).with_formals(&formals);
        let (binding, _) = ctx.matches(&expr, Subject::JoinPoint(fx.jps[3])).unwrap();
        assert_eq!(binding.get("s"), Some((BoundRole::That, "app::Shape *")));
        assert!(binding.get("obj").is_none());
    }

    #[test]
    fn attributes_match_annotated_entities() {
        let fx = fixture();
        let mut table = PointcutTable::new();
        table.declare_attribute(fx.model.root(), "hot");
        let expr = parse_pointcut(r#"execution(hot())"#, &table.lookup(&fx.model), fx.model.root(), &[], true).unwrap();
        let ctx = MatchContext::new(&fx.model, &table);
        assert!(ctx.matches(&expr, Subject::JoinPoint(fx.jps[6])).is_some());
        assert!(ctx.matches(&expr, Subject::JoinPoint(fx.jps[0])).is_none());
    }

    #[test]
    fn virtual_pointcuts_use_the_concrete_aspect() {
        let mut b = ModelBuilder::new();
        let root = b.root();
        let top = b.aspect("Top", root, &[]);
        let leaf = b.aspect("Leaf", root, &[top]);
        let main = b.function("main", root, FunctionKind::NonMember, Some("int"), &[]);
        let exec = b.join_point(JoinPointKind::Execution, main, main, None);
        let model = b.build();

        let mut table = PointcutTable::new();
        let def = |scope, is_virtual| PointcutDef {
            name: "pc".to_string(),
            scope,
            params: Vec::new(),
            expr: None,
            is_virtual,
        };
        table.define(def(top, true)).unwrap();
        let over = table.define(def(leaf, false)).unwrap();
        let body = parse_pointcut(r#"execution("% main()")"#, &table.lookup(&model), leaf, &[], false).unwrap();
        table.set_expr(over, body);

        let expr = parse_pointcut("pc()", &table.lookup(&model), top, &[], false).unwrap();
        let from_leaf = MatchContext::new(&model, &table).with_aspect(leaf);
        let from_top = MatchContext::new(&model, &table).with_aspect(top);
        assert!(from_leaf.matches(&expr, Subject::JoinPoint(exec)).is_some());
        // pure virtual without override
        assert!(from_top.matches(&expr, Subject::JoinPoint(exec)).is_none());
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        const ATOMS: &[&str] = &[
            r#"execution("% app::Shape::%(...)")"#,
            r#"call("% ...::%(...)")"#,
            r#"within("% main()")"#,
            r#"set("% ...::%")"#,
            r#"args("int")"#,
            r#"result("int")"#,
            r#"within("app::Circle")"#,
        ];

        #[derive(Debug, Clone)]
        enum Tree {
            Atom(usize),
            Not(Box<Tree>),
            And(Box<Tree>, Box<Tree>),
            Or(Box<Tree>, Box<Tree>),
        }

        fn tree() -> impl Strategy<Value = Tree> {
            (0..ATOMS.len()).prop_map(Tree::Atom).prop_recursive(4, 24, 2, |inner| {
                prop_oneof![
                    inner.clone().prop_map(|t| Tree::Not(Box::new(t))),
                    (inner.clone(), inner.clone()).prop_map(|(l, r)| Tree::And(Box::new(l), Box::new(r))),
                    (inner.clone(), inner).prop_map(|(l, r)| Tree::Or(Box::new(l), Box::new(r))),
                ]
            })
        }

        fn build(t: &Tree, atoms: &[PointcutExpr]) -> PointcutExpr {
            match t {
                Tree::Atom(i) => atoms[*i].clone(),
                Tree::Not(x) => PointcutExpr::Not(Box::new(build(x, atoms))),
                Tree::And(l, r) => PointcutExpr::And(Box::new(build(l, atoms)), Box::new(build(r, atoms))),
                Tree::Or(l, r) => PointcutExpr::Or(Box::new(build(l, atoms)), Box::new(build(r, atoms))),
            }
        }

        fn truth(t: &Tree, atoms: &[bool]) -> bool {
            match t {
                Tree::Atom(i) => atoms[*i],
                Tree::Not(x) => !truth(x, atoms),
                Tree::And(l, r) => truth(l, atoms) && truth(r, atoms),
                Tree::Or(l, r) => truth(l, atoms) || truth(r, atoms),
            }
        }

        proptest! {
            #[test]
            fn boolean_operators_are_sound(t in tree()) {
                let fx = fixture();
                let atoms: Vec<PointcutExpr> = ATOMS.iter().map(|a| pc(&fx, a, &[])).collect();
                let expr = build(&t, &atoms);
                let ctx = MatchContext::new(&fx.model, &fx.table);
                for &jp in &fx.jps {
                    let subject = Subject::JoinPoint(jp);
                    let atom_results: Vec<bool> = atoms
                        .iter()
                        .map(|a| ctx.matches(a, subject).is_some())
                        .collect();
                    let result = ctx.matches(&expr, subject);
                    prop_assert_eq!(result.is_some(), truth(&t, &atom_results));
                    if let Some((_, cond)) = result {
                        prop_assert!(cond.is_none());
                    }
                }
            }
        }
    }
}
