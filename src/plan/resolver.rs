use std::collections::BTreeMap;

use tracing::debug;

use crate::advice::{AspectRegistry, Instance};
use crate::config::{MemberDecl, MemberKind, WeaveOptions};
use crate::diagnostic::{Diagnostic, Diagnostics, Severity};
use crate::model::{
    Entity, EntityId, EntityKind, FunctionInfo, FunctionKind, JoinPoint, JoinPointId,
    JoinPointKind, ProgramModel, VariableInfo, VariableKind,
};
use crate::pointcut::{Binding, Condition, MatchContext, Subject};

use super::{OrderPlanner, PlanEntry, PlanError, PlanSummary, WeavingPlan};

/// Introductions into one class, in precedence order.
#[derive(Debug, Clone)]
pub struct ClassPlan {
    pub class: EntityId,
    pub introductions: Vec<Instance>,
}

impl ClassPlan {
    pub fn summary(&self, registry: &AspectRegistry, model: &ProgramModel) -> PlanSummary {
        PlanSummary {
            join_point: format!("introduction({})", model.qualified_name(self.class)),
            sequence: self
                .introductions
                .iter()
                .map(|i| {
                    format!(
                        "{} introduction #{}",
                        registry.aspect_name(i.concrete),
                        registry.introduction(i.decl).index
                    )
                })
                .collect(),
        }
    }
}

/// Everything code generation needs for one translation unit.
#[derive(Debug)]
pub struct UnitPlan {
    /// The unit's model with introduced members and bases applied.
    pub model: ProgramModel,
    /// Non-empty plans in join point order.
    pub plans: Vec<WeavingPlan>,
    pub classes: Vec<ClassPlan>,
    /// Entry join points of each `cflow`, by id.
    pub cflow_entries: BTreeMap<usize, Vec<JoinPointId>>,
}

impl UnitPlan {
    pub fn summaries(&self, registry: &AspectRegistry) -> Vec<PlanSummary> {
        self.classes
            .iter()
            .map(|c| c.summary(registry, &self.model))
            .chain(self.plans.iter().map(|p| p.summary(registry, &self.model)))
            .collect()
    }
}

/// Precedence edges that the order declarations contribute for `subject`.
fn precedence(
    registry: &AspectRegistry,
    model: &ProgramModel,
    subject: Subject<'_>,
) -> OrderPlanner<EntityId> {
    let mut planner = OrderPlanner::new();
    for inst in registry.order_instances() {
        let rule = registry.order(inst.decl);
        let ctx = MatchContext::new(model, registry.pointcuts()).with_aspect(inst.concrete);
        if let Some(pc) = &rule.pointcut {
            if ctx.matches(pc, subject).is_none() {
                continue;
            }
        }
        let mut higher: Vec<EntityId> = Vec::new();
        for group in &rule.groups {
            let members: Vec<EntityId> = registry
                .aspects()
                .iter()
                .map(|a| a.entity)
                .filter(|&a| ctx.matches(group, Subject::Entity(a)).is_some())
                .collect();
            if members.is_empty() {
                continue;
            }
            for &hi in &higher {
                for &lo in &members {
                    planner.precedence(hi, lo);
                }
            }
            higher = members;
        }
    }
    planner
}

/// Aspects in the order their declarations are issued: the ordered ones
/// first, the rest by registration.
fn aspect_order(
    registry: &AspectRegistry,
    model: &ProgramModel,
    subject: Subject<'_>,
    contributors: &[EntityId],
    describe: impl FnOnce() -> String,
) -> Result<Vec<EntityId>, PlanError> {
    let planner = precedence(registry, model, subject);
    let planned = planner.plan(|a| registry.rank(*a)).map_err(|cycle| PlanError::OrderCycle {
        join_point: describe(),
        aspects: cycle
            .iter()
            .map(|a| registry.aspect_name(*a).to_string())
            .collect(),
    })?;
    let mut order: Vec<EntityId> = planned
        .into_iter()
        .filter(|a| contributors.contains(a))
        .collect();
    let mut rest: Vec<EntityId> = contributors
        .iter()
        .copied()
        .filter(|a| !order.contains(a))
        .collect();
    rest.sort_by_key(|a| registry.rank(*a));
    order.extend(rest);
    Ok(order)
}

fn contributors<T>(items: &[T], aspect: impl Fn(&T) -> EntityId) -> Vec<EntityId> {
    let mut out: Vec<EntityId> = Vec::new();
    for item in items {
        let a = aspect(item);
        if !out.contains(&a) {
            out.push(a);
        }
    }
    out
}

/// Match every declaration of the registry against `model` and compute the
/// weaving plans of the unit. An ordering conflict aborts the unit.
pub fn resolve(
    registry: &AspectRegistry,
    model: &ProgramModel,
    options: &WeaveOptions,
    path: &str,
    diags: &mut Diagnostics,
) -> Result<UnitPlan, PlanError> {
    let classes = plan_introductions(registry, model)?;
    let mut woven = model.clone();
    for class in &classes {
        for inst in &class.introductions {
            apply_introduction(registry, &mut woven, class.class, *inst, path, diags);
        }
    }

    let selected: Vec<JoinPointId> = woven
        .join_point_ids()
        .filter(|&jp| {
            let kind = woven.join_point(jp).kind;
            (options.data_joinpoints || !kind.is_data())
                && (options.builtin_operators || kind != JoinPointKind::Builtin)
        })
        .collect();

    let mut plans = Vec::new();
    for &jp in &selected {
        let plan = plan_join_point(registry, &woven, jp)?;
        if !plan.is_empty() {
            plans.push(plan);
        }
    }

    let mut cflow_entries: BTreeMap<usize, Vec<JoinPointId>> = BTreeMap::new();
    for trigger in registry.cflows() {
        let mut ctx = MatchContext::new(&woven, registry.pointcuts()).with_formals(&trigger.formals);
        if let Some(aspect) = trigger.aspect {
            ctx = ctx.with_aspect(aspect);
        }
        let entries: Vec<JoinPointId> = selected
            .iter()
            .copied()
            .filter(|&jp| ctx.matches(&trigger.expr, Subject::JoinPoint(jp)).is_some())
            .collect();
        cflow_entries.entry(trigger.id).or_default().extend(entries);
    }

    debug!(
        "{path}: {} plan(s), {} class(es) with introductions",
        plans.len(),
        classes.len()
    );
    Ok(UnitPlan {
        model: woven,
        plans,
        classes,
        cflow_entries,
    })
}

fn plan_join_point(
    registry: &AspectRegistry,
    model: &ProgramModel,
    jp: JoinPointId,
) -> Result<WeavingPlan, PlanError> {
    let mut matched: Vec<(Instance, Binding, Option<Condition>)> = Vec::new();
    for inst in registry.advice_instances() {
        let advice = registry.advice(inst.decl);
        let ctx = MatchContext::new(model, registry.pointcuts())
            .with_aspect(inst.concrete)
            .with_formals(&advice.params);
        if let Some((binding, condition)) = ctx.matches(&advice.pointcut, Subject::JoinPoint(jp)) {
            matched.push((*inst, binding, condition));
        }
    }

    let mut plan = WeavingPlan::new(jp);
    if matched.is_empty() {
        return Ok(plan);
    }
    let aspects = contributors(&matched, |(inst, _, _)| inst.concrete);
    let order = aspect_order(registry, model, Subject::JoinPoint(jp), &aspects, || {
        model.describe_join_point(jp)
    })?;
    for aspect in order {
        for (inst, binding, condition) in matched.iter().filter(|(i, _, _)| i.concrete == aspect) {
            plan.issue(PlanEntry {
                instance: *inst,
                kind: registry.advice(inst.decl).kind,
                binding: binding.clone(),
                condition: condition.clone(),
            });
        }
    }
    Ok(plan)
}

fn plan_introductions(
    registry: &AspectRegistry,
    model: &ProgramModel,
) -> Result<Vec<ClassPlan>, PlanError> {
    let mut out = Vec::new();
    if registry.intro_instances().is_empty() {
        return Ok(out);
    }
    for class in model.entity_ids() {
        if !model.entity(class).kind.is_class_like() {
            continue;
        }
        let matched: Vec<Instance> = registry
            .intro_instances()
            .iter()
            .copied()
            .filter(|inst| {
                MatchContext::new(model, registry.pointcuts())
                    .with_aspect(inst.concrete)
                    .matches(&registry.introduction(inst.decl).pointcut, Subject::Entity(class))
                    .is_some()
            })
            .collect();
        if matched.is_empty() {
            continue;
        }
        let aspects = contributors(&matched, |inst| inst.concrete);
        let order = aspect_order(registry, model, Subject::Entity(class), &aspects, || {
            format!("class {}", model.qualified_name(class))
        })?;
        let introductions = order
            .into_iter()
            .flat_map(|a| matched.iter().copied().filter(move |i| i.concrete == a))
            .collect();
        out.push(ClassPlan {
            class,
            introductions,
        });
    }
    Ok(out)
}

fn apply_introduction(
    registry: &AspectRegistry,
    model: &mut ProgramModel,
    class: EntityId,
    inst: Instance,
    path: &str,
    diags: &mut Diagnostics,
) {
    let intro = registry.introduction(inst.decl);
    let origin = format!(
        "{} introduction #{}",
        registry.aspect_name(inst.concrete),
        intro.index
    );
    for member in &intro.members {
        if model.member_named(class, &member.name, entity_kind(member)).is_some() {
            diags.push(Diagnostic::new(
                Severity::Error,
                path,
                &origin,
                format!(
                    "'{}' is already a member of {}",
                    member.name,
                    model.qualified_name(class)
                ),
            ));
            continue;
        }
        match introduced_member(member, class) {
            Ok(entity) => {
                let is_function = entity.kind == EntityKind::Function;
                let id = model.add_entity(entity);
                if is_function {
                    model.add_join_point(JoinPoint {
                        kind: JoinPointKind::Execution,
                        target: id,
                        parent: id,
                        local_id: 0,
                        forwarded_from: None,
                        span: None,
                        attributes: Vec::new(),
                    });
                }
                debug!("introduced {} into {}", model.signature(id), model.qualified_name(class));
            }
            Err(message) => diags.push(Diagnostic::new(Severity::Error, path, &origin, message)),
        }
    }
    for base in &intro.bases {
        match model.lookup(base) {
            Some(b) if model.entity(b).kind.is_class_like() => {
                if model.is_derived_from(b, class) {
                    diags.push(Diagnostic::new(
                        Severity::Error,
                        path,
                        &origin,
                        format!("introducing base '{base}' would make {} its own base", model.qualified_name(class)),
                    ));
                } else {
                    model.add_base(class, b);
                }
            }
            _ => diags.push(Diagnostic::new(
                Severity::Error,
                path,
                &origin,
                format!("base class '{base}' not found"),
            )),
        }
    }
}

fn entity_kind(member: &MemberDecl) -> EntityKind {
    match member.kind {
        MemberKind::Function => EntityKind::Function,
        MemberKind::Variable => EntityKind::Variable,
    }
}

fn introduced_member(member: &MemberDecl, class: EntityId) -> Result<Entity, String> {
    let mut entity = Entity::new(entity_kind(member), &member.name, Some(class));
    match member.kind {
        MemberKind::Function => {
            entity.function = Some(FunctionInfo {
                kind: if member.is_static {
                    FunctionKind::StaticMember
                } else {
                    FunctionKind::Member
                },
                result: Some(member.result.clone().unwrap_or_else(|| "void".to_string())),
                params: member.params.clone(),
                is_const: false,
                is_volatile: false,
            });
        }
        MemberKind::Variable => {
            let Some(ty) = &member.ty else {
                return Err(format!("introduced variable '{}' has no type", member.name));
            };
            entity.variable = Some(VariableInfo {
                ty: ty.clone(),
                kind: if member.is_static {
                    VariableKind::StaticMember
                } else {
                    VariableKind::Member
                },
                aliases: Vec::new(),
            });
        }
    }
    Ok(entity)
}
