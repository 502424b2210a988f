use tracing::debug;

use crate::config::{ParamDecl, WeaveConfig};
use crate::diagnostic::{Diagnostic, Diagnostics, Severity};
use crate::model::{EntityId, EntityKind, ProgramModel};
use crate::pointcut::{
    Formal, PointcutDef, PointcutError, PointcutExpr, PointcutId, PointcutTable, number_cflows,
    parse_pointcut,
};

use super::{Advice, Instance, Introduction, OrderRule};

#[derive(Debug, Clone)]
pub struct AspectInfo {
    pub entity: EntityId,
    pub name: String,
    /// Aspects with derived aspects only contribute through them.
    pub is_abstract: bool,
}

/// Entry points of one `cflow(...)`: the join points its argument matches.
#[derive(Debug, Clone)]
pub struct CFlowTrigger {
    pub id: usize,
    pub expr: PointcutExpr,
    pub aspect: Option<EntityId>,
    pub formals: Vec<Formal>,
}

/// Aspects, pointcuts and declarations of the configuration, resolved
/// against one translation unit's model.
#[derive(Debug, Default)]
pub struct AspectRegistry {
    aspects: Vec<AspectInfo>,
    pointcuts: PointcutTable,
    advice: Vec<Advice>,
    orders: Vec<OrderRule>,
    introductions: Vec<Introduction>,
    advice_instances: Vec<Instance>,
    order_instances: Vec<Instance>,
    intro_instances: Vec<Instance>,
    cflows: Vec<CFlowTrigger>,
    next_cflow: usize,
}

fn formals(params: &[ParamDecl]) -> Vec<Formal> {
    params.iter().map(|p| Formal::new(&p.name, &p.ty)).collect()
}

fn scope_of(model: &ProgramModel, qualified: &str) -> Option<EntityId> {
    let id = model.lookup(qualified)?;
    model.entity(id).kind.is_scope().then_some(id)
}

fn pointcut_error(path: &str, origin: &str, text: &str, e: &PointcutError) -> Diagnostic {
    Diagnostic::new(Severity::Error, path, origin, format!("{e} in `{text}`"))
        .at(0, e.offset().unwrap_or(0))
}

impl AspectRegistry {
    /// Register the configured aspects present in `model`. Problems are
    /// reported to `diags`; the offending declaration is dropped.
    pub fn build(config: &WeaveConfig, model: &ProgramModel, path: &str, diags: &mut Diagnostics) -> Self {
        let mut reg = AspectRegistry::default();
        let attributes = config.options.attributes;

        for attr in &config.attributes {
            match scope_of(model, &attr.scope) {
                Some(scope) => reg.pointcuts.declare_attribute(scope, &attr.name),
                None => diags.push(Diagnostic::new(
                    Severity::Error,
                    path,
                    format!("attribute {}", attr.name),
                    format!("scope '{}' not found", attr.scope),
                )),
            }
        }

        // aspects, in configuration order
        let mut registered = Vec::new();
        for decl in &config.aspects {
            let Some(id) = model.lookup(&decl.name) else {
                debug!("aspect {} is not part of {path}", decl.name);
                continue;
            };
            if model.entity(id).kind != EntityKind::Aspect {
                diags.push(Diagnostic::new(
                    Severity::Error,
                    path,
                    &decl.name,
                    format!("'{}' is not an aspect", decl.name),
                ));
                continue;
            }
            if reg.aspects.iter().any(|a| a.entity == id) {
                diags.push(Diagnostic::new(
                    Severity::Warning,
                    path,
                    &decl.name,
                    "aspect declared twice, using the first declaration",
                ));
                continue;
            }
            reg.aspects.push(AspectInfo {
                entity: id,
                name: model.qualified_name(id),
                is_abstract: !model.entity(id).derived.is_empty(),
            });
            registered.push((id, decl));
        }

        // named pointcuts are all declared before any expression is parsed
        let mut pending: Vec<(PointcutId, String, String)> = Vec::new();
        let global = config.pointcuts.iter().map(|p| (scope_of(model, &p.scope), p, None));
        let local = registered
            .iter()
            .flat_map(|(id, decl)| decl.pointcuts.iter().map(move |p| (Some(*id), p, Some(decl.name.as_str()))));
        for (scope, decl, owner) in global.chain(local) {
            let origin = match owner {
                Some(aspect) => format!("{aspect}::{}", decl.name),
                None => format!("pointcut {}", decl.name),
            };
            let Some(scope) = scope else {
                diags.push(Diagnostic::new(
                    Severity::Error,
                    path,
                    &origin,
                    format!("scope '{}' not found", decl.scope),
                ));
                continue;
            };
            let def = PointcutDef {
                name: decl.name.clone(),
                scope,
                params: formals(&decl.params),
                expr: None,
                is_virtual: decl.is_virtual,
            };
            let Some(id) = reg.pointcuts.define(def) else {
                diags.push(Diagnostic::new(
                    Severity::Error,
                    path,
                    &origin,
                    format!("pointcut '{}' is already defined in this scope", decl.name),
                ));
                continue;
            };
            match &decl.expr {
                Some(text) => pending.push((id, text.clone(), origin)),
                None if decl.is_virtual => {}
                None => diags.push(Diagnostic::new(
                    Severity::Error,
                    path,
                    &origin,
                    "only virtual pointcuts may omit their expression",
                )),
            }
        }

        let parsed: Vec<_> = {
            let lookup = reg.pointcuts.lookup(model);
            pending
                .into_iter()
                .map(|(id, text, origin)| {
                    let def = reg.pointcuts.get(id);
                    let result = parse_pointcut(&text, &lookup, def.scope, &def.params, attributes);
                    (id, text, origin, result)
                })
                .collect()
        };
        for (id, text, origin, result) in parsed {
            match result {
                Ok(mut expr) => {
                    let def = reg.pointcuts.get(id);
                    let owner = (model.entity(def.scope).kind == EntityKind::Aspect).then_some(def.scope);
                    let params = def.params.clone();
                    reg.register_cflows(&mut expr, owner, &params);
                    reg.pointcuts.set_expr(id, expr);
                }
                Err(e) => diags.push(pointcut_error(path, &origin, &text, &e)),
            }
        }

        for (aspect, decl) in &registered {
            reg.register_declarations(model, *aspect, decl, attributes, path, diags);
        }
        reg.instantiate(model);
        debug!(
            "{path}: {} aspect(s), {} advice instance(s), {} cflow(s)",
            reg.aspects.len(),
            reg.advice_instances.len(),
            reg.cflows.len()
        );
        reg
    }

    fn register_declarations(
        &mut self,
        model: &ProgramModel,
        aspect: EntityId,
        decl: &crate::config::AspectDecl,
        attributes: bool,
        path: &str,
        diags: &mut Diagnostics,
    ) {
        for (index, a) in decl.advice.iter().enumerate() {
            let origin = format!("{} {} advice #{index}", decl.name, a.kind);
            let params = formals(&a.params);
            let parsed = parse_pointcut(&a.pointcut, &self.pointcuts.lookup(model), aspect, &params, attributes);
            match parsed {
                Ok(mut pointcut) => {
                    self.register_cflows(&mut pointcut, Some(aspect), &params);
                    self.advice.push(Advice {
                        aspect,
                        index,
                        kind: a.kind,
                        pointcut,
                        body: a.body.clone(),
                        params,
                    });
                }
                Err(e) => diags.push(pointcut_error(path, &origin, &a.pointcut, &e)),
            }
        }

        'orders: for (index, o) in decl.order.iter().enumerate() {
            let origin = format!("{} order #{index}", decl.name);
            let lookup = self.pointcuts.lookup(model);
            let parse = |text: &str| parse_pointcut(text, &lookup, aspect, &[], attributes);
            let pointcut = match &o.pointcut {
                Some(text) => match parse(text.as_str()) {
                    Ok(expr) => Some(expr),
                    Err(e) => {
                        diags.push(pointcut_error(path, &origin, text, &e));
                        continue;
                    }
                },
                None => None,
            };
            let mut groups = Vec::new();
            for text in &o.aspects {
                match parse(text.as_str()) {
                    Ok(expr) => groups.push(expr),
                    Err(e) => {
                        diags.push(pointcut_error(path, &origin, text, &e));
                        continue 'orders;
                    }
                }
            }
            self.orders.push(OrderRule {
                aspect,
                pointcut,
                groups,
            });
        }

        for (index, intro) in decl.introductions.iter().enumerate() {
            let origin = format!("{} introduction #{index}", decl.name);
            let parsed = parse_pointcut(&intro.pointcut, &self.pointcuts.lookup(model), aspect, &[], attributes);
            match parsed {
                Ok(pointcut) => self.introductions.push(Introduction {
                    aspect,
                    index,
                    pointcut,
                    slice: intro.slice.clone(),
                    members: intro.members.clone(),
                    bases: intro.bases.clone(),
                }),
                Err(e) => diags.push(pointcut_error(path, &origin, &intro.pointcut, &e)),
            }
        }
    }

    fn register_cflows(&mut self, expr: &mut PointcutExpr, aspect: Option<EntityId>, formals: &[Formal]) {
        number_cflows(expr, &mut self.next_cflow);
        let cflows = &mut self.cflows;
        expr.walk(&mut |node| {
            if let PointcutExpr::CFlow { id, inner } = node {
                cflows.push(CFlowTrigger {
                    id: *id,
                    expr: (**inner).clone(),
                    aspect,
                    formals: formals.to_vec(),
                });
            }
        });
    }

    /// Every concrete aspect gets the declarations of its registered base
    /// aspects (most basic first), then its own.
    fn instantiate(&mut self, model: &ProgramModel) {
        for info in self.aspects.iter().filter(|a| !a.is_abstract) {
            let mut chain: Vec<EntityId> = model
                .all_bases(info.entity)
                .into_iter()
                .rev()
                .filter(|b| self.aspects.iter().any(|a| a.entity == *b))
                .collect();
            chain.push(info.entity);

            for owner in chain {
                let concrete = info.entity;
                let pick = |aspects: Vec<EntityId>| -> Vec<Instance> {
                    aspects
                        .into_iter()
                        .enumerate()
                        .filter(|(_, a)| *a == owner)
                        .map(|(decl, _)| Instance { concrete, decl })
                        .collect()
                };
                self.advice_instances
                    .extend(pick(self.advice.iter().map(|a| a.aspect).collect()));
                self.order_instances
                    .extend(pick(self.orders.iter().map(|o| o.aspect).collect()));
                self.intro_instances
                    .extend(pick(self.introductions.iter().map(|i| i.aspect).collect()));
            }
        }
    }

    pub fn aspects(&self) -> &[AspectInfo] {
        &self.aspects
    }

    /// Registration position, the baseline for ordering.
    pub fn rank(&self, aspect: EntityId) -> usize {
        self.aspects
            .iter()
            .position(|a| a.entity == aspect)
            .unwrap_or(usize::MAX)
    }

    pub fn aspect_name(&self, aspect: EntityId) -> &str {
        self.aspects
            .iter()
            .find(|a| a.entity == aspect)
            .map_or("?", |a| a.name.as_str())
    }

    pub fn pointcuts(&self) -> &PointcutTable {
        &self.pointcuts
    }

    pub fn advice(&self, decl: usize) -> &Advice {
        &self.advice[decl]
    }

    pub fn order(&self, decl: usize) -> &OrderRule {
        &self.orders[decl]
    }

    pub fn introduction(&self, decl: usize) -> &Introduction {
        &self.introductions[decl]
    }

    /// Advice instances in baseline order.
    pub fn advice_instances(&self) -> &[Instance] {
        &self.advice_instances
    }

    pub fn order_instances(&self) -> &[Instance] {
        &self.order_instances
    }

    pub fn intro_instances(&self) -> &[Instance] {
        &self.intro_instances
    }

    pub fn cflows(&self) -> &[CFlowTrigger] {
        &self.cflows
    }
}
