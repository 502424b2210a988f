//! Per-join-point weaving plans.

pub mod order;
pub mod resolver;

use serde::Serialize;
use thiserror::Error;

use crate::advice::{AdviceKind, AspectRegistry, Instance};
use crate::model::{EntityId, JoinPointId, ProgramModel};
use crate::pointcut::{Binding, Condition};

pub use order::OrderPlanner;
pub use resolver::{ClassPlan, UnitPlan, resolve};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("order directives not resolvable for {join_point}: cycle between {}", .aspects.join(", "))]
    OrderCycle {
        join_point: String,
        aspects: Vec<String>,
    },
}

/// One matched advice at a join point.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub instance: Instance,
    pub kind: AdviceKind,
    pub binding: Binding,
    pub condition: Option<Condition>,
}

impl PlanEntry {
    pub fn aspect(&self) -> EntityId {
        self.instance.concrete
    }
}

/// Before list, optional around and after list. Every further level runs
/// inside the `proceed()` of the previous level's around advice.
#[derive(Debug, Clone, Default)]
pub struct PlanLevel {
    pub before: Vec<PlanEntry>,
    pub around: Option<PlanEntry>,
    pub after: Vec<PlanEntry>,
}

impl PlanLevel {
    fn is_empty(&self) -> bool {
        self.before.is_empty() && self.around.is_none() && self.after.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Step<'p> {
    Before(&'p PlanEntry),
    /// Around advice entered; the following steps run inside its `proceed()`.
    Around(&'p PlanEntry),
    Original,
    After(&'p PlanEntry),
}

#[derive(Debug, Clone)]
pub struct WeavingPlan {
    pub join_point: JoinPointId,
    levels: Vec<PlanLevel>,
}

impl WeavingPlan {
    pub fn new(join_point: JoinPointId) -> Self {
        Self {
            join_point,
            levels: vec![PlanLevel::default()],
        }
    }

    /// Add advice in precedence order, highest first.
    pub fn issue(&mut self, entry: PlanEntry) {
        if self.levels.last().is_some_and(|l| l.around.is_some()) {
            self.levels.push(PlanLevel::default());
        }
        let Some(level) = self.levels.last_mut() else {
            return;
        };
        match entry.kind {
            AdviceKind::Before => level.before.push(entry),
            AdviceKind::Around => level.around = Some(entry),
            AdviceKind::After => level.after.insert(0, entry),
        }
    }

    pub fn levels(&self) -> &[PlanLevel] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(PlanLevel::is_empty)
    }

    pub fn has_around(&self) -> bool {
        self.levels.iter().any(|l| l.around.is_some())
    }

    /// Before advice in execution order.
    pub fn before_advice(&self) -> Vec<&PlanEntry> {
        self.levels.iter().flat_map(|l| l.before.iter()).collect()
    }

    /// Around advice, outermost first.
    pub fn around_chain(&self) -> Vec<&PlanEntry> {
        self.levels.iter().filter_map(|l| l.around.as_ref()).collect()
    }

    /// After advice in execution order.
    pub fn after_advice(&self) -> Vec<&PlanEntry> {
        self.levels.iter().rev().flat_map(|l| l.after.iter()).collect()
    }

    /// Everything that runs at the join point, assuming every around
    /// advice proceeds.
    pub fn invocation_sequence(&self) -> Vec<Step<'_>> {
        let mut steps = Vec::new();
        for level in &self.levels {
            steps.extend(level.before.iter().map(Step::Before));
            if let Some(around) = &level.around {
                steps.push(Step::Around(around));
            }
        }
        steps.push(Step::Original);
        for level in self.levels.iter().rev() {
            steps.extend(level.after.iter().map(Step::After));
        }
        steps
    }

    pub fn summary(&self, registry: &AspectRegistry, model: &ProgramModel) -> PlanSummary {
        let describe = |e: &PlanEntry| {
            let advice = registry.advice(e.instance.decl);
            let mut s = format!(
                "{} {}#{}",
                e.kind,
                registry.aspect_name(e.aspect()),
                advice.index
            );
            if !e.binding.is_empty() {
                s.push_str(&format!(" ({})", e.binding));
            }
            if let Some(c) = &e.condition {
                s.push_str(&format!(" if {c}"));
            }
            s
        };
        let sequence = self
            .invocation_sequence()
            .into_iter()
            .map(|step| match step {
                Step::Before(e) | Step::Around(e) | Step::After(e) => describe(e),
                Step::Original => "original".to_string(),
            })
            .collect();
        PlanSummary {
            join_point: model.describe_join_point(self.join_point),
            sequence,
        }
    }
}

/// Printable form of a plan, for `--plans`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub join_point: String,
    pub sequence: Vec<String>,
}
