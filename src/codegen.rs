//! Turns weaving plans into text manipulations.
//!
//! Advice code is inlined at the join point. Execution-like join points
//! have spans covering the function body braces; advice goes just inside
//! them. For all other join points the span is the statement, and advice
//! goes around it. Around advice is split at its `proceed()`: the text in
//! front of it opens the wrapper, the rest closes it.

use tracing::debug;

use crate::advice::{AspectRegistry, PROCEED};
use crate::diagnostic::{Diagnostic, Diagnostics, Severity};
use crate::model::{JoinPointKind, ProgramModel, TokenId, TokenSpan};
use crate::plan::{PlanEntry, UnitPlan, WeavingPlan};
use crate::weaver::{Transaction, WeavePos};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generated {
    pub join_points: usize,
    pub classes: usize,
}

/// Where a join point's wrapper opens and closes.
struct Frame {
    open: WeavePos,
    close: WeavePos,
    /// Inside the braces the generated text is separated on the left.
    inside: bool,
    /// Tokens of the original code; `None` for an empty body.
    original: Option<TokenSpan>,
}

impl Frame {
    fn of(kind: JoinPointKind, span: TokenSpan) -> Self {
        match kind {
            JoinPointKind::Execution | JoinPointKind::Construction | JoinPointKind::Destruction => {
                let (first, last) = (span.first.0 + 1, span.last.0.saturating_sub(1));
                Frame {
                    open: WeavePos::after(span.first),
                    close: WeavePos::before(span.last),
                    inside: true,
                    original: (first <= last).then_some(TokenSpan {
                        first: TokenId(first),
                        last: TokenId(last),
                    }),
                }
            }
            _ => Frame {
                open: WeavePos::before(span.first),
                close: WeavePos::after(span.last),
                inside: false,
                original: Some(span),
            },
        }
    }

    fn opening(&self, code: &str) -> String {
        if self.inside {
            format!(" {code}")
        } else {
            format!("{code} ")
        }
    }

    fn closing(&self, code: &str) -> String {
        if self.inside {
            format!("{code} ")
        } else {
            format!(" {code}")
        }
    }
}

/// Code around the original join point. `replaces_original` is set when an
/// unconditional around advice never proceeds.
#[derive(Debug, Default, PartialEq, Eq)]
struct Wrapping {
    prefix: Vec<String>,
    suffix: Vec<String>,
    replaces_original: bool,
}

fn guarded(entry: &PlanEntry, code: &str) -> String {
    match &entry.condition {
        Some(c) => format!("if ({c}) {{ {code} }}"),
        None => code.to_string(),
    }
}

/// Text before and after the first `proceed()`.
fn split_proceed(body: &str) -> Option<(&str, &str)> {
    let at = body.find(PROCEED)?;
    let rest = &body[at + PROCEED.len()..];
    Some((body[..at].trim(), rest.trim_start().trim_start_matches(';').trim()))
}

fn wrap(registry: &AspectRegistry, plan: &WeavingPlan) -> Wrapping {
    let mut out = Wrapping::default();
    let mut suffixes: Vec<Vec<String>> = Vec::new();
    for level in plan.levels() {
        for entry in &level.before {
            out.prefix
                .push(guarded(entry, registry.advice(entry.instance.decl).body.trim()));
        }
        let mut level_suffix: Vec<String> = level
            .after
            .iter()
            .map(|e| guarded(e, registry.advice(e.instance.decl).body.trim()))
            .collect();
        let mut stop = false;
        if let Some(around) = &level.around {
            let body = registry.advice(around.instance.decl).body.trim();
            match (split_proceed(body), &around.condition) {
                (Some((pre, post)), _) => {
                    out.prefix.push(guarded(around, pre));
                    level_suffix.insert(0, guarded(around, post));
                }
                (None, Some(c)) => {
                    out.prefix.push(format!("if ({c}) {{ {body} }} else {{"));
                    level_suffix.insert(0, "}".to_string());
                }
                (None, None) => {
                    out.prefix.push(body.to_string());
                    out.replaces_original = true;
                    stop = true;
                }
            }
        }
        suffixes.push(level_suffix);
        if stop {
            break;
        }
    }
    out.suffix = suffixes.into_iter().rev().flatten().collect();
    out.prefix.retain(|p| !p.is_empty());
    out.suffix.retain(|s| !s.is_empty());
    out
}

fn cflow_support(id: usize) -> String {
    format!(
        "struct __cflow_{id} {{ static int depth; static bool active() {{ return depth > 0; }} \
         static void enter() {{ ++depth; }} static void leave() {{ --depth; }} }}; \
         int __cflow_{id}::depth = 0;\n"
    )
}

/// Queue the manipulations for one unit. `original` is the unit's model
/// before introductions.
pub fn generate(
    registry: &AspectRegistry,
    original: &ProgramModel,
    unit: &UnitPlan,
    tx: &mut Transaction<'_>,
    path: &str,
    diags: &mut Diagnostics,
) -> Generated {
    let mut generated = Generated::default();
    let model = &unit.model;

    for class in &unit.classes {
        let origin = format!("introduction({})", model.qualified_name(class.class));
        let Some(span) = model.entity(class.class).span else {
            diags.push(Diagnostic::new(
                Severity::Warning,
                path,
                origin,
                "class has no source span, introductions are not woven",
            ));
            continue;
        };
        let mut has_bases = !original.entity(class.class).bases.is_empty();
        for inst in &class.introductions {
            let intro = registry.introduction(inst.decl);
            for base in &intro.bases {
                let sep = if has_bases { ", " } else { ": " };
                tx.insert(WeavePos::before(span.first), format!("{sep}public {base} "), false);
                has_bases = true;
            }
            if !intro.slice.trim().is_empty() {
                tx.insert(WeavePos::before(span.last), format!("{}\n", intro.slice.trim()), false);
            }
        }
        generated.classes += 1;
    }

    let cflow_ids: Vec<usize> = registry.cflows().iter().map(|c| c.id).collect();
    if !cflow_ids.is_empty() && !tx.stream().is_empty() {
        let support: String = cflow_ids.iter().map(|&id| cflow_support(id)).collect();
        tx.insert(WeavePos::header(TokenId(0)), support, true);
    }

    // outer join points first, so their wrappers enclose the inner ones
    let mut plans: Vec<(&WeavingPlan, TokenSpan)> = unit
        .plans
        .iter()
        .filter_map(|p| {
            let span = model.join_point(p.join_point).span;
            if span.is_none() {
                debug!("{path}: {} has no span", model.describe_join_point(p.join_point));
            }
            span.map(|s| (p, s))
        })
        .collect();
    plans.sort_by_key(|(_, s)| (s.first, std::cmp::Reverse(s.last)));

    for (plan, span) in plans {
        let frame = Frame::of(model.join_point(plan.join_point).kind, span);
        let wrapping = wrap(registry, plan);
        let prefix = wrapping.prefix.join(" ");
        match frame.original {
            // the replacement takes over the whitespace of the original code
            Some(original) if wrapping.replaces_original => {
                let (from, to) = (WeavePos::before(original.first), WeavePos::after(original.last));
                tx.insert(from, prefix, false);
                tx.kill(from, to);
            }
            _ if !prefix.is_empty() => {
                tx.insert(frame.open, frame.opening(&prefix), false);
            }
            _ => {}
        }
        if !wrapping.suffix.is_empty() {
            tx.insert(frame.close, frame.closing(&wrapping.suffix.join(" ")), true);
        }
        generated.join_points += 1;
    }

    for (id, entries) in &unit.cflow_entries {
        for &jp in entries {
            let join_point = model.join_point(jp);
            let Some(span) = join_point.span else {
                continue;
            };
            let frame = Frame::of(join_point.kind, span);
            tx.insert(frame.open, frame.opening(&format!("__cflow_{id}::enter();")), true);
            tx.insert(frame.close, frame.closing(&format!("__cflow_{id}::leave();")), false);
        }
    }

    debug!(
        "{path}: generated code for {} join point(s), {} class(es)",
        generated.join_points, generated.classes
    );
    generated
}
