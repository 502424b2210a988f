//! Weaving of whole translation units.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::advice::AspectRegistry;
use crate::codegen::generate;
use crate::config::WeaveConfig;
use crate::diagnostic::{Diagnostic, Diagnostics, Severity};
use crate::model::UnitDocument;
use crate::plan::{PlanSummary, resolve};
use crate::weaver::{CommitReport, TextWeaver, TokenStream};

#[derive(Debug)]
pub struct UnitOutcome {
    /// Path of the unit's source, as named by its document.
    pub path: String,
    /// Woven source; `None` when errors kept the unit from being woven.
    pub text: Option<String>,
    pub report: CommitReport,
    pub plans: Vec<PlanSummary>,
    pub diagnostics: Diagnostics,
}

/// Weave one unit. Diagnostics describe problems in the aspects or the
/// unit's code; `Err` is reserved for malformed input.
pub fn weave_unit(doc: &UnitDocument, config: &WeaveConfig) -> Result<UnitOutcome> {
    let path = doc.path.as_str();
    let model = doc.model()?;
    let stream = TokenStream::from_document(doc)
        .with_context(|| format!("invalid token stream in {path}"))?;
    let mut diags = Diagnostics::new();
    let outcome = |text: Option<String>, report: CommitReport, plans: Vec<PlanSummary>, diagnostics: Diagnostics| {
        UnitOutcome {
            path: path.to_string(),
            text,
            report,
            plans,
            diagnostics,
        }
    };

    let registry = AspectRegistry::build(config, &model, path, &mut diags);
    let unit = match resolve(&registry, &model, &config.options, path, &mut diags) {
        Ok(unit) => unit,
        Err(e) => {
            diags.push(Diagnostic::new(Severity::Fatal, path, "weaving plan", e.to_string()));
            return Ok(outcome(None, CommitReport::default(), Vec::new(), diags));
        }
    };
    let plans = unit.summaries(&registry);
    if diags.has_errors() {
        debug!("{path}: not woven because of errors");
        return Ok(outcome(None, CommitReport::default(), plans, diags));
    }

    let mut weaver = TextWeaver::new(stream, config.options.macro_aware);
    let mut tx = weaver.transaction();
    generate(&registry, &model, &unit, &mut tx, path, &mut diags);
    match tx.commit() {
        Ok(report) => {
            if report.skipped > 0 {
                debug!("{path}: {} manipulation(s) reached removed code", report.skipped);
            }
            let text = weaver.realize();
            Ok(outcome(Some(text), report, plans, diags))
        }
        Err(e) => {
            diags.push(Diagnostic::new(Severity::Error, path, "weaver", e.to_string()));
            Ok(outcome(None, CommitReport::default(), plans, diags))
        }
    }
}

/// Load and weave every unit. Units are independent and woven in parallel;
/// results keep the order of `paths`.
pub fn weave_files(paths: &[PathBuf], config: &WeaveConfig) -> Result<Vec<UnitOutcome>> {
    paths
        .par_iter()
        .map(|p| {
            let doc = UnitDocument::load(p)?;
            weave_unit(&doc, config)
        })
        .collect()
}

/// Where the woven text of `unit_path` goes below `dir`.
pub fn output_path(dir: &Path, unit_path: &str) -> PathBuf {
    let relative: PathBuf = Path::new(unit_path)
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect();
    dir.join(relative)
}

/// Write every woven unit below `dir`. Returns the number of files written.
pub fn write_outputs(dir: &Path, outcomes: &[UnitOutcome]) -> Result<usize> {
    let mut written = 0;
    for outcome in outcomes {
        let Some(text) = &outcome.text else {
            continue;
        };
        let target = output_path(dir, &outcome.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&target, text)
            .with_context(|| format!("failed to write {}", target.display()))?;
        info!("wrote {}", target.display());
        written += 1;
    }
    Ok(written)
}
