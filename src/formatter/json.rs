use std::io::Write;

use serde::Serialize;

use crate::formatter::{Formatter, sorted_diagnostics};
use crate::plan::PlanSummary;
use crate::weave::UnitOutcome;

pub struct JsonFormatter {
    plans: bool,
}

impl JsonFormatter {
    pub fn new(plans: bool) -> Self {
        Self { plans }
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    metadata: Metadata,
    units: Vec<Unit<'a>>,
    diagnostics: Vec<JsonDiagnostic>,
}

#[derive(Serialize)]
struct Metadata {
    unit_count: usize,
    woven_count: usize,
    diagnostic_count: usize,
}

#[derive(Serialize)]
struct Unit<'a> {
    path: &'a str,
    woven: bool,
    applied: usize,
    skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    plans: Option<&'a [PlanSummary]>,
}

#[derive(Serialize)]
struct JsonDiagnostic {
    path: String,
    line: usize,
    column: usize,
    severity: String,
    origin: String,
    message: String,
}

impl Formatter for JsonFormatter {
    fn format_to(&self, units: &[UnitOutcome], out: &mut dyn Write) {
        let diagnostics: Vec<JsonDiagnostic> = sorted_diagnostics(units)
            .into_iter()
            .map(|d| JsonDiagnostic {
                path: d.path.clone(),
                line: d.location.line,
                column: d.location.column,
                severity: d.severity.name().to_string(),
                origin: d.origin.clone(),
                message: d.message.clone(),
            })
            .collect();
        let output = JsonOutput {
            metadata: Metadata {
                unit_count: units.len(),
                woven_count: units.iter().filter(|u| u.text.is_some()).count(),
                diagnostic_count: diagnostics.len(),
            },
            units: units
                .iter()
                .map(|u| Unit {
                    path: &u.path,
                    woven: u.text.is_some(),
                    applied: u.report.applied,
                    skipped: u.report.skipped,
                    plans: self.plans.then_some(u.plans.as_slice()),
                })
                .collect(),
            diagnostics,
        };
        match serde_json::to_string_pretty(&output) {
            Ok(json) => {
                let _ = writeln!(out, "{json}");
            }
            Err(e) => tracing::error!("failed to serialize report: {e}"),
        }
    }
}
