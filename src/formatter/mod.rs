pub mod json;
pub mod text;

use std::io::Write;

use crate::diagnostic::Diagnostic;
use crate::weave::UnitOutcome;

pub trait Formatter {
    fn format_to(&self, units: &[UnitOutcome], out: &mut dyn Write);

    fn print(&self, units: &[UnitOutcome]) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        self.format_to(units, &mut lock);
    }
}

/// `plans` adds the weaving plan of every advised join point to the output.
pub fn create_formatter(format: &str, plans: bool) -> Box<dyn Formatter> {
    match format {
        "json" => Box::new(json::JsonFormatter::new(plans)),
        _ => Box::new(text::TextFormatter { plans }),
    }
}

/// Diagnostics of all units in report order.
pub(crate) fn sorted_diagnostics(units: &[UnitOutcome]) -> Vec<&Diagnostic> {
    let mut all: Vec<&Diagnostic> = units.iter().flat_map(|u| u.diagnostics.iter()).collect();
    all.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Diagnostics, Severity};
    use crate::plan::PlanSummary;
    use crate::weaver::CommitReport;

    pub(crate) fn sample_units() -> Vec<UnitOutcome> {
        let mut diags = Diagnostics::new();
        diags.push(
            Diagnostic::new(Severity::Error, "b.cc", "Trace before advice #0", "unexpected ')'")
                .at(0, 9),
        );
        diags.push(Diagnostic::new(Severity::Warning, "a.cc", "Trace", "aspect declared twice"));
        vec![
            UnitOutcome {
                path: "a.cc".to_string(),
                text: Some("int main() {}".to_string()),
                report: CommitReport {
                    applied: 2,
                    skipped: 1,
                },
                plans: vec![PlanSummary {
                    join_point: "execution(int main())".to_string(),
                    sequence: vec!["before Trace#0".to_string(), "original".to_string()],
                }],
                diagnostics: diags,
            },
            UnitOutcome {
                path: "b.cc".to_string(),
                text: None,
                report: CommitReport::default(),
                plans: Vec::new(),
                diagnostics: Diagnostics::new(),
            },
        ]
    }

    #[test]
    fn diagnostics_are_sorted_across_units() {
        let units = sample_units();
        let sorted = sorted_diagnostics(&units);
        assert_eq!(sorted[0].path, "a.cc");
        assert_eq!(sorted[1].path, "b.cc");
    }

    #[test]
    fn all_formatters_run_without_panic() {
        let units = sample_units();
        for name in ["text", "json", "anything"] {
            for plans in [false, true] {
                let f = create_formatter(name, plans);
                let mut buf = Vec::new();
                f.format_to(&[], &mut buf);
                f.format_to(&units, &mut buf);
                assert!(!buf.is_empty());
            }
        }
    }
}
