use std::io::Write;

use crate::formatter::{Formatter, sorted_diagnostics};
use crate::weave::UnitOutcome;

pub struct TextFormatter {
    pub plans: bool,
}

impl Formatter for TextFormatter {
    fn format_to(&self, units: &[UnitOutcome], out: &mut dyn Write) {
        if self.plans {
            for unit in units {
                for plan in &unit.plans {
                    let _ = writeln!(out, "{}: {}", unit.path, plan.join_point);
                    for step in &plan.sequence {
                        let _ = writeln!(out, "    {step}");
                    }
                }
            }
        }

        let diagnostics = sorted_diagnostics(units);
        for d in &diagnostics {
            let _ = writeln!(out, "{d}");
        }

        let woven = units.iter().filter(|u| u.text.is_some()).count();
        let unit_word = if units.len() == 1 { "unit" } else { "units" };
        let diag_word = if diagnostics.len() == 1 {
            "diagnostic"
        } else {
            "diagnostics"
        };
        let _ = writeln!(
            out,
            "\n{} {unit_word}, {woven} woven, {} {diag_word}",
            units.len(),
            diagnostics.len(),
        );
    }
}
