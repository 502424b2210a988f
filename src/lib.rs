pub mod advice;
pub mod cli;
pub mod codegen;
pub mod config;
pub mod diagnostic;
pub mod formatter;
pub mod model;
pub mod plan;
pub mod pointcut;
pub mod weave;
pub mod weaver;

use anyhow::Result;
use tracing::{info, warn};

use cli::Args;
use config::load_config;
use formatter::create_formatter;
use weave::{weave_files, write_outputs};

/// Weave the given units. Returns the exit code: 0 = woven (warnings
/// allowed), 1 = errors, 2 = fatal error, nothing written.
pub fn run(args: Args) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config.options);
    info!(
        "{} aspect declaration(s), {} unit(s)",
        config.aspects.len(),
        args.units.len()
    );

    let outcomes = weave_files(&args.units, &config)?;
    let fatal = outcomes.iter().any(|u| u.diagnostics.has_fatal());
    let errors = outcomes.iter().any(|u| u.diagnostics.has_errors());

    if let Some(dir) = &args.output_dir {
        if fatal {
            warn!("fatal error, no woven source written");
        } else {
            let written = write_outputs(dir, &outcomes)?;
            info!("{written} woven unit(s) written to {}", dir.display());
        }
    }

    let formatter = create_formatter(&args.format, args.plans);
    formatter.print(&outcomes);

    Ok(if fatal {
        2
    } else if errors {
        1
    } else {
        0
    })
}
