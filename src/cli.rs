use std::path::PathBuf;

use clap::Parser;

use crate::config::WeaveOptions;

#[derive(Parser, Debug)]
#[command(name = "aspectweave", version, about = "Weave aspects into C++ translation units")]
pub struct Args {
    /// Translation unit documents (JSON) produced by the frontend
    #[arg(required = true)]
    pub units: Vec<PathBuf>,

    /// Path to the aspect configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Write woven sources below this directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Move manipulations out of macro expansions instead of rejecting them
    #[arg(long)]
    pub macro_aware: bool,

    /// Do not weave get/set/ref join points
    #[arg(long)]
    pub no_data_joinpoints: bool,

    /// Weave builtin operator join points
    #[arg(long)]
    pub builtin_operators: bool,

    /// Print the weaving plan of every advised join point
    #[arg(long)]
    pub plans: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// Flags only ever switch an option away from its default, so an absent
    /// flag leaves the configured value alone.
    pub fn apply_overrides(&self, options: &mut WeaveOptions) {
        if self.macro_aware {
            options.macro_aware = true;
        }
        if self.no_data_joinpoints {
            options.data_joinpoints = false;
        }
        if self.builtin_operators {
            options.builtin_operators = true;
        }
    }
}
