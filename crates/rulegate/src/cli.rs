use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rulegate", version, about = "Evaluate events against versioned policy sets")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rulegate.yaml")]
    pub config: PathBuf,

    /// Policy directory (overrides config file setting)
    #[arg(long)]
    pub policy_dir: Option<PathBuf>,

    /// Policy scope to load from the policy directory
    #[arg(short, long)]
    pub scope: Option<String>,

    /// Log filter, e.g. `debug` or `policy_engine=trace` (overrides config)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Audit log path (overrides config file setting)
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Disable the audit log for this run
    #[arg(long)]
    pub no_audit: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate JSON-lines contexts and print one decision per line
    Evaluate(EventArgs),

    /// Score a JSON array of indicators
    Score {
        /// File holding the indicators, `-` for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
    },

    /// Load and compile policy files without evaluating anything
    Validate {
        /// Policy files (.yaml, .yml or .json)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Evaluate contexts and print the per-rule hit report
    Report {
        #[command(flatten)]
        events: EventArgs,

        /// Rules evaluated fewer times than this are not classified
        #[arg(long, default_value_t = 100)]
        min_samples: u64,
    },
}

#[derive(clap::Args, Debug)]
pub struct EventArgs {
    /// JSON-lines file of contexts, `-` for stdin
    #[arg(default_value = "-")]
    pub input: PathBuf,

    /// Evaluate against this policy file instead of the policy directory
    #[arg(short, long)]
    pub policy: Option<PathBuf>,
}
