use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Default overall timeout for one stage execution, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 1800;

#[derive(Parser)]
#[command(name = "crumpet")]
#[command(
    author,
    version,
    about = "Deploy and inspect Azure Function Apps from a declarative manifest"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "CRUMPET_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Directory holding Crumpet.toml and the template files.
    #[arg(long, alias = "dir", env = "CRUMPET_APP_DIR", default_value = ".")]
    pub app_dir: String,

    /// Deploy target to use when the manifest lists several.
    #[arg(long, env = "CRUMPET_TARGET")]
    pub target: Option<String>,

    /// Overall timeout for the operation, in seconds.
    ///
    /// Template deployments, slot swaps and zip-deploy jobs all poll against
    /// this deadline; crossing it aborts the stage with a timeout failure.
    #[arg(long, env = "CRUMPET_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy the infrastructure template (when configured) and push the
    /// code package.
    Sync {
        /// Slot receiving the push; production when omitted.
        #[arg(long, default_value = "")]
        slot: String,
    },

    /// Swap the routed content of two slots. An omitted side means the
    /// production slot; at least one side must be named.
    Swap {
        #[arg(long, default_value = "")]
        slot1: String,
        #[arg(long, default_value = "")]
        slot2: String,
    },

    /// Re-deploy a previously-deployed source directory.
    Rollback {
        /// Directory holding the previously-deployed manifest and templates.
        #[arg(long)]
        running_dir: String,
        /// Slot receiving the push; production when omitted.
        #[arg(long, default_value = "")]
        slot: String,
    },

    /// Show live resource health and drift against the declared state.
    Status {
        /// Commit hash labelling the declared state in the drift report.
        #[arg(long, default_value = "HEAD")]
        commit: String,
    },
}
