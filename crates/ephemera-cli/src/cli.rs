use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "ephemera",
    about = "Disposable Azure infrastructure stacks: apply, verify, destroy",
    version
)]
pub struct Cli {
    /// Subscription used for existence checks.
    #[arg(long, env = "ARM_SUBSCRIPTION_ID", global = true)]
    pub subscription: Option<String>,

    /// Tenant for token acquisition and `{{ env.ARM_TENANT_ID }}` stacks.
    #[arg(long, env = "ARM_TENANT_ID", global = true)]
    pub tenant: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply, verify, and destroy a stack — teardown is unconditional.
    Run {
        /// Path to the stack file.
        stack: PathBuf,

        /// Reuse a fixed name suffix instead of generating one.
        #[arg(long)]
        suffix: Option<String>,
    },

    /// Apply a stack and leave it up, printing its outputs.
    Up {
        stack: PathBuf,

        /// Name suffix for the stack's resources.
        #[arg(long)]
        suffix: String,
    },

    /// Destroy a stack previously brought up with `up`.
    Down {
        stack: PathBuf,

        /// The suffix the stack was brought up with.
        #[arg(long)]
        suffix: String,
    },

    /// Load and validate a stack file (or a directory of them). No cloud
    /// access.
    Validate { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
