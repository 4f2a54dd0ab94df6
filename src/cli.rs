use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::cruntime::ContainerState;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report whether the configured runtime is installed and running
    Status(CommonArgs),

    /// Enable and start the configured runtime
    Enable(CommonArgs),

    /// Stop and mask the configured runtime
    Disable(CommonArgs),

    /// Seed the runtime's image store from a cached preload tarball
    Preload(CommonArgs),

    /// List images known to the runtime as JSON lines
    Images(CommonArgs),

    /// List Kubernetes container IDs
    Containers(ContainersArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

impl Commands {
    /// Options shared by every host-facing subcommand.
    pub fn common(&self) -> Option<&CommonArgs> {
        match self {
            Self::Status(opts)
            | Self::Enable(opts)
            | Self::Disable(opts)
            | Self::Preload(opts)
            | Self::Images(opts) => Some(opts),
            Self::Containers(opts) => Some(&opts.common),
            Self::Completions(_) => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Path to the YAML node configuration
    #[arg(short, long, default_value = "node.yaml")]
    pub file: Utf8PathBuf,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,

    /// Do not run, just show what would be done
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ContainersArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Only list containers in this state (all, running, paused)
    #[arg(long, default_value = "all")]
    pub state: ContainerState,

    /// Container name substring, without the k8s_ prefix
    #[arg(long, default_value = "")]
    pub name: String,

    /// Restrict to a pod namespace; may be repeated
    #[arg(long = "namespace")]
    pub namespaces: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Log levels accepted by `--log-level`, mapped one to one onto `tracing` levels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}
