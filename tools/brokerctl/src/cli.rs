use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

/// Drive a capability-scoped IPC broker from scripted scenarios.
#[derive(Parser, Debug)]
#[command(name = "brokerctl", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format for all subcommands.
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a scenario file against a fresh coordinator.
    Run(RunArgs),

    /// Print the effective broker configuration.
    Config(ConfigArg),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario TOML file.
    pub scenario: PathBuf,

    #[command(flatten)]
    pub config: ConfigArg,

    /// Stop at the first step that fails without declaring `expect`.
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArg {
    /// Broker configuration TOML; defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
}
