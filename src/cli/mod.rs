//! CLI module for vulnstack
//!
//! This module provides the command-line interface: argument parsing and
//! subcommand dispatch.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// vulnstack - converge the vulnerability-consolidation topology on GCP
///
/// Plans and applies a private network, a privately peered AlloyDB cluster,
/// an IAP-only access VM and a BigQuery archive from three variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "vulnstack")]
#[command(author = "Vulnstack Contributors")]
#[command(version)]
#[command(about = "Plan and converge the vulnerability-consolidation GCP topology", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the state file (overrides configuration)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Variables file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    pub var_file: Option<PathBuf>,

    /// Project to deploy into
    #[arg(long, global = true)]
    pub project_id: Option<String>,

    /// Region to deploy into
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Cloud provider to run against
    #[arg(long, global = true, default_value = "gcp")]
    pub provider: ProviderKind,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Re-read recorded resources from the provider before planning
    #[arg(long, global = true)]
    pub refresh: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Which control plane to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Google Cloud REST APIs
    Gcp,
    /// In-process simulated cloud with its own state file next to the real one
    Simulated,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the changes apply would make
    Plan(commands::plan::PlanArgs),

    /// Converge live infrastructure to the declaration
    Apply(commands::apply::ApplyArgs),

    /// Destroy everything recorded in state
    Destroy(commands::destroy::DestroyArgs),

    /// Print output values
    Output(commands::output::OutputArgs),

    /// Print the resource dependency graph
    Graph(commands::graph::GraphArgs),

    /// Check variables, policies and ordering without contacting the cloud
    Validate(commands::validate::ValidateArgs),

    /// Check the archive table answers queries and print the database route
    Verify(commands::verify::VerifyArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}
