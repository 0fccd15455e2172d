//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    CreateCommand, DeleteCommand, ListCommand, ReleaseCommand, RunCommand, StatusCommand,
};

/// Deployment environment orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "shipwright")]
#[command(version = "0.1.0")]
#[command(about = "Provision, release and tear down deployment environments", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Template registry root
    #[arg(long, global = true, default_value = "templates")]
    pub templates: String,

    /// Directory holding environment state records
    #[arg(long, global = true)]
    pub state_dir: Option<String>,

    /// Root for per-environment working directories
    #[arg(long, global = true, default_value = ".shipwright")]
    pub work_dir: String,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Provision a new environment (or resume a failed one)
    Create(CreateCommand),

    /// Release new service versions into an environment
    Release(ReleaseCommand),

    /// Run a one-off command in a service's container
    Run(RunCommand),

    /// Tear down an environment and forget it
    Delete(DeleteCommand),

    /// Show an environment's persisted state
    Status(StatusCommand),

    /// List known environments
    List(ListCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

use std::ffi::OsString;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from(["shipwright", "create", "staging", "-f", "app.yml"]).unwrap();
        match cli.command {
            Command::Create(cmd) => {
                assert_eq!(cmd.env, "staging");
                assert_eq!(cmd.file, "app.yml");
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_release_versions() {
        let cli = Cli::try_parse_from([
            "shipwright",
            "release",
            "staging",
            "--set-version",
            "web=v2",
        ])
        .unwrap();
        match cli.command {
            Command::Release(cmd) => {
                assert_eq!(cmd.version, vec![("web".to_string(), "v2".to_string())]);
            }
            other => panic!("expected release, got {other:?}"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "shipwright",
            "list",
            "--templates",
            "/opt/templates",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.templates, "/opt/templates");
    }
}
