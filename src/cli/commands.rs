//! CLI command definitions

use clap::Args;

/// Provision an environment
#[derive(Debug, Args, Clone)]
pub struct CreateCommand {
    /// Environment name
    pub env: String,

    /// Path to the deployment spec
    #[arg(short, long, default_value = "shipwright.yml")]
    pub file: String,
}

/// Release service versions into an environment
#[derive(Debug, Args, Clone)]
pub struct ReleaseCommand {
    /// Environment name
    pub env: String,

    /// Path to the deployment spec
    #[arg(short, long, default_value = "shipwright.yml")]
    pub file: String,

    /// Service version overrides (service=tag); unmentioned services
    /// keep their current tag
    #[arg(long = "set-version", value_parser = parse_key_value)]
    pub version: Vec<(String, String)>,
}

/// Run a one-off command in a service's container
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Environment name
    pub env: String,

    /// Service whose container runs the command
    pub service: String,

    /// Shell command to run
    pub command: String,
}

/// Tear down an environment
#[derive(Debug, Args, Clone)]
pub struct DeleteCommand {
    /// Environment name
    pub env: String,
}

/// Show an environment's persisted state
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Environment name
    pub env: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List known environments
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
