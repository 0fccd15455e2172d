//! Error taxonomy for lifecycle operations

use crate::core::provider::{Capability, Provider};
use thiserror::Error;

/// Errors surfaced by the orchestrator and its components
#[derive(Debug, Error)]
pub enum DeployError {
    /// No template set exists for this capability on this provider.
    /// A configuration error: the operator must pick a different
    /// strategy or provider.
    #[error("no templates for capability '{capability}' on provider '{provider}'")]
    UnsupportedCombination {
        capability: Capability,
        provider: Provider,
    },

    /// A required template parameter was not supplied. Raised before
    /// any external tool is invoked.
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    /// An external tool exited non-zero.
    #[error("tool exited with code {exit_code}: {stderr_tail}")]
    ToolFailed { exit_code: i32, stderr_tail: String },

    /// An external tool exceeded its per-step timeout.
    #[error("tool timed out after {0} seconds")]
    Timeout(u64),

    /// Persisted environment state failed schema validation. Never
    /// auto-repaired; requires manual intervention.
    #[error("environment state is corrupt: {0}")]
    StateCorrupt(String),

    /// A pipeline step requires an input no prior step produces and
    /// no static parameter supplies. Detected before execution.
    #[error("step '{step}' requires input '{key}' which nothing produces")]
    UnsatisfiedInput { step: String, key: String },

    /// The environment is not in a state compatible with the requested
    /// operation (e.g. `release` on a non-Active environment).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A marker line on the structured output channel could not be decoded.
    #[error("malformed marker line: {0}")]
    MalformedMarker(String),

    #[error("environment '{0}' not found")]
    UnknownEnvironment(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeployError>;
