//! Deployment spec loaded from shipwright.yml
//!
//! The spec is produced by the codebase-analysis step and consumed
//! read-only here: service topology, provider and strategy come in as
//! structured facts.

use crate::core::provider::{Provider, Strategy};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level deployment spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Application name
    pub app_name: String,

    /// Target cloud provider
    pub provider: Provider,

    /// Provider region (e.g. "us-east-1")
    pub region: String,

    /// Deployment strategy for this application
    pub strategy: Strategy,

    /// Services identified in the repository
    pub services: Vec<ServiceSpec>,

    /// Domain to serve the application from
    #[serde(default)]
    pub domain: Option<String>,

    /// Path to the SSH public key installed on provisioned machines
    #[serde(default)]
    pub ssh_public_key_path: Option<String>,

    /// Per-step timeout override in seconds
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
}

/// A single service to be deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique service name within the application
    pub name: String,

    /// Path to the service source relative to the repository root
    pub source_path: String,

    /// Detected primary language
    pub language: String,

    /// Detected framework, if any
    #[serde(default)]
    pub framework: Option<String>,

    /// Command that builds the service image context
    pub build_command: String,

    /// Port the service listens on, if applicable
    #[serde(default)]
    pub port: Option<u16>,
}

impl ServiceSpec {
    /// Slug used for working directories and image names
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    }
}

impl DeploymentSpec {
    /// Load a deployment spec from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a deployment spec from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: DeploymentSpec = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Write the spec to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let body = serde_yaml::to_string(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }

    /// Validate the spec before any lifecycle operation uses it
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            anyhow::bail!("app_name must not be empty");
        }
        if self.region.trim().is_empty() {
            anyhow::bail!("region must not be empty");
        }
        if self.services.is_empty() {
            anyhow::bail!("at least one service is required");
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if !seen.insert(&service.name) {
                anyhow::bail!("duplicate service name: {}", service.name);
            }
            if service.build_command.trim().is_empty() {
                anyhow::bail!("service '{}' has an empty build_command", service.name);
            }
        }

        if self.strategy == Strategy::RegistryCdn && self.domain.is_none() {
            anyhow::bail!("strategy registry_cdn requires a domain");
        }

        Ok(())
    }

    /// Slugified application name
    pub fn app_slug(&self) -> String {
        self.app_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}
