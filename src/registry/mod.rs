//! Template registry: (capability, provider) -> TemplateSet
//!
//! Templates live in a directory tree `<root>/<capability>/<provider>/`.
//! Each set carries a `schema.yml` declaring its required and optional
//! parameters; every other file in the directory is an opaque
//! parameterized artifact handed to the renderer.

pub mod render;

pub use render::{render, RenderedArtifact, RenderedArtifacts};

use crate::core::params::ParamSchema;
use crate::core::provider::{Capability, Provider};
use crate::error::{DeployError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the parameter schema inside a template directory
pub const SCHEMA_FILE: &str = "schema.yml";

/// One parameterized template file
#[derive(Debug, Clone)]
pub struct TemplateArtifact {
    pub file_name: String,
    pub body: String,
}

/// The artifacts and parameter schema implementing one capability for
/// one provider
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub capability: Capability,
    pub provider: Provider,
    pub artifacts: Vec<TemplateArtifact>,
    pub schema: ParamSchema,
}

/// Pure lookup over the template tree, no external calls
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    root: PathBuf,
}

impl TemplateRegistry {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the template set for a capability on a provider.
    ///
    /// Fails with `UnsupportedCombination` when no template directory
    /// exists; this is a configuration error surfaced to the caller,
    /// never silently skipped.
    pub fn resolve(&self, capability: Capability, provider: Provider) -> Result<TemplateSet> {
        let dir = self.root.join(capability.slug()).join(provider.slug());
        if !dir.is_dir() {
            return Err(DeployError::UnsupportedCombination {
                capability,
                provider,
            });
        }

        let mut artifacts = Vec::new();
        let mut schema = ParamSchema::default();

        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        // Deterministic artifact order regardless of directory iteration
        entries.sort();

        for path in entries {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let body = std::fs::read_to_string(&path)?;

            if file_name == SCHEMA_FILE {
                schema = serde_yaml::from_str(&body)?;
            } else {
                artifacts.push(TemplateArtifact { file_name, body });
            }
        }

        debug!(
            capability = %capability,
            provider = %provider,
            artifacts = artifacts.len(),
            "resolved template set"
        );

        Ok(TemplateSet {
            capability,
            provider,
            artifacts,
            schema,
        })
    }
}
