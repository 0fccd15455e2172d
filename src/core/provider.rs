//! Provider, strategy and capability enumerations
//!
//! These are closed sets: template dispatch matches exhaustively on
//! (capability, provider), so an unsupported combination is a resolution
//! error rather than a silent fallthrough.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
}

impl Provider {
    /// Directory slug used in the template tree
    pub fn slug(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Deployment strategy: a named combination of capabilities implementing
/// one deployment topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Everything on a single virtual machine
    Monolithic,
    /// Container registry for services plus CDN-fronted static frontend
    RegistryCdn,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Monolithic => f.write_str("monolithic"),
            Strategy::RegistryCdn => f.write_str("registry_cdn"),
        }
    }
}

/// A unit of infrastructure or deployment work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Network,
    VirtualMachine,
    ContainerRegistry,
    RegistryLogin,
    ImageBuildPush,
    ServiceConfig,
    FrontendDeploy,
    CacheInvalidate,
}

impl Capability {
    /// Directory slug used in the template tree
    pub fn slug(&self) -> &'static str {
        match self {
            Capability::Network => "network",
            Capability::VirtualMachine => "virtual_machine",
            Capability::ContainerRegistry => "container_registry",
            Capability::RegistryLogin => "registry_login",
            Capability::ImageBuildPush => "image_build_push",
            Capability::ServiceConfig => "service_config",
            Capability::FrontendDeploy => "frontend_deploy",
            Capability::CacheInvalidate => "cache_invalidate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_slug_roundtrip() {
        let p: Provider = serde_yaml::from_str("aws").unwrap();
        assert_eq!(p, Provider::Aws);
        assert_eq!(p.slug(), "aws");
    }

    #[test]
    fn test_strategy_serde() {
        let s: Strategy = serde_yaml::from_str("registry_cdn").unwrap();
        assert_eq!(s, Strategy::RegistryCdn);
        assert_eq!(serde_yaml::to_string(&Strategy::Monolithic).unwrap().trim(), "monolithic");
    }

    #[test]
    fn test_capability_slugs_are_unique() {
        use std::collections::HashSet;
        let all = [
            Capability::Network,
            Capability::VirtualMachine,
            Capability::ContainerRegistry,
            Capability::RegistryLogin,
            Capability::ImageBuildPush,
            Capability::ServiceConfig,
            Capability::FrontendDeploy,
            Capability::CacheInvalidate,
        ];
        let slugs: HashSet<_> = all.iter().map(|c| c.slug()).collect();
        assert_eq!(slugs.len(), all.len());
    }
}
