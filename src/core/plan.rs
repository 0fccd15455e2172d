//! Capability pipeline plans
//!
//! A plan is the ordered list of capability steps implementing one
//! strategy for one environment. Ordering is fixed by data dependencies:
//! a step's `requires` keys must be satisfiable by prior steps' `produces`
//! or by static environment parameters, and this is checked before any
//! external process runs.

use crate::core::params::ParamMap;
use crate::core::provider::{Capability, Strategy};
use crate::core::spec::DeploymentSpec;
use crate::error::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which external tool executes a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Declarative infra tool: apply/destroy against rendered artifacts
    Terraform,
    /// Configuration management tool: playbook run against a host
    Ansible,
}

/// One named unit of work in a pipeline
#[derive(Debug, Clone)]
pub struct CapabilityStep {
    /// Unique step id within the plan. Service-scoped steps are suffixed
    /// with the service slug, e.g. "image_build_push@web".
    pub id: String,

    pub capability: Capability,

    pub tool: ToolKind,

    /// Input keys this step needs before rendering its templates
    pub requires: Vec<String>,

    /// Output keys this step declares it will emit
    pub produces: Vec<String>,

    /// Static per-step parameter bindings (service name, image tag, ...)
    /// layered over the running parameter set
    pub overlay: ParamMap,

    /// Whether failures of this step are known-transient and may be
    /// retried with backoff (registry authentication only)
    pub transient: bool,
}

impl CapabilityStep {
    fn new(capability: Capability, tool: ToolKind) -> Self {
        Self {
            id: capability.slug().to_string(),
            capability,
            tool,
            requires: Vec::new(),
            produces: Vec::new(),
            overlay: ParamMap::new(),
            transient: false,
        }
    }

    fn for_service(capability: Capability, tool: ToolKind, service_slug: &str) -> Self {
        let mut step = Self::new(capability, tool);
        step.id = format!("{}@{}", capability.slug(), service_slug);
        step
    }

    fn requires(mut self, keys: &[&str]) -> Self {
        self.requires = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    fn produces(mut self, keys: &[&str]) -> Self {
        self.produces = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    fn bind(mut self, key: &str, value: &str) -> Self {
        self.overlay.insert(key.to_string(), value.into());
        self
    }
}

/// An ordered capability pipeline for one environment
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub steps: Vec<CapabilityStep>,
}

impl PipelinePlan {
    /// Build the plan for an environment from its spec and the image tag
    /// chosen for each service this run.
    pub fn for_environment(spec: &DeploymentSpec, versions: &BTreeMap<String, String>) -> Self {
        let steps = match spec.strategy {
            Strategy::Monolithic => Self::monolithic_steps(spec, versions),
            Strategy::RegistryCdn => Self::registry_cdn_steps(spec, versions),
        };
        Self { steps }
    }

    fn monolithic_steps(
        spec: &DeploymentSpec,
        versions: &BTreeMap<String, String>,
    ) -> Vec<CapabilityStep> {
        let mut steps = vec![
            CapabilityStep::new(Capability::Network, ToolKind::Terraform)
                .requires(&["app_slug", "env_name", "region"])
                .produces(&["vpc_id", "subnet_id"]),
            CapabilityStep::new(Capability::VirtualMachine, ToolKind::Terraform)
                .requires(&[
                    "app_slug",
                    "env_name",
                    "region",
                    "vpc_id",
                    "subnet_id",
                    "ssh_public_key",
                ])
                .produces(&["instance_public_ip", "ansible_user"]),
            CapabilityStep::new(Capability::ContainerRegistry, ToolKind::Terraform)
                .requires(&["app_slug", "region"])
                .produces(&["registry_url"]),
            CapabilityStep::new(Capability::RegistryLogin, ToolKind::Ansible)
                .requires(&["registry_url"])
                .produces(&["registry_token"])
                .transient(),
        ];

        for service in &spec.services {
            steps.extend(Self::image_steps(service, versions));
            steps.push(
                CapabilityStep::for_service(
                    Capability::ServiceConfig,
                    ToolKind::Ansible,
                    &service.slug(),
                )
                .requires(&["instance_public_ip", "ansible_user", "image_ref", "service_name"])
                .bind("service_name", &service.name),
            );
        }

        steps
    }

    fn registry_cdn_steps(
        spec: &DeploymentSpec,
        versions: &BTreeMap<String, String>,
    ) -> Vec<CapabilityStep> {
        let mut steps = vec![
            CapabilityStep::new(Capability::ContainerRegistry, ToolKind::Terraform)
                .requires(&["app_slug", "region"])
                .produces(&["registry_url"]),
            CapabilityStep::new(Capability::RegistryLogin, ToolKind::Ansible)
                .requires(&["registry_url"])
                .produces(&["registry_token"])
                .transient(),
        ];

        for service in &spec.services {
            steps.extend(Self::image_steps(service, versions));
        }

        steps.push(
            CapabilityStep::new(Capability::FrontendDeploy, ToolKind::Terraform)
                .requires(&["app_slug", "env_name", "region", "domain"])
                .produces(&["bucket_name", "cdn_domain", "distribution_id"]),
        );
        steps.push(
            CapabilityStep::new(Capability::CacheInvalidate, ToolKind::Ansible)
                .requires(&["distribution_id"]),
        );

        steps
    }

    fn image_steps(
        service: &crate::core::spec::ServiceSpec,
        versions: &BTreeMap<String, String>,
    ) -> Vec<CapabilityStep> {
        let tag = versions
            .get(&service.name)
            .cloned()
            .unwrap_or_else(|| "v1".to_string());

        vec![CapabilityStep::for_service(
            Capability::ImageBuildPush,
            ToolKind::Ansible,
            &service.slug(),
        )
        .requires(&[
            "registry_url",
            "registry_token",
            "service_name",
            "image_tag",
            "source_path",
            "build_command",
        ])
        .produces(&["image_ref"])
        .bind("service_name", &service.name)
        .bind("image_tag", &tag)
        .bind("source_path", &service.source_path)
        .bind("build_command", &service.build_command)]
    }

    pub fn step(&self, id: &str) -> Option<&CapabilityStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Validate that every step's required inputs are satisfiable by the
    /// static parameter set, the step's own overlay, or a prior step's
    /// declared outputs. Runs before any external process.
    pub fn validate(&self, static_params: &ParamMap) -> Result<()> {
        let mut produced: BTreeSet<&str> = BTreeSet::new();

        for step in &self.steps {
            for key in &step.requires {
                let satisfied = static_params.contains_key(key)
                    || step.overlay.contains_key(key)
                    || produced.contains(key.as_str());
                if !satisfied {
                    return Err(DeployError::UnsatisfiedInput {
                        step: step.id.clone(),
                        key: key.clone(),
                    });
                }
            }
            produced.extend(step.produces.iter().map(|k| k.as_str()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::spec::DeploymentSpec;

    fn demo_spec() -> DeploymentSpec {
        DeploymentSpec::from_yaml(
            r#"
app_name: demo
provider: aws
region: us-east-1
strategy: monolithic
ssh_public_key_path: ~/.ssh/id_ed25519.pub
services:
  - name: web
    source_path: ./web
    language: python
    build_command: "docker build -t web ."
"#,
        )
        .unwrap()
    }

    fn static_params() -> ParamMap {
        let mut params = ParamMap::new();
        for (k, v) in [
            ("app_slug", "demo"),
            ("env_name", "staging"),
            ("region", "us-east-1"),
            ("ssh_public_key", "ssh-ed25519 AAAA"),
        ] {
            params.insert(k.to_string(), v.into());
        }
        params
    }

    #[test]
    fn test_monolithic_plan_order() {
        let plan = PipelinePlan::for_environment(&demo_spec(), &BTreeMap::new());
        let ids: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "network",
                "virtual_machine",
                "container_registry",
                "registry_login",
                "image_build_push@web",
                "service_config@web",
            ]
        );
    }

    #[test]
    fn test_plan_validates_with_static_params() {
        let plan = PipelinePlan::for_environment(&demo_spec(), &BTreeMap::new());
        plan.validate(&static_params()).unwrap();
    }

    #[test]
    fn test_validation_rejects_consumer_before_producer() {
        let mut plan = PipelinePlan::for_environment(&demo_spec(), &BTreeMap::new());
        // Move virtual_machine (consumes vpc_id) ahead of network (produces it)
        plan.steps.swap(0, 1);

        let err = plan.validate(&static_params()).unwrap_err();
        match err {
            DeployError::UnsatisfiedInput { step, key } => {
                assert_eq!(step, "virtual_machine");
                assert!(key == "vpc_id" || key == "subnet_id");
            }
            other => panic!("expected UnsatisfiedInput, got {other:?}"),
        }
    }

    #[test]
    fn test_versions_bind_image_tags() {
        let mut versions = BTreeMap::new();
        versions.insert("web".to_string(), "v7".to_string());
        let plan = PipelinePlan::for_environment(&demo_spec(), &versions);

        let step = plan.step("image_build_push@web").unwrap();
        assert_eq!(
            step.overlay.get("image_tag"),
            Some(&crate::core::params::ParamValue::from("v7"))
        );
    }

    #[test]
    fn test_registry_login_is_the_only_transient_step() {
        let plan = PipelinePlan::for_environment(&demo_spec(), &BTreeMap::new());
        let transient: Vec<&str> = plan
            .steps
            .iter()
            .filter(|s| s.transient)
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(transient, vec!["registry_login"]);
    }
}
