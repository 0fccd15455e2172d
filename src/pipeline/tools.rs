//! Tool collaborators: how each `ToolKind` is driven
//!
//! `ToolRunner` is the seam between the pipeline and real subprocesses;
//! tests substitute a scripted implementation. `ProcessToolRunner`
//! drives the actual binaries: terraform through init/apply/destroy
//! plus `output -json`, ansible through `ansible-playbook` with a
//! single JSON extra-vars argument and marker-line outputs.

use crate::core::params::ParamMap;
use crate::core::plan::{CapabilityStep, ToolKind};
use crate::error::{DeployError, Result};
use crate::invoker::{InvocationSpec, ToolInvoker, DEFAULT_TIMEOUT_SECS};
use crate::registry::RenderedArtifacts;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Structured outputs of one applied step
pub type StepOutputs = BTreeMap<String, serde_json::Value>;

/// Executes one capability step's external tool
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    /// Apply a step: materialize the rendered artifacts in `work_dir`,
    /// drive the tool to completion, and return its declared outputs.
    async fn apply(
        &self,
        step: &CapabilityStep,
        rendered: &RenderedArtifacts,
        params: &ParamMap,
        work_dir: &Path,
    ) -> Result<StepOutputs>;

    /// Tear down whatever a previous apply created in `work_dir`
    async fn destroy(&self, tool: ToolKind, work_dir: &Path) -> Result<()>;

    /// Run a one-off shell command on a deployed host. Never touches
    /// durable state.
    async fn run_adhoc(&self, host: &str, user: &str, command: &str, work_dir: &Path)
        -> Result<String>;
}

/// File terraform variables are written to; auto-loaded by terraform
const TFVARS_FILE: &str = "shipwright.auto.tfvars.json";

/// Playbook entrypoint inside a rendered ansible step
const PLAYBOOK_FILE: &str = "playbook.yml";

/// Drives the real `terraform` and `ansible-playbook` binaries
pub struct ProcessToolRunner {
    invoker: ToolInvoker,
    timeout_secs: u64,
}

impl Default for ProcessToolRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl ProcessToolRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            invoker: ToolInvoker::new(),
            timeout_secs,
        }
    }

    fn spec(&self, program: &str, args: &[&str], work_dir: &Path) -> InvocationSpec {
        let mut spec = InvocationSpec::new(program, args, work_dir);
        spec.timeout_secs = self.timeout_secs;
        spec
    }

    /// Variables reach terraform twice: a tfvars file in the working
    /// dir and `TF_VAR_` env vars, so both root-module variables and
    /// nested provisioner shell-outs see them.
    fn terraform_env(params: &ParamMap) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("TF_IN_AUTOMATION".to_string(), "1".to_string());
        for (key, value) in params {
            env.insert(format!("TF_VAR_{key}"), value.render());
        }
        env
    }

    fn write_tfvars(params: &ParamMap, work_dir: &Path) -> Result<()> {
        let vars: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let body = serde_json::to_string_pretty(&serde_json::Value::Object(vars))?;
        std::fs::write(work_dir.join(TFVARS_FILE), body)?;
        Ok(())
    }

    async fn terraform_apply(&self, params: &ParamMap, work_dir: &Path) -> Result<StepOutputs> {
        Self::write_tfvars(params, work_dir)?;
        let env = Self::terraform_env(params);

        for args in [
            vec!["init", "-no-color", "-input=false"],
            vec!["apply", "-auto-approve", "-no-color", "-input=false"],
        ] {
            let mut spec = self.spec("terraform", &args, work_dir);
            spec.env = env.clone();
            self.invoker.invoke(&spec).await?.ensure_success()?;
        }

        let mut spec = self.spec("terraform", &["output", "-no-color", "-json"], work_dir);
        spec.env = env;
        let record = self.invoker.invoke(&spec).await?;
        record.ensure_success()?;
        Self::parse_terraform_outputs(&record.stdout)
    }

    /// `terraform output -json` emits `{name: {value, type, sensitive}}`;
    /// only the values matter here.
    fn parse_terraform_outputs(stdout: &str) -> Result<StepOutputs> {
        let raw: serde_json::Value = serde_json::from_str(stdout.trim())?;
        let Some(object) = raw.as_object() else {
            return Err(DeployError::ToolFailed {
                exit_code: 0,
                stderr_tail: "terraform output -json did not return an object".to_string(),
            });
        };

        let mut outputs = StepOutputs::new();
        for (name, entry) in object {
            let value = entry.get("value").cloned().unwrap_or(serde_json::Value::Null);
            outputs.insert(name.clone(), value);
        }
        Ok(outputs)
    }

    async fn ansible_apply(
        &self,
        rendered: &RenderedArtifacts,
        params: &ParamMap,
        work_dir: &Path,
    ) -> Result<StepOutputs> {
        let playbook = rendered
            .artifacts
            .iter()
            .map(|a| a.file_name.as_str())
            .find(|name| *name == PLAYBOOK_FILE)
            .or_else(|| {
                rendered
                    .artifacts
                    .iter()
                    .map(|a| a.file_name.as_str())
                    .find(|name| name.ends_with(".yml") || name.ends_with(".yaml"))
            })
            .ok_or_else(|| {
                DeployError::Precondition("ansible step has no playbook artifact".to_string())
            })?;

        let extra_vars: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let extra_vars = serde_json::to_string(&serde_json::Value::Object(extra_vars))?;

        // Host-scoped plays get the target as an ad-hoc inventory;
        // everything else runs against localhost.
        let mut args = vec![playbook];
        let inventory;
        if let Some(host) = params.get("instance_public_ip") {
            inventory = format!("{},", host.render());
            args.extend(["-i", inventory.as_str()]);
        }
        args.extend(["--extra-vars", extra_vars.as_str()]);

        let spec = self.spec("ansible-playbook", &args, work_dir);
        let record = self.invoker.invoke(&spec).await?;
        record.ensure_success()?;
        Ok(record.outputs.clone())
    }
}

#[async_trait::async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn apply(
        &self,
        step: &CapabilityStep,
        rendered: &RenderedArtifacts,
        params: &ParamMap,
        work_dir: &Path,
    ) -> Result<StepOutputs> {
        rendered.write_to(work_dir)?;
        info!(step = %step.id, tool = ?step.tool, dir = %work_dir.display(), "applying step");

        match step.tool {
            ToolKind::Terraform => self.terraform_apply(params, work_dir).await,
            ToolKind::Ansible => self.ansible_apply(rendered, params, work_dir).await,
        }
    }

    async fn destroy(&self, tool: ToolKind, work_dir: &Path) -> Result<()> {
        match tool {
            ToolKind::Terraform => {
                if !work_dir.is_dir() {
                    return Err(DeployError::Precondition(format!(
                        "terraform working dir missing: {}",
                        work_dir.display()
                    )));
                }
                let spec = self.spec(
                    "terraform",
                    &["destroy", "-auto-approve", "-no-color", "-input=false"],
                    work_dir,
                );
                self.invoker.invoke(&spec).await?.ensure_success()?;
                Ok(())
            }
            // Ansible steps configure hosts whose infrastructure the
            // terraform destroys remove; there is nothing to undo.
            ToolKind::Ansible => {
                debug!(dir = %work_dir.display(), "ansible step needs no destroy");
                Ok(())
            }
        }
    }

    async fn run_adhoc(
        &self,
        host: &str,
        user: &str,
        command: &str,
        work_dir: &Path,
    ) -> Result<String> {
        let inventory = format!("{host},");
        let spec = self.spec(
            "ansible",
            &["all", "-i", &inventory, "-u", user, "-m", "shell", "-a", command],
            work_dir,
        );
        let record = self.invoker.invoke(&spec).await?;
        record.ensure_success()?;
        Ok(record.stdout.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_terraform_outputs() {
        let stdout = r#"{
            "registry_url": {"sensitive": false, "type": "string", "value": "123.dkr.ecr.amazonaws.com"},
            "vpc_id": {"sensitive": false, "type": "string", "value": "vpc-0abc"}
        }"#;
        let outputs = ProcessToolRunner::parse_terraform_outputs(stdout).unwrap();
        assert_eq!(outputs["registry_url"], json!("123.dkr.ecr.amazonaws.com"));
        assert_eq!(outputs["vpc_id"], json!("vpc-0abc"));
    }

    #[test]
    fn test_parse_terraform_outputs_empty_object() {
        let outputs = ProcessToolRunner::parse_terraform_outputs("{}").unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_parse_terraform_outputs_rejects_non_object() {
        assert!(ProcessToolRunner::parse_terraform_outputs("[1, 2]").is_err());
    }

    #[test]
    fn test_terraform_env_prefixes_params() {
        let mut params = ParamMap::new();
        params.insert("region".to_string(), "us-east-1".into());
        let env = ProcessToolRunner::terraform_env(&params);
        assert_eq!(env["TF_VAR_region"], "us-east-1");
        assert_eq!(env["TF_IN_AUTOMATION"], "1");
    }

    #[test]
    fn test_write_tfvars_is_json_typed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut params = ParamMap::new();
        params.insert("region".to_string(), "eu-west-1".into());
        params.insert(
            "zones".to_string(),
            crate::core::params::ParamValue::List(vec!["a".to_string(), "b".to_string()]),
        );
        ProcessToolRunner::write_tfvars(&params, tmp.path()).unwrap();

        let body = std::fs::read_to_string(tmp.path().join(TFVARS_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["region"], json!("eu-west-1"));
        assert_eq!(parsed["zones"], json!(["a", "b"]));
    }
}
