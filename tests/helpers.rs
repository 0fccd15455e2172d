//! Test utilities: a scripted tool runner and environment harness

use shipwright::core::params::ParamMap;
use shipwright::core::plan::{CapabilityStep, ToolKind};
use shipwright::error::{DeployError, Result};
use shipwright::pipeline::{StepOutputs, ToolRunner};
use shipwright::registry::RenderedArtifacts;
use shipwright::state::FileStateStore;
use shipwright::{DeploymentSpec, Orchestrator, TemplateRegistry};

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Scripted stand-in for the terraform/ansible collaborators.
///
/// Applies succeed with plausible canned outputs unless a failure has
/// been scripted for the step id. Every call is recorded so tests can
/// assert exactly which steps ran, and in what order.
#[derive(Default)]
pub struct MockToolRunner {
    fail_apply: Mutex<HashMap<String, usize>>,
    fail_destroy: Mutex<HashMap<String, usize>>,
    omit_outputs: Mutex<HashMap<String, String>>,
    adhoc_delay: Mutex<Option<Duration>>,
    pub apply_calls: Mutex<Vec<String>>,
    pub destroy_calls: Mutex<Vec<String>>,
    pub adhoc_calls: Mutex<Vec<(String, String, String)>>,
    /// Interleaved record of every call, for ordering assertions
    pub log: Mutex<Vec<String>>,
}

impl MockToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `times` applies of `step_id` to fail
    pub fn fail_apply(&self, step_id: &str, times: usize) {
        self.fail_apply
            .lock()
            .unwrap()
            .insert(step_id.to_string(), times);
    }

    /// Script the next `times` destroys of `step_id` to fail
    pub fn fail_destroy(&self, step_id: &str, times: usize) {
        self.fail_destroy
            .lock()
            .unwrap()
            .insert(step_id.to_string(), times);
    }

    /// Script applies of `step_id` to withhold the `key` output
    pub fn omit_output(&self, step_id: &str, key: &str) {
        self.omit_outputs
            .lock()
            .unwrap()
            .insert(step_id.to_string(), key.to_string());
    }

    /// Make every ad-hoc run dwell before returning
    pub fn delay_adhoc(&self, delay: Duration) {
        *self.adhoc_delay.lock().unwrap() = Some(delay);
    }

    pub fn applied(&self) -> Vec<String> {
        self.apply_calls.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroy_calls.lock().unwrap().clone()
    }

    fn take_failure(map: &Mutex<HashMap<String, usize>>, key: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn canned_output(key: &str, params: &ParamMap) -> serde_json::Value {
        match key {
            "instance_public_ip" => json!("203.0.113.10"),
            "ansible_user" => json!("ubuntu"),
            "registry_url" => json!("123456789.dkr.ecr.us-east-1.amazonaws.com"),
            "image_ref" => {
                let service = params.get("service_name").map(|v| v.render()).unwrap_or_default();
                let tag = params.get("image_tag").map(|v| v.render()).unwrap_or_default();
                json!(format!("registry/{service}:{tag}"))
            }
            other => json!(format!("{other}-0001")),
        }
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn apply(
        &self,
        step: &CapabilityStep,
        _rendered: &RenderedArtifacts,
        params: &ParamMap,
        _work_dir: &Path,
    ) -> Result<StepOutputs> {
        self.apply_calls.lock().unwrap().push(step.id.clone());

        if Self::take_failure(&self.fail_apply, &step.id) {
            return Err(DeployError::ToolFailed {
                exit_code: 1,
                stderr_tail: format!("scripted failure for {}", step.id),
            });
        }

        let omitted = self.omit_outputs.lock().unwrap().get(&step.id).cloned();
        let mut outputs = StepOutputs::new();
        for key in &step.produces {
            if omitted.as_deref() == Some(key.as_str()) {
                continue;
            }
            outputs.insert(key.clone(), Self::canned_output(key, params));
        }
        Ok(outputs)
    }

    async fn destroy(&self, _tool: ToolKind, work_dir: &Path) -> Result<()> {
        let step_id = work_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        self.destroy_calls.lock().unwrap().push(step_id.clone());
        self.log.lock().unwrap().push(format!("destroy:{step_id}"));

        if Self::take_failure(&self.fail_destroy, &step_id) {
            return Err(DeployError::ToolFailed {
                exit_code: 1,
                stderr_tail: format!("scripted destroy failure for {step_id}"),
            });
        }
        Ok(())
    }

    async fn run_adhoc(
        &self,
        host: &str,
        user: &str,
        command: &str,
        _work_dir: &Path,
    ) -> Result<String> {
        self.log.lock().unwrap().push("adhoc:begin".to_string());
        let delay = *self.adhoc_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.adhoc_calls.lock().unwrap().push((
            host.to_string(),
            user.to_string(),
            command.to_string(),
        ));
        self.log.lock().unwrap().push("adhoc:end".to_string());
        Ok(format!("ran: {command}\n"))
    }
}

/// Minimal template tree covering the monolithic strategy on AWS.
/// Placeholders only reference keys the matching step requires.
pub fn write_template_tree(root: &Path) {
    let sets: &[(&str, &str, &str)] = &[
        (
            "network",
            "main.tf",
            "app = \"{{ app_slug }}\"\nenv = \"{{ env_name }}\"\nregion = \"{{ region }}\"\n",
        ),
        (
            "virtual_machine",
            "main.tf",
            "vpc = \"{{ vpc_id }}\"\nsubnet = \"{{ subnet_id }}\"\nkey = \"{{ ssh_public_key }}\"\n",
        ),
        ("container_registry", "main.tf", "repo = \"{{ app_slug }}\"\n"),
        ("registry_login", "playbook.yml", "url: \"{{ registry_url }}\"\n"),
        (
            "image_build_push",
            "playbook.yml",
            "image: \"{{ service_name }}:{{ image_tag }}\"\nsource: \"{{ source_path }}\"\n",
        ),
        (
            "service_config",
            "playbook.yml",
            "host: \"{{ instance_public_ip }}\"\nimage: \"{{ image_ref }}\"\n",
        ),
    ];

    for (capability, file_name, body) in sets {
        let dir = root.join(capability).join("aws");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file_name), body).unwrap();
    }
}

/// A fully wired orchestrator over temp directories and the mock runner
pub struct Harness {
    pub tmp: TempDir,
    pub mock: Arc<MockToolRunner>,
    pub orchestrator: Orchestrator,
    pub spec: DeploymentSpec,
}

impl Harness {
    pub fn work_root(&self) -> PathBuf {
        self.tmp.path().join("work")
    }
}

pub fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();

    let templates = tmp.path().join("templates");
    write_template_tree(&templates);

    let key_path = tmp.path().join("id_ed25519.pub");
    std::fs::write(&key_path, "ssh-ed25519 AAAATESTKEY test@host\n").unwrap();

    let spec = DeploymentSpec::from_yaml(&format!(
        r#"
app_name: demo
provider: aws
region: us-east-1
strategy: monolithic
ssh_public_key_path: "{}"
services:
  - name: web
    source_path: ./web
    language: python
    build_command: "docker build -t web ."
  - name: worker
    source_path: ./worker
    language: python
    build_command: "docker build -t worker ."
"#,
        key_path.display()
    ))
    .unwrap();

    let mock = Arc::new(MockToolRunner::new());
    let store = Arc::new(FileStateStore::new(tmp.path().join("state")));
    let orchestrator = Orchestrator::new(
        TemplateRegistry::new(templates),
        mock.clone(),
        store,
        tmp.path().join("work"),
    );

    Harness {
        tmp,
        mock,
        orchestrator,
        spec,
    }
}
