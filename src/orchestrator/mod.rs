//! Environment lifecycle orchestration
//!
//! Single entry point for create/release/run/delete. Each operation
//! takes a per-environment async lock, so two lifecycle operations on
//! the same environment serialize while different environments proceed
//! concurrently. Status transitions are persisted before and after the
//! pipeline runs; a crash leaves the record in an in-progress status
//! that a later operation resumes from.

use crate::core::params::ParamMap;
use crate::core::plan::PipelinePlan;
use crate::core::spec::DeploymentSpec;
use crate::error::{DeployError, Result};
use crate::pipeline::{PipelineEvent, PipelineRunner, ToolRunner};
use crate::registry::TemplateRegistry;
use crate::state::{EnvironmentRecord, LifecycleStatus, ServiceRecord, StateStore};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Tag applied to every service on first provisioning
const INITIAL_TAG: &str = "v1";

/// Whether a lifecycle operation touched infrastructure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Changed,
    Unchanged,
}

/// Result of a create or release operation
#[derive(Debug, Clone)]
pub struct LifecycleReport {
    pub outcome: ApplyOutcome,
    pub revision: u64,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    runner: PipelineRunner,
    tools: Arc<dyn ToolRunner>,
    work_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: TemplateRegistry,
        tools: Arc<dyn ToolRunner>,
        store: Arc<dyn StateStore>,
        work_root: PathBuf,
    ) -> Self {
        let runner = PipelineRunner::new(
            registry,
            tools.clone(),
            store.clone(),
            work_root.clone(),
        );
        Self {
            store,
            runner,
            tools,
            work_root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Add a handler for pipeline progress events
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.runner.add_event_handler(handler);
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Provision a named environment from a deployment spec.
    ///
    /// Creating an environment that already exists resumes it: steps
    /// whose fingerprints match are skipped, so a crashed or failed
    /// create picks up where it halted. The spec must agree with the
    /// existing record on provider, region and strategy.
    pub async fn create(&self, spec: &DeploymentSpec, env_name: &str) -> Result<LifecycleReport> {
        let lock = self.lock_for(env_name).await;
        let _guard = lock.lock().await;

        let mut record = match self.store.load(env_name).await? {
            Some(existing) => {
                ensure_spec_matches(spec, &existing)?;
                if existing.status == LifecycleStatus::Deleting {
                    return Err(DeployError::Precondition(format!(
                        "environment '{env_name}' is being deleted"
                    )));
                }
                existing
            }
            None => {
                let mut record = EnvironmentRecord::new(
                    env_name,
                    spec.provider,
                    &spec.region,
                    spec.strategy,
                );
                record.services = spec
                    .services
                    .iter()
                    .map(|s| ServiceRecord {
                        name: s.name.clone(),
                        image_tag: INITIAL_TAG.to_string(),
                        released_tags: Vec::new(),
                    })
                    .collect();
                record
            }
        };

        record.status = LifecycleStatus::Provisioning;
        self.store.save(&record).await?;

        let versions: BTreeMap<String, String> = record
            .services
            .iter()
            .map(|s| (s.name.clone(), s.image_tag.clone()))
            .collect();
        let plan = PipelinePlan::for_environment(spec, &versions);
        let params = build_static_params(spec, env_name)?;

        match self.runner.run(&plan, &params, &mut record).await {
            Ok(report) => {
                record.status = LifecycleStatus::Active;
                if record.revision == 0 {
                    record.revision = 1;
                }
                for service in &mut record.services {
                    let tag = service.image_tag.clone();
                    if !service.released_tags.contains(&tag) {
                        service.released_tags.push(tag);
                    }
                }
                self.store.save(&record).await?;
                info!(environment = env_name, revision = record.revision, "environment active");
                Ok(LifecycleReport {
                    outcome: if report.unchanged() {
                        ApplyOutcome::Unchanged
                    } else {
                        ApplyOutcome::Changed
                    },
                    revision: record.revision,
                    applied: report.applied,
                    skipped: report.skipped,
                })
            }
            Err(err) => {
                record.status = LifecycleStatus::Failed;
                self.store.save(&record).await?;
                Err(err)
            }
        }
    }

    /// Release new service versions into an existing environment.
    ///
    /// Only steps whose rendered inputs changed re-run; a release that
    /// changes nothing reports `Unchanged` and leaves the revision
    /// untouched. The revision increments exactly once per release that
    /// applied at least one step.
    pub async fn release(
        &self,
        spec: &DeploymentSpec,
        env_name: &str,
        versions: &BTreeMap<String, String>,
    ) -> Result<LifecycleReport> {
        let lock = self.lock_for(env_name).await;
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load(env_name)
            .await?
            .ok_or_else(|| DeployError::UnknownEnvironment(env_name.to_string()))?;
        ensure_spec_matches(spec, &record)?;

        match record.status {
            LifecycleStatus::Active | LifecycleStatus::Releasing | LifecycleStatus::Failed => {}
            other => {
                return Err(DeployError::Precondition(format!(
                    "environment '{env_name}' cannot be released in status {other:?}"
                )));
            }
        }
        if record.revision == 0 {
            return Err(DeployError::Precondition(format!(
                "environment '{env_name}' has never been provisioned"
            )));
        }
        ensure_tags_fresh(&record, versions)?;

        record.status = LifecycleStatus::Releasing;
        self.store.save(&record).await?;

        // Unmentioned services keep their current tag
        let mut effective: BTreeMap<String, String> = record
            .services
            .iter()
            .map(|s| (s.name.clone(), s.image_tag.clone()))
            .collect();
        for (name, tag) in versions {
            if spec.service(name).is_none() {
                return Err(DeployError::Precondition(format!(
                    "unknown service '{name}' in release"
                )));
            }
            effective.insert(name.clone(), tag.clone());
        }

        let plan = PipelinePlan::for_environment(spec, &effective);
        let params = build_static_params(spec, env_name)?;

        match self.runner.run(&plan, &params, &mut record).await {
            Ok(report) => {
                let outcome = if report.unchanged() {
                    ApplyOutcome::Unchanged
                } else {
                    record.revision += 1;
                    ApplyOutcome::Changed
                };
                for service in &mut record.services {
                    if let Some(tag) = effective.get(&service.name) {
                        service.image_tag = tag.clone();
                        if !service.released_tags.contains(tag) {
                            service.released_tags.push(tag.clone());
                        }
                    }
                }
                record.status = LifecycleStatus::Active;
                self.store.save(&record).await?;
                info!(environment = env_name, revision = record.revision, ?outcome, "release finished");
                Ok(LifecycleReport {
                    outcome,
                    revision: record.revision,
                    applied: report.applied,
                    skipped: report.skipped,
                })
            }
            Err(err) => {
                // Revision only moves on success
                record.status = LifecycleStatus::Failed;
                self.store.save(&record).await?;
                Err(err)
            }
        }
    }

    /// Run a one-off command inside a service's container on the
    /// environment's host. Read-only with respect to durable state.
    pub async fn run_command(
        &self,
        env_name: &str,
        service_name: &str,
        command: &str,
    ) -> Result<String> {
        let lock = self.lock_for(env_name).await;
        let _guard = lock.lock().await;

        let record = self
            .store
            .load(env_name)
            .await?
            .ok_or_else(|| DeployError::UnknownEnvironment(env_name.to_string()))?;

        if record.status != LifecycleStatus::Active {
            return Err(DeployError::Precondition(format!(
                "environment '{env_name}' is not active"
            )));
        }
        if record.service(service_name).is_none() {
            return Err(DeployError::Precondition(format!(
                "environment '{env_name}' has no service '{service_name}'"
            )));
        }

        let outputs = record.merged_outputs();
        let host = outputs
            .get("instance_public_ip")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DeployError::Precondition(format!(
                    "environment '{env_name}' has no reachable host"
                ))
            })?;
        let user = outputs
            .get("ansible_user")
            .and_then(|v| v.as_str())
            .unwrap_or("ubuntu");

        // Services run as containers named after themselves
        let scoped = format!("docker exec {service_name} {command}");
        let work_dir = self.work_root.join(env_name).join("adhoc");
        self.tools.run_adhoc(host, user, &scoped, &work_dir).await
    }

    /// Tear down an environment and remove its record.
    ///
    /// Destroys applied steps in reverse order. On partial failure the
    /// record survives with status `Failed` and an accurate picture of
    /// what remains; re-running delete resumes the teardown.
    pub async fn delete(&self, env_name: &str) -> Result<()> {
        let lock = self.lock_for(env_name).await;
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load(env_name)
            .await?
            .ok_or_else(|| DeployError::UnknownEnvironment(env_name.to_string()))?;

        record.status = LifecycleStatus::Deleting;
        self.store.save(&record).await?;

        if let Err(err) = self.runner.destroy(&mut record).await {
            record.status = LifecycleStatus::Failed;
            self.store.save(&record).await?;
            return Err(err);
        }

        self.store.remove(env_name).await?;
        let env_work = self.work_root.join(env_name);
        if env_work.is_dir() {
            std::fs::remove_dir_all(&env_work)?;
        }
        info!(environment = env_name, "environment deleted");
        Ok(())
    }

    /// Inspect the persisted record of an environment
    pub async fn status(&self, env_name: &str) -> Result<EnvironmentRecord> {
        self.store
            .load(env_name)
            .await?
            .ok_or_else(|| DeployError::UnknownEnvironment(env_name.to_string()))
    }

    /// Names of every known environment
    pub async fn list(&self) -> Result<Vec<String>> {
        self.store.list().await
    }
}

fn ensure_spec_matches(spec: &DeploymentSpec, record: &EnvironmentRecord) -> Result<()> {
    if spec.provider != record.provider
        || spec.strategy != record.strategy
        || spec.region != record.region
    {
        return Err(DeployError::Precondition(format!(
            "environment '{}' was provisioned as {:?}/{:?}/{}; the spec disagrees",
            record.name, record.provider, record.strategy, record.region
        )));
    }
    Ok(())
}

/// A tag that already names an earlier revision's artifact cannot be
/// reused for a different one.
fn ensure_tags_fresh(
    record: &EnvironmentRecord,
    versions: &BTreeMap<String, String>,
) -> Result<()> {
    for (name, tag) in versions {
        if let Some(service) = record.service(name) {
            if service.released_tags.contains(tag) && &service.image_tag != tag {
                return Err(DeployError::Precondition(format!(
                    "tag '{tag}' was already released for service '{name}'"
                )));
            }
        }
    }
    Ok(())
}

/// Parameters every pipeline starts from, derived from the spec alone
pub fn build_static_params(spec: &DeploymentSpec, env_name: &str) -> Result<ParamMap> {
    let mut params = ParamMap::new();
    params.insert("app_slug".to_string(), spec.app_slug().into());
    params.insert("env_name".to_string(), env_name.into());
    params.insert("region".to_string(), spec.region.clone().into());
    params.insert("provider".to_string(), spec.provider.slug().into());

    if let Some(domain) = &spec.domain {
        params.insert("domain".to_string(), domain.clone().into());
    }
    if let Some(path) = &spec.ssh_public_key_path {
        let key = read_public_key(path)?;
        params.insert("ssh_public_key".to_string(), key.into());
    }

    Ok(params)
}

fn read_public_key(path: &str) -> Result<String> {
    let expanded = expand_home(path);
    let key = std::fs::read_to_string(&expanded).map_err(|e| {
        DeployError::Precondition(format!(
            "cannot read ssh public key '{}': {e}",
            expanded.display()
        ))
    })?;
    Ok(key.trim().to_string())
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}
