//! Environment state store
//!
//! Durable record of what has been provisioned for a named environment.
//! Written after each successful pipeline step so a resumed run can skip
//! already-completed work. The orchestrator is the only writer; the
//! pipeline reads state and returns output deltas.

pub mod file_store;

pub use file_store::FileStateStore;

use crate::core::plan::ToolKind;
use crate::core::provider::{Capability, Provider, Strategy};
use crate::error::{DeployError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Provisioning,
    Active,
    Releasing,
    Deleting,
    Failed,
}

/// Last successful execution of one capability step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub capability: Capability,
    pub tool: ToolKind,
    /// Fingerprint of the rendered artifacts + input values that were
    /// applied; matching fingerprints let a later run skip the step
    pub fingerprint: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub applied_at: DateTime<Utc>,
}

/// Per-service deployment state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    /// Image tag of the current revision
    pub image_tag: String,
    /// Tags of every successfully released revision; a tag is never
    /// reused for a different revision's artifact
    #[serde(default)]
    pub released_tags: Vec<String>,
}

/// Diagnostics retained from the most recent failed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub step_id: String,
    pub message: String,
    pub diagnostics: String,
    pub failed_at: DateTime<Utc>,
}

/// The durable projection of an Environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub name: String,
    pub provider: Provider,
    pub region: String,
    pub strategy: Strategy,
    pub status: LifecycleStatus,
    /// Monotonic, incremented on each successful release
    pub revision: u64,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
    /// Step records keyed by step id
    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,
    /// Step ids in original application order; destroy walks this in
    /// reverse
    #[serde(default)]
    pub applied_order: Vec<String>,
    #[serde(default)]
    pub last_failure: Option<FailureRecord>,
    pub updated_at: DateTime<Utc>,
}

impl EnvironmentRecord {
    pub fn new(name: &str, provider: Provider, region: &str, strategy: Strategy) -> Self {
        Self {
            name: name.to_string(),
            provider,
            region: region.to_string(),
            strategy,
            status: LifecycleStatus::Provisioning,
            revision: 0,
            services: Vec::new(),
            steps: BTreeMap::new(),
            applied_order: Vec::new(),
            last_failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Schema validation applied on every load. Violations are
    /// `StateCorrupt`: fatal, never auto-repaired.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DeployError::StateCorrupt(
                "environment name is empty".to_string(),
            ));
        }
        // Names double as file and directory names
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DeployError::StateCorrupt(format!(
                "environment name '{}' contains unsafe characters",
                self.name
            )));
        }
        for id in &self.applied_order {
            if !self.steps.contains_key(id) {
                return Err(DeployError::StateCorrupt(format!(
                    "applied_order references unknown step '{id}'"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if !seen.insert(&service.name) {
                return Err(DeployError::StateCorrupt(format!(
                    "duplicate service record '{}'",
                    service.name
                )));
            }
        }
        Ok(())
    }

    /// Commit a successful step execution
    pub fn record_step(&mut self, step_id: &str, record: StepRecord) {
        if !self.applied_order.iter().any(|id| id == step_id) {
            self.applied_order.push(step_id.to_string());
        }
        self.steps.insert(step_id.to_string(), record);
        self.updated_at = Utc::now();
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut ServiceRecord> {
        self.services.iter_mut().find(|s| s.name == name)
    }

    /// Flattened view of the last-known outputs of every applied step,
    /// in application order
    pub fn merged_outputs(&self) -> BTreeMap<String, serde_json::Value> {
        let mut merged = BTreeMap::new();
        for id in &self.applied_order {
            if let Some(step) = self.steps.get(id) {
                for (key, value) in &step.outputs {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }
}

/// Trait for state store backends
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Load the record for a named environment
    async fn load(&self, name: &str) -> Result<Option<EnvironmentRecord>>;

    /// Durably persist a record; must be flushed before returning
    async fn save(&self, record: &EnvironmentRecord) -> Result<()>;

    /// Remove a record (only after a complete destroy)
    async fn remove(&self, name: &str) -> Result<()>;

    /// List known environment names
    async fn list(&self) -> Result<Vec<String>>;
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryStateStore {
    records: tokio::sync::RwLock<BTreeMap<String, EnvironmentRecord>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, name: &str) -> Result<Option<EnvironmentRecord>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn save(&self, record: &EnvironmentRecord) -> Result<()> {
        record.validate()?;
        self.records
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_record() -> EnvironmentRecord {
        EnvironmentRecord::new("demo", Provider::Aws, "us-east-1", Strategy::Monolithic)
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryStateStore::new();
        let record = demo_record();
        store.save(&record).await.unwrap();

        let loaded = store.load("demo").await.unwrap().unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.status, LifecycleStatus::Provisioning);
        assert_eq!(store.list().await.unwrap(), vec!["demo"]);

        store.remove("demo").await.unwrap();
        assert!(store.load("demo").await.unwrap().is_none());
    }

    #[test]
    fn test_record_step_appends_applied_order_once() {
        let mut record = demo_record();
        let step = StepRecord {
            capability: Capability::Network,
            tool: ToolKind::Terraform,
            fingerprint: "abc".to_string(),
            outputs: BTreeMap::new(),
            applied_at: Utc::now(),
        };
        record.record_step("network", step.clone());
        record.record_step("network", step);
        assert_eq!(record.applied_order, vec!["network"]);
    }

    #[test]
    fn test_validate_rejects_unsafe_names() {
        let record =
            EnvironmentRecord::new("../escape", Provider::Aws, "us-east-1", Strategy::Monolithic);
        assert!(matches!(
            record.validate(),
            Err(DeployError::StateCorrupt(_))
        ));
    }

    #[test]
    fn test_validate_rejects_dangling_applied_order() {
        let mut record = demo_record();
        record.applied_order.push("ghost".to_string());
        assert!(matches!(
            record.validate(),
            Err(DeployError::StateCorrupt(_))
        ));
    }

    #[test]
    fn test_merged_outputs_follow_application_order() {
        let mut record = demo_record();
        let mk = |key: &str, value: &str| {
            let mut outputs = BTreeMap::new();
            outputs.insert(key.to_string(), serde_json::json!(value));
            StepRecord {
                capability: Capability::Network,
                tool: ToolKind::Terraform,
                fingerprint: String::new(),
                outputs,
                applied_at: Utc::now(),
            }
        };
        record.record_step("a", mk("shared", "first"));
        record.record_step("b", mk("shared", "second"));
        assert_eq!(record.merged_outputs()["shared"], serde_json::json!("second"));
    }
}
