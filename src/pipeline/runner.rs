//! Pipeline runner: executes a capability plan against one environment
//!
//! Walks the plan in order, rendering each step's templates, comparing
//! the content fingerprint against the environment's durable record,
//! and invoking the step's tool only when the fingerprint differs. State
//! is saved after every applied step, so a failed run resumes where it
//! halted instead of starting over.

use crate::core::params::{ParamMap, ParamValue};
use crate::core::plan::{CapabilityStep, PipelinePlan, ToolKind};
use crate::error::{DeployError, Result};
use crate::registry::{render, TemplateRegistry};
use crate::state::{EnvironmentRecord, FailureRecord, StateStore, StepRecord};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::tools::{StepOutputs, ToolRunner};

/// Attempts allowed for steps flagged transient
const MAX_TRANSIENT_ATTEMPTS: usize = 3;

/// Base backoff between transient retries
const RETRY_BACKOFF_MS: u64 = 500;

/// Events emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PipelineStarted {
        run_id: Uuid,
        environment: String,
        steps: usize,
    },
    StepStarted {
        step_id: String,
    },
    StepSkipped {
        step_id: String,
    },
    StepApplied {
        step_id: String,
    },
    StepRetrying {
        step_id: String,
        attempt: usize,
        max_attempts: usize,
    },
    StepFailed {
        step_id: String,
        error: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        environment: String,
        applied: usize,
        skipped: usize,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// What one pipeline run did
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

impl RunReport {
    /// True when every step was skipped: the run changed nothing
    pub fn unchanged(&self) -> bool {
        self.applied.is_empty()
    }
}

pub struct PipelineRunner {
    registry: TemplateRegistry,
    tools: Arc<dyn ToolRunner>,
    store: Arc<dyn StateStore>,
    /// Per-environment working directories live under here
    work_root: PathBuf,
    event_handlers: Vec<EventHandler>,
}

impl PipelineRunner {
    pub fn new(
        registry: TemplateRegistry,
        tools: Arc<dyn ToolRunner>,
        store: Arc<dyn StateStore>,
        work_root: PathBuf,
    ) -> Self {
        Self {
            registry,
            tools,
            store,
            work_root,
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    fn emit(&self, event: PipelineEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    pub fn step_work_dir(&self, environment: &str, step_id: &str) -> PathBuf {
        self.work_root.join(environment).join(step_id)
    }

    /// Run the plan against the environment record.
    ///
    /// Halts at the first failed step; everything applied before the
    /// failure stays committed in the record. Steps whose fingerprint
    /// matches the record are skipped, but their stored outputs still
    /// feed later steps.
    pub async fn run(
        &self,
        plan: &PipelinePlan,
        static_params: &ParamMap,
        record: &mut EnvironmentRecord,
    ) -> Result<RunReport> {
        plan.validate(static_params)?;

        let run_id = Uuid::new_v4();
        info!(environment = %record.name, %run_id, steps = plan.steps.len(), "pipeline run starting");
        self.emit(PipelineEvent::PipelineStarted {
            run_id,
            environment: record.name.clone(),
            steps: plan.steps.len(),
        });

        let mut running = static_params.clone();
        let mut report = RunReport::default();

        for step in &plan.steps {
            let mut effective = running.clone();
            for (key, value) in &step.overlay {
                effective.insert(key.clone(), value.clone());
            }

            // Every required key must hold an actual value by now, not
            // just a declared promise.
            for key in &step.requires {
                if !effective.contains_key(key) {
                    let err = DeployError::UnsatisfiedInput {
                        step: step.id.clone(),
                        key: key.clone(),
                    };
                    return Err(self.fail_step(record, &step.id, err).await);
                }
            }

            let set = self.registry.resolve(step.capability, record.provider)?;
            let inputs: ParamMap = step
                .requires
                .iter()
                .filter_map(|k| effective.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            let rendered = render(&set, &effective)?;
            let fingerprint = rendered.fingerprint(&inputs);

            if let Some(existing) = record.steps.get(&step.id) {
                if existing.fingerprint == fingerprint {
                    info!(step = %step.id, "fingerprint unchanged, skipping");
                    self.emit(PipelineEvent::StepSkipped {
                        step_id: step.id.clone(),
                    });
                    Self::merge_outputs(&mut running, &existing.outputs);
                    report.skipped.push(step.id.clone());
                    continue;
                }
            }

            self.emit(PipelineEvent::StepStarted {
                step_id: step.id.clone(),
            });

            let work_dir = self.step_work_dir(&record.name, &step.id);
            let outputs = match self
                .apply_with_retry(step, &rendered, &effective, &work_dir)
                .await
            {
                Ok(outputs) => outputs,
                Err(err) => {
                    return Err(self.fail_step(record, &step.id, err).await);
                }
            };

            // A step that ran but withheld a declared output is just as
            // failed as one that exited non-zero.
            for key in &step.produces {
                if !outputs.contains_key(key) {
                    let err = DeployError::UnsatisfiedInput {
                        step: step.id.clone(),
                        key: key.clone(),
                    };
                    return Err(self.fail_step(record, &step.id, err).await);
                }
            }

            Self::merge_outputs(&mut running, &outputs);
            record.record_step(
                &step.id,
                StepRecord {
                    capability: step.capability,
                    tool: step.tool,
                    fingerprint,
                    outputs,
                    applied_at: Utc::now(),
                },
            );
            record.last_failure = None;
            self.store.save(record).await?;

            self.emit(PipelineEvent::StepApplied {
                step_id: step.id.clone(),
            });
            report.applied.push(step.id.clone());
        }

        self.emit(PipelineEvent::PipelineCompleted {
            run_id,
            environment: record.name.clone(),
            applied: report.applied.len(),
            skipped: report.skipped.len(),
        });
        Ok(report)
    }

    /// Record a step failure in the environment and persist it, so the
    /// operator sees which step failed and why.
    async fn fail_step(
        &self,
        record: &mut EnvironmentRecord,
        step_id: &str,
        err: DeployError,
    ) -> DeployError {
        self.emit(PipelineEvent::StepFailed {
            step_id: step_id.to_string(),
            error: err.to_string(),
        });
        record.last_failure = Some(FailureRecord {
            step_id: step_id.to_string(),
            message: err.to_string(),
            diagnostics: failure_diagnostics(&err),
            failed_at: Utc::now(),
        });
        if let Err(save_err) = self.store.save(record).await {
            return save_err;
        }
        err
    }

    async fn apply_with_retry(
        &self,
        step: &CapabilityStep,
        rendered: &crate::registry::RenderedArtifacts,
        params: &ParamMap,
        work_dir: &std::path::Path,
    ) -> Result<StepOutputs> {
        let max_attempts = if step.transient {
            MAX_TRANSIENT_ATTEMPTS
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match self.tools.apply(step, rendered, params, work_dir).await {
                Ok(outputs) => return Ok(outputs),
                Err(err) if attempt < max_attempts => {
                    warn!(step = %step.id, attempt, %err, "transient step failed, retrying");
                    self.emit(PipelineEvent::StepRetrying {
                        step_id: step.id.clone(),
                        attempt,
                        max_attempts,
                    });
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BACKOFF_MS * attempt as u64,
                    ))
                    .await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Tear down every applied step in reverse application order.
    ///
    /// Each destroyed step is removed from the record and the record is
    /// saved, so a failure mid-destroy leaves an accurate picture of
    /// what still exists.
    pub async fn destroy(&self, record: &mut EnvironmentRecord) -> Result<()> {
        while let Some(step_id) = record.applied_order.last().cloned() {
            let Some(step) = record.steps.get(&step_id) else {
                return Err(DeployError::StateCorrupt(format!(
                    "applied step '{step_id}' has no record"
                )));
            };
            let tool = step.tool;
            let work_dir = self.step_work_dir(&record.name, &step_id);

            // Ansible steps have nothing durable to undo; a missing
            // working dir for them is not an error.
            if tool == ToolKind::Terraform || work_dir.is_dir() {
                self.tools.destroy(tool, &work_dir).await?;
            }
            info!(step = %step_id, "step destroyed");

            record.applied_order.pop();
            record.steps.remove(&step_id);
            record.updated_at = Utc::now();
            self.store.save(record).await?;
        }
        Ok(())
    }

    fn merge_outputs(running: &mut ParamMap, outputs: &BTreeMap<String, serde_json::Value>) {
        for (key, value) in outputs {
            running.insert(key.clone(), ParamValue::from_json(value));
        }
    }
}

fn failure_diagnostics(err: &DeployError) -> String {
    match err {
        DeployError::ToolFailed { stderr_tail, .. } => stderr_tail.clone(),
        other => other.to_string(),
    }
}
