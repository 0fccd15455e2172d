//! shipwright - provision, release and tear down deployment environments

pub mod cli;
pub mod core;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod state;

// Re-export commonly used types
pub use crate::core::{
    Capability, CapabilityStep, DeploymentSpec, ParamMap, ParamValue, PipelinePlan, Provider,
    ServiceSpec, Strategy, ToolKind,
};
pub use error::{DeployError, Result};
pub use orchestrator::{ApplyOutcome, LifecycleReport, Orchestrator};
pub use pipeline::{PipelineEvent, PipelineRunner, ProcessToolRunner, RunReport, ToolRunner};
pub use registry::{TemplateRegistry, TemplateSet};
pub use state::{
    EnvironmentRecord, FileStateStore, InMemoryStateStore, LifecycleStatus, StateStore, StepRecord,
};
