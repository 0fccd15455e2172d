//! Core domain model: providers, specs, parameters and pipeline plans

pub mod params;
pub mod plan;
pub mod provider;
pub mod spec;

pub use params::{ParamKind, ParamMap, ParamSchema, ParamSpec, ParamValue};
pub use plan::{CapabilityStep, PipelinePlan, ToolKind};
pub use provider::{Capability, Provider, Strategy};
pub use spec::{DeploymentSpec, ServiceSpec};
