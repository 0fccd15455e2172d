//! Capability pipeline execution

pub mod runner;
pub mod tools;

pub use runner::{EventHandler, PipelineEvent, PipelineRunner, RunReport};
pub use tools::{ProcessToolRunner, StepOutputs, ToolRunner};
