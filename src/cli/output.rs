//! CLI output formatting

use crate::pipeline::PipelineEvent;
use crate::state::{EnvironmentRecord, LifecycleStatus};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static TRASH: Emoji<'_, '_> = Emoji("🗑️  ", "x ");

/// Create a progress bar over the pipeline's steps
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a lifecycle status for display
pub fn format_status(status: LifecycleStatus) -> String {
    match status {
        LifecycleStatus::Provisioning => style("PROVISIONING").yellow().to_string(),
        LifecycleStatus::Active => style("ACTIVE").green().to_string(),
        LifecycleStatus::Releasing => style("RELEASING").yellow().to_string(),
        LifecycleStatus::Deleting => style("DELETING").yellow().to_string(),
        LifecycleStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a pipeline event for display
pub fn format_pipeline_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::PipelineStarted {
            run_id,
            environment,
            steps,
        } => format!(
            "{} {} ({}) - {} steps",
            ROCKET,
            style(environment).bold(),
            style(&run_id.to_string()[..8]).dim(),
            style(steps).cyan()
        ),
        PipelineEvent::StepStarted { step_id } => {
            format!("{} {}", SPINNER, style(step_id).cyan())
        }
        PipelineEvent::StepSkipped { step_id } => {
            format!("{} {} {}", CHECK, style(step_id).dim(), style("(unchanged)").dim())
        }
        PipelineEvent::StepApplied { step_id } => {
            format!("{} {}", CHECK, style(step_id).green())
        }
        PipelineEvent::StepRetrying {
            step_id,
            attempt,
            max_attempts,
        } => format!(
            "{} {} (attempt {}/{})",
            WARN,
            style(step_id).yellow(),
            attempt,
            max_attempts
        ),
        PipelineEvent::StepFailed { step_id, error } => {
            format!("{} {}: {}", CROSS, style(step_id).red(), style(error).dim())
        }
        PipelineEvent::PipelineCompleted {
            environment,
            applied,
            skipped,
            ..
        } => format!(
            "{} {} done ({} applied, {} skipped)",
            INFO,
            style(environment).bold(),
            style(applied).green(),
            style(skipped).dim()
        ),
    }
}

/// Format an environment record for human-readable status output
pub fn format_environment(record: &EnvironmentRecord) -> String {
    let mut lines = vec![
        format!(
            "{} - {} - revision {}",
            style(&record.name).bold(),
            format_status(record.status),
            style(record.revision).cyan()
        ),
        format!(
            "  {:?} / {:?} / {}",
            record.provider, record.strategy, record.region
        ),
    ];

    for service in &record.services {
        lines.push(format!(
            "  {} @ {}",
            style(&service.name).cyan(),
            style(&service.image_tag).bold()
        ));
    }

    if !record.applied_order.is_empty() {
        lines.push(format!(
            "  steps: {}",
            record.applied_order.join(" → ")
        ));
    }

    if let Some(failure) = &record.last_failure {
        lines.push(format!(
            "  {} last failure in {}: {}",
            CROSS,
            style(&failure.step_id).red(),
            failure.message
        ));
    }

    lines.join("\n")
}

/// Format tool output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
