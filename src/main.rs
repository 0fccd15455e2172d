use anyhow::{Context, Result};
use indicatif::ProgressBar;
use shipwright::cli::commands::{
    CreateCommand, DeleteCommand, ListCommand, ReleaseCommand, RunCommand, StatusCommand,
};
use shipwright::cli::output::*;
use shipwright::cli::{Cli, Command};
use shipwright::invoker::DEFAULT_TIMEOUT_SECS;
use shipwright::{
    ApplyOutcome, DeploymentSpec, FileStateStore, Orchestrator, PipelineEvent, ProcessToolRunner,
    StateStore, TemplateRegistry, ToolRunner,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Create(cmd) => create_environment(cmd, &cli).await?,
        Command::Release(cmd) => release_environment(cmd, &cli).await?,
        Command::Run(cmd) => run_command(cmd, &cli).await?,
        Command::Delete(cmd) => delete_environment(cmd, &cli).await?,
        Command::Status(cmd) => show_status(cmd, &cli).await?,
        Command::List(cmd) => list_environments(cmd, &cli).await?,
    }

    Ok(())
}

fn state_store(cli: &Cli) -> Arc<dyn StateStore> {
    match &cli.state_dir {
        Some(dir) => Arc::new(FileStateStore::new(dir)),
        None => Arc::new(FileStateStore::with_default_path()),
    }
}

/// Build the orchestrator with a console progress handler attached
fn orchestrator(cli: &Cli, timeout_secs: Option<u64>) -> Orchestrator {
    let registry = TemplateRegistry::new(&cli.templates);
    let tools: Arc<dyn ToolRunner> = Arc::new(ProcessToolRunner::new(
        timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    ));
    let mut orchestrator = Orchestrator::new(
        registry,
        tools,
        state_store(cli),
        PathBuf::from(&cli.work_dir),
    );

    let bar: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    orchestrator.add_event_handler(move |event| {
        let mut bar = bar.lock().expect("progress bar lock");
        let line = format_pipeline_event(&event);
        match &event {
            PipelineEvent::PipelineStarted { steps, .. } => {
                let progress = create_progress_bar(*steps);
                progress.println(line);
                *bar = Some(progress);
            }
            PipelineEvent::StepApplied { .. } | PipelineEvent::StepSkipped { .. } => {
                if let Some(progress) = bar.as_ref() {
                    progress.println(line);
                    progress.inc(1);
                }
            }
            PipelineEvent::PipelineCompleted { .. } => {
                if let Some(progress) = bar.take() {
                    progress.finish_and_clear();
                }
                println!("{line}");
            }
            _ => match bar.as_ref() {
                Some(progress) => progress.println(line),
                None => println!("{line}"),
            },
        }
    });

    orchestrator
}

async fn create_environment(cmd: &CreateCommand, cli: &Cli) -> Result<()> {
    let spec =
        DeploymentSpec::from_file(&cmd.file).context("Failed to load deployment spec")?;
    println!("{} Loaded spec: {}", INFO, style(&spec.app_name).bold());

    let orchestrator = orchestrator(cli, spec.step_timeout_secs);
    match orchestrator.create(&spec, &cmd.env).await {
        Ok(report) => {
            println!(
                "\n{} {} is {} (revision {})",
                CHECK,
                style(&cmd.env).bold(),
                style("active").green(),
                style(report.revision).cyan()
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} create {} {}: {}",
                CROSS,
                style(&cmd.env).bold(),
                style("failed").red(),
                e
            );
            std::process::exit(1);
        }
    }
}

async fn release_environment(cmd: &ReleaseCommand, cli: &Cli) -> Result<()> {
    let spec =
        DeploymentSpec::from_file(&cmd.file).context("Failed to load deployment spec")?;

    let versions: BTreeMap<String, String> = cmd.version.iter().cloned().collect();
    for (service, tag) in &versions {
        println!(
            "{} {} → {}",
            INFO,
            style(service).cyan(),
            style(tag).bold()
        );
    }

    let orchestrator = orchestrator(cli, spec.step_timeout_secs);
    match orchestrator.release(&spec, &cmd.env, &versions).await {
        Ok(report) => {
            match report.outcome {
                ApplyOutcome::Unchanged => println!(
                    "\n{} {} unchanged (revision {})",
                    INFO,
                    style(&cmd.env).bold(),
                    report.revision
                ),
                ApplyOutcome::Changed => println!(
                    "\n{} {} released {} (revision {})",
                    CHECK,
                    style(&cmd.env).bold(),
                    style("successfully").green(),
                    style(report.revision).cyan()
                ),
            }
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} release to {} {}: {}",
                CROSS,
                style(&cmd.env).bold(),
                style("failed").red(),
                e
            );
            std::process::exit(1);
        }
    }
}

async fn run_command(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let orchestrator = orchestrator(cli, None);
    match orchestrator
        .run_command(&cmd.env, &cmd.service, &cmd.command)
        .await
    {
        Ok(output) => {
            println!("{}", format_output(&output, 50));
            Ok(())
        }
        Err(e) => {
            println!("{} command failed: {}", CROSS, style(&e).red());
            std::process::exit(1);
        }
    }
}

async fn delete_environment(cmd: &DeleteCommand, cli: &Cli) -> Result<()> {
    let orchestrator = orchestrator(cli, None);
    println!("{} Deleting {}...", TRASH, style(&cmd.env).bold());
    match orchestrator.delete(&cmd.env).await {
        Ok(()) => {
            println!("{} {} deleted", CHECK, style(&cmd.env).bold());
            Ok(())
        }
        Err(e) => {
            println!(
                "{} delete {} {}: {} (state retained, re-run to resume)",
                CROSS,
                style(&cmd.env).bold(),
                style("failed").red(),
                e
            );
            std::process::exit(1);
        }
    }
}

async fn show_status(cmd: &StatusCommand, cli: &Cli) -> Result<()> {
    let orchestrator = orchestrator(cli, None);
    let record = orchestrator.status(&cmd.env).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", format_environment(&record));
    }
    Ok(())
}

async fn list_environments(cmd: &ListCommand, cli: &Cli) -> Result<()> {
    let orchestrator = orchestrator(cli, None);
    let names = orchestrator.list().await?;

    if cmd.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "environments": names }))?
        );
        return Ok(());
    }

    if names.is_empty() {
        println!("{} No environments found", INFO);
        return Ok(());
    }

    println!("{} Known environments:", INFO);
    for name in &names {
        println!("  {}", style(name).bold());
    }
    Ok(())
}
