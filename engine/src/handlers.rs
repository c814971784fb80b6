//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - projects: List projects, optionally following running ones
//! - show: Render a project's results
//! - step / run-all: Drive the pipeline
//! - images, autocomplete, tags: Auxiliary generation helpers
//! - export: Download a project bundle

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::HttpBackend;
use crate::config::{Config, RunAllPolicy};
use crate::dashboard::{Dashboard, Selection};
use crate::executor::ExecutionMode;
use crate::message_bus::{Event, EventType, MessageBus, NoticeLevel};
use crate::presenter::{render_view, View};
use crate::sequencer::RunOutcome;
use sdk::errors::{ClientError, ErrorExt};
use sdk::types::{ProjectStatus, ProjectSummary, StepId};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build the dashboard for one command invocation
pub fn build_dashboard(config: &Config) -> Result<Dashboard> {
    let backend = HttpBackend::from_config(config).context("Failed to create backend client")?;
    Ok(Dashboard::new(Arc::new(backend), config, MessageBus::new()))
}

/// Print a failed command with its user hint
pub fn report_error(error: &anyhow::Error) {
    eprintln!("Error: {:#}", error);
    if let Some(client) = error.downcast_ref::<ClientError>() {
        eprintln!("Hint: {}", client.user_hint());
    }
}

/// Prints pipeline events while a command runs
struct EventPrinter {
    bus: MessageBus,
    join: JoinHandle<()>,
}

impl EventPrinter {
    /// Subscribe to every event and print it to stderr.
    ///
    /// With `chunks` set, streamed step output goes to stdout as it arrives.
    async fn start(bus: &MessageBus, chunks: bool) -> Self {
        let rx = bus.subscribe(EventType::All).await;
        Self {
            bus: bus.clone(),
            join: tokio::spawn(print_events(rx, chunks)),
        }
    }

    /// Close the subscription and wait until queued events are printed
    async fn finish(self) {
        self.bus.unsubscribe(EventType::All).await;
        if let Err(e) = self.join.await {
            tracing::warn!("Event printer ended abnormally: {}", e);
        }
    }
}

async fn print_events(mut rx: mpsc::Receiver<Event>, chunks: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::StepStarted { step, .. } => eprintln!("▶ {}", step.label()),
            Event::StepChunk { chunk, .. } if chunks => {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
            Event::StepChunk { .. } => {}
            Event::StepCompleted { step, .. } => {
                if chunks {
                    println!();
                }
                eprintln!("✓ {}", step.label());
            }
            Event::StepFailed { step, error, .. } => {
                eprintln!("✗ {}: {}", step.label(), error)
            }
            Event::Progress { percent, step, .. } => match step {
                Some(step) => eprintln!("[{:>3}%] next: {}", percent, step.label()),
                None => eprintln!("[{:>3}%]", percent),
            },
            Event::ProjectMerged { project, status } => {
                eprintln!("  {} is {}", project, status)
            }
            Event::PollStopped { .. } => {}
            Event::Notice { level, message } => match level {
                NoticeLevel::Success => eprintln!("✓ {}", message),
                NoticeLevel::Info => eprintln!("  {}", message),
                NoticeLevel::Error => eprintln!("✗ {}", message),
            },
        }
    }
}

fn format_created(creation_time: f64) -> String {
    chrono::DateTime::from_timestamp(creation_time as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn print_projects(projects: &[ProjectSummary]) {
    if projects.is_empty() {
        println!("No projects yet");
        return;
    }

    println!("{:<24} {:<12} {:<17} Tags", "Name", "Status", "Created");
    for project in projects {
        println!(
            "{:<24} {:<12} {:<17} {}",
            project.project_name,
            project.status,
            format_created(project.creation_time),
            project.tags.join(", ")
        );
    }
}

/// List projects
pub async fn handle_projects(watch: bool, config: &Config, format: OutputFormat) -> Result<()> {
    let dashboard = build_dashboard(config)?;
    let (mut projects, poll) = dashboard
        .refresh_projects()
        .await
        .context("Failed to fetch projects")?;

    match poll {
        Some(poll) if watch => {
            if format == OutputFormat::Text {
                print_projects(&projects);
                println!("\nWaiting for running projects...\n");
            }
            let outcome = poll.wait().await;
            tracing::info!("List refresh ended: {}", outcome.stop);
            projects = dashboard.projects().await;
        }
        Some(poll) => poll.cancel(),
        None => {}
    }

    match format {
        OutputFormat::Text => print_projects(&projects),
        OutputFormat::Json => {
            let output = json!({
                "projects": projects,
                "count": projects.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Views of every produced step, or of `only`
async fn collect_views(dashboard: &Dashboard, only: Option<StepId>) -> Vec<(StepId, View)> {
    let Some(state) = dashboard.store().snapshot().await else {
        return Vec::new();
    };

    let mut views = Vec::new();
    for step in StepId::ALL {
        let produced = match step {
            StepId::ImageGeneration => !state.images.is_empty(),
            _ => !state.content(step).is_empty(),
        };
        let wanted = match only {
            Some(only) => only == step,
            None => produced,
        };
        if wanted {
            if let Some(view) = dashboard.view(step).await {
                views.push((step, view));
            }
        }
    }
    views
}

async fn print_project(
    dashboard: &Dashboard,
    only: Option<StepId>,
    format: OutputFormat,
) -> Result<()> {
    let state = dashboard
        .store()
        .snapshot()
        .await
        .context("No project is open")?;
    let mode = dashboard.mode().await;
    let views = collect_views(dashboard, only).await;

    match format {
        OutputFormat::Text => {
            println!("{} ({})", state.name, state.status);
            if !state.brief.is_empty() {
                println!("Brief: {}", state.brief);
            }
            if !state.tags.is_empty() {
                println!("Tags: {}", state.tags.join(", "));
            }
            println!();

            if views.is_empty() {
                println!("Nothing generated yet");
            }
            for (step, view) in &views {
                let title = step.label();
                println!("{}\n{}\n", title, "=".repeat(title.chars().count()));
                print!("{}", render_view(view));
            }
        }
        OutputFormat::Json => {
            let views: BTreeMap<&str, &View> =
                views.iter().map(|(step, view)| (step.as_str(), view)).collect();
            let output = json!({
                "project": state,
                "mode": mode,
                "views": views,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Show a project's results
pub async fn handle_show(
    name: String,
    step: Option<StepId>,
    watch: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dashboard = build_dashboard(config)?;
    let Selection { poll, .. } = dashboard
        .select_project(&name)
        .await
        .with_context(|| format!("Failed to load project '{}'", name))?;

    match poll {
        Some(poll) if watch => {
            let printer = match format {
                OutputFormat::Text => Some(EventPrinter::start(dashboard.bus(), false).await),
                OutputFormat::Json => None,
            };
            poll.wait().await;
            if let Some(printer) = printer {
                printer.finish().await;
            }
        }
        Some(poll) => poll.cancel(),
        None => {}
    }

    print_project(&dashboard, step, format).await
}

/// Run a single step
pub async fn handle_step(
    name: String,
    step: StepId,
    brief: String,
    stream: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dashboard = build_dashboard(config)?;
    let selection = dashboard
        .open_or_create(&name, &brief)
        .await
        .with_context(|| format!("Failed to open project '{}'", name))?;
    if let Some(poll) = &selection.poll {
        poll.cancel();
    }

    let printer = match format {
        OutputFormat::Text => Some(EventPrinter::start(dashboard.bus(), stream).await),
        OutputFormat::Json => None,
    };
    let result = dashboard
        .run_step(&selection.session, step, ExecutionMode::from_flag(stream))
        .await;
    if let Some(printer) = printer {
        printer.finish().await;
    }
    result.with_context(|| format!("{} failed for '{}'", step.label(), name))?;

    print_project(&dashboard, Some(step), format).await
}

/// Run every step
pub async fn handle_run_all(
    name: String,
    brief: String,
    policy: Option<RunAllPolicy>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dashboard = build_dashboard(config)?;
    let selection = dashboard
        .open_or_create(&name, &brief)
        .await
        .with_context(|| format!("Failed to open project '{}'", name))?;

    let printer = match format {
        OutputFormat::Text => Some(EventPrinter::start(dashboard.bus(), false).await),
        OutputFormat::Json => None,
    };

    let outcome = dashboard.run_all(&selection.session, policy).await;
    let failure = match outcome {
        Ok(RunOutcome::Finished(report)) => report
            .failed
            .map(|(step, error)| anyhow::anyhow!("Run halted at {}: {}", step.label(), error)),
        Ok(RunOutcome::Delegated(poll)) => {
            let polled = poll.wait().await;
            tracing::info!("Delegated run poll ended: {}", polled.stop);
            match polled.final_status {
                Some(ProjectStatus::Failed) => Some(anyhow::anyhow!("Run failed for '{}'", name)),
                _ => None,
            }
        }
        Err(e) => Some(anyhow::Error::new(e).context(format!("Run-all failed for '{}'", name))),
    };

    if let Some(printer) = printer {
        printer.finish().await;
    }

    print_project(&dashboard, None, format).await?;
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Generate more images
pub async fn handle_images(
    name: String,
    count: Option<u32>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dashboard = build_dashboard(config)?;
    let selection = dashboard
        .select_project(&name)
        .await
        .with_context(|| format!("Failed to load project '{}'", name))?;
    if let Some(poll) = &selection.poll {
        poll.cancel();
    }

    let count = count.unwrap_or(config.generation.image_count);
    let images = dashboard
        .executor()
        .generate_images(&selection.session, count)
        .await
        .context("Image generation failed")?;

    if format == OutputFormat::Text {
        println!("Generated {} image(s)\n", images.len());
    }
    print_project(&dashboard, Some(StepId::ImageGeneration), format).await
}

/// Complete a brief, printing text as it streams
pub async fn handle_autocomplete(brief: String, config: &Config, format: OutputFormat) -> Result<()> {
    let dashboard = build_dashboard(config)?;
    let streaming = format == OutputFormat::Text;

    let text = dashboard
        .executor()
        .autocomplete(&brief, |chunk| {
            if streaming {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
        })
        .await
        .context("Autocomplete failed")?;

    match format {
        OutputFormat::Text => println!(),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "text": text }))?);
        }
    }
    Ok(())
}

/// Suggest tags, optionally storing them on a project
pub async fn handle_tags(
    brief: String,
    project: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dashboard = build_dashboard(config)?;

    let tags = match project {
        Some(name) => {
            let selection = dashboard
                .select_project(&name)
                .await
                .with_context(|| format!("Failed to load project '{}'", name))?;
            if let Some(poll) = &selection.poll {
                poll.cancel();
            }
            if !brief.is_empty() {
                dashboard.store().set_brief(&selection.session, &brief).await?;
            }
            dashboard.executor().generate_tags(&selection.session).await
        }
        None => dashboard.executor().suggest_tags(&brief).await,
    }
    .context("Tag generation failed")?;

    match format {
        OutputFormat::Text => {
            for tag in &tags {
                println!("#{}", tag);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ "tags": tags }))?);
        }
    }
    Ok(())
}

/// Download an export bundle
pub async fn handle_export(
    name: String,
    output: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dashboard = build_dashboard(config)?;
    let bytes = dashboard
        .backend()
        .export(&name)
        .await
        .with_context(|| format!("Failed to export '{}'", name))?;

    let path = output.unwrap_or_else(|| config.core.export_dir.join(format!("{}.zip", name)));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    match format {
        OutputFormat::Text => println!("Exported '{}' to {} ({} bytes)", name, path.display(), bytes.len()),
        OutputFormat::Json => {
            let output = json!({
                "project": name,
                "path": path,
                "bytes": bytes.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_created() {
        assert_eq!(format_created(0.0), "1970-01-01 00:00");
        assert_eq!(format_created(1_700_000_000.5), "2023-11-14 22:13");
    }

    #[test]
    fn test_report_error_finds_client_error() {
        let error = anyhow::Error::new(ClientError::Timeout).context("Step failed");
        assert!(error.downcast_ref::<ClientError>().is_some());
    }

    #[tokio::test]
    async fn test_event_printer_finishes_once_queue_is_drained() {
        let bus = MessageBus::new();
        let printer = EventPrinter::start(&bus, false).await;
        for step in StepId::ALL {
            bus.publish(Event::StepCompleted {
                project: "bag".to_string(),
                step,
            })
            .await;
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), printer.finish())
            .await
            .expect("printer stops after the subscription closes");
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
