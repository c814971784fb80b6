// DesignCore client
// Main entry point for the designcore binary

use clap::Parser;
use designcore_engine::cli::{Cli, Command};
use designcore_engine::config::Config;
use designcore_engine::handlers::{
    handle_autocomplete, handle_export, handle_images, handle_projects, handle_run_all,
    handle_show, handle_step, handle_tags, report_error, OutputFormat,
};
use designcore_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            init_telemetry_with_level(&config.core.log_level);
            config
        }
        Err(e) => {
            init_telemetry();
            report_error(&anyhow::Error::new(e));
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        "DesignCore client v{} against {}",
        env!("CARGO_PKG_VERSION"),
        config.backend.base_url
    );

    // Handle commands
    let result = match cli.command {
        Command::Projects { watch } => handle_projects(watch, &config, format).await,

        Command::Show { name, step, watch } => {
            tracing::info!("Showing project: {}", name);
            handle_show(name, step, watch, &config, format).await
        }

        Command::Step {
            name,
            step,
            brief,
            stream,
        } => {
            tracing::info!("Running {} for {}", step, name);
            handle_step(name, step, brief, stream, &config, format).await
        }

        Command::RunAll {
            name,
            brief,
            policy,
        } => {
            tracing::info!("Running all steps for {}", name);
            handle_run_all(name, brief, policy, &config, format).await
        }

        Command::Images { name, count } => handle_images(name, count, &config, format).await,

        Command::Autocomplete { brief } => handle_autocomplete(brief, &config, format).await,

        Command::Tags { brief, project } => handle_tags(brief, project, &config, format).await,

        Command::Export { name, output } => {
            tracing::info!("Exporting project: {}", name);
            handle_export(name, output, &config, format).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}
