//! CLI interface for DesignCore
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the design pipeline.

use crate::config::RunAllPolicy;
use clap::{Parser, Subcommand};
use sdk::types::StepId;
use std::path::PathBuf;

/// DesignCore pipeline client
///
/// Runs the market analysis → visual research → design proposal → image
/// generation → full report pipeline against a DesignCore backend and renders
/// the results in the terminal.
#[derive(Parser, Debug)]
#[command(name = "designcore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List projects, newest first
    Projects {
        /// Keep refreshing while any project is running
        #[arg(long)]
        watch: bool,
    },

    /// Show a project's results
    Show {
        /// Project name
        name: String,

        /// Only show this step
        #[arg(long, value_parser = parse_step)]
        step: Option<StepId>,

        /// Follow a running project until it finishes
        #[arg(long)]
        watch: bool,
    },

    /// Run a single pipeline step
    Step {
        /// Project name (created on first use)
        name: String,

        /// Step to run
        #[arg(value_parser = parse_step)]
        step: StepId,

        /// Project brief
        #[arg(long, default_value = "")]
        brief: String,

        /// Print output as it streams in
        #[arg(long)]
        stream: bool,
    },

    /// Run every pipeline step
    RunAll {
        /// Project name (created on first use)
        name: String,

        /// Project brief
        #[arg(long, default_value = "")]
        brief: String,

        /// Override the configured run-all policy
        #[arg(long, value_enum)]
        policy: Option<RunAllPolicy>,
    },

    /// Generate more images for a project
    Images {
        /// Project name
        name: String,

        /// Number of images (defaults to the configured image_count)
        #[arg(short, long)]
        count: Option<u32>,
    },

    /// Complete a brief
    Autocomplete {
        /// Beginning of the brief
        #[arg(long)]
        brief: String,
    },

    /// Suggest tags for a brief
    Tags {
        /// Brief to tag
        #[arg(long)]
        brief: String,

        /// Replace this project's tags with the suggestion
        #[arg(long, value_name = "NAME")]
        project: Option<String>,
    },

    /// Download a project's export bundle
    Export {
        /// Project name
        name: String,

        /// Output file (defaults to <export_dir>/<name>.zip)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn parse_step(value: &str) -> Result<StepId, String> {
    value.parse()
}
