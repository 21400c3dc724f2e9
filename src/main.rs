//! Binary entry point for lakesweep.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use lakesweep::cli::{self, ManifestCommand, RulesCommand, RunArgs};
use lakesweep::config::LakesweepConfig;
use lakesweep::context::RunContext;
use lakesweep::observability;
use lakesweep::storage::RemoverClients;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Lakesweep - committed-data garbage collector.
#[derive(Parser)]
#[command(name = "lakesweep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "LAKESWEEP_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Mark and/or sweep a repository.
    Run(RunArgs),

    /// Manage retention rules.
    Rules {
        /// Rules subcommand.
        #[command(subcommand)]
        action: RulesCommand,
    },

    /// Inspect stored manifests.
    Manifest {
        /// Manifest subcommand.
        #[command(subcommand)]
        action: ManifestCommand,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init_from_config(&config.observability, cli.verbose)
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    let ctx = RunContext::new();
    let handler_ctx = ctx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::warn!("Interrupted; finishing in-flight batches");
        handler_ctx.cancel();
    }) {
        tracing::warn!("Failed to install Ctrl-C handler: {e}");
    }

    match run_command(cli.command, &config, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &LakesweepConfig, ctx: &RunContext) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => {
            let clients = RemoverClients::from_settings(config.storage.clone());
            let outcome = cli::gc::execute(config, ctx, &args, &clients)
                .with_context(|| format!("{} run failed", args.mode))?;
            println!("{}", outcome.summary());
        },
        Commands::Rules { action } => cli::rules::execute(config, ctx, &action)?,
        Commands::Manifest { action } => cli::manifest::execute(config, &action)?,
    }
    Ok(())
}

/// Loads configuration: explicit file, else the default location, then env.
fn load_config(path: Option<&Path>) -> anyhow::Result<LakesweepConfig> {
    let config = match path {
        Some(path) => LakesweepConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LakesweepConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}
