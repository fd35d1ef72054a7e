//! Headless CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use nexus::config::{load_default_settings, load_settings};
use nexus::runtime::NexusRuntime;
use nexus::scheduler::validate_cron;

#[derive(Parser)]
#[command(name = "nexus", about = "Multi-tenant runtime for LLM-driven agents", version)]
struct Cli {
    /// Path to nexus.toml (defaults to NEXUS_CONFIG or ./nexus.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway, scheduler and approval sweeper (default).
    Serve,
    /// Validate a 5-field cron expression and print upcoming fire times.
    ValidateCron {
        expression: String,
        /// How many fire times to preview.
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = match cli.config.as_deref() {
        Some(path) => load_settings(path),
        None => load_default_settings(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::ValidateCron { expression, count } => match validate_cron(&expression, count) {
            Ok(times) => {
                for t in times {
                    println!("{t}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Command::Serve => {
            let runtime_result = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build();
            let tokio_rt = match runtime_result {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("failed to start async runtime: {e}");
                    return ExitCode::FAILURE;
                }
            };

            tokio_rt.block_on(async move {
                let runtime = match NexusRuntime::build(settings) {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        eprintln!("failed to initialise runtime: {e}");
                        return ExitCode::FAILURE;
                    }
                };
                runtime.start_background();

                tokio::select! {
                    result = nexus::gateway::serve(std::sync::Arc::clone(&runtime)) => {
                        if let Err(e) = result {
                            eprintln!("gateway failed: {e}");
                            runtime.shutdown();
                            return ExitCode::FAILURE;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutting down");
                    }
                }
                runtime.shutdown();
                ExitCode::SUCCESS
            })
        }
    }
}
