//! Command line interface for the orchestrator binary.
//!
//! Parses the flags, loads configuration, initializes tracing and hands
//! control to [`crate::orchestrator::run`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::orchestrator::config::OrchestratorConfig;
use crate::orchestrator::run;

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
pub struct Command {
    /// Path to the orchestrator configuration file.
    #[arg(long, default_value = "/etc/localisprod/config.yaml")]
    config: PathBuf,

    #[arg(long)]
    version: bool,

    #[arg(long)]
    print_debug_info: bool,
}

impl Command {
    pub fn run() -> ExitCode {
        let flags = Self::parse();

        if flags.version {
            println!("{}", binary_version());
            return ExitCode::SUCCESS;
        }

        let config = match OrchestratorConfig::load(&flags.config) {
            Ok(config) => config,
            Err(err) => {
                // The tracer may not be up yet.
                println!(
                    "Error loading config from {}: {err}",
                    flags.config.display()
                );
                return ExitCode::FAILURE;
            }
        };

        if let Err(err) = try_init_tracing(&config.log.level) {
            println!("Error initializing tracing: {err}");
            return ExitCode::FAILURE;
        }

        if flags.print_debug_info {
            println!("{}", binary_version());
            println!("FLAGS: {flags:#?}");
            println!("CONFIG: {config:#?}");
            return ExitCode::SUCCESS;
        }

        match run::run(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = %err, "orchestrator exited with an error");
                ExitCode::FAILURE
            }
        }
    }
}

fn binary_version() -> String {
    format!("localisprod-orchestrator {}", env!("CARGO_PKG_VERSION"))
}

/// `RUST_LOG` wins over the configured level when set.
fn try_init_tracing(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| err.to_string())
}
