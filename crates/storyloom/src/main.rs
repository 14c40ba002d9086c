// SPDX-FileCopyrightText: 2026 Storyloom Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storyloom - retrieval and memory-quality backend for AI-assisted
//! fiction writing.
//!
//! This is the binary entry point for the Storyloom service.

mod doctor;
mod search;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::{Parser, Subcommand};
use storyloom_config::StoryloomConfig;
use tracing_subscriber::EnvFilter;

/// Storyloom - retrieval and memory-quality backend.
#[derive(Parser, Debug)]
#[command(name = "storyloom", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a retrieval formula and print ranked results.
    Search {
        /// Formula expression: JSON or line-oriented shorthand.
        formula: String,
        /// Supplemental query overriding the formula's own.
        #[arg(long)]
        query: Option<String>,
    },
    /// Run diagnostic checks against the Storyloom environment.
    Doctor,
    /// Print the resolved configuration.
    Config,
}

/// Initialize tracing from the configured log level. `RUST_LOG` wins
/// when set.
fn init_tracing(config: &StoryloomConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.agent.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match storyloom_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            storyloom_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let outcome = match cli.command {
        Some(Commands::Search { formula, query }) => {
            search::run_search(&config, &formula, query.as_deref()).await
        }
        Some(Commands::Doctor) => doctor::run_doctor(&config).await,
        Some(Commands::Config) => match toml::to_string_pretty(&config) {
            Ok(rendered) => {
                println!("{rendered}");
                Ok(())
            }
            Err(e) => Err(storyloom_core::StoryloomError::Internal(format!(
                "failed to render configuration: {e}"
            ))),
        },
        None => {
            println!("storyloom: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("storyloom: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Verify jemalloc is the global allocator by advancing the epoch.
        // Only jemalloc supports this -- the system allocator would fail.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = storyloom_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.agent.name, "storyloom");
    }
}
