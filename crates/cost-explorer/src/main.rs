// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cost explorer server.
//!
//! Binary entry point. Build with `--features admin` for the administrative
//! invalidation, recompute, and reimport routes.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cost_explorer::serve::{ServeOptions, run_serve};

/// Cost and usage aggregation server.
#[derive(Parser, Debug)]
#[command(name = "server", version, about, long_about = None)]
struct Cli {
    /// Configuration file layered over the standard search path.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Start the HTTP server (the default).
    Serve {
        /// Seed synthetic usage before accepting requests.
        #[arg(long)]
        demo: bool,
    },
    /// Validate the configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cost_config::load_and_validate(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            cost_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Serve { demo: false }) {
        Commands::Serve { demo } => {
            if let Err(e) = run_serve(config, ServeOptions { demo }).await {
                eprintln!("server: {e}");
                std::process::exit(1);
            }
        }
        Commands::CheckConfig => {
            println!(
                "server: config ok (listen={}:{}, backend={:?}, base={:?}, principals={}, admin={})",
                config.server.host,
                config.server.port,
                config.storage.backend,
                config.aggregation.base_granularity,
                config.server.principals.len(),
                cfg!(feature = "admin"),
            );
        }
    }
}
