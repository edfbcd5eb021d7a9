// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Beacon - a notification controller.
//!
//! This is the binary entry point: `beacon serve` runs the controllers,
//! `beacon check-config` validates configuration without starting anything.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod shutdown;

use std::path::{Path, PathBuf};

use beacon_config::BeaconConfig;
use clap::{Parser, Subcommand};

/// Beacon - a notification controller.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the channel and message request controllers.
    Serve {
        /// Config file to load instead of the standard search path.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration and print the effective settings.
    CheckConfig {
        /// Config file to load instead of the standard search path.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { config }) => {
            let config = load_config(config.as_deref());
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::CheckConfig { config }) => {
            let config = load_config(config.as_deref());
            print!("{}", summary(&config));
        }
        None => {
            println!("beacon: use --help for available commands");
        }
    }
}

/// Loads and validates configuration, exiting with rendered diagnostics on
/// failure.
fn load_config(path: Option<&Path>) -> BeaconConfig {
    let loaded = match path {
        Some(path) => beacon_config::load_and_validate_path(path),
        None => beacon_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            beacon_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

fn summary(config: &BeaconConfig) -> String {
    let forward = config.delivery.forward_url.as_deref().unwrap_or("(disabled)");
    let seed = config.store.seed_dir.as_deref().unwrap_or("(none)");
    format!(
        "config ok\n\
         log.level = {}\n\
         controller.resync = {}s\n\
         channel.workers = {}, grace period = {}s, finalizer = {}\n\
         request.workers = {}, status retries = {}, max requeues = {}\n\
         delivery.forward_url = {forward}\n\
         sms.endpoint = {}\n\
         wechat.endpoint = {}\n\
         store.seed_dir = {seed}\n",
        config.log.level,
        config.controller.resync_secs,
        config.channel.workers,
        config.channel.grace_period_secs,
        config.channel.finalizer,
        config.request.workers,
        config.request.status_retry_attempts,
        config.request.max_requeues,
        config.sms.endpoint,
        config.wechat.endpoint,
    )
}
