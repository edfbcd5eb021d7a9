// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `beacon serve` command implementation.
//!
//! Builds the store, delivery adapters and dispatch engine, then runs the
//! channel and message request controllers until a shutdown signal arrives.

use std::path::Path;
use std::sync::Arc;

use beacon_config::BeaconConfig;
use beacon_controller::{ChannelController, MessageRequestController};
use beacon_core::error::BeaconError;
use beacon_dispatch::{DispatchEngine, ProviderSet};
use beacon_store::{MemoryStore, apply_manifests, load_manifests};
use beacon_wechat::TokenCache;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::shutdown;

/// Runs the `beacon serve` command.
pub async fn run_serve(config: BeaconConfig) -> Result<(), BeaconError> {
    init_tracing(&config.log.level);
    info!("starting beacon serve");

    let store = Arc::new(MemoryStore::new());
    if let Some(dir) = &config.store.seed_dir {
        let manifests = load_manifests(Path::new(dir))?;
        apply_manifests(store.as_ref(), manifests).await?;
    }

    let stop = shutdown::install_signal_handler();
    serve_until(config, store, stop).await?;
    info!("beacon serve shutdown complete");
    Ok(())
}

/// Runs both controllers against `store` until `stop` fires or one of them
/// fails, in which case the other is stopped too.
pub async fn serve_until(
    config: BeaconConfig,
    store: Arc<MemoryStore>,
    stop: CancellationToken,
) -> Result<(), BeaconError> {
    let tokens = Arc::new(TokenCache::new());
    let providers = ProviderSet::from_config(&config, tokens)?;
    info!(providers = ?providers, "delivery providers ready");

    let engine = Arc::new(DispatchEngine::new(Arc::clone(&store), providers));
    let channels = Arc::new(ChannelController::new(Arc::clone(&store), &config));
    let requests = Arc::new(MessageRequestController::new(store, engine, &config));

    let (channel_result, request_result) = tokio::join!(
        stop_on_error(channels.run(config.channel.workers, stop.clone()), &stop),
        stop_on_error(requests.run(config.request.workers, stop.clone()), &stop),
    );

    let errors: Vec<BeaconError> = [channel_result, request_result]
        .into_iter()
        .filter_map(Result::err)
        .collect();
    BeaconError::aggregate(errors)
}

async fn stop_on_error(
    controller: impl Future<Output = Result<(), BeaconError>>,
    stop: &CancellationToken,
) -> Result<(), BeaconError> {
    let result = controller.await;
    if let Err(e) = &result {
        error!(error = %e, "controller failed, shutting down");
        stop.cancel();
    }
    result
}

/// Initializes the tracing subscriber. `RUST_LOG` takes precedence over
/// `log.level`.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("beacon={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
