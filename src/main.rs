//! Edge Tracker - durable, encrypted position reporting for edge devices
//!
//! This service samples fixes from a local gpsd, keeps every accepted sample
//! in a crash-safe store until the collection server acknowledges it, and
//! submits buffered samples in encrypted chunks on a fixed interval.
//!
//! ## Features
//!
//! - Time and movement filtering of incoming fixes
//! - Whole-file store rewritten atomically on every buffer change
//! - Per-field AES-256-CBC encryption with a per-sample IV
//! - Chunked submission that only discards acknowledged samples
//! - Graceful shutdown on SIGINT/SIGTERM
//!
//! ## Configuration
//!
//! Configuration is loaded from `EDGE_TRACKER_*` environment variables (see
//! [`edge_tracker::config::Config`]); `RUST_LOG` sets the log filter
//! (default: info).

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edge_tracker::buffer::SampleBuffer;
use edge_tracker::client::SubmitClient;
use edge_tracker::collector::{Collector, CollectorConfig};
use edge_tracker::config::Config;
use edge_tracker::crypto::FieldCipher;
use edge_tracker::shutdown::ShutdownFlag;
use edge_tracker::source::{GpsdSource, DEFAULT_POLL_TIMEOUT};
use edge_tracker::store::DurableStore;
use edge_tracker::submitter::{Submitter, SubmitterConfig};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Edge Tracker service...");

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                server_url = %config.server_url,
                device_name = %config.device_name,
                submission_interval_secs = config.submission_interval.as_secs(),
                collection_interval_secs = config.collection_interval.as_secs(),
                chunk_size = config.chunk_size,
                sync_always = config.sync_always,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // Load stored samples, creating the store file on first start
    let store = DurableStore::new(&config.store_path, config.sync_always);
    let buffer = match SampleBuffer::open(store).await {
        Ok(buffer) => Arc::new(buffer),
        Err(e) => {
            error!(
                error = %e,
                path = %config.store_path.display(),
                "Failed to open store file"
            );
            std::process::exit(1);
        }
    };

    // Create HTTP client with connection pooling
    let client = match SubmitClient::new(&config) {
        Ok(client) => {
            info!(server_url = %client.server_url(), "HTTP client initialized");
            client
        }
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let shutdown = ShutdownFlag::new();

    let submitter = Submitter::new(
        client,
        FieldCipher::from_secret(&config.secret),
        buffer.clone(),
        SubmitterConfig::from(&config),
        shutdown.clone(),
    );
    let submitter_handle = tokio::spawn(submitter.run());

    let collector = Collector::new(
        GpsdSource::new(&config.gpsd_addr, DEFAULT_POLL_TIMEOUT),
        buffer.clone(),
        CollectorConfig::from(&config),
        shutdown.clone(),
    );
    let collector_handle = tokio::spawn(collector.run());

    info!("Edge Tracker running. Press Ctrl+C to stop.");
    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, stopping workers...");
    shutdown.trigger();

    match collector_handle.await {
        Ok(stats) => info!(
            accepted = stats.accepted,
            reconnects = stats.reconnects,
            "Collector stopped"
        ),
        Err(e) => warn!(error = %e, "Collector task panicked"),
    }

    match submitter_handle.await {
        Ok(stats) => info!(
            acknowledged = stats.samples_acknowledged,
            "Submitter stopped"
        ),
        Err(e) => warn!(error = %e, "Submitter task panicked"),
    }

    if let Err(e) = buffer.persist().await {
        error!(error = %e, "Failed to write store file on shutdown");
    }

    info!(buffered = buffer.len().await, "Edge Tracker stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
