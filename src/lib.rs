//! Edge Tracker Library
//!
//! This library provides components for durable, encrypted position tracking:
//!
//! - **config**: Environment-based configuration for the tracker
//! - **sample**: Samples, gpsd reports and the scalar format rules
//! - **store**: Whole-file JSON store mirroring the buffer on disk
//! - **buffer**: Lock-protected sample buffer shared by both workers
//! - **crypto**: Per-field AES-256-CBC encryption of outgoing samples
//! - **source**: gpsd connection used by the collector
//! - **collector**: Worker filtering fixes into the buffer
//! - **client**: HTTP client for the collection server
//! - **submitter**: Worker shipping buffered samples in chunks
//! - **shutdown**: Cooperative exit flag
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use edge_tracker::buffer::SampleBuffer;
//! use edge_tracker::client::SubmitClient;
//! use edge_tracker::collector::{Collector, CollectorConfig};
//! use edge_tracker::config::Config;
//! use edge_tracker::crypto::FieldCipher;
//! use edge_tracker::shutdown::ShutdownFlag;
//! use edge_tracker::source::{GpsdSource, DEFAULT_POLL_TIMEOUT};
//! use edge_tracker::store::DurableStore;
//! use edge_tracker::submitter::{Submitter, SubmitterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let store = DurableStore::new(&config.store_path, config.sync_always);
//!     let buffer = Arc::new(SampleBuffer::open(store).await.expect("Failed to load store"));
//!     let shutdown = ShutdownFlag::new();
//!
//!     let collector = Collector::new(
//!         GpsdSource::new(&config.gpsd_addr, DEFAULT_POLL_TIMEOUT),
//!         buffer.clone(),
//!         CollectorConfig::from(&config),
//!         shutdown.clone(),
//!     );
//!     let submitter = Submitter::new(
//!         SubmitClient::new(&config).expect("Failed to create client"),
//!         FieldCipher::from_secret(&config.secret),
//!         buffer,
//!         SubmitterConfig::from(&config),
//!         shutdown,
//!     );
//!
//!     tokio::join!(collector.run(), submitter.run());
//! }
//! ```

// Module declarations
pub mod buffer;
pub mod client;
pub mod collector;
pub mod config;
pub mod crypto;
pub mod sample;
pub mod shutdown;
pub mod source;
pub mod store;
pub mod submitter;

// Re-export commonly used types at crate root for convenience
pub use buffer::{SampleBuffer, SampleQueue};
pub use client::{ClientError, ResultCode, SubmitClient, SubmitEndpoint};
pub use collector::{Collector, CollectorConfig, CollectorStats};
pub use config::{Config, ConfigError};
pub use crypto::{EncryptedSample, FieldCipher};
pub use sample::{Fix, Sample};
pub use shutdown::ShutdownFlag;
pub use source::{FixSource, GpsdSource, SourceError};
pub use store::{DurableStore, StoreError};
pub use submitter::{SubmissionOutcome, Submitter, SubmitterConfig, SubmitterStats};
