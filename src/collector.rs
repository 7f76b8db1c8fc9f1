//! Collector worker: turns the gpsd report stream into buffered samples.
//!
//! The worker cycles between connecting to the source and streaming from it.
//! While streaming, each report is unpacked, filtered by time and movement
//! against the last accepted fix, and appended to the shared buffer. Too many
//! consecutive unpack failures force a reconnect. The exit flag is checked
//! before every read and again before a message that was read is processed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::buffer::SampleBuffer;
use crate::config::Config;
use crate::sample::{Fix, Report, Sample};
use crate::shutdown::ShutdownFlag;
use crate::source::FixSource;

/// Pause after a failed or dropped source connection.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Configuration for the collector worker.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Minimum seconds between two accepted fixes
    pub collection_interval_secs: i64,

    /// Latitude change that counts as movement
    pub lat_change: f64,

    /// Longitude change that counts as movement
    pub lon_change: f64,

    /// Altitude change that counts as movement
    pub alt_change: f64,

    /// Consecutive unpack failures that force a reconnect
    pub max_failed_fixes: u32,

    /// Pause between source reads
    pub poll_sleep: Duration,

    /// Pause before reconnecting after a connection failure
    pub reconnect_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CollectorConfig {
    fn from(config: &Config) -> Self {
        Self {
            collection_interval_secs: i64::try_from(config.collection_interval.as_secs())
                .unwrap_or(i64::MAX),
            lat_change: config.lat_change,
            lon_change: config.lon_change,
            alt_change: config.alt_change,
            max_failed_fixes: config.max_failed_fixes,
            poll_sleep: config.collect_sleep,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Counters kept by the collector over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Successful connections to the source
    pub connections: u64,

    /// Reconnects forced by unpack failures or dropped connections
    pub reconnects: u64,

    /// Lines that could not be unpacked
    pub unpack_failures: u64,

    /// Complete fixes seen
    pub fixes_seen: u64,

    /// Fixes rejected by the collection interval
    pub rejected_too_soon: u64,

    /// Fixes rejected because the position did not change
    pub rejected_stationary: u64,

    /// Fixes whose rendered scalars failed validation
    pub rejected_invalid: u64,

    /// Samples appended to the buffer
    pub accepted: u64,

    /// Store writes that failed after an append
    pub persist_failures: u64,
}

/// Outcome of running a fix through the filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixDecision {
    /// The fix should be stored
    Accept,

    /// Less than the collection interval since the last accepted fix
    TooSoon,

    /// Position is within tolerance of the last accepted fix
    Stationary,
}

#[derive(Debug, Clone, Copy)]
struct LastAccepted {
    utctime: i64,
    lat: f64,
    lon: f64,
    alt: f64,
}

/// Time and movement filter relative to the last accepted fix.
#[derive(Debug, Clone)]
pub struct FixFilter {
    collection_interval_secs: i64,
    lat_change: f64,
    lon_change: f64,
    alt_change: f64,
    last: Option<LastAccepted>,
}

impl FixFilter {
    /// Create a filter with no accepted fix yet.
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            collection_interval_secs: config.collection_interval_secs,
            lat_change: config.lat_change,
            lon_change: config.lon_change,
            alt_change: config.alt_change,
            last: None,
        }
    }

    /// Decide whether `fix` should be stored.
    pub fn evaluate(&self, fix: &Fix) -> FixDecision {
        let Some(last) = self.last else {
            return FixDecision::Accept;
        };

        if fix.utctime.saturating_sub(last.utctime) < self.collection_interval_secs {
            return FixDecision::TooSoon;
        }

        let unchanged = (fix.lat - last.lat).abs() <= self.lat_change
            && (fix.lon - last.lon).abs() <= self.lon_change
            && (fix.alt - last.alt).abs() <= self.alt_change;
        if unchanged {
            return FixDecision::Stationary;
        }

        FixDecision::Accept
    }

    /// Remember `sample` as the last accepted position, at stored precision.
    pub fn record(&mut self, fix: &Fix, sample: &Sample) {
        self.last = Some(LastAccepted {
            utctime: sample.utctime,
            lat: sample.lat.parse().unwrap_or(fix.lat),
            lon: sample.lon.parse().unwrap_or(fix.lon),
            alt: sample.alt.parse().unwrap_or(fix.alt),
        });
    }
}

enum StreamEnd {
    Exit,
    Reconnect,
}

/// Collector worker.
pub struct Collector<S> {
    source: S,
    buffer: Arc<SampleBuffer>,
    config: CollectorConfig,
    filter: FixFilter,
    shutdown: ShutdownFlag,
    stats: CollectorStats,
}

impl<S: FixSource> Collector<S> {
    /// Create a collector appending to `buffer`.
    pub fn new(
        source: S,
        buffer: Arc<SampleBuffer>,
        config: CollectorConfig,
        shutdown: ShutdownFlag,
    ) -> Self {
        let filter = FixFilter::new(&config);
        Self {
            source,
            buffer,
            config,
            filter,
            shutdown,
            stats: CollectorStats::default(),
        }
    }

    /// Run until the exit flag is raised, returning the final counters.
    pub async fn run(mut self) -> CollectorStats {
        info!(
            interval_secs = self.config.collection_interval_secs,
            "Starting collector"
        );

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            info!("Connecting to positioning source");
            if let Err(e) = self.source.connect().await {
                warn!(error = %e, "Failed to establish connection to positioning source");
                sleep(self.config.reconnect_delay).await;
                continue;
            }
            self.stats.connections += 1;

            match self.stream().await {
                StreamEnd::Exit => break,
                StreamEnd::Reconnect => {
                    self.stats.reconnects += 1;
                    self.source.close().await;
                }
            }
        }

        self.source.close().await;
        info!(
            accepted = self.stats.accepted,
            reconnects = self.stats.reconnects,
            "Exiting collector"
        );
        self.stats
    }

    async fn stream(&mut self) -> StreamEnd {
        let mut failed: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                return StreamEnd::Exit;
            }

            if failed >= self.config.max_failed_fixes {
                error!(
                    failures = failed,
                    "Failed too many times to collect gps data, resetting connection"
                );
                return StreamEnd::Reconnect;
            }

            let message = self.source.next_message().await;
            if self.shutdown.is_triggered() {
                return StreamEnd::Exit;
            }

            match message {
                Ok(Some(line)) => match Report::parse(&line) {
                    Ok(report) => {
                        failed = 0;
                        self.handle_report(&report).await;
                    }
                    Err(e) => {
                        failed += 1;
                        self.stats.unpack_failures += 1;
                        warn!(error = %e, consecutive = failed, "Unpacking gps data failed");
                        continue;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Lost connection to positioning source");
                    sleep(self.config.reconnect_delay).await;
                    return StreamEnd::Reconnect;
                }
            }

            sleep(self.config.poll_sleep).await;
        }
    }

    async fn handle_report(&mut self, report: &Report) {
        let Some(fix) = report.fix() else {
            debug!(class = ?report.class(), "Report carries no complete fix");
            return;
        };
        self.stats.fixes_seen += 1;

        match self.filter.evaluate(&fix) {
            FixDecision::Accept => {}
            FixDecision::TooSoon => {
                self.stats.rejected_too_soon += 1;
                debug!(utctime = fix.utctime, "Collection interval not reached");
                return;
            }
            FixDecision::Stationary => {
                self.stats.rejected_stationary += 1;
                debug!(utctime = fix.utctime, "Position has not changed");
                return;
            }
        }

        let sample = match Sample::from_fix(&fix) {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.rejected_invalid += 1;
                warn!(
                    error = %e,
                    lat = fix.lat,
                    lon = fix.lon,
                    "Skipping fix: negative coordinates (southern or western hemisphere) cannot be stored"
                );
                return;
            }
        };

        debug!(
            lat = %sample.lat,
            lon = %sample.lon,
            alt = %sample.alt,
            speed = %sample.speed,
            utctime = sample.utctime,
            "Accepted position"
        );

        match self.buffer.push(sample.clone()).await {
            Ok(buffered) => debug!(buffered, "Buffered sample"),
            Err(e) => {
                self.stats.persist_failures += 1;
                error!(
                    error = %e,
                    path = %self.buffer.store().path().display(),
                    "Can not write into store file"
                );
            }
        }
        self.stats.accepted += 1;
        self.filter.record(&fix, &sample);
    }
}
