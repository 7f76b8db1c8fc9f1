//! Submitter worker: ships buffered samples to the collection server.
//!
//! Every submission interval the worker drains the shared buffer in chunks.
//! Each chunk is snapshotted under the buffer lock, encrypted, and posted.
//! Only an acknowledged chunk is removed from the buffer; any failure ends
//! the round and leaves the remaining samples for the next interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::buffer::SampleBuffer;
use crate::client::{ClientError, ResultCode, SubmitEndpoint};
use crate::config::Config;
use crate::crypto::{EncryptedSample, FieldCipher};
use crate::sample::Sample;
use crate::shutdown::ShutdownFlag;

/// Length of one idle tick.
const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Configuration for the submitter worker.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Idle ticks between submission rounds
    pub submission_interval_ticks: u64,

    /// Length of one idle tick; the exit flag is checked once per tick
    pub tick: Duration,

    /// Maximum number of samples per request
    pub chunk_size: usize,

    /// Device name sent in clear with every sample
    pub device_name: String,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SubmitterConfig {
    fn from(config: &Config) -> Self {
        Self {
            submission_interval_ticks: config.submission_interval.as_secs(),
            tick: DEFAULT_TICK,
            chunk_size: config.chunk_size.max(1),
            device_name: config.device_name.clone(),
        }
    }
}

/// Counters kept by the submitter over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitterStats {
    /// Submission rounds that found samples to send
    pub rounds: u64,

    /// Chunks acknowledged by the server
    pub chunks_acknowledged: u64,

    /// Samples removed after acknowledgement
    pub samples_acknowledged: u64,

    /// Samples dropped from a request by the encryption length guard
    pub samples_dropped: u64,

    /// Rounds aborted by transport errors
    pub transport_failures: u64,

    /// Rounds aborted by server-reported errors
    pub server_rejections: u64,

    /// Store writes that failed after a removal
    pub persist_failures: u64,
}

/// Why a submission round stopped early.
#[derive(Debug)]
pub enum AbortReason {
    /// Network failure, non-200 status, or undecodable response
    Transport(ClientError),

    /// The server answered with an error code
    Rejected(ResultCode),
}

/// Result of one submission round.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// Nothing was buffered; the server was not contacted
    Idle,

    /// Every planned chunk was acknowledged
    Completed { chunks: usize, acknowledged: usize },

    /// A chunk failed; earlier chunks stay acknowledged
    Aborted {
        chunks: usize,
        acknowledged: usize,
        reason: AbortReason,
    },
}

/// Submitter worker.
pub struct Submitter<E> {
    endpoint: E,
    cipher: FieldCipher,
    buffer: Arc<SampleBuffer>,
    config: SubmitterConfig,
    shutdown: ShutdownFlag,
    stats: SubmitterStats,
}

impl<E: SubmitEndpoint> Submitter<E> {
    /// Create a submitter draining `buffer` into `endpoint`.
    pub fn new(
        endpoint: E,
        cipher: FieldCipher,
        buffer: Arc<SampleBuffer>,
        config: SubmitterConfig,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            endpoint,
            cipher,
            buffer,
            config,
            shutdown,
            stats: SubmitterStats::default(),
        }
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &SubmitterStats {
        &self.stats
    }

    /// Run until the exit flag is raised, returning the final counters.
    pub async fn run(mut self) -> SubmitterStats {
        info!(
            interval_secs = self.config.submission_interval_ticks * self.config.tick.as_secs(),
            chunk_size = self.config.chunk_size,
            "Starting submitter"
        );

        loop {
            for _ in 0..self.config.submission_interval_ticks {
                sleep(self.config.tick).await;
                if self.shutdown.is_triggered() {
                    info!(
                        acknowledged = self.stats.samples_acknowledged,
                        "Exiting submitter"
                    );
                    return self.stats;
                }
            }

            match self.submit_pending().await {
                SubmissionOutcome::Idle => debug!("No samples to submit"),
                SubmissionOutcome::Completed {
                    chunks,
                    acknowledged,
                } => info!(chunks, acknowledged, "Submission round complete"),
                SubmissionOutcome::Aborted {
                    chunks,
                    acknowledged,
                    reason,
                } => warn!(
                    chunks,
                    acknowledged,
                    reason = ?reason,
                    "Submission round aborted, retrying next interval"
                ),
            }
        }
    }

    /// Run one submission round over the current buffer contents.
    ///
    /// The number of chunks is fixed at entry from the buffer length; each
    /// chunk re-reads the buffer head, so samples appended meanwhile can be
    /// picked up by later chunks.
    pub async fn submit_pending(&mut self) -> SubmissionOutcome {
        let pending = self.buffer.len().await;
        if pending == 0 {
            return SubmissionOutcome::Idle;
        }
        self.stats.rounds += 1;

        let iterations = pending.div_ceil(self.config.chunk_size);
        let mut chunks = 0;
        let mut acknowledged = 0;

        for iteration in 0..iterations {
            let chunk = self.buffer.snapshot_prefix(self.config.chunk_size).await;
            if chunk.is_empty() {
                break;
            }

            let batch_id = Uuid::new_v4();
            let batch = self.seal_chunk(&chunk);
            debug!(
                %batch_id,
                iteration,
                samples = chunk.len(),
                sealed = batch.len(),
                "Submitting chunk"
            );

            let code = match self.endpoint.submit(&batch).await {
                Ok(code) => code,
                Err(e) => {
                    error!(%batch_id, error = %e, "Failed to submit gps data");
                    self.stats.transport_failures += 1;
                    return SubmissionOutcome::Aborted {
                        chunks,
                        acknowledged,
                        reason: AbortReason::Transport(e),
                    };
                }
            };

            if code != ResultCode::NoError {
                error!(%batch_id, code = %code, "Failed to submit gps data");
                self.stats.server_rejections += 1;
                return SubmissionOutcome::Aborted {
                    chunks,
                    acknowledged,
                    reason: AbortReason::Rejected(code),
                };
            }

            // Samples dropped by the length guard are part of the snapshot and
            // are discarded here along with the acknowledged ones.
            match self.buffer.remove_submitted(&chunk).await {
                Ok(removed) => debug!(%batch_id, removed, "Removed acknowledged samples"),
                Err(e) => {
                    self.stats.persist_failures += 1;
                    error!(
                        %batch_id,
                        error = %e,
                        path = %self.buffer.store().path().display(),
                        "Can not write into store file"
                    );
                }
            }

            chunks += 1;
            acknowledged += chunk.len();
            self.stats.chunks_acknowledged += 1;
            self.stats.samples_acknowledged += chunk.len() as u64;
        }

        SubmissionOutcome::Completed {
            chunks,
            acknowledged,
        }
    }

    fn seal_chunk(&mut self, chunk: &[Sample]) -> Vec<EncryptedSample> {
        let mut batch = Vec::with_capacity(chunk.len());
        for sample in chunk {
            match self.cipher.seal(sample, &self.config.device_name) {
                Ok(sealed) => batch.push(sealed),
                Err(e) => {
                    self.stats.samples_dropped += 1;
                    error!(error = %e, utctime = sample.utctime, "Skipping gps position");
                }
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DurableStore;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Endpoint answering from a script; an exhausted script acknowledges.
    #[derive(Default)]
    struct ScriptedEndpoint {
        responses: Mutex<VecDeque<Result<ResultCode, ClientError>>>,
        batches: Mutex<Vec<Vec<EncryptedSample>>>,
    }

    impl ScriptedEndpoint {
        fn with_responses(responses: Vec<Result<ResultCode, ClientError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                batches: Mutex::new(Vec::new()),
            }
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    impl SubmitEndpoint for ScriptedEndpoint {
        async fn submit(&self, batch: &[EncryptedSample]) -> Result<ResultCode, ClientError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ResultCode::NoError))
        }
    }

    fn create_test_sample(utctime: i64) -> Sample {
        Sample {
            lat: format!("52.{}", utctime),
            lon: "13.405".to_string(),
            alt: "34.0".to_string(),
            speed: "0.0".to_string(),
            utctime,
        }
    }

    fn filled_buffer(count: i64) -> (TempDir, Arc<SampleBuffer>) {
        let dir = tempdir().unwrap();
        let store = DurableStore::new(dir.path().join("gps.json"), false);
        let samples = (0..count).map(create_test_sample).collect();
        (dir, Arc::new(SampleBuffer::new(samples, store)))
    }

    fn submitter_for(
        endpoint: ScriptedEndpoint,
        buffer: Arc<SampleBuffer>,
        chunk_size: usize,
    ) -> Submitter<ScriptedEndpoint> {
        let config = SubmitterConfig {
            submission_interval_ticks: 2,
            tick: Duration::from_millis(10),
            chunk_size,
            device_name: "tracker-1".to_string(),
        };
        Submitter::new(
            endpoint,
            FieldCipher::from_secret("secret"),
            buffer,
            config,
            ShutdownFlag::new(),
        )
    }

    async fn buffered_times(buffer: &SampleBuffer) -> Vec<i64> {
        buffer
            .snapshot_prefix(usize::MAX)
            .await
            .iter()
            .map(|s| s.utctime)
            .collect()
    }

    #[test]
    fn test_submitter_config_from_config() {
        let config = Config {
            submission_interval: Duration::from_secs(45),
            chunk_size: 50,
            device_name: "tracker-9".to_string(),
            ..Config::default()
        };
        let submitter_config = SubmitterConfig::from(&config);
        assert_eq!(submitter_config.submission_interval_ticks, 45);
        assert_eq!(submitter_config.tick, Duration::from_secs(1));
        assert_eq!(submitter_config.chunk_size, 50);
        assert_eq!(submitter_config.device_name, "tracker-9");
    }

    #[tokio::test]
    async fn test_empty_buffer_does_not_contact_server() {
        let (_dir, buffer) = filled_buffer(0);
        let mut submitter = submitter_for(ScriptedEndpoint::default(), buffer, 100);

        assert!(matches!(submitter.submit_pending().await, SubmissionOutcome::Idle));
        assert!(submitter.endpoint.batch_sizes().is_empty());
        assert_eq!(submitter.stats().rounds, 0);
    }

    #[tokio::test]
    async fn test_submits_in_bounded_chunks() {
        let (_dir, buffer) = filled_buffer(250);
        let mut submitter = submitter_for(ScriptedEndpoint::default(), buffer.clone(), 100);

        let outcome = submitter.submit_pending().await;
        assert!(matches!(
            outcome,
            SubmissionOutcome::Completed {
                chunks: 3,
                acknowledged: 250
            }
        ));
        assert_eq!(submitter.endpoint.batch_sizes(), vec![100, 100, 50]);
        assert!(buffer.is_empty().await);
        assert!(buffer.store().load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auth_error_on_second_chunk_keeps_remainder() {
        let (_dir, buffer) = filled_buffer(250);
        let endpoint = ScriptedEndpoint::with_responses(vec![
            Ok(ResultCode::NoError),
            Ok(ResultCode::AuthError),
        ]);
        let mut submitter = submitter_for(endpoint, buffer.clone(), 100);

        let outcome = submitter.submit_pending().await;
        assert!(matches!(
            outcome,
            SubmissionOutcome::Aborted {
                chunks: 1,
                acknowledged: 100,
                reason: AbortReason::Rejected(ResultCode::AuthError),
            }
        ));
        assert_eq!(submitter.endpoint.batch_sizes(), vec![100, 100]);
        assert_eq!(buffered_times(&buffer).await, (100..250).collect::<Vec<i64>>());

        let stored = buffer.store().load().await.unwrap();
        assert_eq!(stored.len(), 150);
        assert_eq!(stored[0].utctime, 100);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_buffer_untouched() {
        let (_dir, buffer) = filled_buffer(30);
        let endpoint = ScriptedEndpoint::with_responses(vec![Err(ClientError::Timeout)]);
        let mut submitter = submitter_for(endpoint, buffer.clone(), 10);

        let outcome = submitter.submit_pending().await;
        assert!(matches!(
            outcome,
            SubmissionOutcome::Aborted {
                chunks: 0,
                acknowledged: 0,
                reason: AbortReason::Transport(ClientError::Timeout),
            }
        ));
        assert_eq!(submitter.endpoint.batch_sizes(), vec![10]);
        assert_eq!(buffer.len().await, 30);
        assert_eq!(submitter.stats().transport_failures, 1);
    }

    #[tokio::test]
    async fn test_every_server_error_aborts_round() {
        for code in [
            ResultCode::DatabaseError,
            ResultCode::IllegalMessage,
            ResultCode::SessionExpired,
            ResultCode::Unknown(42),
        ] {
            let (_dir, buffer) = filled_buffer(5);
            let endpoint = ScriptedEndpoint::with_responses(vec![Ok(code)]);
            let mut submitter = submitter_for(endpoint, buffer.clone(), 2);

            let outcome = submitter.submit_pending().await;
            assert!(
                matches!(outcome, SubmissionOutcome::Aborted { reason: AbortReason::Rejected(c), .. } if c == code)
            );
            assert_eq!(buffer.len().await, 5);
            assert_eq!(submitter.endpoint.batch_sizes().len(), 1);
        }
    }

    /// Endpoint that appends one sample to the buffer while the first
    /// request is in flight.
    struct AppendingEndpoint {
        buffer: Arc<SampleBuffer>,
        appended: AtomicBool,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl SubmitEndpoint for AppendingEndpoint {
        async fn submit(&self, batch: &[EncryptedSample]) -> Result<ResultCode, ClientError> {
            self.batch_sizes.lock().unwrap().push(batch.len());
            if !self.appended.swap(true, Ordering::SeqCst) {
                self.buffer.push(create_test_sample(99)).await.unwrap();
            }
            Ok(ResultCode::NoError)
        }
    }

    #[tokio::test]
    async fn test_samples_appended_mid_round_reach_later_chunks() {
        let (_dir, buffer) = filled_buffer(3);
        let endpoint = AppendingEndpoint {
            buffer: buffer.clone(),
            appended: AtomicBool::new(false),
            batch_sizes: Mutex::new(Vec::new()),
        };
        let mut submitter = Submitter::new(
            endpoint,
            FieldCipher::from_secret("secret"),
            buffer.clone(),
            SubmitterConfig {
                chunk_size: 2,
                ..SubmitterConfig::default()
            },
            ShutdownFlag::new(),
        );

        // Three pending samples plan two chunks; the second one sees the
        // sample appended during the first request.
        let outcome = submitter.submit_pending().await;
        assert!(matches!(
            outcome,
            SubmissionOutcome::Completed {
                chunks: 2,
                acknowledged: 4
            }
        ));
        assert_eq!(*submitter.endpoint.batch_sizes.lock().unwrap(), vec![2, 2]);
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_sample_dropped_from_request() {
        let (_dir, buffer) = filled_buffer(2);
        let mut oversized = create_test_sample(5);
        oversized.lat = "1234567890.123456".to_string();
        buffer.push(oversized).await.unwrap();

        let mut submitter = submitter_for(ScriptedEndpoint::default(), buffer.clone(), 10);
        submitter.submit_pending().await;

        let batches = submitter.endpoint.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(batches[0].iter().all(|s| s.device_name == "tracker-1"));
        assert_eq!(submitter.stats().samples_dropped, 1);
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_submits_and_exits_on_flag() {
        let (_dir, buffer) = filled_buffer(5);
        let submitter = submitter_for(ScriptedEndpoint::default(), buffer.clone(), 2);
        let shutdown = submitter.shutdown.clone();

        let handle = tokio::spawn(submitter.run());
        let drained = async {
            while !buffer.is_empty().await {
                sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), drained)
            .await
            .expect("buffer should drain");

        shutdown.trigger();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("submitter should exit")
            .unwrap();

        assert_eq!(stats.samples_acknowledged, 5);
        assert_eq!(stats.chunks_acknowledged, 3);
    }
}
