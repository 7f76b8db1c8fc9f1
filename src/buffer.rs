//! Buffer module holding samples that the server has not acknowledged yet.
//!
//! [`SampleQueue`] provides the in-memory list operations. [`SampleBuffer`]
//! wraps it in a single async mutex together with the [`DurableStore`], so the
//! collector (sole appender) and the submitter (sole remover) share one
//! ordered, oldest-first sequence whose on-disk mirror is rewritten while the
//! lock is still held.

use tokio::sync::Mutex;
use tracing::debug;

use crate::sample::Sample;
use crate::store::{DurableStore, StoreError};

/// Ordered list of buffered samples, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleQueue {
    samples: Vec<Sample>,
}

impl SampleQueue {
    /// Create a queue from previously stored samples.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Append a sample at the tail.
    pub fn append(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Copy up to the first `n` samples.
    pub fn snapshot_prefix(&self, n: usize) -> Vec<Sample> {
        self.samples.iter().take(n).cloned().collect()
    }

    /// Remove the first sample equal to `sample` in all five fields.
    ///
    /// Returns whether a sample was removed.
    pub fn remove_matching(&mut self, sample: &Sample) -> bool {
        match self.samples.iter().position(|s| s == sample) {
            Some(idx) => {
                self.samples.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Current samples, oldest first.
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Lock-protected sample queue mirrored to a durable store.
///
/// Every mutation persists the full queue before the lock is released, so
/// the store always reflects a complete state of the queue.
#[derive(Debug)]
pub struct SampleBuffer {
    queue: Mutex<SampleQueue>,
    store: DurableStore,
}

impl SampleBuffer {
    /// Create a buffer seeded with `samples`.
    pub fn new(samples: Vec<Sample>, store: DurableStore) -> Self {
        Self {
            queue: Mutex::new(SampleQueue::new(samples)),
            store,
        }
    }

    /// Load the store and create a buffer from its valid entries.
    pub async fn open(store: DurableStore) -> Result<Self, StoreError> {
        let samples = store.load().await?;
        Ok(Self::new(samples, store))
    }

    /// Append a sample and persist the queue.
    ///
    /// The sample stays buffered in memory even when persisting fails.
    /// Returns the buffer length after the append.
    pub async fn push(&self, sample: Sample) -> Result<usize, StoreError> {
        debug!("Acquire lock");
        let mut queue = self.queue.lock().await;
        queue.append(sample);
        let len = queue.len();
        let result = self.store.persist(queue.as_slice()).await;
        debug!("Release lock");
        result.map(|_| len)
    }

    /// Copy up to the `n` oldest samples.
    pub async fn snapshot_prefix(&self, n: usize) -> Vec<Sample> {
        self.queue.lock().await.snapshot_prefix(n)
    }

    /// Remove one buffered sample for each entry of `submitted` and persist.
    ///
    /// Matching is by value across all five fields; each submitted entry
    /// removes at most the earliest equal sample. Removals stand in memory
    /// even when persisting fails. Returns the number of samples removed.
    pub async fn remove_submitted(&self, submitted: &[Sample]) -> Result<usize, StoreError> {
        debug!("Acquire lock");
        let mut queue = self.queue.lock().await;
        let removed = submitted
            .iter()
            .filter(|sample| queue.remove_matching(sample))
            .count();
        let result = self.store.persist(queue.as_slice()).await;
        debug!("Release lock");
        result.map(|_| removed)
    }

    /// Persist the current queue without mutating it.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let queue = self.queue.lock().await;
        self.store.persist(queue.as_slice()).await
    }

    /// Number of buffered samples.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Check if the buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// The backing store.
    pub fn store(&self) -> &DurableStore {
        &self.store
    }
}
