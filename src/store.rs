//! Durable store for buffered samples.
//!
//! The store is a single JSON array rewritten in full on every buffer
//! mutation. Writes go to a sibling temporary file which is then renamed
//! over the store, so a crash leaves either the previous or the new contents.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::sample::Sample;

/// Suffix of the temporary file used for atomic replacement.
const TEMP_SUFFIX: &str = ".tmp";

/// Errors that can occur while reading or writing the store.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem operation failed
    Io(std::io::Error),

    /// Samples could not be serialized
    Serialize(serde_json::Error),

    /// Store contents are not a JSON array
    Parse(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O error: {}", e),
            StoreError::Serialize(e) => write!(f, "Failed to serialize samples: {}", e),
            StoreError::Parse(e) => write!(f, "Store file is not a sample array: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Serialize(e) => Some(e),
            StoreError::Parse(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

/// On-disk mirror of the sample buffer.
#[derive(Debug, Clone)]
pub struct DurableStore {
    path: PathBuf,
    sync_always: bool,
}

impl DurableStore {
    /// Create a store handle for `path`.
    ///
    /// With `sync_always`, every persist fsyncs the written file and its
    /// parent directory before returning.
    pub fn new(path: impl Into<PathBuf>, sync_always: bool) -> Self {
        Self {
            path: path.into(),
            sync_always,
        }
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored samples, creating an empty store file if none exists.
    ///
    /// Entries that fail validation are dropped and logged. A file whose
    /// top-level content is not a JSON array is an error.
    pub async fn load(&self) -> Result<Vec<Sample>, StoreError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).await?;
                }
                fs::File::create(&self.path).await?;
                info!(path = %self.path.display(), "Created empty store file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let samples = decode_samples(&contents)?;
        info!(
            path = %self.path.display(),
            samples = samples.len(),
            "Loaded stored samples"
        );
        Ok(samples)
    }

    /// Rewrite the store with exactly `samples`.
    pub async fn persist(&self, samples: &[Sample]) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(samples).map_err(StoreError::Serialize)?;
        let temp_path = self.temp_path();

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&payload).await?;
        file.flush().await?;
        if self.sync_always {
            file.sync_all().await?;
        }
        drop(file);

        fs::rename(&temp_path, &self.path).await?;

        if self.sync_always {
            self.sync_parent().await?;
        }

        debug!(
            path = %self.path.display(),
            samples = samples.len(),
            bytes = payload.len(),
            "Persisted samples"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(TEMP_SUFFIX);
        PathBuf::from(name)
    }

    async fn sync_parent(&self) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::File::open(parent).await?.sync_all().await?;
        Ok(())
    }
}

/// Decode store contents, dropping entries that fail the format invariant.
///
/// Empty or whitespace-only contents decode to no samples.
pub fn decode_samples(contents: &str) -> Result<Vec<Sample>, StoreError> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<Value> =
        serde_json::from_str(contents).map_err(|e| StoreError::Parse(e.to_string()))?;

    let samples = entries
        .iter()
        .filter_map(|entry| match Sample::from_value(entry) {
            Ok(sample) => Some(sample),
            Err(e) => {
                error!(error = %e, "Stored position corrupt. Removing it.");
                None
            }
        })
        .collect();

    Ok(samples)
}
