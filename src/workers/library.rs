//! Persisting finished recordings

use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Result of one persistence request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub success: bool,
    /// Final location of the recording
    pub location: Option<PathBuf>,
    pub error: Option<String>,
}

impl PersistOutcome {
    pub fn stored(location: PathBuf) -> Self {
        Self {
            success: true,
            location: Some(location),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            location: None,
            error: Some(error.into()),
        }
    }
}

/// Durable storage for finished recordings.
///
/// Called exactly once per successfully finalized session. Implementations
/// report failure through the outcome and never retry.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn persist(&self, recording: &Path) -> PersistOutcome;
}

/// Moves recordings into a library directory
#[derive(Debug, Clone)]
pub struct LibraryStore {
    dir: PathBuf,
}

impl LibraryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn store(&self, recording: &Path) -> anyhow::Result<PathBuf> {
        let name = recording
            .file_name()
            .with_context(|| format!("{} has no file name", recording.display()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let target = self.dir.join(name);

        if let Err(e) = tokio::fs::rename(recording, &target).await {
            // rename fails across filesystems
            log::debug!("Rename into library failed ({}), copying", e);
            tokio::fs::copy(recording, &target)
                .await
                .with_context(|| format!("Failed to copy into {}", target.display()))?;
            tokio::fs::remove_file(recording)
                .await
                .with_context(|| format!("Failed to remove {}", recording.display()))?;
        }
        Ok(target)
    }
}

#[async_trait]
impl Persistence for LibraryStore {
    async fn persist(&self, recording: &Path) -> PersistOutcome {
        match self.store(recording).await {
            Ok(location) => {
                log::info!("Recording saved to {}", location.display());
                PersistOutcome::stored(location)
            }
            Err(e) => {
                log::error!("Failed to save {}: {:#}", recording.display(), e);
                PersistOutcome::failed(format!("{e:#}"))
            }
        }
    }
}
