//! Checkpoint persistence backends.
//!
//! The [`CheckpointBackend`] trait decouples checkpoint storage from the
//! orchestrator, which works with `Arc<dyn CheckpointBackend>`:
//!
//! - **File**: [`FileCheckpointBackend`], a signed JSON file per run
//! - **No-op**: [`NoOpCheckpointBackend`](super::NoOpCheckpointBackend) for
//!   modes that must not mutate checkpoints (analyze, dry-run, test)

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::Checkpoint;
use crate::error::{MigrateError, Result};

/// Trait for checkpoint persistence backends.
///
/// Implementations must be `Send + Sync` to allow sharing across async tasks.
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    /// Persist the checkpoint, replacing any previous version.
    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<()>;

    /// Load the stored checkpoint, if any.
    async fn load(&self) -> Result<Option<Checkpoint>>;

    /// Where the checkpoint lives, for reports.
    fn location(&self) -> Option<PathBuf>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}

/// Signed JSON checkpoint file.
pub struct FileCheckpointBackend {
    path: PathBuf,
}

impl FileCheckpointBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend for a run's checkpoint inside an output directory.
    pub fn for_run(output_dir: &Path, run_id: &str) -> Self {
        Self::new(output_dir.join(Checkpoint::file_name(run_id)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CheckpointBackend for FileCheckpointBackend {
    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        let path = self.path.clone();
        let mut owned = checkpoint.clone();
        let saved = tokio::task::spawn_blocking(move || {
            owned.save(&path)?;
            Ok::<_, MigrateError>(owned)
        })
        .await
        .map_err(|e| MigrateError::State(format!("checkpoint writer failed: {}", e)))??;

        checkpoint.hmac = saved.hmac;
        checkpoint.updated_at = saved.updated_at;
        debug!("Checkpoint saved to {}", self.path.display());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Checkpoint::load(&path).map(Some))
            .await
            .map_err(|e| MigrateError::State(format!("checkpoint reader failed: {}", e)))?
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
