//! No-op checkpoint backend for read-only modes.
//!
//! Analyze, dry-run and test runs keep their checkpoint in memory only, so
//! they never touch a checkpoint a live run could resume from.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::state::backend::CheckpointBackend;
use crate::state::Checkpoint;

/// Checkpoint backend that doesn't persist anything.
#[derive(Debug, Default)]
pub struct NoOpCheckpointBackend;

impl NoOpCheckpointBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CheckpointBackend for NoOpCheckpointBackend {
    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        // No-op: checkpoint is not persisted
        debug!(
            "Checkpoint for {} kept in memory ({} tables)",
            checkpoint.run_id,
            checkpoint.tables.len()
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(None)
    }

    fn location(&self) -> Option<PathBuf> {
        None
    }

    fn backend_type(&self) -> &'static str {
        "noop"
    }
}
