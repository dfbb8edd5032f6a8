//! Serialized access to the run's checkpoint.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use super::{Checkpoint, CheckpointBackend, EventKind, JobState, TableCheckpoint};
use crate::error::Result;
use crate::identity::IdentityMapper;

/// Owns the run's checkpoint and persists it after every change.
///
/// Concurrent table workers append through one lock, so saves never
/// interleave.
pub struct CheckpointManager {
    backend: Arc<dyn CheckpointBackend>,
    checkpoint: Mutex<Checkpoint>,
}

impl CheckpointManager {
    pub fn new(backend: Arc<dyn CheckpointBackend>, checkpoint: Checkpoint) -> Self {
        Self {
            backend,
            checkpoint: Mutex::new(checkpoint),
        }
    }

    pub fn location(&self) -> Option<PathBuf> {
        self.backend.location()
    }

    pub async fn state(&self) -> JobState {
        self.checkpoint.lock().await.state
    }

    /// Copy of the current checkpoint.
    pub async fn snapshot(&self) -> Checkpoint {
        self.checkpoint.lock().await.clone()
    }

    pub async fn transition(&self, next: JobState) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock().await;
        checkpoint.transition(next)?;
        info!("Run {} is now {:?}", checkpoint.run_id, next);
        self.backend.save(&mut *checkpoint).await
    }

    pub async fn push_event(
        &self,
        kind: EventKind,
        table: Option<&str>,
        detail: impl Into<String>,
    ) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock().await;
        checkpoint.push_event(kind, table, detail);
        self.backend.save(&mut *checkpoint).await
    }

    /// Append a finalized table together with the current mapping snapshot.
    ///
    /// The snapshot is taken under the lock, so a later save never carries
    /// fewer mappings than an earlier one.
    pub async fn record_table(
        &self,
        table: &str,
        entry: TableCheckpoint,
        mapper: &IdentityMapper,
    ) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock().await;
        checkpoint.record_table(table, entry);
        checkpoint.identity_snapshot = mapper.snapshot();
        self.backend.save(&mut *checkpoint).await
    }

    pub async fn record_rollback(&self, table: &str, deleted: usize) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock().await;
        checkpoint.record_rollback(table, deleted);
        self.backend.save(&mut *checkpoint).await
    }
}
