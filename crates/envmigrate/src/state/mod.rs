//! Checkpoint file for resume and rollback.
//!
//! A [`Checkpoint`] is the durable record of one run: which tables finished,
//! which target ids each table created, the identity-mapping snapshot, and an
//! append-only event log. It is rewritten after every table.

mod backend;
mod manager;
mod noop;

pub use backend::{CheckpointBackend, FileCheckpointBackend};
pub use manager::CheckpointManager;
pub use noop::NoOpCheckpointBackend;

use crate::error::{MigrateError, Result};
use crate::identity::IdentityMapping;
use crate::transfer::TableStatus;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

type HmacSha256 = Hmac<Sha256>;

const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Validating,
    Completed,
    Failed,
    RolledBack,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::RolledBack
        )
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Validating)
                | (Running, Failed)
                | (Validating, Completed)
                | (Validating, Failed)
                | (Failed, RolledBack)
                // manual rollback of a finished run
                | (Completed, RolledBack)
                // a resumed run starts over from a failed checkpoint
                | (Failed, Running)
        )
    }
}

/// Per-table checkpoint entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCheckpoint {
    pub status: TableStatus,

    /// Target rows before the run first touched the table.
    pub baseline_rows: u64,

    /// Ids written by the run that did not exist before it. These are the
    /// only ids a rollback deletes.
    pub created_target_ids: Vec<String>,

    /// Records written, including overwrites of pre-existing ids.
    pub migrated_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

/// What happened, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    RunResumed,
    TableCompleted,
    TableFailed,
    TableCancelled,
    TableRolledBack,
    StateChanged,
}

/// One entry of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub detail: String,
}

/// Durable record of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    pub source_environment: String,
    pub target_environment: String,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub state: JobState,

    /// Dependency levels of the run.
    pub levels: Vec<Vec<String>>,

    /// Tables fully migrated, in completion order.
    pub completed_tables: Vec<String>,

    /// Tables whose created ids were deleted by a rollback.
    #[serde(default)]
    pub rolled_back_tables: Vec<String>,

    pub tables: BTreeMap<String, TableCheckpoint>,

    #[serde(default)]
    pub events: Vec<CheckpointEvent>,

    pub identity_snapshot: Vec<IdentityMapping>,

    /// HMAC-SHA256 signature for integrity validation.
    /// Computed over serialized state (excluding this field) using config_hash as key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl Checkpoint {
    /// Create a new checkpoint for a run.
    pub fn new(
        run_id: impl Into<String>,
        config_hash: impl Into<String>,
        source_environment: impl Into<String>,
        target_environment: impl Into<String>,
        levels: Vec<Vec<String>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            config_hash: config_hash.into(),
            source_environment: source_environment.into(),
            target_environment: target_environment.into(),
            started_at: now,
            updated_at: now,
            state: JobState::Pending,
            levels,
            completed_tables: Vec::new(),
            rolled_back_tables: Vec::new(),
            tables: BTreeMap::new(),
            events: Vec::new(),
            identity_snapshot: Vec::new(),
            hmac: None, // Will be computed on first save
        }
    }

    /// File name of a run's checkpoint.
    pub fn file_name(run_id: &str) -> String {
        format!("{}{}.json", CHECKPOINT_PREFIX, run_id)
    }

    /// Compute HMAC-SHA256 signature for state integrity validation.
    ///
    /// Uses config_hash as HMAC key to prevent tampering with the file.
    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned).map_err(|e| {
            MigrateError::State(format!("Failed to serialize checkpoint for HMAC: {}", e))
        })?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;

        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load a checkpoint with integrity validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::State(format!("cannot read checkpoint {}: {}", path.display(), e))
        })?;
        let checkpoint: Self = serde_json::from_str(&content).map_err(|e| {
            MigrateError::State(format!("invalid checkpoint {}: {}", path.display(), e))
        })?;

        match &checkpoint.hmac {
            Some(stored) => {
                if *stored != checkpoint.compute_hmac()? {
                    return Err(MigrateError::State(
                        "Checkpoint integrity check failed: HMAC mismatch (possible tampering)"
                            .to_string(),
                    ));
                }
            }
            None => tracing::warn!(
                "Checkpoint {} has no HMAC signature, integrity cannot be verified",
                path.display()
            ),
        }

        Ok(checkpoint)
    }

    /// Save to a file (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.updated_at = Utc::now();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MigrateError::State(format!("Failed to serialize checkpoint: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    /// Move to a new state, logging the transition.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(MigrateError::State(format!(
                "illegal state transition {:?} -> {:?}",
                self.state, next
            )));
        }
        let detail = format!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.push_event(EventKind::StateChanged, None, detail);
        Ok(())
    }

    pub fn push_event(&mut self, kind: EventKind, table: Option<&str>, detail: impl Into<String>) {
        self.events.push(CheckpointEvent {
            at: Utc::now(),
            kind,
            table: table.map(str::to_string),
            detail: detail.into(),
        });
    }

    /// Check if a table is completed.
    pub fn is_table_completed(&self, table: &str) -> bool {
        self.completed_tables.iter().any(|t| t == table)
    }

    /// Record a finalized table.
    pub fn record_table(&mut self, table: &str, entry: TableCheckpoint) {
        let (kind, detail) = match entry.status {
            TableStatus::Completed => (
                EventKind::TableCompleted,
                format!("{} records written", entry.migrated_count),
            ),
            TableStatus::Cancelled => (
                EventKind::TableCancelled,
                format!("{} records written before cancellation", entry.migrated_count),
            ),
            _ => (
                EventKind::TableFailed,
                entry.error.clone().unwrap_or_else(|| "failed".into()),
            ),
        };

        if entry.status == TableStatus::Completed && !self.is_table_completed(table) {
            self.completed_tables.push(table.to_string());
        }

        // A resumed table keeps the ids an earlier attempt created
        let entry = match self.tables.remove(table) {
            Some(previous) => merge_entries(previous, entry),
            None => entry,
        };
        self.tables.insert(table.to_string(), entry);
        self.push_event(kind, Some(table), detail);
    }

    /// Record that a table's created ids were deleted.
    pub fn record_rollback(&mut self, table: &str, deleted: usize) {
        self.completed_tables.retain(|t| t != table);
        if !self.rolled_back_tables.iter().any(|t| t == table) {
            self.rolled_back_tables.push(table.to_string());
        }
        if let Some(entry) = self.tables.get_mut(table) {
            entry.status = TableStatus::RolledBack;
            entry.updated_at = Utc::now();
        }
        self.identity_snapshot.retain(|m| m.source_table != table);
        self.push_event(
            EventKind::TableRolledBack,
            Some(table),
            format!("{} records deleted", deleted),
        );
    }

    /// Tables the run touched and has not rolled back yet, dependents first.
    pub fn rollback_candidates(&self, teardown_order: &[String]) -> Vec<String> {
        teardown_order
            .iter()
            .filter(|t| {
                self.tables
                    .get(t.as_str())
                    .is_some_and(|e| e.status != TableStatus::RolledBack)
            })
            .cloned()
            .collect()
    }

    /// Teardown order derived from the recorded levels.
    pub fn teardown_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self.levels.iter().flatten().cloned().collect();
        order.reverse();
        order
    }
}

fn merge_entries(previous: TableCheckpoint, mut next: TableCheckpoint) -> TableCheckpoint {
    if previous.status == TableStatus::RolledBack {
        return next;
    }
    next.baseline_rows = previous.baseline_rows;
    for id in previous.created_target_ids {
        if !next.created_target_ids.contains(&id) {
            next.created_target_ids.push(id);
        }
    }
    next
}

/// Newest `checkpoint-*.json` in a directory.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_checkpoint = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(CHECKPOINT_PREFIX) && n.ends_with(".json"));
        if !is_checkpoint {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
