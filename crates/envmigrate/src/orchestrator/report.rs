//! Run artifacts written to the output directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::identity::IdentityMapping;
use crate::rollback::RollbackReport;
use crate::state::JobState;
use crate::transfer::{TableResult, TableStatus};
use crate::verify::ValidationReport;

/// Final report of an analyze, dry-run, test or migrate run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub run_id: String,
    pub mode: String,
    pub source_environment: String,
    pub target_environment: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub levels: Vec<Vec<String>>,
    pub tables: Vec<TableResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
    pub identity_mappings: Vec<IdentityMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PathBuf>,
    /// Fatal error that ended the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationReport {
    pub fn table(&self, name: &str) -> Option<&TableResult> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn failed_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.status.is_failure())
            .map(|t| t.table.clone())
            .collect()
    }

    pub fn records_migrated(&self) -> u64 {
        self.tables.iter().map(|t| t.migrated_count).sum()
    }

    pub fn file_name(run_id: &str) -> String {
        format!("report-{}.json", run_id)
    }
}

/// Read-only projection of what a migration would do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: String,
    pub source_environment: String,
    pub target_environment: String,
    pub generated_at: DateTime<Utc>,
    pub levels: Vec<Vec<String>>,
    pub tables: Vec<TableAnalysis>,
    pub total_records: u64,
    pub would_migrate: u64,
    pub would_skip: u64,
    pub estimated_duration_seconds: f64,
}

impl AnalysisReport {
    pub fn table(&self, name: &str) -> Option<&TableAnalysis> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn file_name(run_id: &str) -> String {
        format!("analysis-{}.json", run_id)
    }
}

/// One table of an [`AnalysisReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableAnalysis {
    pub table: String,
    pub level: usize,
    pub required: bool,
    pub exists_in_source: bool,
    pub source_row_estimate: u64,
    pub target_rows_before: u64,
    pub scanned: u64,
    pub would_migrate: u64,
    pub would_skip: u64,
    pub unresolved_references: u64,
    pub estimated_seconds: f64,
}

/// Outcome of a manual rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRunReport {
    pub run_id: String,
    pub checkpoint: PathBuf,
    pub state: JobState,
    pub rollback: RollbackReport,
    pub completed_at: DateTime<Utc>,
}

impl RollbackRunReport {
    pub fn file_name(run_id: &str) -> String {
        format!("rollback-{}.json", run_id)
    }
}

/// Current view of a run from its checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub run_id: String,
    pub checkpoint: PathBuf,
    pub state: JobState,
    pub source_environment: String,
    pub target_environment: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_tables: Vec<String>,
    pub rolled_back_tables: Vec<String>,
    pub tables: Vec<TableStatusLine>,
}

/// One table of a [`StatusReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatusLine {
    pub table: String,
    pub level: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TableStatus>,
    pub created_records: usize,
    /// Current estimates; `None` when the store could not be reached.
    pub source_rows: Option<u64>,
    pub target_rows: Option<u64>,
}

/// Serialize an artifact atomically into `dir`.
pub fn write_artifact<T: Serialize>(dir: &Path, file_name: &str, artifact: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let content = serde_json::to_string_pretty(artifact)?;

    // Atomic write: write to temp file, then rename
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, &path)?;

    info!("Wrote {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_artifact() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("out");
        let report = RollbackRunReport {
            run_id: "r1".into(),
            checkpoint: PathBuf::from("checkpoint-r1.json"),
            state: JobState::RolledBack,
            rollback: RollbackReport::default(),
            completed_at: Utc::now(),
        };
        let path = write_artifact(&nested, &RollbackRunReport::file_name("r1"), &report).unwrap();
        assert_eq!(path, nested.join("rollback-r1.json"));

        let loaded: RollbackRunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.state, JobState::RolledBack);
        assert!(!nested.join("rollback-r1.tmp").exists());
    }
}
