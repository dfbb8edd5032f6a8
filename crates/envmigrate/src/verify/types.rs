//! Type definitions for post-run validation.

use serde::{Deserialize, Serialize};

/// What the validator expects of one target table.
#[derive(Debug, Clone)]
pub struct TableExpectation {
    pub table: String,

    /// Rows the target must hold: pre-run baseline plus ids created by the run.
    pub expected_rows: u64,

    /// Ids written by the run; the FK sample is drawn from these.
    pub written_target_ids: Vec<String>,
}

/// A problem found while sampling target records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMismatch {
    pub target_id: String,

    /// Foreign-key field that failed to resolve. `None` when the sampled
    /// record itself is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    pub detail: String,
}

/// Validation outcome of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub table: String,
    pub expected_rows: u64,
    pub actual_rows: u64,
    pub count_matches: bool,
    pub sampled: usize,
    pub mismatches: Vec<SampleMismatch>,
    pub passed: bool,
}

/// Validation outcome of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tables: Vec<TableValidation>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn from_tables(tables: Vec<TableValidation>) -> Self {
        let passed = tables.iter().all(|t| t.passed);
        Self { tables, passed }
    }

    /// Names of tables that failed validation.
    pub fn failed_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| !t.passed)
            .map(|t| t.table.clone())
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableValidation> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn mismatch_count(&self) -> usize {
        self.tables.iter().map(|t| t.mismatches.len()).sum()
    }
}
