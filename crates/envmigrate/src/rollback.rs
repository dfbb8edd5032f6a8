//! Compensating rollback.
//!
//! Deletes the ids a run created, table by table with dependents first, then
//! re-counts each table's row count against the baseline recorded before the
//! run touched it.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{DeleteOutcome, StoreAdapter};
use crate::error::Result;
use crate::retry::{with_backoff, RetryPolicy};
use crate::state::CheckpointManager;
use crate::verify::count_rows;

/// Rollback outcome of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRollback {
    pub table: String,
    pub attempted: usize,
    pub deleted: usize,
    /// Ids already gone (tolerated).
    pub not_found: usize,
    pub errors: Vec<String>,
    pub baseline_rows: u64,
    pub rows_after: u64,
    /// Row count is back at the baseline.
    pub restored: bool,
}

/// Rollback outcome of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackReport {
    pub tables: Vec<TableRollback>,
    /// Every table was restored to its baseline.
    pub complete: bool,
}

impl RollbackReport {
    pub fn table(&self, name: &str) -> Option<&TableRollback> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Deletes created ids from the target.
pub struct RollbackManager {
    target: Arc<dyn StoreAdapter>,
    policy: RetryPolicy,
    concurrency: usize,
}

impl RollbackManager {
    pub fn new(target: Arc<dyn StoreAdapter>, policy: RetryPolicy, concurrency: usize) -> Self {
        Self {
            target,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Roll back `tables`, which must already be in teardown order.
    ///
    /// Each table is recorded as rolled back in the checkpoint once all its
    /// deletes succeeded.
    pub async fn rollback(
        &self,
        checkpoint: &CheckpointManager,
        tables: &[String],
    ) -> Result<RollbackReport> {
        let snapshot = checkpoint.snapshot().await;
        let mut report = RollbackReport::default();

        info!("Rolling back {} tables: {}", tables.len(), tables.join(", "));

        for table in tables {
            let Some(entry) = snapshot.tables.get(table) else {
                continue;
            };
            let ids = entry.created_target_ids.clone();
            let attempted = ids.len();

            let outcomes: Vec<std::result::Result<DeleteOutcome, String>> = stream::iter(ids)
                .map(|id| async move {
                    let what = format!("delete {}/{}", table, id);
                    let id_ref: &str = &id;
                    with_backoff(&self.policy, &what, || {
                        self.target.delete_record(table, id_ref)
                    })
                    .await
                    .map_err(|e| format!("{}: {}", id, e))
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let mut result = TableRollback {
                table: table.clone(),
                attempted,
                deleted: 0,
                not_found: 0,
                errors: Vec::new(),
                baseline_rows: entry.baseline_rows,
                rows_after: 0,
                restored: false,
            };
            for outcome in outcomes {
                match outcome {
                    Ok(DeleteOutcome::Deleted) => result.deleted += 1,
                    Ok(DeleteOutcome::NotFound) => result.not_found += 1,
                    Err(e) => result.errors.push(e),
                }
            }

            result.rows_after = count_rows(self.target.as_ref(), table).await?;
            result.restored = result.errors.is_empty() && result.rows_after == result.baseline_rows;

            if result.errors.is_empty() {
                checkpoint.record_rollback(table, result.deleted).await?;
            }

            if result.restored {
                info!(
                    "{}: rolled back {} records ({} already gone), {} rows remain",
                    table, result.deleted, result.not_found, result.rows_after
                );
            } else {
                warn!(
                    "{}: rollback incomplete, {} rows remain (baseline {}), {} delete errors",
                    table,
                    result.rows_after,
                    result.baseline_rows,
                    result.errors.len()
                );
            }
            report.tables.push(result);
        }

        report.complete = report.tables.iter().all(|t| t.restored);
        Ok(report)
    }
}
