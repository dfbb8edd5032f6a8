//! Table migrator: scan, rewrite ids, write with a bounded writer pool.
//!
//! One [`TableMigrator::execute`] call moves one table:
//! - the calling task pages through the source and rewrites every record
//!   through the [`IdentityMapper`]
//! - rewritten records are grouped into batches and handed to
//!   `batch_writers` tasks over a bounded channel
//! - each writer puts its batch record by record, retrying throttled puts
//!   with backoff
//!
//! Record-level problems (lenient unresolved references, transform errors,
//! puts the target rejects outright) land in [`TableResult::errors`] and the
//! table keeps going. Table-level failures (strict unresolved reference,
//! exhausted throttle retries, source errors) stop the table and are
//! reported through [`TableResult::status`]. Target ids that were written
//! before a failure are still returned so they can be rolled back.
//!
//! Every record read ends up either migrated or skipped, including records
//! dropped from the pipeline after a table-level failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MigrationConfig, ReferencePolicy};
use crate::core::dates::normalize_date;
use crate::core::value::{key_string, normalize_value};
use crate::core::{PageToken, Record, StoreAdapter, TableDescriptor, TARGET_ID_FIELD};
use crate::identity::{IdentityMapper, Resolution};
use crate::retry::{with_backoff, RetryPolicy};

/// One table to migrate.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub descriptor: TableDescriptor,

    /// Dependency level (for reporting).
    pub level: usize,

    /// Stop after this many source records (test mode).
    pub limit: Option<usize>,
}

impl TransferJob {
    pub fn new(descriptor: TableDescriptor, level: usize) -> Self {
        Self {
            descriptor,
            level,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Records per write batch.
    pub batch_size: usize,
    /// Concurrent writer tasks per table.
    pub batch_writers: usize,
    pub reference_policy: ReferencePolicy,
    pub retry: RetryPolicy,
}

impl TransferConfig {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.get_batch_size().max(1),
            batch_writers: config.get_batch_writers().max(1),
            reference_policy: config.reference_policy,
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}

/// Why a record was not migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordErrorKind {
    UnresolvedReference,
    WriteFailure,
    TransformError,
}

/// A per-record failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub source_id: String,
    pub kind: RecordErrorKind,
    pub detail: String,
}

impl RecordError {
    fn new(source_id: impl Into<String>, kind: RecordErrorKind, detail: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Final state of one table in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    Completed,
    /// Skipped without reading (optional table absent from the source, or
    /// already completed by the resumed run).
    Skipped,
    Failed,
    /// Stopped between batches by cancellation.
    Cancelled,
    RolledBack,
}

impl TableStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TableStatus::Failed)
    }
}

/// Outcome of migrating one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    pub table: String,
    pub level: usize,
    pub status: TableStatus,

    /// Source records read.
    pub source_count: u64,

    /// Records written to the target.
    pub migrated_count: u64,

    /// Records read but not written.
    pub skipped_count: u64,

    pub error_count: u64,
    pub errors: Vec<RecordError>,

    /// Target ids written by this run (compensating-delete manifest).
    pub written_target_ids: Vec<String>,

    /// Table-level failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    pub duration_seconds: f64,
}

impl TableResult {
    pub fn new(table: impl Into<String>, level: usize) -> Self {
        Self {
            table: table.into(),
            level,
            status: TableStatus::Pending,
            source_count: 0,
            migrated_count: 0,
            skipped_count: 0,
            error_count: 0,
            errors: Vec::new(),
            written_target_ids: Vec::new(),
            failure: None,
            duration_seconds: 0.0,
        }
    }

    /// A table that was never read.
    pub fn skipped(table: impl Into<String>, level: usize, reason: impl Into<String>) -> Self {
        let mut result = Self::new(table, level);
        result.status = TableStatus::Skipped;
        result.failure = Some(reason.into());
        result
    }

    fn push_error(&mut self, error: RecordError) {
        self.error_count += 1;
        self.errors.push(error);
    }

    fn fail(&mut self, reason: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(reason.into());
        }
        self.status = TableStatus::Failed;
    }
}

/// A record ready to be written.
#[derive(Debug, Clone)]
struct PreparedRecord {
    source_id: String,
    target_id: String,
    record: Record,
}

/// What a writer task did with its share of batches.
#[derive(Debug, Default)]
struct WriterOutcome {
    written: Vec<String>,
    errors: Vec<RecordError>,
    fatal: Option<String>,
    /// Records discarded unwritten after the table was aborted.
    dropped: u64,
}

/// Migrates tables from a source store into a target store.
pub struct TableMigrator {
    source: Arc<dyn StoreAdapter>,
    target: Arc<dyn StoreAdapter>,
    mapper: Arc<IdentityMapper>,
    config: TransferConfig,
    cancel: CancellationToken,
}

impl TableMigrator {
    pub fn new(
        source: Arc<dyn StoreAdapter>,
        target: Arc<dyn StoreAdapter>,
        mapper: Arc<IdentityMapper>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            mapper,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between batches once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Migrate one table. Never returns early on record errors; the result
    /// says how far the table got.
    pub async fn execute(&self, job: TransferJob) -> TableResult {
        let table = job.descriptor.name.clone();
        let start = Instant::now();
        let mut result = TableResult::new(&table, job.level);

        info!(
            "Starting transfer for {} (level {}, policy: {:?}, writers: {})",
            table, job.level, self.config.reference_policy, self.config.batch_writers
        );

        let (write_tx, write_rx) =
            async_channel::bounded::<Vec<PreparedRecord>>(self.config.batch_writers * 2);

        // Writers fire this on a fatal error so the dispatcher stops feeding them
        let abort = CancellationToken::new();

        let mut writer_handles = Vec::with_capacity(self.config.batch_writers);
        for writer_id in 0..self.config.batch_writers {
            let write_rx = write_rx.clone();
            let target = self.target.clone();
            let table = table.clone();
            let policy = self.config.retry;
            let abort = abort.clone();

            writer_handles.push(tokio::spawn(async move {
                run_writer(writer_id, target, table, policy, write_rx, abort).await
            }));
        }

        // Drop our copy so the channel closes when the writers are done
        drop(write_rx);

        let mut batch: Vec<PreparedRecord> = Vec::with_capacity(self.config.batch_size);
        let mut page_token: Option<PageToken> = None;
        let mut cancelled = false;

        'scan: loop {
            let page = match self.source.scan_table(&table, page_token.take()).await {
                Ok(page) => page,
                Err(e) => {
                    result.fail(format!("source scan failed: {}", e));
                    break;
                }
            };

            for record in page.records {
                if job.limit.is_some_and(|limit| result.source_count >= limit as u64) {
                    break 'scan;
                }
                result.source_count += 1;

                match prepare_record(&job.descriptor, record, &self.mapper) {
                    Ok(prepared) => batch.push(prepared),
                    Err(error) => {
                        let fatal = error.kind == RecordErrorKind::UnresolvedReference
                            && self.config.reference_policy == ReferencePolicy::Strict;
                        result.skipped_count += 1;
                        if fatal {
                            let reason =
                                format!("unresolved reference in record {}", error.source_id);
                            result.push_error(error);
                            result.fail(reason);
                            break 'scan;
                        }
                        debug!("{}: skipping {}: {}", table, error.source_id, error.detail);
                        result.push_error(error);
                    }
                }

                if batch.len() >= self.config.batch_size {
                    // Cancellation is honored between batches only
                    if self.cancel.is_cancelled() {
                        cancelled = true;
                        break 'scan;
                    }
                    if abort.is_cancelled() {
                        break 'scan;
                    }
                    let full = std::mem::replace(
                        &mut batch,
                        Vec::with_capacity(self.config.batch_size),
                    );
                    if let Err(unsent) = write_tx.send(full).await {
                        // Writers have all stopped
                        result.skipped_count += unsent.0.len() as u64;
                        break 'scan;
                    }
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // Flush the tail batch
        if !batch.is_empty() && !cancelled && !abort.is_cancelled() && !result.status.is_failure() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                result.skipped_count += batch.len() as u64;
            } else if let Err(unsent) = write_tx.send(batch).await {
                result.skipped_count += unsent.0.len() as u64;
            }
        } else {
            result.skipped_count += batch.len() as u64;
        }

        // Close write channel to signal writers to finish
        drop(write_tx);

        let mut written: HashSet<String> = HashSet::new();
        for handle in writer_handles {
            match handle.await {
                Ok(outcome) => {
                    result.migrated_count += outcome.written.len() as u64;
                    for id in outcome.written {
                        if written.insert(id.clone()) {
                            result.written_target_ids.push(id);
                        }
                    }
                    result.skipped_count += outcome.dropped + outcome.errors.len() as u64;
                    for error in outcome.errors {
                        // Dependents must not resolve to a record that was never written
                        self.mapper.forget(&table, &error.source_id);
                        result.push_error(error);
                    }
                    if let Some(reason) = outcome.fatal {
                        result.fail(reason);
                    }
                }
                Err(e) => result.fail(format!("writer task failed: {}", e)),
            }
        }

        if result.status == TableStatus::Pending {
            result.status = if cancelled {
                TableStatus::Cancelled
            } else {
                TableStatus::Completed
            };
        }
        result.duration_seconds = start.elapsed().as_secs_f64();

        match result.status {
            TableStatus::Completed => info!(
                "{}: migrated {} of {} records ({} skipped) in {:.2}s",
                table,
                result.migrated_count,
                result.source_count,
                result.skipped_count,
                result.duration_seconds
            ),
            TableStatus::Cancelled => warn!(
                "{}: cancelled after {} records",
                table, result.migrated_count
            ),
            _ => warn!(
                "{}: failed after {} records: {}",
                table,
                result.migrated_count,
                result.failure.as_deref().unwrap_or("unknown")
            ),
        }

        result
    }
}

async fn run_writer(
    writer_id: usize,
    target: Arc<dyn StoreAdapter>,
    table: String,
    policy: RetryPolicy,
    write_rx: async_channel::Receiver<Vec<PreparedRecord>>,
    abort: CancellationToken,
) -> WriterOutcome {
    let mut outcome = WriterOutcome::default();
    let store: &dyn StoreAdapter = target.as_ref();
    let table_name: &str = &table;

    // Keep draining after an abort so queued records are counted
    while let Ok(batch) = write_rx.recv().await {
        if abort.is_cancelled() {
            outcome.dropped += batch.len() as u64;
            continue;
        }
        let batch_len = batch.len();

        let mut records = batch.into_iter();
        while let Some(prepared) = records.next() {
            let what = format!("put {}/{}", table_name, prepared.target_id);
            let record = prepared.record;
            let put = with_backoff(&policy, &what, || {
                store.put_record(table_name, record.clone())
            })
            .await;

            match put {
                Ok(()) => outcome.written.push(prepared.target_id),
                Err(e) if e.is_retryable() => {
                    outcome.fatal = Some(format!(
                        "record {} still throttled after {} attempts",
                        prepared.source_id, policy.max_attempts
                    ));
                    outcome.errors.push(RecordError::new(
                        prepared.source_id,
                        RecordErrorKind::WriteFailure,
                        e.to_string(),
                    ));
                    outcome.dropped += records.len() as u64;
                    abort.cancel();
                    break;
                }
                Err(e) => {
                    warn!(
                        "{}: record {} rejected by target: {}",
                        table_name, prepared.source_id, e
                    );
                    outcome.errors.push(RecordError::new(
                        prepared.source_id,
                        RecordErrorKind::WriteFailure,
                        e.to_string(),
                    ));
                }
            }
        }

        debug!(
            "Writer {}: processed {} records (local total: {})",
            writer_id,
            batch_len,
            outcome.written.len()
        );
    }

    outcome
}

/// Rewrite one source record for the target.
///
/// Foreign keys are resolved before the record's own mapping is recorded, so
/// a record that is skipped never becomes resolvable for its dependents.
fn prepare_record(
    descriptor: &TableDescriptor,
    record: Record,
    mapper: &IdentityMapper,
) -> std::result::Result<PreparedRecord, RecordError> {
    let Some(source_id) = record.key_value(&descriptor.id_field) else {
        return Err(RecordError::new(
            "",
            RecordErrorKind::TransformError,
            format!("record has no '{}' attribute", descriptor.id_field),
        ));
    };

    let mut fields = record.into_inner();

    for dep in &descriptor.dependency_fields {
        let Some(value) = fields.get(&dep.field_name) else {
            continue;
        };
        if is_empty_reference(value) {
            continue;
        }
        let Some(reference) = key_string(value) else {
            return Err(RecordError::new(
                &source_id,
                RecordErrorKind::TransformError,
                format!("{} is not a scalar id", dep.field_name),
            ));
        };
        match mapper.resolve(&dep.target_table, &reference) {
            Resolution::Resolved(target_id) => {
                fields.insert(dep.field_name.clone(), Value::String(target_id));
            }
            Resolution::Unresolved => {
                return Err(RecordError::new(
                    &source_id,
                    RecordErrorKind::UnresolvedReference,
                    format!(
                        "{} = {} has no mapping in {}",
                        dep.field_name, reference, dep.target_table
                    ),
                ));
            }
        }
    }

    fields.remove(&descriptor.id_field);
    for excluded in &descriptor.exclude_fields {
        fields.remove(excluded);
    }
    for field in &descriptor.date_fields {
        // Only non-blank strings are dates; other values pass through.
        let Some(Value::String(raw)) = fields.get_mut(field) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        match normalize_date(raw) {
            Ok(Some(iso)) => *raw = iso,
            Ok(None) => {}
            Err(e) => {
                return Err(RecordError::new(
                    &source_id,
                    RecordErrorKind::TransformError,
                    format!("{field}: {e}"),
                ));
            }
        }
    }

    let mut out = Record::new();
    for (name, value) in fields {
        out.insert(descriptor.target_field_name(&name), normalize_value(value));
    }

    let target_id = mapper.map(&descriptor.name, &source_id);
    out.insert(TARGET_ID_FIELD, target_id.clone());

    Ok(PreparedRecord {
        source_id,
        target_id,
        record: out,
    })
}

/// Null, absent and blank foreign keys are "no reference".
fn is_empty_reference(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
