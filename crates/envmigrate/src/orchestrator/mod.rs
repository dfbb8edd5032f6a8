//! Mode controller - main workflow coordinator.
//!
//! One [`Orchestrator::run`] call is one job in one [`Mode`]:
//!
//! - **analyze**: scan the source and project the run into memory, write
//!   `analysis-<runId>.json`
//! - **dry-run** / **test**: full (or one-table, capped) run against an
//!   in-memory projection of the target; the real target is only checked
//!   for reachability
//! - **migrate**: live run with a signed checkpoint after every table,
//!   automatic rollback on failure, `report-<runId>.json` at the end
//! - **rollback** / **status**: act on, or describe, an earlier checkpoint

mod report;

pub use report::{
    write_artifact, AnalysisReport, MigrationReport, RollbackRunReport, StatusReport,
    TableAnalysis, TableStatusLine,
};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ReferencePolicy, RollbackScope, ValidationPolicy};
use crate::core::StoreAdapter;
use crate::dependency::DependencyGraph;
use crate::drivers::{self, MemoryStore};
use crate::error::{MigrateError, Result, StoreError};
use crate::identity::IdentityMapper;
use crate::retry::RetryPolicy;
use crate::rollback::{RollbackManager, RollbackReport};
use crate::state::{
    latest_checkpoint, Checkpoint, CheckpointBackend, CheckpointManager, EventKind,
    FileCheckpointBackend, JobState, NoOpCheckpointBackend, TableCheckpoint,
};
use crate::transfer::{
    RecordErrorKind, TableMigrator, TableResult, TableStatus, TransferConfig, TransferJob,
};
use crate::verify::{existing_ids, TableExpectation, ValidationReport, Validator};

/// What a run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Analyze,
    DryRun,
    /// One table, at most `limit` source records, no target writes.
    Test { table: String, limit: usize },
    Migrate,
    Rollback { checkpoint: PathBuf },
    /// Latest checkpoint in the output directory when `None`.
    Status { checkpoint: Option<PathBuf> },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Analyze => "analyze",
            Mode::DryRun => "dry-run",
            Mode::Test { .. } => "test",
            Mode::Migrate => "migrate",
            Mode::Rollback { .. } => "rollback",
            Mode::Status { .. } => "status",
        }
    }

    /// Whether the mode writes to the real target store.
    pub fn writes_target(&self) -> bool {
        matches!(self, Mode::Migrate | Mode::Rollback { .. })
    }
}

/// What the operator approves before a live migration starts.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub run_id: String,
    pub source_environment: String,
    pub target_environment: String,
    pub levels: Vec<Vec<String>>,
    pub resumed: bool,
}

/// Gate in front of every live migration.
pub trait Approver: Send + Sync {
    fn approve(&self, plan: &RunPlan) -> bool;
}

impl Approver for bool {
    fn approve(&self, _plan: &RunPlan) -> bool {
        *self
    }
}

/// Result of [`Orchestrator::run`], one variant per artifact kind.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Analysis(AnalysisReport),
    Migration(MigrationReport),
    Rollback(RollbackRunReport),
    Status(StatusReport),
}

impl RunOutcome {
    /// Whether the run ended the way the operator asked.
    pub fn succeeded(&self) -> bool {
        match self {
            RunOutcome::Analysis(_) | RunOutcome::Status(_) => true,
            RunOutcome::Migration(report) => report.state == JobState::Completed,
            RunOutcome::Rollback(report) => report.rollback.complete,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            RunOutcome::Analysis(r) => serde_json::to_string_pretty(r)?,
            RunOutcome::Migration(r) => serde_json::to_string_pretty(r)?,
            RunOutcome::Rollback(r) => serde_json::to_string_pretty(r)?,
            RunOutcome::Status(r) => serde_json::to_string_pretty(r)?,
        };
        Ok(json)
    }
}

/// Everything the table tasks of one run share.
struct MigrationJob {
    run_id: String,
    mode: Mode,
    levels: Vec<Vec<String>>,
    /// Real target for migrate, in-memory projection otherwise.
    target: Arc<dyn StoreAdapter>,
    mapper: Arc<IdentityMapper>,
    checkpoint: Arc<CheckpointManager>,
}

/// How far the levels got.
#[derive(Default)]
struct LevelsOutcome {
    results: Vec<TableResult>,
    failed: Vec<String>,
    cancelled: bool,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn StoreAdapter>,
    target: Arc<dyn StoreAdapter>,
    approver: Arc<dyn Approver>,
    cancel: CancellationToken,
    resume_from: Option<PathBuf>,
    run_id: Option<String>,
}

impl Orchestrator {
    /// Validate the configuration and open both stores.
    ///
    /// Configuration errors surface here, before any store is touched.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source = drivers::from_config(&config.source)?;
        let target = drivers::from_config(&config.target)?;
        Ok(Self::assemble(config, source, target))
    }

    /// Like [`new`](Self::new) with caller-provided stores.
    pub fn with_stores(
        config: Config,
        source: Arc<dyn StoreAdapter>,
        target: Arc<dyn StoreAdapter>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, source, target))
    }

    fn assemble(config: Config, source: Arc<dyn StoreAdapter>, target: Arc<dyn StoreAdapter>) -> Self {
        Self {
            config,
            source,
            target,
            approver: Arc::new(false),
            cancel: CancellationToken::new(),
            resume_from: None,
            run_id: None,
        }
    }

    /// Approval for live migrations. Without one, migrate is refused.
    pub fn with_approver(mut self, approver: impl Approver + 'static) -> Self {
        self.approver = Arc::new(approver);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resume a live migration from its checkpoint file.
    pub fn resume_from(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.resume_from = Some(checkpoint.into());
        self
    }

    /// Use a fixed run id instead of a generated one.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn output_dir(&self) -> &Path {
        &self.config.migration.output_dir
    }

    /// Run one job.
    ///
    /// Table-level failures do not make this return `Err`: they are part of
    /// the [`MigrationReport`] (state `Failed` or `RolledBack`). `Err` means
    /// the job could not run at all.
    pub async fn run(&self, mode: Mode) -> Result<RunOutcome> {
        match mode {
            Mode::Analyze => self.analyze().await.map(RunOutcome::Analysis),
            Mode::Rollback { checkpoint } => {
                self.manual_rollback(&checkpoint).await.map(RunOutcome::Rollback)
            }
            Mode::Status { checkpoint } => {
                self.status(checkpoint.as_deref()).await.map(RunOutcome::Status)
            }
            mode => self.execute(mode).await.map(RunOutcome::Migration),
        }
    }

    /// Dry-run, test and migrate.
    async fn execute(&self, mode: Mode) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let live = mode == Mode::Migrate;

        let graph = DependencyGraph::build(&self.config.tables)?;
        let levels = self.plan_levels(&mode, &graph)?;

        let resume_backend: Option<Arc<dyn CheckpointBackend>> = match (&self.resume_from, live) {
            (Some(path), true) => Some(Arc::new(FileCheckpointBackend::new(path))),
            (Some(_), false) => {
                return Err(MigrateError::Config(format!(
                    "only a live migration can be resumed, not {}",
                    mode.name()
                )))
            }
            (None, _) => None,
        };
        let prior = match &resume_backend {
            Some(backend) => Some(self.load_for_resume(backend.as_ref()).await?),
            None => None,
        };
        let resumed = prior.is_some();
        let run_id = match &prior {
            Some(checkpoint) => checkpoint.run_id.clone(),
            None => self.run_id.clone().unwrap_or_else(new_run_id),
        };

        if live {
            let plan = RunPlan {
                run_id: run_id.clone(),
                source_environment: self.config.source.environment.clone(),
                target_environment: self.config.target.environment.clone(),
                levels: levels.clone(),
                resumed,
            };
            if !self.approver.approve(&plan) {
                return Err(MigrateError::ConfirmationRequired);
            }
        }

        info!(
            "Starting {} run {}: {} -> {}",
            mode.name(),
            run_id,
            self.config.source.environment,
            self.config.target.environment
        );

        info!("Phase 1: Probing stores");
        let missing = match self.preflight(&levels).await {
            Ok(missing) => missing,
            Err(e) => {
                error!("Run {} aborted: {}", run_id, e);
                self.write_aborted_report(&run_id, &mode, &levels, started_at, &e);
                return Err(e);
            }
        };

        let target: Arc<dyn StoreAdapter> = if live {
            self.target.clone()
        } else {
            info!("{} run writes to an in-memory projection", mode.name());
            Arc::new(MemoryStore::new())
        };

        let target_tag = self.config.target.environment.as_str();
        let mapper = Arc::new(match &prior {
            Some(checkpoint) => IdentityMapper::from_snapshot(target_tag, &checkpoint.identity_snapshot),
            None => IdentityMapper::new(target_tag),
        });
        if let Mode::Test { table, .. } = &mode {
            self.seed_dependencies(&mapper, table).await?;
        }

        let backend: Arc<dyn CheckpointBackend> = match (resume_backend, live) {
            (Some(backend), _) => backend,
            (None, true) => Arc::new(FileCheckpointBackend::for_run(self.output_dir(), &run_id)),
            (None, false) => Arc::new(NoOpCheckpointBackend::new()),
        };
        debug!("Checkpoint backend: {}", backend.backend_type());
        let checkpoint = prior.unwrap_or_else(|| {
            Checkpoint::new(
                &run_id,
                self.config.hash(),
                &self.config.source.environment,
                &self.config.target.environment,
                levels.clone(),
            )
        });
        let already_completed = checkpoint.completed_tables.len();
        let checkpoint = Arc::new(CheckpointManager::new(backend, checkpoint));
        checkpoint.transition(JobState::Running).await?;
        if resumed {
            checkpoint
                .push_event(
                    EventKind::RunResumed,
                    None,
                    format!("{} tables already completed", already_completed),
                )
                .await?;
            info!(
                "Resuming run {}: {} tables already completed",
                run_id, already_completed
            );
        } else {
            checkpoint
                .push_event(EventKind::RunStarted, None, format!("mode {}", mode.name()))
                .await?;
        }

        let job = MigrationJob {
            run_id,
            mode,
            levels,
            target,
            mapper,
            checkpoint,
        };

        info!("Phase 2: Migrating {} levels", job.levels.len());
        let outcome = self.run_levels(&job, &graph, &missing).await?;

        let mut validation: Option<ValidationReport> = None;
        let mut rollback: Option<RollbackReport> = None;
        let mut run_error: Option<String> = None;

        if outcome.cancelled {
            warn!("Run {} cancelled, checkpoint kept for resume", job.run_id);
            job.checkpoint.transition(JobState::Failed).await?;
            run_error = Some(MigrateError::Cancelled.to_string());
        } else if !outcome.failed.is_empty() {
            error!("Tables failed: {}", outcome.failed.join(", "));
            job.checkpoint.transition(JobState::Failed).await?;
            run_error = Some(format!("tables failed: {}", outcome.failed.join(", ")));
            if live {
                rollback = self.compensate(&job, &graph, &outcome.failed).await;
            }
        } else {
            info!("Phase 3: Validating");
            job.checkpoint.transition(JobState::Validating).await?;
            let snapshot = job.checkpoint.snapshot().await;
            let expectations = build_expectations(&outcome.results, &snapshot);
            let validator = Validator::new(
                job.target.clone(),
                &self.config.tables,
                self.config.migration.validation_sample_size,
            );

            match validator.validate(&expectations).await {
                Ok(report) if report.passed => {
                    job.checkpoint.transition(JobState::Completed).await?;
                    validation = Some(report);
                }
                Ok(report) => {
                    let failed = report.failed_tables();
                    let strict =
                        self.config.migration.validation_policy == ValidationPolicy::AutoStrict;
                    if strict && live {
                        error!("Validation failed for {}, rolling back", failed.join(", "));
                        job.checkpoint.transition(JobState::Failed).await?;
                        run_error = Some(
                            MigrateError::Validation(format!("tables {}", failed.join(", ")))
                                .to_string(),
                        );
                        rollback = self.compensate(&job, &graph, &failed).await;
                    } else {
                        warn!(
                            "Validation found {} problems in {}",
                            report.mismatch_count()
                                + report.tables.iter().filter(|t| !t.count_matches).count(),
                            failed.join(", ")
                        );
                        job.checkpoint.transition(JobState::Completed).await?;
                    }
                    validation = Some(report);
                }
                Err(e) => {
                    error!("Validation could not run: {}", e);
                    job.checkpoint.transition(JobState::Failed).await?;
                    run_error = Some(e.to_string());
                }
            }
        }

        let snapshot = job.checkpoint.snapshot().await;
        let mut tables = outcome.results;
        for result in &mut tables {
            if snapshot.rolled_back_tables.contains(&result.table) {
                result.status = TableStatus::RolledBack;
            }
        }

        let report = MigrationReport {
            run_id: job.run_id.clone(),
            mode: job.mode.name().to_string(),
            source_environment: self.config.source.environment.clone(),
            target_environment: self.config.target.environment.clone(),
            state: snapshot.state,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: start.elapsed().as_secs_f64(),
            levels: job.levels.clone(),
            tables,
            validation,
            rollback,
            identity_mappings: job.mapper.snapshot(),
            checkpoint: job.checkpoint.location(),
            error: run_error,
        };

        write_artifact(
            self.output_dir(),
            &MigrationReport::file_name(&report.run_id),
            &report,
        )?;

        info!(
            "Run {} finished as {:?}: {} records in {} tables ({:.1}s)",
            report.run_id,
            report.state,
            report.records_migrated(),
            report.tables.len(),
            report.duration_seconds
        );

        Ok(report)
    }

    /// Levels in scope for a mode.
    fn plan_levels(&self, mode: &Mode, graph: &DependencyGraph) -> Result<Vec<Vec<String>>> {
        match mode {
            Mode::Test { table, limit } => {
                if *limit == 0 {
                    return Err(MigrateError::Config(
                        "test limit must be at least 1".to_string(),
                    ));
                }
                if self.config.table(table).is_none() {
                    return Err(MigrateError::Config(format!(
                        "table '{}' is not declared",
                        table
                    )));
                }
                Ok(vec![vec![table.clone()]])
            }
            _ => Ok(graph.levels().to_vec()),
        }
    }

    async fn load_for_resume(&self, backend: &dyn CheckpointBackend) -> Result<Checkpoint> {
        let checkpoint = read_checkpoint(backend).await?;
        checkpoint.validate_config(&self.config.hash())?;
        if matches!(checkpoint.state, JobState::Completed | JobState::RolledBack) {
            return Err(MigrateError::State(format!(
                "run {} is already {:?}; start a new run instead",
                checkpoint.run_id, checkpoint.state
            )));
        }
        info!("Resuming from checkpoint: {:?}", backend.location());
        Ok(checkpoint)
    }

    /// Reach both stores, then check every table in scope exists in the
    /// source. Returns the optional tables that are absent.
    async fn preflight(&self, levels: &[Vec<String>]) -> Result<HashSet<String>> {
        check_reachable("source", &self.config.source.environment, self.source.as_ref()).await?;
        check_reachable("target", &self.config.target.environment, self.target.as_ref()).await?;

        let mut missing = HashSet::new();
        for name in levels.iter().flatten() {
            let exists = self.source.table_exists(name).await.map_err(|e| {
                MigrateError::Connectivity(format!("cannot describe source table {}: {}", name, e))
            })?;
            if exists {
                continue;
            }
            let required = self.config.table(name).map_or(true, |d| d.is_required);
            if required {
                return Err(MigrateError::Config(format!(
                    "required table '{}' does not exist in source environment '{}'",
                    name, self.config.source.environment
                )));
            }
            warn!("Optional table {} is absent from the source, skipping", name);
            missing.insert(name.clone());
        }
        Ok(missing)
    }

    /// Map every source id of the tested table's dependencies so its
    /// foreign keys resolve without migrating them.
    async fn seed_dependencies(&self, mapper: &IdentityMapper, table: &str) -> Result<()> {
        let Some(descriptor) = self.config.table(table) else {
            return Ok(());
        };
        for dep_table in descriptor.referenced_tables() {
            let Some(dep) = self.config.table(dep_table) else {
                continue;
            };
            let records = match self.source.scan_all(dep_table).await {
                Ok(records) => records,
                Err(StoreError::TableNotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let ids: Vec<String> = records
                .iter()
                .filter_map(|r| r.key_value(&dep.id_field))
                .collect();
            mapper.seed(dep_table, ids.iter().map(String::as_str));
            debug!("Seeded {} mappings for {}", ids.len(), dep_table);
        }
        Ok(())
    }

    /// Run the levels in order, tables within a level concurrently.
    ///
    /// The first failed or cancelled table stops later levels from starting;
    /// tables already running in the same level finish.
    async fn run_levels(
        &self,
        job: &MigrationJob,
        graph: &DependencyGraph,
        missing: &HashSet<String>,
    ) -> Result<LevelsOutcome> {
        let workers = self.config.migration.get_workers();
        let semaphore = Arc::new(Semaphore::new(workers));
        let migrator = Arc::new(
            TableMigrator::new(
                self.source.clone(),
                job.target.clone(),
                job.mapper.clone(),
                TransferConfig::from_config(&self.config.migration),
            )
            .with_cancellation(self.cancel.clone()),
        );
        let prior = job.checkpoint.snapshot().await;
        let mut outcome = LevelsOutcome::default();

        for (index, level) in job.levels.iter().enumerate() {
            let halted = outcome.cancelled || !outcome.failed.is_empty();
            if !halted && self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping new transfers");
                outcome.cancelled = true;
            }
            if outcome.cancelled || !outcome.failed.is_empty() {
                for name in level {
                    let level_no = graph.level_of(name).unwrap_or(index);
                    outcome.results.push(TableResult::new(name, level_no));
                }
                continue;
            }

            info!("Level {}: {}", index, level.join(", "));
            let mut handles = Vec::with_capacity(level.len());

            for name in level {
                let level_no = graph.level_of(name).unwrap_or(index);

                if prior.is_table_completed(name) {
                    let mut result =
                        TableResult::skipped(name, level_no, "completed by an earlier attempt");
                    if let Some(entry) = prior.tables.get(name) {
                        result.migrated_count = entry.migrated_count;
                    }
                    outcome.results.push(result);
                    continue;
                }
                if missing.contains(name) {
                    outcome.results.push(TableResult::skipped(
                        name,
                        level_no,
                        "optional table absent from source",
                    ));
                    continue;
                }
                let Some(descriptor) = self.config.table(name).cloned() else {
                    continue;
                };

                let mut transfer = TransferJob::new(descriptor, level_no);
                if let Mode::Test { limit, .. } = &job.mode {
                    transfer = transfer.with_limit(*limit);
                }

                let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                    MigrateError::State(format!("worker pool closed: {}", e))
                })?;
                let migrator = migrator.clone();
                let target = job.target.clone();
                let checkpoint = job.checkpoint.clone();
                let mapper = job.mapper.clone();

                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    migrate_table(migrator, target, checkpoint, mapper, transfer).await
                });
                handles.push((name.clone(), level_no, handle));
            }

            for (name, level_no, handle) in handles {
                let result = match handle.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => failed_result(&name, level_no, e.to_string()),
                    Err(e) => failed_result(&name, level_no, format!("table task panicked: {}", e)),
                };
                match result.status {
                    TableStatus::Failed => outcome.failed.push(name),
                    TableStatus::Cancelled => outcome.cancelled = true,
                    _ => {}
                }
                outcome.results.push(result);
            }

            if !outcome.failed.is_empty() {
                warn!(
                    "Level {} had failures, not starting further levels",
                    index
                );
            }
        }

        Ok(outcome)
    }

    /// Automatic rollback after a failure. The run stays `Failed` when the
    /// rollback could not restore every table.
    async fn compensate(
        &self,
        job: &MigrationJob,
        graph: &DependencyGraph,
        failed: &[String],
    ) -> Option<RollbackReport> {
        let snapshot = job.checkpoint.snapshot().await;
        let candidates = snapshot.rollback_candidates(&graph.teardown_order());
        let tables: Vec<String> = match self.config.migration.rollback_scope {
            RollbackScope::WholeRun => candidates,
            RollbackScope::FailedTables => {
                let scope: HashSet<String> = graph.with_dependents(failed).into_iter().collect();
                candidates.into_iter().filter(|t| scope.contains(t)).collect()
            }
        };

        info!("Phase 4: Rolling back {}", tables.join(", "));
        let manager = RollbackManager::new(
            job.target.clone(),
            RetryPolicy::from_config(&self.config.migration),
            self.config.migration.get_batch_writers(),
        );

        let report = match manager.rollback(&job.checkpoint, &tables).await {
            Ok(report) => report,
            Err(e) => {
                error!("Rollback aborted: {}", e);
                return None;
            }
        };

        for table in &report.tables {
            if table.errors.is_empty() {
                job.mapper.forget_table(&table.table);
            }
        }
        if report.complete {
            if let Err(e) = job.checkpoint.transition(JobState::RolledBack).await {
                error!("Failed to record rollback: {}", e);
            }
        } else {
            warn!("Rollback incomplete, run {} stays failed", job.run_id);
        }
        Some(report)
    }

    /// Projection of a full run without touching the target.
    async fn analyze(&self) -> Result<AnalysisReport> {
        let graph = DependencyGraph::build(&self.config.tables)?;
        let levels = graph.levels().to_vec();
        let run_id = self.run_id.clone().unwrap_or_else(new_run_id);

        info!("Starting analysis {}", run_id);
        let missing = self.preflight(&levels).await?;

        // Every unresolved reference is counted, never fatal
        let mut transfer = TransferConfig::from_config(&self.config.migration);
        transfer.reference_policy = ReferencePolicy::Lenient;
        let projection: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let mapper = Arc::new(IdentityMapper::new(&self.config.target.environment));
        let migrator = TableMigrator::new(self.source.clone(), projection, mapper, transfer)
            .with_cancellation(self.cancel.clone());
        let rate = self.config.migration.estimated_write_rate;

        let mut tables = Vec::new();
        for (level_no, level) in levels.iter().enumerate() {
            for name in level {
                let Some(descriptor) = self.config.table(name).cloned() else {
                    continue;
                };
                let required = descriptor.is_required;
                let exists = !missing.contains(name);
                let source_row_estimate = approx_rows(self.source.as_ref(), name).await.unwrap_or(0);
                let target_rows_before = approx_rows(self.target.as_ref(), name).await.unwrap_or(0);

                let mut analysis = TableAnalysis {
                    table: name.clone(),
                    level: level_no,
                    required,
                    exists_in_source: exists,
                    source_row_estimate,
                    target_rows_before,
                    scanned: 0,
                    would_migrate: 0,
                    would_skip: 0,
                    unresolved_references: 0,
                    estimated_seconds: 0.0,
                };
                if exists {
                    let result = migrator.execute(TransferJob::new(descriptor, level_no)).await;
                    analysis.scanned = result.source_count;
                    analysis.would_migrate = result.migrated_count;
                    analysis.would_skip = result.skipped_count;
                    analysis.unresolved_references = result
                        .errors
                        .iter()
                        .filter(|e| e.kind == RecordErrorKind::UnresolvedReference)
                        .count() as u64;
                    analysis.estimated_seconds = analysis.would_migrate as f64 / rate;
                }
                tables.push(analysis);
            }
        }

        let report = AnalysisReport {
            run_id: run_id.clone(),
            source_environment: self.config.source.environment.clone(),
            target_environment: self.config.target.environment.clone(),
            generated_at: Utc::now(),
            levels,
            total_records: tables.iter().map(|t| t.scanned).sum(),
            would_migrate: tables.iter().map(|t| t.would_migrate).sum(),
            would_skip: tables.iter().map(|t| t.would_skip).sum(),
            estimated_duration_seconds: tables.iter().map(|t| t.estimated_seconds).sum(),
            tables,
        };

        write_artifact(self.output_dir(), &AnalysisReport::file_name(&run_id), &report)?;
        info!(
            "Analysis {}: {} records, {} would migrate, {} would be skipped, ~{:.0}s",
            run_id,
            report.total_records,
            report.would_migrate,
            report.would_skip,
            report.estimated_duration_seconds
        );
        Ok(report)
    }

    /// Delete everything a checkpointed run created, dependents first.
    async fn manual_rollback(&self, path: &Path) -> Result<RollbackRunReport> {
        let backend: Arc<dyn CheckpointBackend> = Arc::new(FileCheckpointBackend::new(path));
        let checkpoint = read_checkpoint(backend.as_ref()).await?;
        if checkpoint.target_environment != self.config.target.environment {
            return Err(MigrateError::Config(format!(
                "checkpoint targets '{}' but the configuration targets '{}'",
                checkpoint.target_environment, self.config.target.environment
            )));
        }
        check_reachable("target", &self.config.target.environment, self.target.as_ref()).await?;

        let run_id = checkpoint.run_id.clone();
        let tables = checkpoint.rollback_candidates(&checkpoint.teardown_order());
        let manager = CheckpointManager::new(backend, checkpoint);

        if matches!(
            manager.state().await,
            JobState::Pending | JobState::Running | JobState::Validating
        ) {
            manager.transition(JobState::Failed).await?;
        }

        info!("Rolling back run {} ({} tables)", run_id, tables.len());
        let rollback = RollbackManager::new(
            self.target.clone(),
            RetryPolicy::from_config(&self.config.migration),
            self.config.migration.get_batch_writers(),
        )
        .rollback(&manager, &tables)
        .await?;

        if rollback.complete {
            manager.transition(JobState::RolledBack).await?;
        }

        let report = RollbackRunReport {
            run_id: run_id.clone(),
            checkpoint: path.to_path_buf(),
            state: manager.state().await,
            rollback,
            completed_at: Utc::now(),
        };
        write_artifact(self.output_dir(), &RollbackRunReport::file_name(&run_id), &report)?;
        Ok(report)
    }

    /// Describe a checkpoint together with current row estimates.
    async fn status(&self, path: Option<&Path>) -> Result<StatusReport> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => latest_checkpoint(self.output_dir())?.ok_or_else(|| {
                MigrateError::State(format!(
                    "no checkpoint found in {}",
                    self.output_dir().display()
                ))
            })?,
        };
        let checkpoint = read_checkpoint(&FileCheckpointBackend::new(&path)).await?;

        let mut tables = Vec::new();
        for (level, names) in checkpoint.levels.iter().enumerate() {
            for name in names {
                let entry = checkpoint.tables.get(name);
                tables.push(TableStatusLine {
                    table: name.clone(),
                    level,
                    status: entry.map(|e| e.status.clone()),
                    created_records: entry.map_or(0, |e| e.created_target_ids.len()),
                    source_rows: approx_rows(self.source.as_ref(), name).await,
                    target_rows: approx_rows(self.target.as_ref(), name).await,
                });
            }
        }

        Ok(StatusReport {
            run_id: checkpoint.run_id,
            checkpoint: path,
            state: checkpoint.state,
            source_environment: checkpoint.source_environment,
            target_environment: checkpoint.target_environment,
            started_at: checkpoint.started_at,
            updated_at: checkpoint.updated_at,
            completed_tables: checkpoint.completed_tables,
            rolled_back_tables: checkpoint.rolled_back_tables,
            tables,
        })
    }

    /// Report for a run that stopped before any table started.
    fn write_aborted_report(
        &self,
        run_id: &str,
        mode: &Mode,
        levels: &[Vec<String>],
        started_at: DateTime<Utc>,
        cause: &MigrateError,
    ) {
        let report = MigrationReport {
            run_id: run_id.to_string(),
            mode: mode.name().to_string(),
            source_environment: self.config.source.environment.clone(),
            target_environment: self.config.target.environment.clone(),
            state: JobState::Failed,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0,
            levels: levels.to_vec(),
            tables: Vec::new(),
            validation: None,
            rollback: None,
            identity_mappings: Vec::new(),
            checkpoint: None,
            error: Some(cause.to_string()),
        };
        if let Err(e) = write_artifact(self.output_dir(), &MigrationReport::file_name(run_id), &report) {
            warn!("Failed to write report for aborted run {}: {}", run_id, e);
        }
    }
}

/// Migrate one table and checkpoint what it created.
async fn migrate_table(
    migrator: Arc<TableMigrator>,
    target: Arc<dyn StoreAdapter>,
    checkpoint: Arc<CheckpointManager>,
    mapper: Arc<IdentityMapper>,
    job: TransferJob,
) -> Result<TableResult> {
    let table = job.descriptor.name.clone();
    let baseline = existing_ids(target.as_ref(), &table).await?;

    let result = migrator.execute(job).await;

    let created: Vec<String> = result
        .written_target_ids
        .iter()
        .filter(|id| !baseline.contains(id.as_str()))
        .cloned()
        .collect();
    let entry = TableCheckpoint {
        status: result.status.clone(),
        baseline_rows: baseline.len() as u64,
        created_target_ids: created,
        migrated_count: result.migrated_count,
        error: result.failure.clone(),
        updated_at: Utc::now(),
    };
    checkpoint.record_table(&table, entry, &mapper).await?;
    Ok(result)
}

/// Read a stored checkpoint; a backend with nothing stored is an error.
async fn read_checkpoint(backend: &dyn CheckpointBackend) -> Result<Checkpoint> {
    backend.load().await?.ok_or_else(|| match backend.location() {
        Some(path) => MigrateError::State(format!("no checkpoint at {}", path.display())),
        None => MigrateError::State(format!(
            "{} backend holds no checkpoint",
            backend.backend_type()
        )),
    })
}

fn failed_result(table: &str, level: usize, reason: String) -> TableResult {
    let mut result = TableResult::new(table, level);
    result.status = TableStatus::Failed;
    result.failure = Some(reason);
    result
}

/// Expected target state of every table the run completed, this attempt or
/// an earlier one.
fn build_expectations(results: &[TableResult], checkpoint: &Checkpoint) -> Vec<TableExpectation> {
    results
        .iter()
        .filter(|r| {
            r.status == TableStatus::Completed
                || (r.status == TableStatus::Skipped && checkpoint.is_table_completed(&r.table))
        })
        .filter_map(|r| {
            let entry = checkpoint.tables.get(&r.table)?;
            let written = if r.written_target_ids.is_empty() {
                entry.created_target_ids.clone()
            } else {
                r.written_target_ids.clone()
            };
            Some(TableExpectation {
                table: r.table.clone(),
                expected_rows: entry.baseline_rows + entry.created_target_ids.len() as u64,
                written_target_ids: written,
            })
        })
        .collect()
}

async fn check_reachable(role: &str, environment: &str, store: &dyn StoreAdapter) -> Result<()> {
    let tables = store.list_tables().await.map_err(|e| {
        MigrateError::Connectivity(format!(
            "{} environment '{}' ({}) is unreachable: {}",
            role,
            environment,
            store.store_type(),
            e
        ))
    })?;
    debug!("{} '{}' lists {} tables", role, environment, tables.len());
    Ok(())
}

/// Approximate row count; zero for a missing table, `None` when the store
/// cannot be reached.
async fn approx_rows(store: &dyn StoreAdapter, table: &str) -> Option<u64> {
    match store.describe_table(table).await {
        Ok(description) => Some(description.approx_row_count),
        Err(StoreError::TableNotFound(_)) => Some(0),
        Err(e) => {
            debug!("Cannot describe {}: {}", table, e);
            None
        }
    }
}

fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), &suffix[..8])
}
