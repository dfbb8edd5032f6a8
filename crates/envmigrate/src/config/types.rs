//! Configuration type definitions with auto-tuning based on system resources.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::TableDescriptor;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Environment the data is read from.
    pub source: StoreConfig,

    /// Environment the data is written to.
    pub target: StoreConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Static declaration of every table and its foreign keys.
    #[serde(default)]
    pub tables: Vec<TableDescriptor>,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }

    /// Look up a table declaration by name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Kind of store backing an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// One JSON file per table in `path`.
    #[default]
    JsonDir,
    /// Process-local, starts empty. Useful for smoke runs.
    Memory,
}

/// One environment's store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Environment tag (e.g. "dev", "staging", "prod"). Required.
    #[serde(default)]
    pub environment: String,

    /// Store implementation (default: json_dir).
    #[serde(default)]
    pub kind: StoreKind,

    /// Store location (directory for json_dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Prefix of physical table names in this environment.
    #[serde(default)]
    pub table_prefix: String,

    /// Suffix of physical table names in this environment.
    #[serde(default)]
    pub table_suffix: String,

    /// Records per scan page (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl StoreConfig {
    /// Store config for an environment with defaults everywhere else.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            kind: StoreKind::default(),
            path: None,
            table_prefix: String::new(),
            table_suffix: String::new(),
            page_size: default_page_size(),
        }
    }

    /// Whether two configs point at the same physical tables.
    pub fn same_location(&self, other: &StoreConfig) -> bool {
        self.kind == other.kind
            && self.kind != StoreKind::Memory
            && self.path == other.path
            && self.table_prefix == other.table_prefix
            && self.table_suffix == other.table_suffix
    }
}

/// What to do with a record whose foreign key cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Fail the whole table.
    #[default]
    Strict,
    /// Skip the record and continue.
    Lenient,
}

/// What post-run validation failures do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Report mismatches for operator review.
    #[default]
    Report,
    /// Roll back tables that fail validation.
    AutoStrict,
}

/// Which tables an automatic rollback tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Failed tables plus every table depending on them.
    #[default]
    FailedTables,
    /// Every table written by the run.
    WholeRun,
}

/// Migration behavior configuration.
/// Performance fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Tables migrated concurrently within a level. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Records per write batch (default: 25).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Concurrent batch writers per table. Auto-tuned if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_writers: Option<usize>,

    /// Attempts per record write before a throttled write becomes fatal.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Unresolved foreign key handling (default: strict).
    #[serde(default)]
    pub reference_policy: ReferencePolicy,

    /// Target records sampled per table during validation.
    #[serde(default = "default_sample_size")]
    pub validation_sample_size: usize,

    /// Whether validation failures trigger rollback.
    #[serde(default)]
    pub validation_policy: ValidationPolicy,

    /// Tables torn down by an automatic rollback.
    #[serde(default)]
    pub rollback_scope: RollbackScope,

    /// Sustained writes per second assumed for duration estimates.
    #[serde(default = "default_write_rate")]
    pub estimated_write_rate: f64,

    /// Directory receiving analysis, report and checkpoint files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            workers: None,
            batch_size: None,
            batch_writers: None,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            reference_policy: ReferencePolicy::default(),
            validation_sample_size: default_sample_size(),
            validation_policy: ValidationPolicy::default(),
            rollback_scope: RollbackScope::default(),
            estimated_write_rate: default_write_rate(),
            output_dir: default_output_dir(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // Table workers: half the cores, 2-8. Store write capacity, not CPU,
        // is the real limit.
        if self.workers.is_none() {
            self.workers = Some((cores / 2).clamp(2, 8));
        }

        // Batch writers share one table's throughput limit, keep them few.
        if self.batch_writers.is_none() {
            self.batch_writers = Some((cores / 4).clamp(2, 4));
        }

        info!(
            "Auto-tuned config: workers={}, batch_writers={}, batch_size={}",
            self.get_workers(),
            self.get_batch_writers(),
            self.get_batch_size(),
        );

        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(25)
    }

    pub fn get_batch_writers(&self) -> usize {
        self.batch_writers.unwrap_or(2)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn default_page_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

fn default_sample_size() -> usize {
    20
}

fn default_write_rate() -> f64 {
    25.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("migration-output")
}
