//! # envmigrate
//!
//! Dependency-ordered migration of relational datasets between table-store
//! environments (dev, staging, production).
//!
//! This library provides the core functionality for copying a set of
//! related tables from a source environment into a target environment with
//! support for:
//!
//! - **Dependency ordering** of tables by their declared foreign keys
//! - **Deterministic id rewriting** so re-runs never duplicate records
//! - **Concurrent, throttle-aware writes** with bounded retries
//! - **Post-run validation** of counts and sampled references
//! - **Checkpoints** for resume and compensating rollback
//! - **Read-only modes** (analyze, dry-run, test) that never write the target
//!
//! ## Example
//!
//! ```rust,no_run
//! use envmigrate::{Config, Mode, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?.with_approver(true);
//!     let outcome = orchestrator.run(Mode::Migrate).await?;
//!     println!("{}", outcome.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dependency;
pub mod drivers;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod retry;
pub mod rollback;
pub mod state;
pub mod transfer;
pub mod verify;

// Re-exports for convenient access
pub use config::{
    Config, MigrationConfig, ReferencePolicy, RollbackScope, StoreConfig, StoreKind,
    ValidationPolicy,
};
pub use core::{Record, StoreAdapter, TableDescriptor};
pub use dependency::DependencyGraph;
pub use drivers::{JsonDirStore, MemoryStore, NamespacedStore};
pub use error::{MigrateError, Result, StoreError};
pub use identity::{derive_target_id, IdentityMapper, IdentityMapping};
pub use orchestrator::{
    AnalysisReport, Approver, MigrationReport, Mode, Orchestrator, RollbackRunReport, RunOutcome,
    RunPlan, StatusReport,
};
pub use rollback::{RollbackManager, RollbackReport};
pub use state::{Checkpoint, JobState};
pub use transfer::{TableMigrator, TableResult, TableStatus, TransferConfig, TransferJob};
pub use verify::{ValidationReport, Validator};
