//! End-to-end runs of the orchestrator over in-memory stores.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use envmigrate::config::{MigrationConfig, StoreConfig, StoreKind};
use envmigrate::core::{DeleteOutcome, PageToken, ScanPage, StoreResult, TableDescription};
use envmigrate::{
    derive_target_id, Checkpoint, Config, JobState, MemoryStore, MigrateError, MigrationReport,
    Mode, Orchestrator, Record, RollbackScope, RunOutcome, StoreAdapter, TableDescriptor,
    TableStatus, ValidationPolicy,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn tables() -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new("Contacts"),
        TableDescriptor::new("Affiliates"),
        TableDescriptor::new("Projects")
            .with_dependency("homeownerContactId", "Contacts")
            .with_dependency("agentId", "Affiliates"),
        TableDescriptor::new("Quotes")
            .with_dependency("projectId", "Projects")
            .with_dependency("contactId", "Contacts"),
        TableDescriptor::new("QuoteItems").with_dependency("quoteId", "Quotes"),
    ]
}

fn config(output_dir: &Path, tables: Vec<TableDescriptor>) -> Config {
    let mut source = StoreConfig::new("dev");
    source.kind = StoreKind::Memory;
    let mut target = StoreConfig::new("prod");
    target.kind = StoreKind::Memory;
    Config {
        source,
        target,
        migration: MigrationConfig {
            workers: Some(2),
            batch_size: Some(2),
            batch_writers: Some(1),
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
            output_dir: output_dir.to_path_buf(),
            ..Default::default()
        },
        tables,
    }
}

fn source() -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new()
            .with_table(
                "Contacts",
                [
                    Record::new().with("id", "c1").with("name", "Ada"),
                    Record::new().with("id", "c2").with("name", "Grace"),
                ],
            )
            .with_table("Affiliates", [Record::new().with("id", "a1")])
            .with_table(
                "Projects",
                [
                    Record::new()
                        .with("id", "p1")
                        .with("homeownerContactId", "c1")
                        .with("agentId", "a1"),
                    Record::new()
                        .with("id", "p2")
                        .with("homeownerContactId", "c2")
                        .with("agentId", serde_json::Value::Null),
                ],
            )
            .with_table(
                "Quotes",
                [
                    Record::new()
                        .with("id", "q1")
                        .with("projectId", "p1")
                        .with("contactId", "c1"),
                    Record::new()
                        .with("id", "q2")
                        .with("projectId", "p2")
                        .with("contactId", "c2"),
                    Record::new()
                        .with("id", "q3")
                        .with("projectId", "p1")
                        .with("contactId", "c2"),
                ],
            )
            .with_table(
                "QuoteItems",
                [
                    Record::new().with("id", "i1").with("quoteId", "q1"),
                    Record::new().with("id", "i2").with("quoteId", "q3"),
                ],
            ),
    )
}

fn prod(table: &str, id: &str) -> String {
    derive_target_id(table, id, "prod")
}

async fn migrate(orchestrator: &Orchestrator, mode: Mode) -> MigrationReport {
    match orchestrator.run(mode).await.unwrap() {
        RunOutcome::Migration(report) => report,
        other => panic!("expected a migration report, got {:?}", other),
    }
}

#[tokio::test]
async fn test_levels_and_reference_rewrite() {
    let dir = TempDir::new().unwrap();
    let target = Arc::new(MemoryStore::new());
    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), source(), target.clone())
            .unwrap()
            .with_approver(true);

    let report = migrate(&orchestrator, Mode::Migrate).await;

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(
        report.levels,
        vec![
            vec!["Contacts", "Affiliates"],
            vec!["Projects"],
            vec!["Quotes"],
            vec!["QuoteItems"],
        ]
    );
    assert!(report.validation.as_ref().unwrap().passed);

    let quote = target.get("Quotes", &prod("Quotes", "q1")).unwrap();
    assert_eq!(quote.get("projectId"), Some(&json!(prod("Projects", "p1"))));
    assert_eq!(quote.get("contactId"), Some(&json!(prod("Contacts", "c1"))));

    // null foreign keys are copied as null
    let project = target.get("Projects", &prod("Projects", "p2")).unwrap();
    assert_eq!(project.get("agentId"), Some(&serde_json::Value::Null));

    let item = target.get("QuoteItems", &prod("QuoteItems", "i2")).unwrap();
    assert_eq!(item.get("quoteId"), Some(&json!(prod("Quotes", "q3"))));
    assert_eq!(report.identity_mappings.len(), 10);
}

#[tokio::test]
async fn test_throttled_table_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let mut tables = tables();
    // Projects and Quotes share a level
    tables[3] = TableDescriptor::new("Quotes").with_dependency("contactId", "Contacts");
    let target = Arc::new(
        MemoryStore::new().with_table("Quotes", [Record::new().with("id", "q-old")]),
    );
    target.throttle_after("Quotes", 1);

    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables), source(), target.clone())
            .unwrap()
            .with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;

    assert_eq!(report.state, JobState::RolledBack);
    assert_eq!(report.table("Quotes").unwrap().status, TableStatus::RolledBack);
    assert_eq!(report.table("QuoteItems").unwrap().status, TableStatus::Pending);
    assert_eq!(report.table("Projects").unwrap().status, TableStatus::Completed);

    // back to the pre-run baseline
    assert_eq!(target.row_count("Quotes"), 1);
    assert!(target.get("Quotes", "q-old").is_some());
    let quotes = report.rollback.as_ref().unwrap().table("Quotes").unwrap();
    assert_eq!(quotes.deleted, 1);
    assert!(quotes.restored);

    // earlier tables stay migrated
    assert_eq!(target.row_count("Contacts"), 2);
    assert_eq!(target.row_count("Projects"), 2);
    assert_eq!(target.row_count("QuoteItems"), 0);

    let checkpoint = Checkpoint::load(report.checkpoint.as_ref().unwrap()).unwrap();
    assert_eq!(checkpoint.state, JobState::RolledBack);
    assert_eq!(checkpoint.rolled_back_tables, vec!["Quotes"]);
    assert!(checkpoint.is_table_completed("Projects"));
}

#[tokio::test]
async fn test_whole_run_rollback_scope() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), tables());
    config.migration.rollback_scope = RollbackScope::WholeRun;
    let target = Arc::new(MemoryStore::new());
    target.throttle_after("QuoteItems", 0);

    let orchestrator = Orchestrator::with_stores(config, source(), target.clone())
        .unwrap()
        .with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;

    assert_eq!(report.state, JobState::RolledBack);
    for table in ["Contacts", "Affiliates", "Projects", "Quotes", "QuoteItems"] {
        assert_eq!(target.row_count(table), 0, "{} not rolled back", table);
    }
    assert!(report.identity_mappings.is_empty());
}

#[tokio::test]
async fn test_dry_run_matches_migrate_without_writes() {
    let dir = TempDir::new().unwrap();
    let target = Arc::new(MemoryStore::new());
    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), source(), target.clone())
            .unwrap()
            .with_approver(true);

    let dry = migrate(&orchestrator, Mode::DryRun).await;
    assert_eq!(dry.state, JobState::Completed);
    assert_eq!(target.put_calls(), 0);
    assert!(dry.checkpoint.is_none());

    let live = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(live.identity_mappings, dry.identity_mappings);
    for (d, l) in dry.tables.iter().zip(&live.tables) {
        assert_eq!(d.table, l.table);
        assert_eq!(d.migrated_count, l.migrated_count);
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let target = Arc::new(MemoryStore::new());
    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), source(), target.clone())
            .unwrap()
            .with_approver(true);

    let first = migrate(&orchestrator, Mode::Migrate).await;
    let counts: Vec<usize> = first.tables.iter().map(|t| target.row_count(&t.table)).collect();

    let second = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(second.state, JobState::Completed);
    let again: Vec<usize> = second.tables.iter().map(|t| target.row_count(&t.table)).collect();
    assert_eq!(counts, again);
    assert_eq!(first.identity_mappings, second.identity_mappings);

    // the second run created nothing, so rolling it back deletes nothing
    let checkpoint = Checkpoint::load(second.checkpoint.as_ref().unwrap()).unwrap();
    assert!(checkpoint
        .tables
        .values()
        .all(|t| t.created_target_ids.is_empty()));
}

/// Source that fires a cancellation token the first time a table is scanned.
struct CancellingSource {
    inner: Arc<MemoryStore>,
    trigger: &'static str,
    cancel: CancellationToken,
}

#[async_trait]
impl StoreAdapter for CancellingSource {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn describe_table(&self, table: &str) -> StoreResult<TableDescription> {
        self.inner.describe_table(table).await
    }

    async fn scan_table(&self, table: &str, token: Option<PageToken>) -> StoreResult<ScanPage> {
        if table == self.trigger {
            self.cancel.cancel();
        }
        self.inner.scan_table(table, token).await
    }

    async fn put_record(&self, table: &str, record: Record) -> StoreResult<()> {
        self.inner.put_record(table, record).await
    }

    async fn delete_record(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome> {
        self.inner.delete_record(table, id).await
    }

    fn store_type(&self) -> &'static str {
        "cancelling"
    }
}

#[tokio::test]
async fn test_cancelled_run_resumes() {
    let dir = TempDir::new().unwrap();
    let target = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let interrupted = Arc::new(CancellingSource {
        inner: source(),
        trigger: "Projects",
        cancel: cancel.clone(),
    });

    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), interrupted, target.clone())
            .unwrap()
            .with_approver(true)
            .with_cancellation(cancel);
    let first = migrate(&orchestrator, Mode::Migrate).await;

    assert_eq!(first.state, JobState::Failed);
    assert!(first.rollback.is_none());
    assert_eq!(first.table("Projects").unwrap().status, TableStatus::Cancelled);
    assert_eq!(target.row_count("Contacts"), 2);
    let checkpoint_path = first.checkpoint.clone().unwrap();

    let resumed = Orchestrator::with_stores(config(dir.path(), tables()), source(), target.clone())
        .unwrap()
        .with_approver(true)
        .resume_from(&checkpoint_path);
    let second = migrate(&resumed, Mode::Migrate).await;

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(second.table("Contacts").unwrap().status, TableStatus::Skipped);
    assert_eq!(target.row_count("QuoteItems"), 2);

    // references into tables completed before the interruption still resolve
    let project = target.get("Projects", &prod("Projects", "p1")).unwrap();
    assert_eq!(
        project.get("homeownerContactId"),
        Some(&json!(prod("Contacts", "c1")))
    );

    let checkpoint = Checkpoint::load(&checkpoint_path).unwrap();
    assert!(checkpoint
        .events
        .iter()
        .any(|e| e.kind == envmigrate::state::EventKind::RunResumed));
}

#[tokio::test]
async fn test_resume_rejects_changed_config() {
    let dir = TempDir::new().unwrap();
    let target = Arc::new(MemoryStore::new());
    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), source(), target.clone())
            .unwrap()
            .with_approver(true)
            .with_cancellation({
                let token = CancellationToken::new();
                token.cancel();
                token
            });
    let first = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(first.state, JobState::Failed);
    assert_eq!(target.put_calls(), 0);

    let mut changed = config(dir.path(), tables());
    changed.tables.pop();
    let err = Orchestrator::with_stores(changed, source(), target)
        .unwrap()
        .with_approver(true)
        .resume_from(first.checkpoint.unwrap())
        .run(Mode::Migrate)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::ConfigChanged));
}

#[tokio::test]
async fn test_manual_rollback_keeps_pre_existing_rows() {
    let dir = TempDir::new().unwrap();
    let target = Arc::new(
        MemoryStore::new().with_table("Contacts", [Record::new().with("id", "existing")]),
    );
    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), source(), target.clone())
            .unwrap()
            .with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(target.row_count("Contacts"), 3);

    let outcome = orchestrator
        .run(Mode::Rollback {
            checkpoint: report.checkpoint.clone().unwrap(),
        })
        .await
        .unwrap();
    let RunOutcome::Rollback(rollback) = outcome else {
        panic!("expected a rollback report");
    };
    assert_eq!(rollback.state, JobState::RolledBack);
    assert!(rollback.rollback.complete);
    assert_eq!(
        rollback
            .rollback
            .tables
            .iter()
            .map(|t| t.table.as_str())
            .collect::<Vec<_>>(),
        vec!["QuoteItems", "Quotes", "Projects", "Affiliates", "Contacts"]
    );
    assert_eq!(target.row_count("Contacts"), 1);
    assert!(target.get("Contacts", "existing").is_some());

    let RunOutcome::Status(status) = orchestrator
        .run(Mode::Status { checkpoint: None })
        .await
        .unwrap()
    else {
        panic!("expected a status report");
    };
    assert_eq!(status.state, JobState::RolledBack);
    assert_eq!(status.rolled_back_tables.len(), 5);
    assert_eq!(status.tables[0].target_rows, Some(1));
}

#[tokio::test]
async fn test_strict_unresolved_reference_rolls_back_live_run() {
    let dir = TempDir::new().unwrap();
    let source = source();
    source.insert(
        "QuoteItems",
        Record::new().with("id", "i3").with("quoteId", "ghost"),
    );
    let target = Arc::new(MemoryStore::new());
    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), source.clone(), target.clone())
            .unwrap()
            .with_approver(true);

    let report = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(report.state, JobState::RolledBack);
    assert_eq!(target.row_count("QuoteItems"), 0);
    assert_eq!(target.row_count("Quotes"), 3);

    let mut lenient = config(dir.path(), tables());
    lenient.migration.reference_policy = envmigrate::ReferencePolicy::Lenient;
    let orchestrator = Orchestrator::with_stores(lenient, source, target.clone())
        .unwrap()
        .with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(report.state, JobState::Completed);
    let items = report.table("QuoteItems").unwrap();
    assert_eq!(items.migrated_count, 2);
    assert_eq!(items.skipped_count, 1);
}

/// Target that acknowledges writes to one table without storing them.
struct LossyTarget {
    inner: Arc<MemoryStore>,
    lossy: &'static str,
}

#[async_trait]
impl StoreAdapter for LossyTarget {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn describe_table(&self, table: &str) -> StoreResult<TableDescription> {
        self.inner.describe_table(table).await
    }

    async fn scan_table(&self, table: &str, token: Option<PageToken>) -> StoreResult<ScanPage> {
        self.inner.scan_table(table, token).await
    }

    async fn put_record(&self, table: &str, record: Record) -> StoreResult<()> {
        if table == self.lossy {
            return Ok(());
        }
        self.inner.put_record(table, record).await
    }

    async fn delete_record(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome> {
        self.inner.delete_record(table, id).await
    }

    fn store_type(&self) -> &'static str {
        "lossy"
    }
}

#[tokio::test]
async fn test_validation_policies() {
    let dir = TempDir::new().unwrap();
    let target = Arc::new(LossyTarget {
        inner: Arc::new(MemoryStore::new()),
        lossy: "Affiliates",
    });

    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), tables()), source(), target.clone())
            .unwrap()
            .with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(report.state, JobState::Completed);
    let validation = report.validation.unwrap();
    assert!(!validation.passed);
    // Projects points at the affiliate that never landed
    assert_eq!(validation.failed_tables(), vec!["Affiliates", "Projects"]);
    assert!(!validation.table("Affiliates").unwrap().count_matches);

    let mut strict = config(dir.path(), tables());
    strict.migration.validation_policy = ValidationPolicy::AutoStrict;
    let fresh = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::with_stores(
        strict,
        source(),
        Arc::new(LossyTarget {
            inner: fresh.clone(),
            lossy: "Affiliates",
        }),
    )
    .unwrap()
    .with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;
    assert_eq!(report.state, JobState::RolledBack);
    assert!(report.error.unwrap().contains("Validation failed"));
    assert_eq!(fresh.row_count("Projects"), 0);
    assert_eq!(fresh.row_count("Contacts"), 2);
}

#[test]
fn test_cycle_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let cyclic = vec![
        TableDescriptor::new("A").with_dependency("b", "B"),
        TableDescriptor::new("B").with_dependency("c", "C"),
        TableDescriptor::new("C").with_dependency("a", "A"),
    ];
    let err = Orchestrator::with_stores(
        config(dir.path(), cyclic),
        source(),
        Arc::new(MemoryStore::new()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, MigrateError::CyclicDependency { .. }));
    assert!(err.to_string().contains("A -> B -> C -> A"));
}

#[test]
fn test_missing_environment_tag() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), tables());
    config.target.environment = String::new();
    let err = Orchestrator::with_stores(config, source(), Arc::new(MemoryStore::new()))
        .err()
        .unwrap();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_demo_dataset_migrates() {
    let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
    let dir = TempDir::new().unwrap();
    let dev = dir.path().join("data/dev");
    let prod_dir = dir.path().join("data/prod");
    std::fs::create_dir_all(&dev).unwrap();
    std::fs::create_dir_all(&prod_dir).unwrap();
    for entry in std::fs::read_dir(demos.join("data/dev")).unwrap() {
        let path = entry.unwrap().path();
        std::fs::copy(&path, dev.join(path.file_name().unwrap())).unwrap();
    }
    let config_path = dir.path().join("realtechee.yaml");
    std::fs::copy(demos.join("realtechee.yaml"), &config_path).unwrap();

    let config = Config::load(&config_path).unwrap();
    let orchestrator = Orchestrator::new(config).unwrap().with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(
        report.table("BackOfficeBrokerage").unwrap().status,
        TableStatus::Skipped
    );
    assert_eq!(report.table("QuoteItems").unwrap().migrated_count, 3);

    let content = std::fs::read_to_string(prod_dir.join("Projects-demo0stack-NONE.json")).unwrap();
    let projects: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
    let p1 = projects
        .iter()
        .find(|p| p["id"] == json!(prod("Projects", "p-1")))
        .unwrap();
    assert_eq!(p1["quoteId"], json!("q-1"));
    assert_eq!(p1["requestId"], json!(prod("Requests", "req-1")));
    assert_eq!(p1["statusId"], json!(prod("BackOfficeProjectStatuses", "2")));
    assert!(p1.get("item04Projects").is_none());
    assert!(p1.get("ID").is_none());

    let content = std::fs::read_to_string(prod_dir.join("Requests-demo0stack-NONE.json")).unwrap();
    let requests: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
    let request_date = |id: &str| {
        requests
            .iter()
            .find(|r| r["id"] == json!(prod("Requests", id)))
            .map(|r| r["requestDate"].clone())
            .unwrap()
    };
    assert_eq!(request_date("req-1"), json!("2025-05-28T07:00:00Z"));
    assert_eq!(request_date("req-2"), json!("2025-01-09T08:00:00Z"));
}

#[tokio::test]
async fn test_independent_tables_share_first_level() {
    let dir = TempDir::new().unwrap();
    let descriptors = vec![
        TableDescriptor::new("Contacts"),
        TableDescriptor::new("Properties"),
        TableDescriptor::new("Requests")
            .with_dependency("agentContactId", "Contacts")
            .with_dependency("addressId", "Properties"),
    ];
    let source = Arc::new(
        MemoryStore::new()
            .with_table(
                "Contacts",
                ["c1", "c2", "c3"].map(|id| Record::new().with("id", id)),
            )
            .with_table("Properties", [Record::new().with("id", "p1")])
            .with_table(
                "Requests",
                [Record::new()
                    .with("id", "r1")
                    .with("agentContactId", "c2")
                    .with("addressId", "p1")],
            ),
    );
    let target = Arc::new(MemoryStore::new());
    let orchestrator =
        Orchestrator::with_stores(config(dir.path(), descriptors), source, target.clone())
            .unwrap()
            .with_approver(true);

    let report = migrate(&orchestrator, Mode::Migrate).await;

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(
        report.levels,
        vec![vec!["Contacts", "Properties"], vec!["Requests"]]
    );
    let request = target.get("Requests", &prod("Requests", "r1")).unwrap();
    assert_eq!(
        request.get("agentContactId"),
        Some(&json!(prod("Contacts", "c2")))
    );
    assert_eq!(
        request.get("addressId"),
        Some(&json!(prod("Properties", "p1")))
    );
}

#[tokio::test]
async fn test_rejected_record_is_skipped_not_rolled_back() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), tables());
    config.migration.reference_policy = envmigrate::ReferencePolicy::Lenient;
    let target = Arc::new(MemoryStore::new());
    target.reject_record("Contacts", &prod("Contacts", "c2"));

    let orchestrator = Orchestrator::with_stores(config, source(), target.clone())
        .unwrap()
        .with_approver(true);
    let report = migrate(&orchestrator, Mode::Migrate).await;

    assert_eq!(report.state, JobState::Completed);
    let contacts = report.table("Contacts").unwrap();
    assert_eq!(contacts.status, TableStatus::Completed);
    assert_eq!(contacts.migrated_count, 1);
    assert_eq!(contacts.skipped_count, 1);
    assert_eq!(contacts.error_count, 1);
    assert_eq!(target.row_count("Contacts"), 1);

    // p2, q2 and q3 reference the rejected contact; i2 belongs to q3
    assert_eq!(report.table("Projects").unwrap().skipped_count, 1);
    assert_eq!(report.table("Quotes").unwrap().skipped_count, 2);
    assert_eq!(report.table("QuoteItems").unwrap().skipped_count, 1);
    assert!(target.get("Projects", &prod("Projects", "p2")).is_none());
    assert!(report.validation.as_ref().unwrap().passed);
}

#[tokio::test]
async fn test_resume_requires_stored_checkpoint() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::with_stores(
        config(dir.path(), tables()),
        source(),
        Arc::new(MemoryStore::new()),
    )
    .unwrap()
    .with_approver(true)
    .resume_from(dir.path().join("checkpoint-missing.json"));

    let err = orchestrator.run(Mode::Migrate).await.unwrap_err();
    assert!(matches!(err, MigrateError::State(_)));
    assert!(err.to_string().contains("no checkpoint"));
}
