//! Post-run consistency checks.
//!
//! Two checks per table:
//!
//! - **Count parity**: the target row count must equal the expected count
//!   (pre-run baseline plus ids created by the run; on an empty target this
//!   is exactly `migrated_count`)
//! - **Reference sampling**: a bounded random sample of written records has
//!   every foreign key re-resolved against the target to confirm the
//!   referenced record exists
//!
//! The validator only reads. It runs against the live target after a
//! migration, or against the in-memory projection after a dry run.

pub mod types;

pub use types::{SampleMismatch, TableExpectation, TableValidation, ValidationReport};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rand::seq::IndexedRandom;
use tracing::{debug, info, warn};

use crate::core::value::key_string;
use crate::core::{Record, StoreAdapter, TableDescriptor, TARGET_ID_FIELD};
use crate::error::{Result, StoreError};

/// Engine for post-run validation.
pub struct Validator {
    target: Arc<dyn StoreAdapter>,
    descriptors: HashMap<String, TableDescriptor>,
    sample_size: usize,
}

impl Validator {
    pub fn new(
        target: Arc<dyn StoreAdapter>,
        descriptors: &[TableDescriptor],
        sample_size: usize,
    ) -> Self {
        Self {
            target,
            descriptors: descriptors
                .iter()
                .map(|d| (d.name.clone(), d.clone()))
                .collect(),
            sample_size,
        }
    }

    /// Validate every expected table.
    ///
    /// References into tables outside `expectations` are not checked (a
    /// single-table test run has no migrated dependencies to point at).
    pub async fn validate(&self, expectations: &[TableExpectation]) -> Result<ValidationReport> {
        let start = Instant::now();
        let in_scope: HashSet<&str> = expectations.iter().map(|e| e.table.as_str()).collect();

        let mut ids_cache: HashMap<String, HashSet<String>> = HashMap::new();
        let mut tables = Vec::with_capacity(expectations.len());
        for expectation in expectations {
            tables.push(
                self.validate_table(expectation, &in_scope, &mut ids_cache)
                    .await?,
            );
        }

        let report = ValidationReport::from_tables(tables);
        info!(
            "Validation finished in {:?}: {} tables, {} failed, {} sampled mismatches",
            start.elapsed(),
            report.tables.len(),
            report.failed_tables().len(),
            report.mismatch_count()
        );
        Ok(report)
    }

    async fn validate_table(
        &self,
        expectation: &TableExpectation,
        in_scope: &HashSet<&str>,
        ids_cache: &mut HashMap<String, HashSet<String>>,
    ) -> Result<TableValidation> {
        let table = expectation.table.as_str();
        let rows = load_rows(self.target.as_ref(), table).await?;
        let actual_rows = rows.len() as u64;
        let count_matches = actual_rows == expectation.expected_rows;
        if !count_matches {
            warn!(
                "{}: target has {} rows, expected {}",
                table, actual_rows, expectation.expected_rows
            );
        }

        let sample: Vec<&String> = {
            let mut rng = rand::rng();
            expectation
                .written_target_ids
                .choose_multiple(&mut rng, self.sample_size)
                .collect()
        };

        let mut mismatches = Vec::new();
        let dependency_fields = self
            .descriptors
            .get(table)
            .map(|d| {
                d.dependency_fields
                    .iter()
                    .filter(|dep| in_scope.contains(dep.target_table.as_str()))
                    .map(|dep| (d.target_field_name(&dep.field_name).to_string(), dep.target_table.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for target_id in &sample {
            let Some(record) = rows.get(target_id.as_str()) else {
                mismatches.push(SampleMismatch {
                    target_id: (*target_id).clone(),
                    field: None,
                    detail: "written record is missing from the target".into(),
                });
                continue;
            };

            for (field, referenced_table) in &dependency_fields {
                let Some(reference) = record.get(field).and_then(key_string) else {
                    continue;
                };
                if !ids_cache.contains_key(referenced_table) {
                    let ids = load_rows(self.target.as_ref(), referenced_table)
                        .await?
                        .into_keys()
                        .collect();
                    ids_cache.insert(referenced_table.clone(), ids);
                }
                let exists = ids_cache
                    .get(referenced_table)
                    .is_some_and(|ids| ids.contains(&reference));
                if !exists {
                    mismatches.push(SampleMismatch {
                        target_id: (*target_id).clone(),
                        field: Some(field.clone()),
                        detail: format!("{} not found in {}", reference, referenced_table),
                    });
                }
            }
        }

        debug!(
            "{}: sampled {} records, {} mismatches",
            table,
            sample.len(),
            mismatches.len()
        );

        Ok(TableValidation {
            table: table.to_string(),
            expected_rows: expectation.expected_rows,
            actual_rows,
            count_matches,
            sampled: sample.len(),
            passed: count_matches && mismatches.is_empty(),
            mismatches,
        })
    }
}

/// Every record of a target table keyed by id. A missing table is empty.
async fn load_rows(store: &dyn StoreAdapter, table: &str) -> Result<HashMap<String, Record>> {
    let records = match store.scan_all(table).await {
        Ok(records) => records,
        Err(StoreError::TableNotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(records
        .into_iter()
        .filter_map(|r| r.key_value(TARGET_ID_FIELD).map(|id| (id, r)))
        .collect())
}

/// Ids currently present in a target table. A missing table is empty.
pub async fn existing_ids(store: &dyn StoreAdapter, table: &str) -> Result<HashSet<String>> {
    Ok(load_rows(store, table).await?.into_keys().collect())
}

/// Exact row count of a target table. A missing table counts as zero.
pub async fn count_rows(store: &dyn StoreAdapter, table: &str) -> Result<u64> {
    let records = match store.scan_all(table).await {
        Ok(records) => records,
        Err(StoreError::TableNotFound(_)) => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    Ok(records.len() as u64)
}
