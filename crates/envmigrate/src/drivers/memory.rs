//! In-memory table store.
//!
//! Used as the write-suppressing projection for analyze/dry-run/test modes
//! and as the store double in tests. Supports fault injection (throttling,
//! hard write failures, unreachability) and counts every call so callers can
//! assert that no write reached a store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::core::traits::{
    DeleteOutcome, PageToken, ScanPage, StoreAdapter, StoreResult, TableDescription,
};
use crate::core::{Record, TARGET_ID_FIELD};
use crate::error::StoreError;

/// Injected write fault for a single table.
#[derive(Debug, Clone, Copy)]
enum WriteFault {
    /// Throttle every put once `after` puts have succeeded.
    ThrottleAfter { after: u64, succeeded: u64 },
    /// Throttle the next `remaining` put attempts, then recover.
    ThrottleNext { remaining: u64 },
}

type Table = BTreeMap<String, Record>;

/// Thread-safe in-memory store keyed by table name and record id.
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, Table>>,
    page_size: usize,
    faults: Mutex<HashMap<String, WriteFault>>,
    rejected_ids: Mutex<HashSet<(String, String)>>,
    unreachable: AtomicBool,
    put_calls: AtomicU64,
    delete_calls: AtomicU64,
    scan_calls: AtomicU64,
    puts_by_table: Mutex<HashMap<String, u64>>,
    seed_seq: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            faults: Mutex::new(HashMap::new()),
            rejected_ids: Mutex::new(HashSet::new()),
            unreachable: AtomicBool::new(false),
            put_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
            scan_calls: AtomicU64::new(0),
            puts_by_table: Mutex::new(HashMap::new()),
            seed_seq: AtomicU64::new(0),
        }
    }

    /// Create an empty table (no-op if it exists).
    pub fn create_table(&self, table: &str) {
        self.tables.write().entry(table.to_string()).or_default();
    }

    /// Seed a record without counting it as a put.
    ///
    /// The record is keyed by its `id` attribute, then `ID`, then a
    /// generated sequence key.
    pub fn insert(&self, table: &str, record: Record) {
        let key = record
            .key_value(TARGET_ID_FIELD)
            .or_else(|| record.key_value("ID"))
            .unwrap_or_else(|| format!("#{:08}", self.seed_seq.fetch_add(1, Ordering::Relaxed)));
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key, record);
    }

    /// Builder-style seeding of a whole table.
    pub fn with_table(self, table: &str, records: impl IntoIterator<Item = Record>) -> Self {
        self.create_table(table);
        for record in records {
            self.insert(table, record);
        }
        self
    }

    /// Throttle every put to `table` once `after` puts have succeeded.
    pub fn throttle_after(&self, table: &str, after: u64) {
        self.faults.lock().insert(
            table.to_string(),
            WriteFault::ThrottleAfter {
                after,
                succeeded: 0,
            },
        );
    }

    /// Throttle the next `attempts` puts to `table`.
    pub fn throttle_next(&self, table: &str, attempts: u64) {
        self.faults.lock().insert(
            table.to_string(),
            WriteFault::ThrottleNext {
                remaining: attempts,
            },
        );
    }

    /// Reject puts of one target id with a non-retryable error.
    pub fn reject_record(&self, table: &str, id: &str) {
        self.rejected_ids
            .lock()
            .insert((table.to_string(), id.to_string()));
    }

    /// Remove any injected fault for `table`.
    pub fn clear_faults(&self, table: &str) {
        self.faults.lock().remove(table);
        self.rejected_ids.lock().retain(|(t, _)| t != table);
    }

    /// Make every operation fail as if the store were unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Total put attempts, including throttled and rejected ones.
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Put attempts against a single table.
    pub fn put_calls_for(&self, table: &str) -> u64 {
        self.puts_by_table.lock().get(table).copied().unwrap_or(0)
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> u64 {
        self.scan_calls.load(Ordering::SeqCst)
    }

    /// Current number of records in `table` (0 if missing).
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(|t| t.len()).unwrap_or(0)
    }

    /// Fetch a record by id.
    pub fn get(&self, table: &str, id: &str) -> Option<Record> {
        self.tables
            .read()
            .get(table)
            .and_then(|t| t.get(id).cloned())
    }

    /// All records of `table` in key order.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory store offline".into()));
        }
        Ok(())
    }

    /// Apply the injected fault for `table`, if any. Returns the error the
    /// put must fail with.
    fn apply_fault(&self, table: &str) -> Option<StoreError> {
        let mut faults = self.faults.lock();
        let fault = faults.get_mut(table)?;
        match fault {
            WriteFault::ThrottleAfter { after, succeeded } => {
                if *succeeded >= *after {
                    return Some(StoreError::Throttled {
                        table: table.to_string(),
                    });
                }
                *succeeded += 1;
                None
            }
            WriteFault::ThrottleNext { remaining } => {
                if *remaining == 0 {
                    return None;
                }
                *remaining -= 1;
                Some(StoreError::Throttled {
                    table: table.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        self.check_reachable()?;
        Ok(self.tables.read().keys().cloned().collect())
    }

    async fn describe_table(&self, table: &str) -> StoreResult<TableDescription> {
        self.check_reachable()?;
        self.tables
            .read()
            .get(table)
            .map(|t| TableDescription {
                approx_row_count: t.len() as u64,
            })
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn scan_table(
        &self,
        table: &str,
        page_token: Option<PageToken>,
    ) -> StoreResult<ScanPage> {
        self.check_reachable()?;
        self.scan_calls.fetch_add(1, Ordering::SeqCst);

        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let mut page: Vec<(&String, &Record)> = match &page_token {
            Some(PageToken(last)) => rows
                .range::<String, _>((
                    std::ops::Bound::Excluded(last.clone()),
                    std::ops::Bound::Unbounded,
                ))
                .take(self.page_size + 1)
                .collect(),
            None => rows.iter().take(self.page_size + 1).collect(),
        };

        let has_more = page.len() > self.page_size;
        page.truncate(self.page_size);

        let next_page_token = if has_more {
            page.last().map(|(key, _)| PageToken((*key).clone()))
        } else {
            None
        };

        Ok(ScanPage {
            records: page.into_iter().map(|(_, r)| r.clone()).collect(),
            next_page_token,
        })
    }

    async fn put_record(&self, table: &str, record: Record) -> StoreResult<()> {
        self.check_reachable()?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .puts_by_table
            .lock()
            .entry(table.to_string())
            .or_insert(0) += 1;

        if let Some(err) = self.apply_fault(table) {
            return Err(err);
        }

        let id = record
            .key_value(TARGET_ID_FIELD)
            .ok_or_else(|| StoreError::Write {
                table: table.to_string(),
                message: "record has no id attribute".into(),
            })?;

        if self
            .rejected_ids
            .lock()
            .contains(&(table.to_string(), id.clone()))
        {
            return Err(StoreError::Write {
                table: table.to_string(),
                message: format!("record {} rejected", id),
            });
        }

        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(id, record);
        Ok(())
    }

    async fn delete_record(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome> {
        self.check_reachable()?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write();
        let removed = tables.get_mut(table).and_then(|t| t.remove(id));
        Ok(if removed.is_some() {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
