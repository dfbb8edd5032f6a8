//! Core trait for table-store access.
//!
//! [`StoreAdapter`] is the uniform interface over the source and target
//! stores. The engine never talks to a concrete store technology; it only
//! lists, describes, scans, puts and deletes through this trait.
//!
//! # Semantics expected from implementations
//!
//! - `scan_table` is paginated: callers pass back the returned token until
//!   it is `None`.
//! - `put_record` is an upsert keyed by the record's `id` attribute.
//! - `describe_table` may return an approximate (eventually consistent)
//!   row count.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

use super::value::Record;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opaque continuation token returned by a paginated scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken(pub String);

/// One page of a table scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub records: Vec<Record>,
    pub next_page_token: Option<PageToken>,
}

/// Table metadata returned by [`StoreAdapter::describe_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub approx_row_count: u64,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Uniform access to a paginated key-value table store.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// List all table names.
    async fn list_tables(&self) -> StoreResult<Vec<String>>;

    /// Table existence and approximate size.
    async fn describe_table(&self, table: &str) -> StoreResult<TableDescription>;

    /// Read one page of records.
    async fn scan_table(&self, table: &str, page_token: Option<PageToken>)
        -> StoreResult<ScanPage>;

    /// Insert or overwrite a record keyed by its `id` attribute.
    async fn put_record(&self, table: &str, record: Record) -> StoreResult<()>;

    /// Delete a record by id.
    async fn delete_record(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome>;

    /// Store type identifier for logging.
    fn store_type(&self) -> &'static str;

    /// Check whether a table exists.
    ///
    /// Template method over [`describe_table`](Self::describe_table).
    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        match self.describe_table(table).await {
            Ok(_) => Ok(true),
            Err(StoreError::TableNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read every record of a table by following page tokens.
    async fn scan_all(&self, table: &str) -> StoreResult<Vec<Record>> {
        let mut out = Vec::new();
        let mut token = None;
        loop {
            let page = self.scan_table(table, token).await?;
            out.extend(page.records);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(out),
            }
        }
    }
}
