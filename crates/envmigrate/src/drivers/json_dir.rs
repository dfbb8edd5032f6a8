//! File-backed table store: one JSON array per table in a directory.
//!
//! `<dir>/<table>.json` holds every record of `<table>`. Writes rewrite the
//! table file atomically (temp file + rename) under a per-store lock, so a
//! crash never leaves a half-written table behind.
//!
//! Every put reloads and rewrites the whole table file while holding the
//! lock, so writes are serialized across tables and cost grows with table
//! size. Concurrent batch writers gain nothing here. The store is meant for
//! demo datasets and fixtures of a few thousand records at most. Larger
//! datasets need a `StoreAdapter` with keyed puts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::traits::{
    DeleteOutcome, PageToken, ScanPage, StoreAdapter, StoreResult, TableDescription,
};
use crate::core::{Record, TARGET_ID_FIELD};
use crate::error::StoreError;

const TABLE_EXTENSION: &str = "json";

/// Table store persisted as JSON files in a directory.
pub struct JsonDirStore {
    dir: PathBuf,
    page_size: usize,
    write_lock: Mutex<()>,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            dir: dir.into(),
            page_size: page_size.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", table, TABLE_EXTENSION))
    }

    async fn ensure_dir(&self) -> StoreResult<()> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::Unreachable(format!(
                "{} is not a directory",
                self.dir.display()
            ))),
            Err(_) => Err(StoreError::Unreachable(format!(
                "store directory {} does not exist",
                self.dir.display()
            ))),
        }
    }

    /// Load a table file. `Ok(None)` if the table does not exist.
    async fn load(&self, table: &str) -> StoreResult<Option<Vec<Record>>> {
        self.ensure_dir().await?;
        let path = self.table_path(table);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", path.display(), e))),
        };
        if content.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Json(format!("{}: {}", path.display(), e)))
    }

    async fn save(&self, table: &str, records: &[Record]) -> StoreResult<()> {
        let path = self.table_path(table);
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::Json(e.to_string()))?;

        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", temp_path.display(), e)))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for JsonDirStore {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        self.ensure_dir().await?;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut tables = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TABLE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tables.push(stem.to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }

    async fn describe_table(&self, table: &str) -> StoreResult<TableDescription> {
        let records = self
            .load(table)
            .await?
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(TableDescription {
            approx_row_count: records.len() as u64,
        })
    }

    async fn scan_table(
        &self,
        table: &str,
        page_token: Option<PageToken>,
    ) -> StoreResult<ScanPage> {
        let records = self
            .load(table)
            .await?
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let offset = match page_token {
            Some(PageToken(token)) => token
                .parse::<usize>()
                .map_err(|_| StoreError::Json(format!("invalid page token: {}", token)))?,
            None => 0,
        };

        let end = (offset + self.page_size).min(records.len());
        let page = records.get(offset..end).map(<[Record]>::to_vec).unwrap_or_default();
        let next_page_token = (end < records.len()).then(|| PageToken(end.to_string()));

        Ok(ScanPage {
            records: page,
            next_page_token,
        })
    }

    async fn put_record(&self, table: &str, record: Record) -> StoreResult<()> {
        let id = record
            .key_value(TARGET_ID_FIELD)
            .ok_or_else(|| StoreError::Write {
                table: table.to_string(),
                message: "record has no id attribute".into(),
            })?;

        let _guard = self.write_lock.lock().await;
        let mut records = self.load(table).await?.unwrap_or_default();
        match records
            .iter_mut()
            .find(|r| r.key_value(TARGET_ID_FIELD).as_deref() == Some(id.as_str()))
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save(table, &records).await?;
        debug!("{}: put {}", table, id);
        Ok(())
    }

    async fn delete_record(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome> {
        let _guard = self.write_lock.lock().await;
        let Some(mut records) = self.load(table).await? else {
            return Ok(DeleteOutcome::NotFound);
        };
        let before = records.len();
        records.retain(|r| r.key_value(TARGET_ID_FIELD).as_deref() != Some(id));
        if records.len() == before {
            return Ok(DeleteOutcome::NotFound);
        }
        self.save(table, &records).await?;
        Ok(DeleteOutcome::Deleted)
    }

    fn store_type(&self) -> &'static str {
        "json_dir"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_scan_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(dir.path(), 2);

        for id in ["a", "b", "c"] {
            store
                .put_record("Contacts", Record::new().with("id", id))
                .await
                .unwrap();
        }
        // upsert does not duplicate
        store
            .put_record("Contacts", Record::new().with("id", "b").with("x", 1))
            .await
            .unwrap();

        assert_eq!(store.list_tables().await.unwrap(), vec!["Contacts"]);
        assert_eq!(
            store.describe_table("Contacts").await.unwrap().approx_row_count,
            3
        );

        let first = store.scan_table("Contacts", None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let second = store
            .scan_table("Contacts", first.next_page_token)
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(second.next_page_token.is_none());

        assert_eq!(
            store.delete_record("Contacts", "a").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            store.delete_record("Contacts", "a").await.unwrap(),
            DeleteOutcome::NotFound
        );
        assert_eq!(store.scan_all("Contacts").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_directory_is_unreachable() {
        let store = JsonDirStore::new("/definitely/not/here", 10);
        assert!(matches!(
            store.list_tables().await,
            Err(StoreError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(dir.path(), 10);
        assert!(matches!(
            store.describe_table("Ghost").await,
            Err(StoreError::TableNotFound(_))
        ));
    }
}
