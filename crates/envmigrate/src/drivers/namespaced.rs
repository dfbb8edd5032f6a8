//! Per-environment table naming.
//!
//! Environments usually share a physical store and tell their tables apart
//! by a prefix or suffix (`RealTechee-Contacts`, `Contacts-<stack>-NONE`).
//! [`NamespacedStore`] maps the engine's logical table names to physical
//! ones so nothing above the adapter layer sees environment naming.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::traits::{
    DeleteOutcome, PageToken, ScanPage, StoreAdapter, StoreResult, TableDescription,
};
use crate::core::Record;
use crate::error::StoreError;

/// Decorator applying `prefix + name + suffix` to every table name.
pub struct NamespacedStore {
    inner: Arc<dyn StoreAdapter>,
    prefix: String,
    suffix: String,
}

impl NamespacedStore {
    pub fn new(
        inner: Arc<dyn StoreAdapter>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Physical name for a logical table.
    pub fn physical_name(&self, table: &str) -> String {
        format!("{}{}{}", self.prefix, table, self.suffix)
    }

    /// Logical name for a physical table, if it belongs to this namespace.
    pub fn logical_name<'a>(&self, physical: &'a str) -> Option<&'a str> {
        let rest = physical.strip_prefix(self.prefix.as_str())?;
        let name = rest.strip_suffix(self.suffix.as_str())?;
        (!name.is_empty()).then_some(name)
    }

    fn unmap_error(&self, err: StoreError) -> StoreError {
        match err {
            StoreError::TableNotFound(physical) => StoreError::TableNotFound(
                self.logical_name(&physical)
                    .map(str::to_string)
                    .unwrap_or(physical),
            ),
            StoreError::Throttled { table } => StoreError::Throttled {
                table: self
                    .logical_name(&table)
                    .map(str::to_string)
                    .unwrap_or(table),
            },
            other => other,
        }
    }
}

#[async_trait]
impl StoreAdapter for NamespacedStore {
    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        let physical = self.inner.list_tables().await?;
        Ok(physical
            .iter()
            .filter_map(|t| self.logical_name(t))
            .map(str::to_string)
            .collect())
    }

    async fn describe_table(&self, table: &str) -> StoreResult<TableDescription> {
        self.inner
            .describe_table(&self.physical_name(table))
            .await
            .map_err(|e| self.unmap_error(e))
    }

    async fn scan_table(
        &self,
        table: &str,
        page_token: Option<PageToken>,
    ) -> StoreResult<ScanPage> {
        self.inner
            .scan_table(&self.physical_name(table), page_token)
            .await
            .map_err(|e| self.unmap_error(e))
    }

    async fn put_record(&self, table: &str, record: Record) -> StoreResult<()> {
        self.inner
            .put_record(&self.physical_name(table), record)
            .await
            .map_err(|e| self.unmap_error(e))
    }

    async fn delete_record(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome> {
        self.inner
            .delete_record(&self.physical_name(table), id)
            .await
            .map_err(|e| self.unmap_error(e))
    }

    fn store_type(&self) -> &'static str {
        self.inner.store_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemoryStore;

    #[tokio::test]
    async fn test_maps_logical_names_both_ways() {
        let memory = Arc::new(
            MemoryStore::new()
                .with_table("RealTechee-Contacts", [Record::new().with("id", "c1")])
                .with_table("Unrelated", []),
        );
        let store = NamespacedStore::new(memory.clone(), "RealTechee-", "");

        assert_eq!(store.list_tables().await.unwrap(), vec!["Contacts"]);
        assert_eq!(store.scan_all("Contacts").await.unwrap().len(), 1);

        store
            .put_record("Properties", Record::new().with("id", "p1"))
            .await
            .unwrap();
        assert_eq!(memory.row_count("RealTechee-Properties"), 1);

        match store.describe_table("Ghost").await {
            Err(StoreError::TableNotFound(name)) => assert_eq!(name, "Ghost"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_suffix_naming() {
        let store = NamespacedStore::new(
            Arc::new(MemoryStore::new()),
            "",
            "-equsgef6fbgdhd4pnzv3xbivmm-NONE",
        );
        assert_eq!(
            store.physical_name("Quotes"),
            "Quotes-equsgef6fbgdhd4pnzv3xbivmm-NONE"
        );
        assert_eq!(
            store.logical_name("Quotes-equsgef6fbgdhd4pnzv3xbivmm-NONE"),
            Some("Quotes")
        );
        assert_eq!(store.logical_name("Quotes"), None);
    }
}
