//! Store adapter implementations.
//!
//! - [`memory`]: in-process store, used as the dry-run projection and in tests
//! - [`json_dir`]: one JSON file per table in a directory
//! - [`namespaced`]: per-environment table naming over any other adapter
//!
//! # Adding New Stores
//!
//! 1. Create a new module under `drivers/` implementing [`StoreAdapter`]
//! 2. Add a [`StoreKind`] variant and wire it into [`from_config`]

pub mod json_dir;
pub mod memory;
pub mod namespaced;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;
pub use namespaced::NamespacedStore;

use std::sync::Arc;

use tracing::debug;

use crate::config::{StoreConfig, StoreKind};
use crate::core::StoreAdapter;
use crate::error::{MigrateError, Result};

/// Build the adapter for one environment.
///
/// Table prefixes and suffixes are applied by wrapping the physical store in
/// a [`NamespacedStore`].
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn StoreAdapter>> {
    let physical: Arc<dyn StoreAdapter> = match config.kind {
        StoreKind::JsonDir => {
            let path = config.path.as_ref().ok_or_else(|| {
                MigrateError::Config(format!(
                    "environment '{}' has no store path",
                    config.environment
                ))
            })?;
            Arc::new(JsonDirStore::new(path, config.page_size))
        }
        StoreKind::Memory => Arc::new(MemoryStore::with_page_size(config.page_size)),
    };

    debug!(
        "{} store for '{}' (prefix='{}', suffix='{}')",
        physical.store_type(),
        config.environment,
        config.table_prefix,
        config.table_suffix
    );

    if config.table_prefix.is_empty() && config.table_suffix.is_empty() {
        return Ok(physical);
    }
    Ok(Arc::new(NamespacedStore::new(
        physical,
        config.table_prefix.clone(),
        config.table_suffix.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Record;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_from_config_applies_namespace() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: Some(dir.path().to_path_buf()),
            table_prefix: "RealTechee-".into(),
            ..StoreConfig::new("dev")
        };
        let store = from_config(&config).unwrap();
        store
            .put_record("Contacts", Record::new().with("id", "c1"))
            .await
            .unwrap();
        assert!(dir.path().join("RealTechee-Contacts.json").exists());
        assert_eq!(store.list_tables().await.unwrap(), vec!["Contacts"]);
    }

    #[test]
    fn test_json_dir_without_path() {
        let config = StoreConfig::new("dev");
        assert!(from_config(&config).is_err());
    }
}
