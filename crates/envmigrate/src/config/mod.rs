//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::core::TableDescriptor;
use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// The parts of a config that decide what gets written where.
#[derive(Serialize)]
struct HashedConfig<'a> {
    source: &'a StoreConfig,
    target: &'a StoreConfig,
    reference_policy: ReferencePolicy,
    tables: &'a [TableDescriptor],
}

impl Config {
    /// Load configuration from a YAML file without validating it.
    ///
    /// Relative store paths and the output directory are resolved against
    /// the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            for store in [&mut config.source, &mut config.target] {
                if let Some(store_path) = store.path.as_mut().filter(|p| p.is_relative()) {
                    *store_path = base.join(&*store_path);
                }
            }
            if config.migration.output_dir.is_relative() {
                config.migration.output_dir = base.join(&config.migration.output_dir);
            }
        }
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// Only the syntax is checked here. Environment tags and other required
    /// values may still come from command-line overrides, so [`validate`]
    /// runs once they are applied (`Orchestrator::new` does it).
    ///
    /// [`validate`]: Config::validate
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    ///
    /// Tuning knobs (workers, batch sizes, retry delays) are left out so a
    /// resumed run may use different ones.
    pub fn hash(&self) -> String {
        let hashed = HashedConfig {
            source: &self.source,
            target: &self.target,
            reference_policy: self.migration.reference_policy,
            tables: &self.tables,
        };
        let yaml = serde_yaml::to_string(&hashed).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
