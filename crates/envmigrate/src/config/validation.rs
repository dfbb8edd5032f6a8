//! Configuration validation.
//!
//! Everything here runs before any store is touched.

use std::collections::HashSet;

use super::{Config, StoreConfig, StoreKind};
use crate::dependency::DependencyGraph;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_store("source", &config.source)?;
    validate_store("target", &config.target)?;

    if config.source.environment == config.target.environment {
        return Err(MigrateError::Config(format!(
            "source and target environments must differ, both are '{}'",
            config.source.environment
        )));
    }

    // Cannot migrate into the tables being read
    if config.source.same_location(&config.target) {
        return Err(MigrateError::Config(
            "source and target cannot be the same store".into(),
        ));
    }

    // Migration config validation - only check if explicitly set
    if let Some(0) = config.migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.batch_writers {
        return Err(MigrateError::Config(
            "migration.batch_writers must be at least 1".into(),
        ));
    }
    if config.migration.max_retries == 0 {
        return Err(MigrateError::Config(
            "migration.max_retries must be at least 1".into(),
        ));
    }
    if config.migration.retry_max_delay_ms < config.migration.retry_base_delay_ms {
        return Err(MigrateError::Config(
            "migration.retry_max_delay_ms must not be below retry_base_delay_ms".into(),
        ));
    }
    let rate = config.migration.estimated_write_rate;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(MigrateError::Config(
            "migration.estimated_write_rate must be positive".into(),
        ));
    }

    validate_tables(config)?;

    Ok(())
}

fn validate_store(role: &str, store: &StoreConfig) -> Result<()> {
    if store.environment.trim().is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.environment is required",
            role
        )));
    }
    if store.kind == StoreKind::JsonDir && store.path.is_none() {
        return Err(MigrateError::Config(format!(
            "{}.path is required for json_dir stores",
            role
        )));
    }
    if store.page_size == 0 {
        return Err(MigrateError::Config(format!(
            "{}.page_size must be at least 1",
            role
        )));
    }
    Ok(())
}

fn validate_tables(config: &Config) -> Result<()> {
    if config.tables.is_empty() {
        return Err(MigrateError::Config("at least one table must be declared".into()));
    }

    let mut seen = HashSet::new();
    for table in &config.tables {
        if table.name.trim().is_empty() {
            return Err(MigrateError::Config("table name cannot be empty".into()));
        }
        if !seen.insert(table.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "table '{}' is declared more than once",
                table.name
            )));
        }
        if table.id_field.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "table '{}' has an empty id_field",
                table.name
            )));
        }
        for field in &table.date_fields {
            let is_key = *field == table.id_field
                || table.dependency_fields.iter().any(|d| d.field_name == *field);
            if is_key {
                return Err(MigrateError::Config(format!(
                    "table '{}' date field '{}' is also an id or reference",
                    table.name, field
                )));
            }
        }
    }

    for table in &config.tables {
        for dep in &table.dependency_fields {
            if !seen.contains(dep.target_table.as_str()) {
                return Err(MigrateError::Config(format!(
                    "table '{}' field '{}' references undeclared table '{}'",
                    table.name, dep.field_name, dep.target_table
                )));
            }
        }
    }

    // Cycles surface as CyclicDependency naming the loop
    DependencyGraph::build(&config.tables)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::core::TableDescriptor;

    fn valid_config() -> Config {
        let mut source = StoreConfig::new("dev");
        source.kind = StoreKind::Memory;
        let mut target = StoreConfig::new("prod");
        target.kind = StoreKind::Memory;
        Config {
            source,
            target,
            migration: MigrationConfig::default(),
            tables: vec![
                TableDescriptor::new("Contacts"),
                TableDescriptor::new("Requests").with_dependency("contactId", "Contacts"),
            ],
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_environment_tag() {
        let mut config = valid_config();
        config.target.environment = "".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("target.environment"));
    }

    #[test]
    fn test_same_environment_rejected() {
        let mut config = valid_config();
        config.target.environment = "dev".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_json_dir_needs_path() {
        let mut config = valid_config();
        config.source.kind = StoreKind::JsonDir;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_table() {
        let mut config = valid_config();
        config.tables.push(TableDescriptor::new("Contacts"));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_undeclared_dependency_target() {
        let mut config = valid_config();
        config
            .tables
            .push(TableDescriptor::new("Quotes").with_dependency("projectId", "Projects"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Projects"));
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        let mut config = valid_config();
        config.tables = vec![
            TableDescriptor::new("A").with_dependency("bId", "B"),
            TableDescriptor::new("B").with_dependency("aId", "A"),
        ];
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, MigrateError::CyclicDependency { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_date_field_cannot_be_a_reference() {
        let mut config = valid_config();
        config.tables[1] = TableDescriptor::new("Requests")
            .with_dependency("contactId", "Contacts")
            .with_date_field("contactId");
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("date field 'contactId'"));

        config.tables[1] = TableDescriptor::new("Requests").with_date_field("requestDate");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = valid_config();
        config.migration.workers = Some(0);
        assert!(validate(&config).is_err());
    }
}
