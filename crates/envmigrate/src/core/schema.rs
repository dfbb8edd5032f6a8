//! Static table declarations.
//!
//! A [`TableDescriptor`] names a logical table, the attribute holding its
//! primary id, and every foreign-key attribute it carries. The full set of
//! descriptors defines the dependency graph of the dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute name used as the key of every record written to the target.
pub const TARGET_ID_FIELD: &str = "id";

/// A foreign-key attribute and the table it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyField {
    /// Attribute name in the source record.
    pub field_name: String,

    /// Logical name of the referenced table.
    pub target_table: String,
}

impl DependencyField {
    pub fn new(field_name: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            target_table: target_table.into(),
        }
    }
}

/// Declaration of one table in the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Logical table name.
    pub name: String,

    /// Foreign-key attributes carried by this table.
    #[serde(default)]
    pub dependency_fields: Vec<DependencyField>,

    /// A required table missing from the source is a configuration error;
    /// an optional one is skipped with a warning.
    #[serde(default = "default_true")]
    pub is_required: bool,

    /// Attribute holding the source primary id (default: "id").
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Attribute renames applied to every migrated record (source -> target).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_renames: BTreeMap<String, String>,

    /// Attributes dropped from every migrated record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_fields: Vec<String>,

    /// Source attributes holding hand-entered dates, rewritten to UTC
    /// ISO-8601 on migration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub date_fields: Vec<String>,
}

impl TableDescriptor {
    /// Create a required table with no dependencies and the default id field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependency_fields: Vec::new(),
            is_required: true,
            id_field: default_id_field(),
            field_renames: BTreeMap::new(),
            exclude_fields: Vec::new(),
            date_fields: Vec::new(),
        }
    }

    /// Add a foreign-key attribute.
    pub fn with_dependency(
        mut self,
        field_name: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        self.dependency_fields
            .push(DependencyField::new(field_name, target_table));
        self
    }

    /// Mark the table optional.
    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }

    /// Set the source id attribute.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Rename an attribute on migration.
    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.field_renames.insert(from.into(), to.into());
        self
    }

    /// Drop an attribute on migration.
    pub fn with_excluded(mut self, field: impl Into<String>) -> Self {
        self.exclude_fields.push(field.into());
        self
    }

    /// Normalize a date attribute on migration.
    pub fn with_date_field(mut self, field: impl Into<String>) -> Self {
        self.date_fields.push(field.into());
        self
    }

    /// Distinct tables this table references, in declaration order.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for dep in &self.dependency_fields {
            if !out.contains(&dep.target_table.as_str()) {
                out.push(dep.target_table.as_str());
            }
        }
        out
    }

    /// Whether this table references `other`.
    pub fn depends_on(&self, other: &str) -> bool {
        self.dependency_fields
            .iter()
            .any(|d| d.target_table == other)
    }

    /// Target attribute name for a source attribute after renames.
    pub fn target_field_name<'a>(&'a self, source_field: &'a str) -> &'a str {
        self.field_renames
            .get(source_field)
            .map(String::as_str)
            .unwrap_or(source_field)
    }
}

fn default_true() -> bool {
    true
}

fn default_id_field() -> String {
    TARGET_ID_FIELD.to_string()
}
