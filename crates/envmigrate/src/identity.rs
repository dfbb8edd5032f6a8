//! Deterministic source-to-target id mapping.
//!
//! [`derive_target_id`] is a pure function of `(table, source id, target tag)`.
//! [`IdentityMapper`] caches its results for one run so foreign keys of
//! dependent tables can be rewritten, and snapshots them into the checkpoint
//! so a resumed run sees the same map.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed UUIDv5 namespace for target ids.
const TARGET_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_5e70_a8c4_1d2f_3b5a_7c90);

/// Derive the target id of a source record.
///
/// Same inputs always give the same id, across processes and runs.
pub fn derive_target_id(table: &str, source_id: &str, target_tag: &str) -> String {
    let name = format!("{}/{}/{}", target_tag, table, source_id);
    Uuid::new_v5(&TARGET_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// One recorded mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub source_table: String,
    pub source_id: String,
    pub target_id: String,
}

/// Outcome of a foreign-key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Resolution {
    Resolved(String),
    /// The referenced record has not been mapped in this run.
    Unresolved,
}

impl Resolution {
    pub fn into_option(self) -> Option<String> {
        match self {
            Resolution::Resolved(id) => Some(id),
            Resolution::Unresolved => None,
        }
    }
}

/// Run-scoped cache of id mappings.
///
/// Lookups of existing mappings take the read lock only; the write lock is
/// held just long enough to insert a new one.
#[derive(Debug)]
pub struct IdentityMapper {
    target_tag: String,
    /// table -> source id -> target id
    mappings: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl IdentityMapper {
    pub fn new(target_tag: impl Into<String>) -> Self {
        Self {
            target_tag: target_tag.into(),
            mappings: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild a mapper from a checkpoint snapshot.
    pub fn from_snapshot(target_tag: impl Into<String>, snapshot: &[IdentityMapping]) -> Self {
        let mapper = Self::new(target_tag);
        mapper.restore(snapshot);
        mapper
    }

    pub fn target_tag(&self) -> &str {
        &self.target_tag
    }

    /// Target id for a record without recording it.
    pub fn preview(&self, table: &str, source_id: &str) -> String {
        if let Some(id) = self.lookup(table, source_id) {
            return id;
        }
        derive_target_id(table, source_id, &self.target_tag)
    }

    /// Target id for a record, recording the mapping on first use.
    pub fn map(&self, table: &str, source_id: &str) -> String {
        if let Some(id) = self.lookup(table, source_id) {
            return id;
        }
        let mut mappings = self.mappings.write();
        mappings
            .entry(table.to_string())
            .or_default()
            .entry(source_id.to_string())
            .or_insert_with(|| derive_target_id(table, source_id, &self.target_tag))
            .clone()
    }

    /// Resolve a foreign key. Never derives an id for an unmapped record.
    pub fn resolve(&self, table: &str, source_id: &str) -> Resolution {
        match self.lookup(table, source_id) {
            Some(id) => Resolution::Resolved(id),
            None => Resolution::Unresolved,
        }
    }

    fn lookup(&self, table: &str, source_id: &str) -> Option<String> {
        self.mappings
            .read()
            .get(table)
            .and_then(|ids| ids.get(source_id))
            .cloned()
    }

    /// Record mappings for many source ids of one table.
    pub fn seed<'a>(&self, table: &str, source_ids: impl IntoIterator<Item = &'a str>) {
        let mut mappings = self.mappings.write();
        let entry = mappings.entry(table.to_string()).or_default();
        for source_id in source_ids {
            entry
                .entry(source_id.to_string())
                .or_insert_with(|| derive_target_id(table, source_id, &self.target_tag));
        }
    }

    /// Merge a snapshot. Existing mappings are never overwritten.
    pub fn restore(&self, snapshot: &[IdentityMapping]) {
        let mut mappings = self.mappings.write();
        for m in snapshot {
            mappings
                .entry(m.source_table.clone())
                .or_default()
                .entry(m.source_id.clone())
                .or_insert_with(|| m.target_id.clone());
        }
    }

    /// Forget one mapping (its record never reached the target).
    pub fn forget(&self, table: &str, source_id: &str) {
        if let Some(ids) = self.mappings.write().get_mut(table) {
            ids.remove(source_id);
        }
    }

    /// Forget every mapping of a table (after it was rolled back).
    pub fn forget_table(&self, table: &str) {
        self.mappings.write().remove(table);
    }

    /// Number of mappings recorded for a table.
    pub fn table_len(&self, table: &str) -> usize {
        self.mappings.read().get(table).map(HashMap::len).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.mappings.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mappings of one table keyed by source id.
    pub fn table_mappings(&self, table: &str) -> BTreeMap<String, String> {
        self.mappings
            .read()
            .get(table)
            .map(|ids| ids.iter().map(|(s, t)| (s.clone(), t.clone())).collect())
            .unwrap_or_default()
    }

    /// All mappings, sorted by table then source id.
    pub fn snapshot(&self) -> Vec<IdentityMapping> {
        let mappings = self.mappings.read();
        let mut out: Vec<IdentityMapping> = mappings
            .iter()
            .flat_map(|(table, ids)| {
                ids.iter().map(move |(source_id, target_id)| IdentityMapping {
                    source_table: table.clone(),
                    source_id: source_id.clone(),
                    target_id: target_id.clone(),
                })
            })
            .collect();
        out.sort_by(|a, b| {
            (a.source_table.as_str(), a.source_id.as_str())
                .cmp(&(b.source_table.as_str(), b.source_id.as_str()))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_target_id("Contacts", "c1", "prod");
        assert_eq!(a, derive_target_id("Contacts", "c1", "prod"));
        assert_ne!(a, derive_target_id("Contacts", "c1", "staging"));
        assert_ne!(a, derive_target_id("Properties", "c1", "prod"));
        assert_ne!(a, derive_target_id("Contacts", "c2", "prod"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_fresh_mappers_agree() {
        let first = IdentityMapper::new("prod");
        let second = IdentityMapper::new("prod");
        assert_eq!(first.map("Contacts", "c1"), second.map("Contacts", "c1"));
        assert_eq!(first.map("Contacts", "c1"), first.map("Contacts", "c1"));
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_resolve_never_fabricates() {
        let mapper = IdentityMapper::new("prod");
        assert_eq!(mapper.resolve("Contacts", "c9"), Resolution::Unresolved);
        assert!(mapper.is_empty());

        let id = mapper.map("Contacts", "c9");
        assert_eq!(mapper.resolve("Contacts", "c9"), Resolution::Resolved(id));
    }

    #[test]
    fn test_preview_does_not_record() {
        let mapper = IdentityMapper::new("prod");
        let id = mapper.preview("Contacts", "c1");
        assert_eq!(id, derive_target_id("Contacts", "c1", "prod"));
        assert_eq!(mapper.resolve("Contacts", "c1"), Resolution::Unresolved);
    }

    #[test]
    fn test_snapshot_restore() {
        let mapper = IdentityMapper::new("prod");
        mapper.map("Quotes", "q1");
        mapper.seed("Contacts", ["c2", "c1"]);

        let snapshot = mapper.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].source_table, "Contacts");
        assert_eq!(snapshot[0].source_id, "c1");

        let restored = IdentityMapper::from_snapshot("prod", &snapshot);
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.table_len("Contacts"), 2);

        restored.forget("Contacts", "c2");
        assert_eq!(restored.table_len("Contacts"), 1);
        restored.forget_table("Contacts");
        assert_eq!(restored.resolve("Contacts", "c1"), Resolution::Unresolved);
    }

    #[test]
    fn test_concurrent_first_insert() {
        let mapper = Arc::new(IdentityMapper::new("prod"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mapper = mapper.clone();
                std::thread::spawn(move || mapper.map("Contacts", "c1"))
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(mapper.len(), 1);
    }
}
