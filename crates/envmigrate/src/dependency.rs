//! Dependency resolution over declared foreign keys.
//!
//! Tables are grouped into levels with Kahn's algorithm: a table lands in the
//! first level after every table it references. Tables inside one level have
//! no foreign keys between them and may be migrated concurrently.

use std::collections::{BTreeSet, HashMap};

use crate::core::TableDescriptor;
use crate::error::{MigrateError, Result};

/// Levelled dependency graph of the declared tables.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Table names in declaration order.
    tables: Vec<String>,
    /// Distinct referenced tables per table.
    dependencies: HashMap<String, Vec<String>>,
    levels: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph and compute its levels.
    ///
    /// Fails with [`MigrateError::CyclicDependency`] naming one cycle when the
    /// references do not form a DAG. A table referencing itself is a cycle.
    /// References to undeclared tables are ignored here; config validation
    /// rejects them first.
    pub fn build(descriptors: &[TableDescriptor]) -> Result<Self> {
        let tables: Vec<String> = descriptors.iter().map(|t| t.name.clone()).collect();
        let declared: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

        let dependencies: HashMap<String, Vec<String>> = descriptors
            .iter()
            .map(|t| {
                let deps = t
                    .referenced_tables()
                    .into_iter()
                    .filter(|d| declared.contains(d))
                    .map(str::to_string)
                    .collect();
                (t.name.clone(), deps)
            })
            .collect();

        let levels = kahn_levels(&tables, &dependencies)?;
        Ok(Self {
            tables,
            dependencies,
            levels,
        })
    }

    /// Levels in execution order.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Zero-based level of a table.
    pub fn level_of(&self, table: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|t| t == table))
    }

    /// Tables directly referenced by `table`.
    pub fn dependencies_of(&self, table: &str) -> &[String] {
        self.dependencies
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All tables in execution order.
    pub fn execution_order(&self) -> Vec<String> {
        self.levels.iter().flatten().cloned().collect()
    }

    /// All tables with dependents before their dependencies.
    pub fn teardown_order(&self) -> Vec<String> {
        let mut order = self.execution_order();
        order.reverse();
        order
    }

    /// `roots` plus every table that transitively depends on one of them,
    /// in declaration order.
    pub fn with_dependents(&self, roots: &[String]) -> Vec<String> {
        let mut closure: BTreeSet<&str> = roots.iter().map(String::as_str).collect();
        loop {
            let before = closure.len();
            for table in &self.tables {
                if closure.contains(table.as_str()) {
                    continue;
                }
                if self
                    .dependencies_of(table)
                    .iter()
                    .any(|d| closure.contains(d.as_str()))
                {
                    closure.insert(table.as_str());
                }
            }
            if closure.len() == before {
                break;
            }
        }
        self.tables
            .iter()
            .filter(|t| closure.contains(t.as_str()))
            .cloned()
            .collect()
    }
}

/// Group tables into levels. Ties keep declaration order.
fn kahn_levels(
    tables: &[String],
    dependencies: &HashMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>> {
    let mut in_degree: HashMap<&str, usize> = tables
        .iter()
        .map(|t| {
            let n = dependencies.get(t).map(Vec::len).unwrap_or(0);
            (t.as_str(), n)
        })
        .collect();

    let mut placed = 0usize;
    let mut levels: Vec<Vec<String>> = Vec::new();

    loop {
        let ready: Vec<String> = tables
            .iter()
            .filter(|t| in_degree.get(t.as_str()) == Some(&0))
            .cloned()
            .collect();
        if ready.is_empty() {
            break;
        }

        for table in &ready {
            in_degree.remove(table.as_str());
        }
        for table in tables {
            let Some(remaining) = in_degree.get_mut(table.as_str()) else {
                continue;
            };
            let satisfied = dependencies
                .get(table)
                .map(|deps| deps.iter().filter(|d| ready.contains(d)).count())
                .unwrap_or(0);
            *remaining -= satisfied;
        }

        placed += ready.len();
        levels.push(ready);
    }

    if placed < tables.len() {
        return Err(MigrateError::CyclicDependency {
            cycle: find_cycle(tables, dependencies, &in_degree),
        });
    }

    Ok(levels)
}

/// Walk unplaced tables along their unplaced dependencies until one repeats.
fn find_cycle(
    tables: &[String],
    dependencies: &HashMap<String, Vec<String>>,
    unplaced: &HashMap<&str, usize>,
) -> Vec<String> {
    let Some(start) = tables.iter().find(|t| unplaced.contains_key(t.as_str())) else {
        return Vec::new();
    };

    let mut path: Vec<String> = vec![start.clone()];
    loop {
        let Some(current) = path.last() else {
            return path;
        };
        // Every unplaced table has at least one unplaced dependency
        let next = dependencies.get(current).and_then(|deps| {
            deps.iter()
                .find(|d| unplaced.contains_key(d.as_str()))
                .cloned()
        });
        let Some(next) = next else {
            return path;
        };
        if let Some(pos) = path.iter().position(|t| *t == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_a() -> Vec<TableDescriptor> {
        vec![
            TableDescriptor::new("Contacts"),
            TableDescriptor::new("Properties"),
            TableDescriptor::new("Requests")
                .with_dependency("agentContactId", "Contacts")
                .with_dependency("addressId", "Properties"),
        ]
    }

    #[test]
    fn test_levels_for_scenario_a() {
        let graph = DependencyGraph::build(&scenario_a()).unwrap();
        assert_eq!(
            graph.levels(),
            &[
                vec!["Contacts".to_string(), "Properties".to_string()],
                vec!["Requests".to_string()],
            ]
        );
        assert_eq!(graph.level_of("Requests"), Some(1));
        assert_eq!(graph.level_of("Ghost"), None);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let tables = vec![
            TableDescriptor::new("Zeta"),
            TableDescriptor::new("Alpha"),
            TableDescriptor::new("Mid").with_dependency("z", "Zeta"),
        ];
        let graph = DependencyGraph::build(&tables).unwrap();
        assert_eq!(graph.levels()[0], vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn test_diamond_and_chain() {
        let tables = vec![
            TableDescriptor::new("Quotes")
                .with_dependency("requestId", "Requests")
                .with_dependency("projectId", "Projects"),
            TableDescriptor::new("Projects").with_dependency("contactId", "Contacts"),
            TableDescriptor::new("Requests").with_dependency("contactId", "Contacts"),
            TableDescriptor::new("Contacts"),
            TableDescriptor::new("QuoteItems").with_dependency("quoteId", "Quotes"),
        ];
        let graph = DependencyGraph::build(&tables).unwrap();
        assert_eq!(
            graph.levels(),
            &[
                vec!["Contacts".to_string()],
                vec!["Projects".to_string(), "Requests".to_string()],
                vec!["Quotes".to_string()],
                vec!["QuoteItems".to_string()],
            ]
        );
        assert_eq!(
            graph.teardown_order(),
            vec!["QuoteItems", "Quotes", "Requests", "Projects", "Contacts"]
        );
    }

    #[test]
    fn test_every_dependency_in_earlier_level() {
        let tables = scenario_a();
        let graph = DependencyGraph::build(&tables).unwrap();
        for table in &tables {
            let own = graph.level_of(&table.name).unwrap();
            for dep in table.referenced_tables() {
                assert!(graph.level_of(dep).unwrap() < own);
            }
        }
    }

    #[test]
    fn test_cycle_is_named() {
        let tables = vec![
            TableDescriptor::new("Contacts"),
            TableDescriptor::new("A").with_dependency("bId", "B"),
            TableDescriptor::new("B").with_dependency("cId", "C"),
            TableDescriptor::new("C").with_dependency("aId", "A"),
        ];
        match DependencyGraph::build(&tables) {
            Err(MigrateError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["A", "B", "C", "A"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let tables = vec![TableDescriptor::new("Nodes").with_dependency("parentId", "Nodes")];
        let err = DependencyGraph::build(&tables).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: dependency cycle detected: Nodes -> Nodes"
        );
    }

    #[test]
    fn test_with_dependents_is_transitive() {
        let tables = vec![
            TableDescriptor::new("Contacts"),
            TableDescriptor::new("Requests").with_dependency("contactId", "Contacts"),
            TableDescriptor::new("Quotes").with_dependency("requestId", "Requests"),
            TableDescriptor::new("Properties"),
        ];
        let graph = DependencyGraph::build(&tables).unwrap();
        assert_eq!(
            graph.with_dependents(&["Requests".to_string()]),
            vec!["Requests", "Quotes"]
        );
        assert_eq!(graph.dependencies_of("Quotes"), &["Requests".to_string()]);
    }
}
