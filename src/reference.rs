//! Cross-table reference integrity.
//!
//! Two passes: every reference field must target a known table type, and the
//! table-to-table reference graph must be free of cycles (cycles are
//! reported, the caller decides whether they are fatal).

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::schema::SchemaDefinition;

/// Types that exist in every project even without a table file.
pub const DEFAULT_KNOWN_TYPES: &[&str] = &["Currency", "Item", "Language"];

const TABLE_EXTENSIONS: &[&str] = &["csv", "tsv"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownTypes(BTreeSet<String>);

impl KnownTypes {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_KNOWN_TYPES.iter().copied())
    }

    /// Scans `dir` for table files; each file stem names a type.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut known = Self::with_defaults();
        let entries =
            fs::read_dir(dir).with_context(|| format!("Reading table directory {dir:?}"))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("Listing table directory {dir:?}"))?
                .path();
            let is_table = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| TABLE_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)));
            if !is_table {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                known.insert(stem);
            }
        }
        debug!("Discovered {} known type(s) in {:?}", known.len(), dir);
        Ok(known)
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.0.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn describe(&self) -> String {
        if self.0.is_empty() {
            "(none)".to_string()
        } else {
            self.iter().join(", ")
        }
    }
}

impl<S: Into<String>> Extend<S> for KnownTypes {
    fn extend<T: IntoIterator<Item = S>>(&mut self, iter: T) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRelation {
    pub source_field: String,
    pub source_table: String,
    pub target_type: String,
    /// The field has no default, so every row must carry an id.
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownReference {
    pub field: String,
    pub target_type: String,
    pub known: String,
}

impl UnknownReference {
    pub fn message(&self) -> String {
        format!(
            "Field '{}' references unknown type '{}'; valid types: {}",
            self.field, self.target_type, self.known
        )
    }
}

pub fn check_reference_types(schema: &SchemaDefinition, known: &KnownTypes) -> Vec<UnknownReference> {
    schema
        .reference_fields()
        .filter_map(|field| {
            let target = field.reference()?;
            (!known.contains(&target.type_name)).then(|| UnknownReference {
                field: field.name.clone(),
                target_type: target.type_name.clone(),
                known: known.describe(),
            })
        })
        .collect()
}

pub fn collect_relations(schema: &SchemaDefinition) -> Vec<ReferenceRelation> {
    schema
        .reference_fields()
        .filter_map(|field| {
            field.reference().map(|target| ReferenceRelation {
                source_field: field.name.clone(),
                source_table: schema.name.clone(),
                target_type: target.type_name.clone(),
                is_required: field.default_value.is_none(),
            })
        })
        .collect()
}

/// Directed graph of "table A has a field referencing table B".
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
    by_target: BTreeMap<String, Vec<ReferenceRelation>>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_relations<'a, I>(relations: I) -> Self
    where
        I: IntoIterator<Item = &'a ReferenceRelation>,
    {
        let mut graph = Self::new();
        for relation in relations {
            graph.add(relation.clone());
        }
        graph
    }

    pub fn add(&mut self, relation: ReferenceRelation) {
        self.edges
            .entry(relation.source_table.clone())
            .or_default()
            .insert(relation.target_type.clone());
        self.edges.entry(relation.target_type.clone()).or_default();
        self.by_target
            .entry(relation.target_type.clone())
            .or_default()
            .push(relation);
    }

    pub fn relations_to(&self, target: &str) -> &[ReferenceRelation] {
        self.by_target.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns every cycle found by a depth-first search restarted from each
    /// unvisited node. Each path ends with the node it started from.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut search = CycleSearch {
            graph: self,
            visited: BTreeSet::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            cycles: Vec::new(),
        };
        for node in self.edges.keys() {
            if !search.visited.contains(node.as_str()) {
                search.visit(node);
            }
        }
        search.cycles
    }
}

struct CycleSearch<'g> {
    graph: &'g ReferenceGraph,
    visited: BTreeSet<&'g str>,
    stack: Vec<&'g str>,
    on_stack: BTreeSet<&'g str>,
    cycles: Vec<Vec<String>>,
}

impl<'g> CycleSearch<'g> {
    fn visit(&mut self, node: &'g str) {
        self.visited.insert(node);
        self.stack.push(node);
        self.on_stack.insert(node);
        let graph = self.graph;
        if let Some(targets) = graph.edges.get(node) {
            for target in targets {
                let target = target.as_str();
                if self.on_stack.contains(target) {
                    let start = self
                        .stack
                        .iter()
                        .position(|n| *n == target)
                        .unwrap_or_default();
                    let mut path = self.stack[start..]
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>();
                    path.push(target.to_string());
                    self.cycles.push(path);
                } else if !self.visited.contains(target) {
                    self.visit(target);
                }
            }
        }
        self.stack.pop();
        self.on_stack.remove(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(source: &str, target: &str) -> ReferenceRelation {
        ReferenceRelation {
            source_field: format!("{target}Id"),
            source_table: source.to_string(),
            target_type: target.to_string(),
            is_required: true,
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let graph = ReferenceGraph::from_relations(&[relation("Skill", "Skill")]);
        assert_eq!(graph.detect_cycles(), vec![vec!["Skill".to_string(), "Skill".to_string()]]);
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let graph = ReferenceGraph::from_relations(&[
            relation("Character", "Skill"),
            relation("Skill", "Buff"),
            relation("Character", "Buff"),
        ]);
        assert!(graph.detect_cycles().is_empty());
        assert_eq!(graph.relations_to("Buff").len(), 2);
    }

    #[test]
    fn known_types_describe_lists_sorted_names() {
        let known = KnownTypes::new(["Skill", "Buff"]);
        assert_eq!(known.describe(), "Buff, Skill");
        assert_eq!(KnownTypes::default().describe(), "(none)");
    }
}
