//! Dependency resolution.
//!
//! [`resolve`] walks the required dependencies of a catalog entry and
//! classifies every distinct package it reaches:
//!
//! - **Resolved**: in the catalog and not installed, will be installed
//! - **AlreadyInstalled**: matched against an install record, not walked further
//! - **Unresolved**: unknown to the catalog and not installed
//!
//! The walk is depth first with a `visiting` set; an edge back onto the
//! current path is recorded as a broken cycle instead of being followed.
//! Depth is the shortest distance from the root (direct dependencies are 0).
//! Install order puts deeper packages first while never placing a package
//! before one of its own prerequisites.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::{debug, info};

use super::matcher;
use super::types::{AddonError, InstalledRecord};
use crate::catalog::{CatalogEntry, CatalogSnapshot};

/// Classification of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Will be installed.
    Resolved,
    /// Already present.
    AlreadyInstalled,
    /// Not found anywhere.
    Unresolved,
}

/// One distinct package reached from the root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanNode {
    /// Catalog slug, or the dependency string when not in the catalog.
    pub slug: String,
    /// Catalog entry, if found.
    #[serde(skip)]
    pub entry: Option<Arc<CatalogEntry>>,
    /// Shortest distance from the root (0 = direct dependency).
    pub depth: usize,
    /// Classification.
    pub classification: Classification,
}

/// Outcome of resolving a root package.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyResult {
    /// Root entry.
    #[serde(skip)]
    pub root: Arc<CatalogEntry>,
    /// Packages to install, in install order.
    pub resolved: Vec<PlanNode>,
    /// Packages satisfied by install records.
    pub already_installed: Vec<PlanNode>,
    /// Packages that could not be found.
    pub unresolved: Vec<PlanNode>,
    /// Optional dependencies not otherwise part of the plan. Never installed.
    pub optional: Vec<String>,
    /// Cycles that were cut, as "a -> b -> a".
    pub cycles_broken: Vec<String>,
}

impl DependencyResult {
    /// Total number of distinct dependencies reached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len() + self.already_installed.len() + self.unresolved.len()
    }

    /// Returns true if the root has no required dependencies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves the dependency plan of `root_slug`.
///
/// Fails only when the root itself is absent from the catalog.
pub fn resolve(
    root_slug: &str,
    catalog: &CatalogSnapshot,
    installed: &[InstalledRecord],
) -> Result<DependencyResult, AddonError> {
    let root = catalog
        .lookup(root_slug)
        .cloned()
        .ok_or_else(|| AddonError::CatalogEntryNotFound(root_slug.to_string()))?;

    info!("[RESOLVER] Resolving dependencies of '{}'", root.slug);

    let mut walker = Walker {
        catalog,
        installed,
        root_key: root.slug.clone(),
        visited: HashMap::new(),
        path: vec![root.slug.clone()],
        visiting: HashSet::from([root.slug.clone()]),
        graph: DiGraph::new(),
        nodes: HashMap::new(),
        cycles: Vec::new(),
    };

    let root_children = walker.children_of(&root);
    walker.link(&root.slug, &root_children);
    for dep in &root.required_dependencies {
        walker.walk(dep);
    }

    let depths = walker.shortest_depths();
    for (key, visit) in &mut walker.visited {
        if let Some(&d) = depths.get(key) {
            visit.depth = d;
        }
    }

    let optional = walker.optional_dependencies(&root);
    let order = walker.install_order();

    let Walker {
        visited, cycles, ..
    } = walker;

    let node = |visit: &Visit| PlanNode {
        slug: visit.slug.clone(),
        entry: visit.entry.clone(),
        depth: visit.depth,
        classification: visit.classification,
    };

    let resolved: Vec<PlanNode> = order
        .iter()
        .filter_map(|key| visited.get(key))
        .map(node)
        .collect();

    let mut rest: Vec<&Visit> = visited
        .values()
        .filter(|v| v.classification != Classification::Resolved)
        .collect();
    rest.sort_by_key(|v| (v.depth, v.discovered));

    let already_installed = rest
        .iter()
        .filter(|v| v.classification == Classification::AlreadyInstalled)
        .map(|v| node(v))
        .collect();
    let unresolved = rest
        .iter()
        .filter(|v| v.classification == Classification::Unresolved)
        .map(|v| node(v))
        .collect();

    let result = DependencyResult {
        root,
        resolved,
        already_installed,
        unresolved,
        optional,
        cycles_broken: cycles,
    };

    info!(
        "[RESOLVER] '{}': {} to install, {} installed, {} unresolved, {} cycles",
        result.root.slug,
        result.resolved.len(),
        result.already_installed.len(),
        result.unresolved.len(),
        result.cycles_broken.len()
    );

    Ok(result)
}

/// Strips a trailing version constraint (`LibFoo>=12` -> `LibFoo`).
fn dependency_name(dep: &str) -> &str {
    dep.split(['>', '<', '='])
        .next()
        .unwrap_or(dep)
        .trim()
}

#[derive(Debug)]
struct Visit {
    slug: String,
    entry: Option<Arc<CatalogEntry>>,
    depth: usize,
    classification: Classification,
    discovered: usize,
}

struct Walker<'a> {
    catalog: &'a CatalogSnapshot,
    installed: &'a [InstalledRecord],
    root_key: String,
    visited: HashMap<String, Visit>,
    path: Vec<String>,
    visiting: HashSet<String>,
    /// Edges run dependent -> prerequisite, for the root and resolved nodes only.
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    cycles: Vec<String>,
}

impl Walker<'_> {
    /// Returns the identity key, display slug and entry of a dependency string.
    fn identify(&self, dep: &str) -> (String, String, Option<Arc<CatalogEntry>>) {
        let name = dependency_name(dep);
        match self.catalog.lookup(name) {
            Some(entry) => (entry.slug.clone(), entry.slug.clone(), Some(Arc::clone(entry))),
            None => (name.to_lowercase(), name.to_string(), None),
        }
    }

    fn children_of(&self, entry: &CatalogEntry) -> Vec<String> {
        entry
            .required_dependencies
            .iter()
            .filter(|d| !dependency_name(d).is_empty())
            .map(|d| self.identify(d).0)
            .collect()
    }

    fn node(&mut self, key: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(key) {
            return idx;
        }
        let idx = self.graph.add_node(key.to_string());
        self.nodes.insert(key.to_string(), idx);
        idx
    }

    fn link(&mut self, key: &str, children: &[String]) {
        let from = self.node(key);
        for child in children {
            let to = self.node(child);
            self.graph.update_edge(from, to, ());
        }
    }

    fn classify(&self, slug: &str, entry: Option<&Arc<CatalogEntry>>) -> Classification {
        match entry {
            Some(entry) => {
                if self.installed.iter().any(|r| matcher::matches(entry, r)) {
                    Classification::AlreadyInstalled
                } else {
                    Classification::Resolved
                }
            }
            None => {
                if self.installed.iter().any(|r| matcher::matches_slug(slug, r)) {
                    Classification::AlreadyInstalled
                } else {
                    Classification::Unresolved
                }
            }
        }
    }

    fn record_cycle(&mut self, key: &str) {
        let start = self.path.iter().position(|k| k == key).unwrap_or(0);
        let mut cycle: Vec<&str> = self.path[start..].iter().map(String::as_str).collect();
        cycle.push(key);
        let note = cycle.join(" -> ");
        if !self.cycles.contains(&note) {
            debug!("[RESOLVER] Breaking cycle {}", note);
            self.cycles.push(note);
        }
    }

    fn walk(&mut self, dep: &str) {
        if dependency_name(dep).is_empty() {
            return;
        }
        let (key, slug, entry) = self.identify(dep);

        if self.visiting.contains(&key) {
            self.record_cycle(&key);
            return;
        }
        if self.visited.contains_key(&key) {
            return;
        }

        let classification = self.classify(&slug, entry.as_ref());
        debug!("[RESOLVER] {} -> {:?}", slug, classification);

        let discovered = self.visited.len();
        self.visited.insert(
            key.clone(),
            Visit {
                slug,
                entry: entry.clone(),
                depth: self.path.len() - 1,
                classification,
                discovered,
            },
        );

        let Some(entry) = entry.filter(|_| classification == Classification::Resolved) else {
            return;
        };

        let children = self.children_of(&entry);
        self.link(&key, &children);
        self.visiting.insert(key.clone());
        self.path.push(key.clone());
        for child in &entry.required_dependencies {
            self.walk(child);
        }
        self.path.pop();
        self.visiting.remove(&key);
    }

    /// Shortest distances from the root over the walked edges, minus one.
    fn shortest_depths(&self) -> HashMap<String, usize> {
        let Some(&root) = self.nodes.get(&self.root_key) else {
            return HashMap::new();
        };

        algo::dijkstra(&self.graph, root, None, |_| 1usize)
            .into_iter()
            .filter(|&(idx, _)| idx != root)
            .filter_map(|(idx, dist)| {
                self.graph
                    .node_weight(idx)
                    .map(|key| (key.clone(), dist - 1))
            })
            .collect()
    }

    fn optional_dependencies(&self, root: &CatalogEntry) -> Vec<String> {
        let mut resolved: Vec<&Visit> = self
            .visited
            .values()
            .filter(|v| v.classification == Classification::Resolved)
            .collect();
        resolved.sort_by_key(|v| v.discovered);

        let sources = std::iter::once(root)
            .chain(resolved.iter().filter_map(|v| v.entry.as_deref()));

        let mut seen: HashSet<String> = HashSet::new();
        let mut optional = Vec::new();
        for entry in sources {
            for dep in &entry.optional_dependencies {
                if dependency_name(dep).is_empty() {
                    continue;
                }
                let (key, slug, _) = self.identify(dep);
                if key == self.root_key || self.visited.contains_key(&key) {
                    continue;
                }
                if seen.insert(key) {
                    optional.push(slug);
                }
            }
        }
        optional
    }

    /// Orders resolved nodes prerequisites first, deeper first among ready nodes.
    fn install_order(&self) -> Vec<String> {
        let resolved: HashMap<NodeIndex, &Visit> = self
            .visited
            .iter()
            .filter(|(_, v)| v.classification == Classification::Resolved)
            .filter_map(|(k, v)| self.nodes.get(k).map(|&idx| (idx, v)))
            .collect();

        let is_prerequisite =
            |of: NodeIndex, n: NodeIndex| n != of && resolved.contains_key(&n);

        let mut pending: HashMap<NodeIndex, usize> = resolved
            .keys()
            .map(|&idx| {
                let count = self
                    .graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .filter(|&n| is_prerequisite(idx, n))
                    .count();
                (idx, count)
            })
            .collect();

        let priority = |idx: NodeIndex| {
            let v = resolved[&idx];
            (v.depth, Reverse(v.discovered))
        };

        let mut ready: BinaryHeap<((usize, Reverse<usize>), NodeIndex)> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(&idx, _)| (priority(idx), idx))
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(resolved.len());
        let mut placed: HashSet<NodeIndex> = HashSet::new();

        while placed.len() < resolved.len() {
            let next = match ready.pop() {
                Some((_, idx)) => idx,
                None => {
                    // Only cycles remain: force the highest-priority member
                    let Some(idx) = resolved
                        .keys()
                        .copied()
                        .filter(|idx| !placed.contains(idx))
                        .max_by_key(|&idx| priority(idx))
                    else {
                        break;
                    };
                    idx
                }
            };
            if !placed.insert(next) {
                continue;
            }
            if let Some(key) = self.graph.node_weight(next) {
                order.push(key.clone());
            }

            for dependent in self.graph.neighbors_directed(next, Direction::Incoming) {
                if !is_prerequisite(next, dependent) || placed.contains(&dependent) {
                    continue;
                }
                if let Some(count) = pending.get_mut(&dependent) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push((priority(dependent), dependent));
                    }
                }
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::entry;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn snapshot(entries: Vec<CatalogEntry>) -> CatalogSnapshot {
        CatalogSnapshot::new(entries, None)
    }

    fn record(slug: &str) -> InstalledRecord {
        InstalledRecord::new(slug, slug, "1.0", PathBuf::from(format!("/r/{0}/{0}.txt", slug)))
    }

    fn slugs(nodes: &[PlanNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.slug.as_str()).collect()
    }

    #[test]
    fn test_root_not_found() {
        let err = resolve("missing", &snapshot(vec![]), &[]).unwrap_err();
        assert!(matches!(err, AddonError::CatalogEntryNotFound(s) if s == "missing"));
    }

    #[test]
    fn test_chain_deepest_first() {
        let catalog = snapshot(vec![
            entry("app", &["lib-a"]),
            entry("lib-a", &["lib-b"]),
            entry("lib-b", &["lib-c"]),
            entry("lib-c", &[]),
        ]);
        let result = resolve("app", &catalog, &[]).unwrap();
        assert_eq!(slugs(&result.resolved), vec!["lib-c", "lib-b", "lib-a"]);
        assert_eq!(
            result.resolved.iter().map(|n| n.depth).collect::<Vec<_>>(),
            vec![2, 1, 0]
        );
    }

    #[test]
    fn test_min_depth_kept() {
        // lib-c reachable at depth 1 via lib-a and at depth 0 directly
        let catalog = snapshot(vec![
            entry("app", &["lib-a", "lib-c"]),
            entry("lib-a", &["lib-b"]),
            entry("lib-b", &["lib-c"]),
            entry("lib-c", &["lib-d"]),
            entry("lib-d", &[]),
        ]);
        let result = resolve("app", &catalog, &[]).unwrap();
        let depth = |slug: &str| {
            result
                .resolved
                .iter()
                .find(|n| n.slug == slug)
                .map(|n| n.depth)
        };
        assert_eq!(depth("lib-c"), Some(0));
        assert_eq!(depth("lib-d"), Some(1));
        assert_eq!(depth("lib-b"), Some(1));

        // prerequisites still come first
        let pos = |slug: &str| result.resolved.iter().position(|n| n.slug == slug).unwrap();
        assert!(pos("lib-d") < pos("lib-c"));
        assert!(pos("lib-c") < pos("lib-b"));
        assert!(pos("lib-b") < pos("lib-a"));
    }

    #[test]
    fn test_cycle_broken() {
        let catalog = snapshot(vec![
            entry("app", &["lib-a"]),
            entry("lib-a", &["lib-b"]),
            entry("lib-b", &["lib-a", "app"]),
        ]);
        let result = resolve("app", &catalog, &[]).unwrap();
        assert_eq!(result.resolved.len(), 2);
        assert_eq!(
            result.cycles_broken,
            vec!["lib-a -> lib-b -> lib-a", "app -> lib-a -> lib-b -> app"]
        );
    }

    #[test]
    fn test_installed_not_walked() {
        let catalog = snapshot(vec![
            entry("app", &["lib-a", "LibStub"]),
            entry("lib-a", &["lib-b"]),
            entry("lib-b", &[]),
        ]);
        let installed = vec![record("lib-a"), record("libstub")];
        let result = resolve("app", &catalog, &installed).unwrap();
        assert!(result.resolved.is_empty());
        assert_eq!(slugs(&result.already_installed), vec!["lib-a", "LibStub"]);
        assert!(result.unresolved.is_empty());
    }

    #[test]
    fn test_unresolved_and_optional() {
        let mut app = entry("app", &["ghost>=3", "lib-a"]);
        app.optional_dependencies = vec!["lib-a".to_string(), "extra".to_string()];
        let mut lib = entry("lib-a", &[]);
        lib.optional_dependencies = ["extra", "app", "more"].map(String::from).to_vec();
        let catalog = snapshot(vec![app, lib, entry("extra", &[])]);

        let result = resolve("app", &catalog, &[]).unwrap();
        assert_eq!(slugs(&result.unresolved), vec!["ghost"]);
        assert_eq!(result.optional, vec!["extra", "more"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let catalog = snapshot(vec![
            entry("app", &["lib-a"]),
            entry("lib-a", &["lib-a", "lib-b", "lib-b"]),
            entry("lib-b", &[]),
        ]);
        let result = resolve("app", &catalog, &[]).unwrap();
        assert_eq!(slugs(&result.resolved), vec!["lib-b", "lib-a"]);
        assert_eq!(result.resolved[0].depth, 1);
        assert_eq!(result.cycles_broken, vec!["lib-a -> lib-a"]);
    }

    #[test]
    fn test_lookup_tolerates_case_and_version() {
        let catalog = snapshot(vec![
            entry("app", &["LibAddonMenu-2.0"]),
            entry("libaddonmenu-2-0", &[]),
        ]);
        let result = resolve("APP", &catalog, &[]).unwrap();
        assert_eq!(slugs(&result.resolved), vec!["libaddonmenu-2-0"]);
    }
}
