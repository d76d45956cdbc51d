//! The service dependency graph and its expansion to container work items.
//!
//! Hard edges come from `requires` plus the implicit edges induced by
//! `volumes_from`; they drive play ordering and must be acyclic. Soft edges
//! from `wants_info` exist only for environment projection and are allowed
//! to form cycles, alone or through hard edges.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::service::Service;

/// Traversal direction of a play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Dependencies first (start, restart, pull).
    Forward,
    /// Dependents first (stop, kill, clean).
    Reverse,
}

/// Directed graph over services.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    hard: BTreeMap<String, BTreeSet<String>>,
    soft: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds the graph from resolved services and the implicit hard edges
    /// induced by `volumes_from` (source service name per referencing
    /// service), then rejects hard-edge cycles.
    pub fn build(
        services: &BTreeMap<String, Service>,
        implicit_hard_edges: &[(String, String)],
    ) -> Result<Self> {
        let mut graph = Self::default();

        for (name, service) in services {
            let hard = graph.hard.entry(name.clone()).or_default();
            hard.extend(service.requires.iter().cloned());
            graph
                .soft
                .entry(name.clone())
                .or_default()
                .extend(service.wants_info.iter().cloned());
        }

        for (from, to) in implicit_hard_edges {
            if from != to {
                graph.hard.entry(from.clone()).or_default().insert(to.clone());
            }
        }

        for (from, deps) in &graph.hard {
            for to in deps {
                graph
                    .dependents
                    .entry(to.clone())
                    .or_default()
                    .insert(from.clone());
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(ConfigError::DependencyCycle(cycle));
        }

        Ok(graph)
    }

    /// Direct hard dependencies of a service.
    pub fn hard_deps(&self, service: &str) -> impl Iterator<Item = &String> {
        self.hard.get(service).into_iter().flatten()
    }

    /// Direct hard dependents of a service.
    pub fn hard_dependents(&self, service: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(service).into_iter().flatten()
    }

    /// Direct soft dependencies of a service.
    pub fn soft_deps(&self, service: &str) -> impl Iterator<Item = &String> {
        self.soft.get(service).into_iter().flatten()
    }

    /// Transitive hard dependencies of a service.
    pub fn transitive_hard_deps(&self, service: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut stack: Vec<&String> = self.hard_deps(service).collect();
        while let Some(dep) = stack.pop() {
            if result.insert(dep.clone()) {
                stack.extend(self.hard_deps(dep));
            }
        }
        result
    }

    // DFS over hard edges; returns the cycle path on detection.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut path: Vec<&str> = Vec::new();

        fn visit<'a>(
            node: &'a str,
            hard: &'a BTreeMap<String, BTreeSet<String>>,
            marks: &mut BTreeMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::InProgress) => {
                    let start = path.iter().position(|n| *n == node).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(node.to_string());
                    return Some(cycle);
                }
                None => {}
            }

            marks.insert(node, Mark::InProgress);
            path.push(node);
            if let Some(deps) = hard.get(node) {
                for dep in deps {
                    if let Some(cycle) = visit(dep, hard, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks.insert(node, Mark::Done);
            None
        }

        for node in self.hard.keys() {
            if let Some(cycle) = visit(node, &self.hard, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}

/// Expansion of a selection into ordered layers of container work items.
///
/// Containers within a layer share no hard-dependency edge and may run in
/// parallel; layers run strictly in sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layers {
    /// Container names, grouped by layer, in execution order.
    pub layers: Vec<Vec<String>>,
}

impl Layers {
    /// Total number of work items.
    pub fn container_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Flat iteration over all container names in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.layers.iter().flatten()
    }
}

/// Computes the layered execution order for a play.
///
/// `selection` is the set of containers in the play. Dependencies outside
/// the selection impose no ordering and no guard is synthesized for them;
/// order is only honored among the selected containers. With `ignore_order`
/// everything collapses into a single layer.
pub fn layered_order(
    graph: &DependencyGraph,
    selection: &[(&str, &str)], // (container, service) pairs
    direction: Direction,
    ignore_order: bool,
) -> Layers {
    let mut by_service: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut service_of: BTreeMap<&str, &str> = BTreeMap::new();
    for (container, service) in selection.iter().copied() {
        by_service.entry(service).or_default().push(container);
        service_of.insert(container, service);
    }

    let sort_key = |container: &&str| {
        let service = service_of.get(container).copied().unwrap_or_default();
        (service.to_string(), container.to_string())
    };

    if ignore_order {
        let mut all: Vec<&str> = selection.iter().map(|(c, _)| *c).collect();
        all.sort_by_key(sort_key);
        return Layers {
            layers: vec![all.into_iter().map(String::from).collect()],
        };
    }

    // Container-level dependency edges, restricted to the selection: a
    // container depends on every selected container of every hard
    // dependency of its service.
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (container, service) in selection.iter().copied() {
        let mut deps = Vec::new();
        let neighbor_services: Vec<&String> = match direction {
            Direction::Forward => graph.hard_deps(service).collect(),
            Direction::Reverse => graph.hard_dependents(service).collect(),
        };
        for dep_service in neighbor_services {
            if let Some(containers) = by_service.get(dep_service.as_str()) {
                deps.extend(containers.iter().copied());
            }
        }
        edges.insert(container, deps);
    }

    // Longest-path depth; the hard graph is acyclic so this terminates.
    fn depth_of<'a>(
        node: &'a str,
        edges: &BTreeMap<&'a str, Vec<&'a str>>,
        memo: &mut BTreeMap<&'a str, usize>,
    ) -> usize {
        if let Some(depth) = memo.get(node) {
            return *depth;
        }
        let depth = edges
            .get(node)
            .into_iter()
            .flatten()
            .map(|&dep| depth_of(dep, edges, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(node, depth);
        depth
    }

    let mut memo = BTreeMap::new();
    let mut buckets: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for (container, _) in selection.iter().copied() {
        let depth = depth_of(container, &edges, &mut memo);
        buckets.entry(depth).or_default().push(container);
    }

    let layers = buckets
        .into_values()
        .map(|mut layer| {
            layer.sort_by_key(sort_key);
            layer.into_iter().map(String::from).collect()
        })
        .collect();

    Layers { layers }
}
