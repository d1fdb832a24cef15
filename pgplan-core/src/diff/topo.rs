//! Dependency graph with deterministic topological sort.
//!
//! Used for table ordering (foreign-key edges) and view ordering
//! (view-references-view edges). Kahn's algorithm with a fixed tiebreaker:
//! among ready nodes, the one inserted earliest wins — callers insert nodes
//! pre-sorted by `schema.name`, so output is fully deterministic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// A directed dependency graph over string node ids.
///
/// An edge `from → to` means `from` depends on `to`: `to` must appear
/// before `from` in the sorted output.
#[derive(Debug, Default)]
pub struct DepGraph {
    /// Insertion order of nodes; doubles as the tiebreaker.
    nodes: Vec<String>,
    index: BTreeMap<String, usize>,
    /// node → nodes it depends on.
    deps: BTreeMap<String, BTreeSet<String>>,
    /// node → nodes that depend on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

/// A concrete dependency cycle, as a node sequence where each node depends
/// on the next and the last depends on the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub nodes: Vec<String>,
}

impl Cycle {
    /// The edge to break: the lexicographically-largest node in the cycle
    /// (the referrer) together with the node it depends on within the cycle.
    pub fn break_edge(&self) -> (String, String) {
        let referrer = self.nodes.iter().max().unwrap().clone();
        let pos = self.nodes.iter().position(|n| n == &referrer).unwrap();
        let referenced = self.nodes[(pos + 1) % self.nodes.len()].clone();
        (referrer, referenced)
    }
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Insertion order is the sort tiebreaker, so callers
    /// add nodes pre-sorted. Re-adding an existing node is a no-op.
    pub fn add_node(&mut self, id: &str) {
        if self.index.contains_key(id) {
            return;
        }
        self.index.insert(id.to_string(), self.nodes.len());
        self.nodes.push(id.to_string());
        self.deps.entry(id.to_string()).or_default();
        self.dependents.entry(id.to_string()).or_default();
    }

    /// Add an edge: `from` depends on `to`. Both nodes must exist; edges to
    /// unknown nodes (e.g. external tables) are ignored. Self-edges are
    /// ignored — a table with an FK to itself needs no ordering.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        if from == to || !self.index.contains_key(from) || !self.index.contains_key(to) {
            return;
        }
        self.deps.get_mut(from).unwrap().insert(to.to_string());
        self.dependents.get_mut(to).unwrap().insert(from.to_string());
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) {
        if let Some(deps) = self.deps.get_mut(from) {
            deps.remove(to);
        }
        if let Some(dependents) = self.dependents.get_mut(to) {
            dependents.remove(from);
        }
    }

    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        self.deps.get(from).is_some_and(|d| d.contains(to))
    }

    /// Topologically sort all nodes (dependencies first).
    ///
    /// Returns `Err` with one concrete cycle if the graph is cyclic.
    pub fn sort(&self) -> Result<Vec<String>, Cycle> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        for node in &self.nodes {
            in_degree.insert(node, self.deps[node].len());
        }

        // Min-heap on insertion index: earliest-inserted ready node first
        let mut ready: BinaryHeap<Reverse<usize>> = BinaryHeap::new();
        for node in &self.nodes {
            if in_degree[node.as_str()] == 0 {
                ready.push(Reverse(self.index[node]));
            }
        }

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            let node = &self.nodes[idx];
            sorted.push(node.clone());
            for dependent in &self.dependents[node] {
                let degree = in_degree.get_mut(dependent.as_str()).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(self.index[dependent]));
                }
            }
        }

        if sorted.len() == self.nodes.len() {
            return Ok(sorted);
        }

        // Remaining nodes with positive in-degree form at least one cycle.
        let remaining: BTreeSet<&str> = self
            .nodes
            .iter()
            .map(|n| n.as_str())
            .filter(|n| in_degree[n] > 0)
            .collect();
        Err(self.find_cycle(&remaining))
    }

    /// Walk dependency edges inside `remaining` until a node repeats.
    fn find_cycle(&self, remaining: &BTreeSet<&str>) -> Cycle {
        let start = *remaining.iter().next().expect("remaining set is non-empty");
        let mut path: Vec<&str> = vec![start];
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        seen.insert(start, 0);
        let mut current = start;
        loop {
            // Every remaining node has at least one dep edge inside the
            // remaining set; pick the smallest for determinism.
            let next = self.deps[current]
                .iter()
                .map(|d| d.as_str())
                .find(|d| remaining.contains(d))
                .expect("remaining node must have a dependency in the remaining set");
            if let Some(&pos) = seen.get(next) {
                let nodes = path[pos..].iter().map(|s| s.to_string()).collect();
                return Cycle { nodes };
            }
            seen.insert(next, path.len());
            path.push(next);
            current = next;
        }
    }
}
