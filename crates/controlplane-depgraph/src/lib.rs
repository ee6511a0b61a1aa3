//! Service dependency graph (spec §4.3).
//!
//! A correct in-memory adjacency implementation, acceptable per spec for fleets
//! under ~10,000 nodes. The graph is read-mostly; callers that mutate it across
//! orchestrator instances are expected to hold a SYSTEM-scope lock
//! (`controlplane-lock`) for the duration of the write — this crate performs no
//! locking of its own.
//!
//! Edges are directed: `add_dependency(from, to)` means "from depends on to".
//! `upstream(x)` are the services `x` depends on; `downstream(x)` are the
//! services that depend on `x` (and are therefore affected if `x` misbehaves).

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown service: {0}")]
    UnknownService(String),
}

/// Traversal direction for [`DependencyGraph::dependencies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Services this service depends on.
    Upstream,
    /// Services that depend on this service.
    Downstream,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServiceNode {
    #[serde(default)]
    metadata: HashMap<String, Value>,
    #[serde(default)]
    depends_on: HashSet<String>,
    #[serde(default)]
    dependents: HashSet<String>,
    #[serde(default)]
    error_count: u64,
    #[serde(default)]
    last_error: Option<Value>,
}

/// A path from a source service out along downstream (dependent) edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationPath {
    pub services: Vec<String>,
}

impl PropagationPath {
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// In-memory service dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, ServiceNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert of a service node. Existing edges and error counters
    /// are preserved; only `metadata` is overwritten.
    pub fn add_service(&mut self, name: &str, metadata: HashMap<String, Value>) {
        let node = self.nodes.entry(name.to_string()).or_default();
        node.metadata = metadata;
    }

    /// Idempotent upsert of a directed edge `from -> to` ("from depends on to").
    /// Auto-vivifies both endpoints if they don't already exist.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        self.nodes.entry(from.to_string()).or_default();
        self.nodes.entry(to.to_string()).or_default();
        self.nodes.get_mut(from).unwrap().depends_on.insert(to.to_string());
        self.nodes.get_mut(to).unwrap().dependents.insert(from.to_string());
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn service_count(&self) -> usize {
        self.nodes.len()
    }

    /// BFS over `direction`'s edges, de-duplicated, excluding `service` itself,
    /// bounded by `max_depth` hops. Tolerant of cycles via visited-set bookkeeping.
    pub fn dependencies(
        &self,
        service: &str,
        direction: Direction,
        max_depth: usize,
    ) -> Result<Vec<String>, GraphError> {
        if !self.nodes.contains_key(service) {
            return Err(GraphError::UnknownService(service.to_string()));
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(service.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((service.to_string(), 0));
        let mut result = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            let neighbors = match direction {
                Direction::Upstream => &node.depends_on,
                Direction::Downstream => &node.dependents,
            };
            for next in neighbors {
                if visited.insert(next.clone()) {
                    result.push(next.clone());
                    queue.push_back((next.clone(), depth + 1));
                }
            }
        }

        Ok(result)
    }

    /// All downstream-reachable paths from `source`, sorted ascending by
    /// length, capped at the first 10.
    pub fn propagation_paths(&self, source: &str) -> Result<Vec<PropagationPath>, GraphError> {
        if !self.nodes.contains_key(source) {
            return Err(GraphError::UnknownService(source.to_string()));
        }

        let mut paths = Vec::new();
        let mut queue: VecDeque<Vec<String>> = VecDeque::new();
        queue.push_back(vec![source.to_string()]);

        while let Some(path) = queue.pop_front() {
            let tail = path.last().expect("path is never empty");
            let Some(node) = self.nodes.get(tail) else {
                continue;
            };
            let mut extended = false;
            for next in &node.dependents {
                if path.contains(next) {
                    continue; // avoid cycles within a single path
                }
                extended = true;
                let mut new_path = path.clone();
                new_path.push(next.clone());
                queue.push_back(new_path);
            }
            if !extended && path.len() > 1 {
                paths.push(PropagationPath { services: path });
            }
        }

        paths.sort_by_key(|p| p.len());
        paths.truncate(10);
        Ok(paths)
    }

    /// Increments the running error counter for `service` and records the
    /// latest error blob. Creates the service if it doesn't exist yet.
    pub fn annotate_error(&mut self, service: &str, error_blob: Value) {
        let node = self.nodes.entry(service.to_string()).or_default();
        node.error_count += 1;
        node.last_error = Some(error_blob);
    }

    pub fn error_count(&self, service: &str) -> Result<u64, GraphError> {
        self.nodes
            .get(service)
            .map(|n| n.error_count)
            .ok_or_else(|| GraphError::UnknownService(service.to_string()))
    }

    pub fn last_error(&self, service: &str) -> Result<Option<Value>, GraphError> {
        self.nodes
            .get(service)
            .map(|n| n.last_error.clone())
            .ok_or_else(|| GraphError::UnknownService(service.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_chain() -> DependencyGraph {
        // payment-service -> ledger-service -> db-service
        let mut g = DependencyGraph::new();
        g.add_dependency("payment-service", "ledger-service");
        g.add_dependency("ledger-service", "db-service");
        g
    }

    #[test]
    fn upstream_excludes_self_and_is_deduplicated() {
        let g = linear_chain();
        let up = g.dependencies("payment-service", Direction::Upstream, 10).unwrap();
        assert_eq!(up.len(), 2);
        assert!(up.contains(&"ledger-service".to_string()));
        assert!(up.contains(&"db-service".to_string()));
        assert!(!up.contains(&"payment-service".to_string()));
    }

    #[test]
    fn downstream_is_the_reverse_direction() {
        let g = linear_chain();
        let down = g.dependencies("db-service", Direction::Downstream, 10).unwrap();
        assert_eq!(down.len(), 2);
        assert!(down.contains(&"ledger-service".to_string()));
        assert!(down.contains(&"payment-service".to_string()));
    }

    #[test]
    fn max_depth_caps_traversal() {
        let g = linear_chain();
        let up = g.dependencies("payment-service", Direction::Upstream, 1).unwrap();
        assert_eq!(up, vec!["ledger-service".to_string()]);
    }

    #[test]
    fn unknown_service_is_an_error() {
        let g = DependencyGraph::new();
        let err = g.dependencies("nope", Direction::Upstream, 5).unwrap_err();
        assert_eq!(err, GraphError::UnknownService("nope".to_string()));
    }

    #[test]
    fn cycles_are_tolerated_via_visited_set() {
        let mut g = DependencyGraph::new();
        g.add_dependency("a", "b");
        g.add_dependency("b", "a");
        let up = g.dependencies("a", Direction::Upstream, 10).unwrap();
        assert_eq!(up, vec!["b".to_string()]);
    }

    #[test]
    fn propagation_paths_sorted_and_capped() {
        // db-service has two downstream consumers, each chained further.
        let mut g = DependencyGraph::new();
        g.add_dependency("payment-service", "db-service");
        g.add_dependency("ledger-service", "db-service");
        g.add_dependency("reporting-service", "ledger-service");

        let paths = g.propagation_paths("db-service").unwrap();
        assert!(paths.len() >= 2);
        assert!(paths.windows(2).all(|w| w[0].len() <= w[1].len()));
        assert!(paths.iter().any(|p| p.services == vec![
            "db-service".to_string(),
            "payment-service".to_string()
        ]));
    }

    #[test]
    fn propagation_paths_unknown_service_errors() {
        let g = DependencyGraph::new();
        assert!(g.propagation_paths("nope").is_err());
    }

    #[test]
    fn annotate_error_accumulates() {
        let mut g = DependencyGraph::new();
        g.add_service("payment-service", HashMap::new());
        g.annotate_error("payment-service", serde_json::json!({"code": "E_TIMEOUT"}));
        g.annotate_error("payment-service", serde_json::json!({"code": "E_TIMEOUT"}));
        assert_eq!(g.error_count("payment-service").unwrap(), 2);
        assert_eq!(
            g.last_error("payment-service").unwrap(),
            Some(serde_json::json!({"code": "E_TIMEOUT"}))
        );
    }

    #[test]
    fn add_service_is_idempotent_and_preserves_edges() {
        let mut g = linear_chain();
        g.add_service("payment-service", HashMap::new());
        g.add_service("payment-service", HashMap::new());
        let up = g.dependencies("payment-service", Direction::Upstream, 10).unwrap();
        assert_eq!(up.len(), 2);
    }
}
