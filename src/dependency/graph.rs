use crate::config::Manifest;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// Dependency graph for managing service start order.
///
/// Node order is insertion order, so sorting is deterministic for a given
/// manifest.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<String>,
    /// `edges[A] = [B, C]` means A depends on B and C
    edges: HashMap<String, Vec<String>>,
    /// `reverse[A] = [B, C]` means B and C depend on A
    reverse: HashMap<String, Vec<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for every service in the manifest, in manifest order.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut graph = Self::new();
        for service in &manifest.services {
            graph.add_node(service.id.clone());
        }
        for service in &manifest.services {
            for dep in &service.dependencies {
                graph.add_edge(service.id.clone(), dep.clone());
            }
        }
        graph
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, name: String) {
        if self.edges.contains_key(&name) {
            return;
        }
        self.nodes.push(name.clone());
        self.edges.insert(name.clone(), Vec::new());
        self.reverse.insert(name, Vec::new());
    }

    /// Add a dependency edge (from depends on to). Repeated edges are ignored.
    pub fn add_edge(&mut self, from: String, to: String) {
        self.add_node(from.clone());
        self.add_node(to.clone());

        let deps = self.edges.entry(from.clone()).or_default();
        if deps.contains(&to) {
            return;
        }
        deps.push(to.clone());
        self.reverse.entry(to).or_default().push(from);
    }

    /// Get direct dependencies of a node
    pub fn direct_dependencies(&self, node: &str) -> &[String] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Get nodes that depend on the given node
    pub fn dependents(&self, node: &str) -> &[String] {
        self.reverse.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Topological sort - returns nodes in dependency order (dependencies first)
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.direct_dependencies(n).len()))
            .collect();

        // Find all nodes with no dependencies
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            result.push(node.to_string());

            for dependent in self.dependents(node) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        // Fewer results than nodes means some nodes sit on a cycle
        if result.len() != self.nodes.len() {
            return Err(Error::CircularDependency(self.find_cycle()));
        }

        Ok(result)
    }

    /// Find a cycle in the graph and return it as a path
    fn find_cycle(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node.as_str()) {
                if let Some(cycle) =
                    self.find_cycle_dfs(node, &mut visited, &mut rec_stack, &mut path)
                {
                    return cycle;
                }
            }
        }

        // Fallback if we can't find the exact cycle
        self.nodes.iter().take(3).cloned().collect()
    }

    fn find_cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for dep in self.direct_dependencies(node) {
            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = self.find_cycle_dfs(dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep.as_str()) {
                let cycle_start = path.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[cycle_start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone()); // Complete the cycle
                return Some(cycle);
            }
        }

        rec_stack.remove(node);
        path.pop();
        None
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.topological_sort().is_err()
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|s| s == name).unwrap()
    }

    #[test]
    fn test_topological_sort() {
        let mut graph = Graph::new();
        graph.add_edge("a".to_string(), "b".to_string());
        graph.add_edge("b".to_string(), "c".to_string());

        let sorted = graph.topological_sort().unwrap();

        assert!(position(&sorted, "c") < position(&sorted, "b"));
        assert!(position(&sorted, "b") < position(&sorted, "a"));
    }

    #[test]
    fn test_independent_nodes_keep_insertion_order() {
        let mut graph = Graph::new();
        graph.add_node("web".to_string());
        graph.add_node("db".to_string());
        graph.add_node("cache".to_string());

        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["web".to_string(), "db".to_string(), "cache".to_string()]
        );
    }

    #[test]
    fn test_duplicate_edges_ignored() {
        let mut graph = Graph::new();
        graph.add_edge("api".to_string(), "db".to_string());
        graph.add_edge("api".to_string(), "db".to_string());
        assert_eq!(graph.direct_dependencies("api"), ["db".to_string()]);
        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["db".to_string(), "api".to_string()]
        );
    }

    #[test]
    fn test_circular_dependency() {
        let mut graph = Graph::new();
        graph.add_edge("a".to_string(), "b".to_string());
        graph.add_edge("b".to_string(), "a".to_string());

        assert!(graph.has_cycle());
        match graph.topological_sort() {
            Err(Error::CircularDependency(path)) => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle() {
        let mut graph = Graph::new();
        graph.add_edge("solo".to_string(), "solo".to_string());
        match graph.topological_sort() {
            Err(Error::CircularDependency(path)) => {
                assert_eq!(path, vec!["solo".to_string(), "solo".to_string()]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }
}
