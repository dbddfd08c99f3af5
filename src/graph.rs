//! Resource Dependency Graph
//!
//! Identity-keyed nodes with typed edges, backed by petgraph. Edges point
//! from a dependency to its dependent, so a topological sort yields a valid
//! creation order and its reverse a valid destruction order.
//!
//! - Execution ordering (`execution_order`, `waves`)
//! - Cycle detection
//! - Replacement impact (`reference_dependents`)
//! - DOT visualization

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{Error, Result};
use crate::resources::{EdgeKind, ResourceId};
use crate::state::AppliedState;
use crate::topology::Declaration;

/// Dependency graph over resource ids.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: DiGraph<ResourceId, EdgeKind>,
    node_indices: HashMap<ResourceId, NodeIndex>,
}

impl ResourceGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of a declaration.
    pub fn from_declaration(decl: &Declaration) -> Result<Self> {
        let mut graph = Self::new();
        for resource in decl.iter() {
            graph.add_node(resource.id.clone());
        }
        for resource in decl.iter() {
            for dep in resource.dependencies() {
                graph.add_edge(&dep.target, &resource.id, dep.kind)?;
            }
        }
        Ok(graph)
    }

    /// Graph of recorded state, using the dependencies captured at apply
    /// time. Dependencies on resources no longer recorded are skipped.
    pub fn from_state(state: &AppliedState) -> Self {
        let mut graph = Self::new();
        for record in state.resources() {
            graph.add_node(record.id.clone());
        }
        for record in state.resources() {
            for dep in &record.dependencies {
                // Targets no longer recorded have no node.
                let _ = graph.add_edge(&dep.target, &record.id, dep.kind);
            }
        }
        graph
    }

    /// Add a node; returns the existing index if already present.
    pub fn add_node(&mut self, id: ResourceId) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.node_indices.insert(id, idx);
        idx
    }

    /// Add an edge meaning "`to` depends on `from`".
    pub fn add_edge(&mut self, from: &ResourceId, to: &ResourceId, kind: EdgeKind) -> Result<()> {
        let from_idx = self.index(from, to)?;
        let to_idx = self.index(to, from)?;
        self.graph.add_edge(from_idx, to_idx, kind);
        Ok(())
    }

    fn index(&self, id: &ResourceId, other: &ResourceId) -> Result<NodeIndex> {
        self.node_indices
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownReference {
                from: other.clone(),
                to: id.clone(),
            })
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.node_indices.contains_key(id)
    }

    /// Check for dependency cycles
    pub fn has_cycles(&self) -> bool {
        tarjan_scc(&self.graph).iter().any(|scc| scc.len() > 1)
    }

    /// Get all cycles in the graph
    pub fn cycles(&self) -> Vec<Vec<ResourceId>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                scc.into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect()
            })
            .collect()
    }

    /// Topological order: every resource after everything it depends on.
    pub fn execution_order(&self) -> Result<Vec<ResourceId>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .filter_map(|idx| self.graph.node_weight(idx).cloned())
                .collect()),
            Err(_) => {
                let cycles = self
                    .cycles()
                    .into_iter()
                    .map(|c| {
                        c.iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(" -> ")
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(Error::DependencyCycle(cycles))
            }
        }
    }

    /// Group resources by dependency depth.
    ///
    /// Everything in wave `n` depends only on resources in waves `< n`, so a
    /// wave may run concurrently while waves run in sequence.
    pub fn waves(&self) -> Result<Vec<Vec<ResourceId>>> {
        let order = toposort(&self.graph, None)
            .map_err(|_| Error::DependencyCycle("cannot layer a cyclic graph".to_string()))?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in &order {
            let d = self
                .graph
                .neighbors_directed(*idx, Direction::Incoming)
                .filter_map(|p| depth.get(&p))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*idx, d);
        }

        let layers = depth.values().max().map_or(0, |d| d + 1);
        let mut waves: Vec<Vec<ResourceId>> = vec![Vec::new(); layers];
        for idx in order {
            if let (Some(d), Some(id)) = (depth.get(&idx), self.graph.node_weight(idx)) {
                waves[*d].push(id.clone());
            }
        }
        for wave in &mut waves {
            wave.sort();
        }
        Ok(waves)
    }

    /// Direct dependencies of a resource.
    pub fn direct_dependencies(&self, id: &ResourceId) -> Vec<(ResourceId, EdgeKind)> {
        self.node_indices
            .get(id)
            .map(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .filter_map(|e| {
                        self.graph
                            .node_weight(e.source())
                            .map(|n| (n.clone(), *e.weight()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Everything that (transitively) depends on `id`.
    pub fn dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.walk(id, Direction::Outgoing, |_| true)
    }

    /// Everything `id` (transitively) depends on.
    pub fn dependencies(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.walk(id, Direction::Incoming, |_| true)
    }

    /// Dependents reached only through structural references; these must be
    /// replaced when `id` is replaced.
    pub fn reference_dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.walk(id, Direction::Outgoing, |kind| kind == EdgeKind::Reference)
    }

    fn walk(
        &self,
        id: &ResourceId,
        direction: Direction,
        follow: impl Fn(EdgeKind) -> bool,
    ) -> Vec<ResourceId> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut queue = VecDeque::new();

        if let Some(&start) = self.node_indices.get(id) {
            queue.push_back(start);
            while let Some(current) = queue.pop_front() {
                for edge in self.graph.edges_directed(current, direction) {
                    if !follow(*edge.weight()) {
                        continue;
                    }
                    let next = match direction {
                        Direction::Outgoing => edge.target(),
                        Direction::Incoming => edge.source(),
                    };
                    if seen.insert(next) {
                        if let Some(node) = self.graph.node_weight(next) {
                            found.push(node.clone());
                        }
                        queue.push_back(next);
                    }
                }
            }
        }

        found.sort();
        found
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Generate a DOT format representation for visualization
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph resources {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        for idx in self.graph.node_indices() {
            if let Some(id) = self.graph.node_weight(idx) {
                output.push_str(&format!(
                    "  \"{}\" [label=\"{}\\n{}\"];\n",
                    id, id.name, id.kind
                ));
            }
        }

        output.push('\n');

        for edge in self.graph.edge_references() {
            let source = self.graph.node_weight(edge.source());
            let target = self.graph.node_weight(edge.target());
            if let (Some(source), Some(target)) = (source, target) {
                let style = match edge.weight() {
                    EdgeKind::Reference => "solid",
                    EdgeKind::Identity => "dashed",
                    EdgeKind::Explicit => "bold",
                };
                output.push_str(&format!(
                    "  \"{}\" -> \"{}\" [style={}];\n",
                    source, target, style
                ));
            }
        }

        output.push_str("}\n");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceKind;
    use crate::topology::{declare, CLUSTER_NAME, NAT_NAME, PEERING_NAME, PSA_RANGE_NAME, VM_NAME};
    use crate::variables::Variables;

    fn id(kind: ResourceKind, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    fn topology_graph() -> ResourceGraph {
        let vars = Variables::new("demo", "europe-west2", "x").unwrap();
        ResourceGraph::from_declaration(&declare(&vars).unwrap()).unwrap()
    }

    fn position(order: &[ResourceId], target: &ResourceId) -> usize {
        order.iter().position(|i| i == target).unwrap()
    }

    #[test]
    fn test_topology_is_acyclic() {
        let graph = topology_graph();
        assert!(!graph.has_cycles());
        assert_eq!(graph.node_count(), 16);
    }

    #[test]
    fn test_range_then_peering_then_cluster() {
        let graph = topology_graph();
        let order = graph.execution_order().unwrap();
        let range = position(&order, &id(ResourceKind::PrivateServiceRange, PSA_RANGE_NAME));
        let peering = position(&order, &id(ResourceKind::PeeringConnection, PEERING_NAME));
        let cluster = position(&order, &id(ResourceKind::DatabaseCluster, CLUSTER_NAME));
        assert!(range < peering);
        assert!(peering < cluster);
    }

    #[test]
    fn test_vm_after_nat_and_service_account() {
        let graph = topology_graph();
        let deps = graph.dependencies(&id(ResourceKind::AccessVm, VM_NAME));
        assert!(deps.contains(&id(ResourceKind::RouterNat, NAT_NAME)));
        assert!(deps.contains(&id(ResourceKind::ServiceAccount, "vuln-access-vm")));
        assert!(deps.contains(&id(ResourceKind::Network, "vuln-vpc")));
    }

    #[test]
    fn test_waves_respect_edges() {
        let graph = topology_graph();
        let waves = graph.waves().unwrap();
        let wave_of = |target: &ResourceId| waves.iter().position(|w| w.contains(target)).unwrap();

        assert_eq!(waves.iter().map(Vec::len).sum::<usize>(), 16);
        // Independent roots share the first wave.
        assert!(waves[0].contains(&id(ResourceKind::Network, "vuln-vpc")));
        assert!(waves[0].contains(&id(ResourceKind::ArchiveDataset, "vulnerability_archive")));
        assert!(waves[0].contains(&id(ResourceKind::ServiceAccount, "vuln-access-vm")));

        for idx in graph.graph.node_indices() {
            for edge in graph.graph.edges_directed(idx, Direction::Outgoing) {
                let from = &graph.graph[edge.source()];
                let to = &graph.graph[edge.target()];
                assert!(wave_of(from) < wave_of(to), "{} must precede {}", from, to);
            }
        }
    }

    #[test]
    fn test_reference_dependents_skip_identity_edges() {
        let graph = topology_graph();
        let sa = id(ResourceKind::ServiceAccount, "vuln-access-vm");
        assert!(graph.reference_dependents(&sa).is_empty());
        assert_eq!(graph.dependents(&sa).len(), 4);

        let network_dependents = graph.reference_dependents(&id(ResourceKind::Network, "vuln-vpc"));
        assert!(network_dependents.contains(&id(ResourceKind::DatabaseInstance, "vuln-consolidation-primary")));
        assert!(!network_dependents.contains(&id(ResourceKind::ArchiveTable, "raw_scan_logs")));
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = ResourceGraph::new();
        let a = id(ResourceKind::Network, "a");
        let b = id(ResourceKind::Subnetwork, "b");
        graph.add_node(a.clone());
        graph.add_node(b.clone());
        graph.add_edge(&a, &b, EdgeKind::Reference).unwrap();
        graph.add_edge(&b, &a, EdgeKind::Explicit).unwrap();

        assert!(graph.has_cycles());
        assert_eq!(graph.cycles().len(), 1);
        assert!(matches!(graph.execution_order(), Err(Error::DependencyCycle(_))));
        assert!(graph.waves().is_err());
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let mut graph = ResourceGraph::new();
        let a = id(ResourceKind::Network, "a");
        graph.add_node(a.clone());
        let err = graph
            .add_edge(&id(ResourceKind::Router, "missing"), &a, EdgeKind::Reference)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownReference { .. }));
    }

    #[test]
    fn test_to_dot() {
        let dot = topology_graph().to_dot();
        assert!(dot.starts_with("digraph resources"));
        assert!(dot.contains("\"private_service_range/alloydb-psa-range\" -> \"peering_connection/servicenetworking\""));
        assert!(dot.contains("style=bold"));
    }
}
