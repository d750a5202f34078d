//! Connection graph analysis using petgraph.
//!
//! Workflows store nodes and connections as flat lists. [`ConnectionGraph`]
//! borrows them into a petgraph `DiGraph` for the structural questions the
//! validator and orchestrator ask: is there a cycle, what is a dependency
//! order, and does the declared `order` agree with the edges.

use crate::connection::NodeConnection;
use crate::error::StructuralError;
use crate::node::Node;
use innoflow_core::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A borrowed directed view of a workflow's nodes and connections.
///
/// Connections whose endpoints are not among the given nodes are left out.
#[derive(Debug)]
pub struct ConnectionGraph<'a> {
    graph: DiGraph<&'a Node, &'a NodeConnection>,
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl<'a> ConnectionGraph<'a> {
    /// Builds the view.
    #[must_use]
    pub fn new(
        nodes: impl IntoIterator<Item = &'a Node>,
        connections: impl IntoIterator<Item = &'a NodeConnection>,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut node_index_map = HashMap::new();
        for node in nodes {
            let index = graph.add_node(node);
            node_index_map.insert(node.id, index);
        }
        for connection in connections {
            let (Some(&source), Some(&target)) = (
                node_index_map.get(&connection.source_node),
                node_index_map.get(&connection.target_node),
            ) else {
                continue;
            };
            graph.add_edge(source, target, connection);
        }
        Self {
            graph,
            node_index_map,
        }
    }

    /// Returns the number of nodes in the view.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of connections in the view.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns true if any directed cycle exists.
    ///
    /// Depth-first search with a fully-visited set and an on-stack set;
    /// stops at the first back edge found.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();

        for start in self.graph.node_indices() {
            if visited.contains(&start) {
                continue;
            }
            // Each frame holds a node and the successors still to explore.
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> =
                vec![(start, self.successors(start))];
            visited.insert(start);
            on_stack.insert(start);

            while let Some((current, pending)) = stack.last_mut() {
                let current = *current;
                match pending.pop() {
                    Some(next) if on_stack.contains(&next) => return true,
                    Some(next) if visited.insert(next) => {
                        on_stack.insert(next);
                        let successors = self.successors(next);
                        stack.push((next, successors));
                    }
                    Some(_) => {}
                    None => {
                        on_stack.remove(&current);
                        stack.pop();
                    }
                }
            }
        }
        false
    }

    /// Orders all nodes so every connection points forward.
    ///
    /// Kahn's algorithm; among nodes that are ready at the same time the
    /// lower declared `order` goes first.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetected` if no such order exists.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, StructuralError> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph.edges_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: BTreeSet<(i32, NodeId)> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| self.sort_key(*idx))
            .collect();

        let mut ordered = Vec::with_capacity(self.graph.node_count());
        while let Some(key) = ready.pop_first() {
            let (_, node_id) = key;
            ordered.push(node_id);
            let index = self.node_index_map[&node_id];
            for edge in self.graph.edges_directed(index, Direction::Outgoing) {
                let target = edge.target();
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(self.sort_key(target));
                    }
                }
            }
        }

        if ordered.len() == self.graph.node_count() {
            Ok(ordered)
        } else {
            Err(StructuralError::CycleDetected)
        }
    }

    /// Returns connections whose source is not ordered strictly before the target.
    #[must_use]
    pub fn order_violations(&self) -> Vec<&'a NodeConnection> {
        self.graph
            .edge_references()
            .filter(|edge| self.graph[edge.source()].order >= self.graph[edge.target()].order)
            .map(|edge| *edge.weight())
            .collect()
    }

    fn successors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect()
    }

    fn sort_key(&self, index: NodeIndex) -> (i32, NodeId) {
        let node = self.graph[index];
        (node.order, node.id)
    }
}
