//! Generic attributed graph.
//!
//! [`Graph`] is the export shape of a reconstructed [`Tree`]: plain nodes
//! with a role and a caption, plain typed edges, and adjacency lists in both
//! directions. Renderers consume it, as does the equivalence oracle. Nothing
//! here draws.

use serde::Serialize;

use crate::reconstruct::{EdgeKind, NodeId, Role, Tree};

/// A node of a [`Graph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    /// Index of the node, equal to its position in [`Graph::nodes`]
    pub id: NodeId,
    /// What the node stands for
    pub role: Role,
    /// `pid pgid sid ppid` caption, `ppid` printed as `-1` for placeholders
    pub caption: String,
}

/// A typed edge of a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    /// Source node
    pub from: NodeId,
    /// Destination node
    pub to: NodeId,
    /// Relation type
    pub kind: EdgeKind,
}

/// Attributed directed multigraph built from a [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    #[serde(skip)]
    outgoing: Vec<Vec<(NodeId, EdgeKind)>>,
    #[serde(skip)]
    incoming: Vec<Vec<(NodeId, EdgeKind)>>,
}

impl Graph {
    /// All nodes in id order.
    #[must_use]
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// All edges in construction order.
    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Targets of the edges leaving `id`, with their relation type.
    #[must_use]
    pub fn successors(&self, id: NodeId) -> &[(NodeId, EdgeKind)] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Sources of the edges arriving at `id`, with their relation type.
    #[must_use]
    pub fn predecessors(&self, id: NodeId) -> &[(NodeId, EdgeKind)] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or_default()
    }
}

impl From<&Tree> for Graph {
    fn from(tree: &Tree) -> Self {
        let nodes = tree
            .nodes()
            .iter()
            .enumerate()
            .map(|(id, node)| {
                let ppid = node.ppid.map_or_else(|| String::from("-1"), |p| p.to_string());
                GraphNode {
                    id,
                    role: node.role,
                    caption: format!("{} {} {} {ppid}", node.pid, node.pgid, node.sid),
                }
            })
            .collect::<Vec<_>>();

        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut incoming = vec![Vec::new(); nodes.len()];
        let mut edges = Vec::with_capacity(tree.edges().len());
        for edge in tree.edges() {
            outgoing[edge.from].push((edge.to, edge.kind));
            incoming[edge.to].push((edge.from, edge.kind));
            edges.push(GraphEdge {
                from: edge.from,
                to: edge.to,
                kind: edge.kind,
            });
        }

        Self {
            nodes,
            edges,
            outgoing,
            incoming,
        }
    }
}
