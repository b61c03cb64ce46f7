//! Graph abstractions shared by the control-flow analyses.
//!
//! The algorithms only need to walk edges, so they are written against a
//! handful of small traits instead of a concrete graph type. The IR graph
//! implements them over its block table.

pub mod algorithms;
mod node;

pub use node::NodeId;

/// A graph with a dense, fixed node numbering.
pub trait GraphBase {
    /// Number of node slots. Removed nodes still occupy a slot.
    fn node_count(&self) -> usize;
}

/// Forward edge access.
pub trait Successors: GraphBase {
    /// Successors of `node`, in edge order.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

/// Backward edge access.
pub trait Predecessors: GraphBase {
    /// Predecessors of `node`, in edge order.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

/// A graph with a distinguished entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// The unique entry node.
    fn entry(&self) -> NodeId;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{GraphBase, NodeId, Predecessors, RootedGraph, Successors};

    /// Adjacency-list graph used by the algorithm unit tests.
    pub(crate) struct EdgeListGraph {
        successors: Vec<Vec<NodeId>>,
        predecessors: Vec<Vec<NodeId>>,
    }

    impl EdgeListGraph {
        pub(crate) fn new(nodes: usize, edges: &[(usize, usize)]) -> Self {
            let mut successors = vec![Vec::new(); nodes];
            let mut predecessors = vec![Vec::new(); nodes];
            for &(from, to) in edges {
                successors[from].push(NodeId::new(to));
                predecessors[to].push(NodeId::new(from));
            }
            Self {
                successors,
                predecessors,
            }
        }
    }

    impl GraphBase for EdgeListGraph {
        fn node_count(&self) -> usize {
            self.successors.len()
        }
    }

    impl Successors for EdgeListGraph {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
            self.successors[node.index()].iter().copied()
        }
    }

    impl Predecessors for EdgeListGraph {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
            self.predecessors[node.index()].iter().copied()
        }
    }

    impl RootedGraph for EdgeListGraph {
        fn entry(&self) -> NodeId {
            NodeId::new(0)
        }
    }
}
