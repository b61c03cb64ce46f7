//! Depth-first orderings.
//!
//! Both functions return collected vectors: an ordering is only meaningful
//! once the whole reachable graph has been walked. Nodes unreachable from
//! `start` do not appear.

use crate::utils::graph::{NodeId, Successors};

/// Returns the reachable nodes in depth-first post order.
///
/// Successors are explored in edge order, so for a two-way branch the first
/// successor's subtree finishes before the second one's.
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);
    let mut stack = vec![(start, State::Enter)];

    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Returns the reachable nodes in reverse post order.
///
/// Every node appears after all of its non-back-edge predecessors, which is
/// the order forward analyses and the linear block order want.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = postorder(graph, start);
    order.reverse();
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::testing::EdgeListGraph;

    fn ids(raw: &[usize]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId::new).collect()
    }

    #[test]
    fn diamond_orders() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3
        let graph = EdgeListGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(postorder(&graph, NodeId::new(0)), ids(&[3, 1, 2, 0]));
        assert_eq!(reverse_postorder(&graph, NodeId::new(0)), ids(&[0, 2, 1, 3]));
    }

    #[test]
    fn unreachable_nodes_are_skipped() {
        let graph = EdgeListGraph::new(3, &[(0, 1), (2, 1)]);
        assert_eq!(reverse_postorder(&graph, NodeId::new(0)), ids(&[0, 1]));
    }

    #[test]
    fn loop_header_precedes_body() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3
        let graph = EdgeListGraph::new(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let rpo = reverse_postorder(&graph, NodeId::new(0));
        let position = |n: usize| rpo.iter().position(|&x| x.index() == n).unwrap();
        assert!(position(1) < position(2));
        assert!(position(1) < position(3));
    }
}
