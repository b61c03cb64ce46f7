//! Dominator tree construction over the frozen graph.

use crate::{
    ir::{BlockId, Dominance, Graph},
    utils::graph::{
        algorithms::{compute_dominators, reverse_postorder},
        RootedGraph,
    },
};

/// Computes the dominator tree and reverse post-order of `graph`.
///
/// Blocks not reachable from the entry are disconnected and removed first,
/// so every remaining block except the entry has an immediate dominator.
///
/// # Panics
///
/// Panics if the graph is not frozen or dominance was already computed;
/// dominance is computed exactly once per compilation.
pub fn build_dominator_tree(graph: &mut Graph) {
    assert!(graph.is_frozen(), "dominance requires a frozen graph");
    assert!(
        graph.dominance().is_none(),
        "dominance is computed once per graph"
    );

    let entry = graph.entry();
    let reachability = compute_dominators(graph, entry);
    let unreachable: Vec<BlockId> = graph
        .block_ids()
        .filter(|&block| !reachability.is_reachable(block.into()))
        .collect();
    for &block in unreachable.iter().rev() {
        graph.remove_block(block);
    }

    let tree = if unreachable.is_empty() {
        reachability
    } else {
        compute_dominators(graph, entry)
    };
    let reverse_post_order = reverse_postorder(graph, entry)
        .into_iter()
        .map(BlockId::from)
        .collect();
    let edge_count = graph.edge_count();
    graph.set_dominance(Dominance {
        tree,
        reverse_post_order,
        edge_count,
    });
}
