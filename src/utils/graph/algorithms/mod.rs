//! Control-flow graph algorithms.
//!
//! - [`compute_dominators`] - Lengauer-Tarjan immediate dominators
//! - [`compute_dominance_frontiers`] - per-node dominance frontiers
//! - [`postorder`] / [`reverse_postorder`] - depth-first orderings from the entry

mod dominators;
mod traversal;

pub use dominators::{compute_dominance_frontiers, compute_dominators, DominatorTree};
pub use traversal::{postorder, reverse_postorder};
