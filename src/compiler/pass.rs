//! The optimization pass contract.

use crate::{
    compiler::{CheckFailure, SsaChecker},
    ir::Graph,
};

/// A transformation over a graph in SSA form.
///
/// Passes run exactly once per compilation, in a fixed order. After
/// [`Optimization::run`] the pipeline calls [`Optimization::check`]; a failed
/// check means the pass broke the graph and is treated as fatal.
pub trait Optimization {
    /// Stable name used in logs and diagnostics dumps.
    fn name(&self) -> &'static str;

    /// Transforms the graph in place.
    fn run(&mut self, graph: &mut Graph);

    /// Validates the graph after [`Optimization::run`].
    ///
    /// The default runs the shared [`SsaChecker`].
    ///
    /// # Errors
    ///
    /// Returns the broken invariant.
    fn check(&self, graph: &Graph) -> Result<(), CheckFailure> {
        SsaChecker::check(graph)
    }
}
