//! The fixed sequence of optimizations.

use tracing::trace;

use crate::{
    compiler::{
        passes::{
            ConstantFolding, DeadCodeElimination, DeadPhiElimination, GlobalValueNumbering,
            InstructionSimplifier, RedundantPhiElimination,
        },
        Optimization,
    },
    ir::Graph,
};

/// An ordered list of passes, each run once.
///
/// After every pass the pipeline validates the graph with the pass's
/// [`Optimization::check`] and then hands the graph to an observer, which
/// the driver uses to dump it under the pass name.
///
/// # Panics
///
/// [`OptimizationPipeline::run`] panics when a check fails. A pass that
/// breaks the graph is a compiler bug and nothing downstream can trust the
/// result.
pub struct OptimizationPipeline {
    passes: Vec<Box<dyn Optimization + Send>>,
}

impl OptimizationPipeline {
    /// The optimized path's passes:
    ///
    /// 1. dead code elimination
    /// 2. constant folding
    /// 3. redundant phi elimination
    /// 4. dead phi elimination
    /// 5. instruction simplification
    /// 6. global value numbering
    /// 7. instruction simplification again, to clean up after numbering
    #[must_use]
    pub fn standard() -> Self {
        Self {
            passes: vec![
                Box::new(DeadCodeElimination::new()),
                Box::new(ConstantFolding::new()),
                Box::new(RedundantPhiElimination::new()),
                Box::new(DeadPhiElimination::new()),
                Box::new(InstructionSimplifier::new()),
                Box::new(GlobalValueNumbering::new()),
                Box::new(InstructionSimplifier::named("instruction_simplifier_after_gvn")),
            ],
        }
    }

    /// Passes run on baseline-compiled methods purely to exercise them. Their
    /// output is thrown away.
    #[must_use]
    pub fn coverage() -> Self {
        Self {
            passes: vec![
                Box::new(RedundantPhiElimination::new()),
                Box::new(DeadPhiElimination::new()),
                Box::new(GlobalValueNumbering::new()),
            ],
        }
    }

    /// Pass names in execution order.
    pub fn pass_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|pass| pass.name())
    }

    /// Runs every pass over `graph`, calling `observer` with the pass name
    /// after each successful check.
    pub fn run<F>(&mut self, graph: &mut Graph, mut observer: F)
    where
        F: FnMut(&'static str, &Graph),
    {
        assert!(graph.in_ssa(), "optimizations require a graph in SSA form");
        for pass in &mut self.passes {
            let name = pass.name();
            trace!(pass = name, "running");
            pass.run(graph);
            if let Err(failure) = pass.check(graph) {
                panic!("graph check failed after {name}: {failure}");
            }
            observer(name, graph);
        }
    }
}

impl Default for OptimizationPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::DexAssembler,
        compiler::passes::testing::{count, ssa_graph},
        ir::{BinaryOp, Comparison},
        Result,
    };

    #[test]
    fn standard_order() {
        let names: Vec<_> = OptimizationPipeline::standard().pass_names().collect();
        assert_eq!(
            names,
            [
                "dead_code_elimination",
                "constant_folding",
                "redundant_phi_elimination",
                "dead_phi_elimination",
                "instruction_simplifier",
                "global_value_numbering",
                "instruction_simplifier_after_gvn",
            ]
        );
    }

    #[test]
    fn observer_sees_every_pass_once() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.const4(0, 3)
            .label("loop")
            .binop_lit8(BinaryOp::Add, 0, 0, -1)
            .if_testz(Comparison::Ne, 0, "loop")
            .binop(BinaryOp::Add, 0, 1, 2)
            .binop(BinaryOp::Add, 1, 2, 1)
            .binop(BinaryOp::Sub, 0, 0, 1)
            .return_value(0);
        let mut graph = ssa_graph(asm.finish()?)?;

        let mut seen = Vec::new();
        OptimizationPipeline::standard().run(&mut graph, |name, _| seen.push(name));
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[6], "instruction_simplifier_after_gvn");

        // (a + b) - (b + a) numbers both sums alike and then simplifies to 0.
        let returned = graph
            .instructions()
            .find(|insn| *insn.kind() == crate::ir::InstructionKind::Return)
            .map(|insn| insn.inputs()[0]);
        let Some(returned) = returned else {
            panic!("no return");
        };
        assert_eq!(
            graph.instruction(returned).kind().constant_value(),
            Some(0)
        );
        assert_eq!(count(&graph, "Phi"), 1);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "SSA form")]
    fn rejects_graphs_before_ssa() {
        let mut graph = Graph::new(1, 0);
        OptimizationPipeline::standard().run(&mut graph, |_, _| {});
    }
}
