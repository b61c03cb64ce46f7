//! Dead code elimination.
//!
//! Removes instructions without side effects whose value nobody uses. Blocks
//! are visited in post-order and instructions backwards, so a chain of dead
//! computations inside straight-line code disappears in a single sweep.
//! Parameters stay so every incoming argument keeps a definition. Phis are
//! left to [`crate::compiler::passes::DeadPhiElimination`].

use tracing::trace;

use crate::{
    compiler::Optimization,
    ir::{Graph, InstructionKind},
};

/// Dead code elimination pass.
#[derive(Debug, Default)]
pub struct DeadCodeElimination {
    removed: usize,
}

impl DeadCodeElimination {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instructions removed by the last run.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.removed
    }
}

impl Optimization for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead_code_elimination"
    }

    fn run(&mut self, graph: &mut Graph) {
        self.removed = 0;
        for block in graph.reverse_post_order().into_iter().rev() {
            let instructions = graph.block(block).instructions().to_vec();
            for id in instructions.into_iter().rev() {
                let insn = graph.instruction(id);
                if insn.kind().has_side_effects()
                    || insn.has_users()
                    || matches!(insn.kind(), InstructionKind::Parameter { .. })
                {
                    continue;
                }
                graph.remove_instruction(id);
                self.removed += 1;
            }
        }
        trace!(removed = self.removed, "dead code elimination");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::DexAssembler,
        compiler::passes::testing::{count, ssa_graph},
        ir::BinaryOp,
        Result,
    };

    #[test]
    fn unused_arithmetic_is_removed() -> Result<()> {
        let code = DexAssembler::new()
            .binop(BinaryOp::Mul, 0, 1, 1)
            .binop(BinaryOp::Add, 0, 0, 1)
            .return_value(1)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        let mut pass = DeadCodeElimination::new();
        pass.run(&mut graph);

        assert_eq!(count(&graph, "Binary"), 0);
        assert_eq!(pass.removed(), 2);
        assert!(pass.check(&graph).is_ok());
        Ok(())
    }

    #[test]
    fn side_effects_survive() -> Result<()> {
        let code = DexAssembler::new()
            .invoke_static(2, &[1])
            .return_void()
            .finish()?;
        let mut graph = ssa_graph(code)?;
        DeadCodeElimination::new().run(&mut graph);

        assert_eq!(count(&graph, "Invoke"), 1);
        assert_eq!(count(&graph, "SuspendCheck"), 1);
        Ok(())
    }
}
