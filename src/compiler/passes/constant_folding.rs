//! Constant folding.
//!
//! Evaluates arithmetic and comparisons whose operands are all constants and
//! replaces them with the resulting constant. Arithmetic wraps the way the
//! bytecode defines it.
//!
//! ```text
//! v3 = IntConstant 6
//! v4 = IntConstant 7
//! v5 = Binary mul (v3, v4)    =>    v6 = IntConstant 42
//! ```

use tracing::trace;

use crate::{
    compiler::Optimization,
    ir::{DataType, Graph, InsnId, InstructionKind},
};

/// Constant folding pass.
#[derive(Debug, Default)]
pub struct ConstantFolding {
    folded: usize,
}

impl ConstantFolding {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instructions folded by the last run.
    #[must_use]
    pub fn folded(&self) -> usize {
        self.folded
    }

    fn evaluate(graph: &Graph, id: InsnId) -> Option<InstructionKind> {
        let insn = graph.instruction(id);
        let constant = |index: usize| {
            insn.inputs()
                .get(index)
                .and_then(|&input| graph.instruction(input).kind().constant_value())
        };
        let wide = insn.ty().is_wide();

        match *insn.kind() {
            InstructionKind::Binary(op) => {
                let (lhs, rhs) = (constant(0)?, constant(1)?);
                Some(if wide {
                    InstructionKind::LongConstant(op.fold_long(lhs, rhs))
                } else {
                    InstructionKind::IntConstant(op.fold_int(lhs as i32, rhs as i32))
                })
            }
            InstructionKind::Unary(op) => {
                let value = constant(0)?;
                Some(if wide {
                    InstructionKind::LongConstant(op.fold_long(value))
                } else {
                    InstructionKind::IntConstant(op.fold_int(value as i32))
                })
            }
            InstructionKind::Condition(cmp) => {
                let (lhs, rhs) = (constant(0)?, constant(1)?);
                Some(InstructionKind::IntConstant(i32::from(cmp.evaluate(lhs, rhs))))
            }
            _ => None,
        }
    }
}

impl Optimization for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn run(&mut self, graph: &mut Graph) {
        self.folded = 0;
        for block in graph.reverse_post_order() {
            let instructions = graph.block(block).instructions().to_vec();
            for id in instructions {
                let Some(kind) = Self::evaluate(graph, id) else {
                    continue;
                };
                let ty = match kind {
                    InstructionKind::LongConstant(_) => DataType::Long,
                    _ => graph.instruction(id).ty(),
                };
                let constant = graph.insert_before(id, kind, ty, Vec::new());
                graph.replace_uses(id, constant);
                graph.remove_instruction(id);
                self.folded += 1;
            }
        }
        trace!(folded = self.folded, "constant folding");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::DexAssembler,
        compiler::passes::testing::{count, ssa_graph},
        ir::{BinaryOp, UnaryOp},
        Result,
    };

    fn returned_constant(graph: &Graph) -> Option<i64> {
        graph
            .instructions()
            .find(|insn| *insn.kind() == InstructionKind::Return)
            .and_then(|ret| graph.instruction(ret.inputs()[0]).kind().constant_value())
    }

    #[test]
    fn folds_chains_in_one_sweep() -> Result<()> {
        let code = DexAssembler::new()
            .const4(0, 6)
            .binop_lit8(BinaryOp::Mul, 0, 0, 7)
            .unop(UnaryOp::Neg, 0, 0)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        let mut pass = ConstantFolding::new();
        pass.run(&mut graph);

        assert_eq!(returned_constant(&graph), Some(-42));
        assert_eq!(pass.folded(), 2);
        assert_eq!(count(&graph, "Binary") + count(&graph, "Unary"), 0);
        assert!(pass.check(&graph).is_ok());
        Ok(())
    }

    #[test]
    fn int_arithmetic_wraps() -> Result<()> {
        let code = DexAssembler::new()
            .const32(0, i32::MAX)
            .binop_lit8(BinaryOp::Add, 0, 0, 1)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        ConstantFolding::new().run(&mut graph);

        assert_eq!(returned_constant(&graph), Some(i64::from(i32::MIN)));
        Ok(())
    }

    #[test]
    fn non_constant_operands_are_kept() -> Result<()> {
        let code = DexAssembler::new()
            .binop_lit8(BinaryOp::Add, 0, 1, 1)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        let mut pass = ConstantFolding::new();
        pass.run(&mut graph);

        assert_eq!(pass.folded(), 0);
        assert_eq!(count(&graph, "Binary"), 1);
        Ok(())
    }
}
