//! Algebraic simplification.
//!
//! Rewrites arithmetic identities:
//!
//! | Pattern | Result |
//! |---------|--------|
//! | `x + 0`, `x - 0`, `x * 1`, `x \| 0`, `x ^ 0` | `x` |
//! | `x & x`, `x \| x` | `x` |
//! | `x * 0`, `x & 0`, `x ^ x`, `x - x` | `0` |
//! | `-(-x)`, `~(~x)` | `x` |
//!
//! Commutative operators match the constant on either side. The pass runs
//! twice in the pipeline, once before and once after value numbering, under
//! two names.

use tracing::trace;

use crate::{
    compiler::Optimization,
    ir::{BinaryOp, DataType, Graph, InsnId, InstructionKind},
};

/// Outcome of simplifying one instruction.
enum Rewrite {
    /// Replace with an existing value.
    Value(InsnId),
    /// Replace with a new zero constant.
    Zero,
}

/// Instruction simplifier pass.
#[derive(Debug)]
pub struct InstructionSimplifier {
    name: &'static str,
    simplified: usize,
}

impl Default for InstructionSimplifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionSimplifier {
    /// Creates the pass under its default name.
    #[must_use]
    pub fn new() -> Self {
        Self::named("instruction_simplifier")
    }

    /// Creates the pass under a custom name.
    #[must_use]
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            simplified: 0,
        }
    }

    /// Instructions rewritten by the last run.
    #[must_use]
    pub fn simplified(&self) -> usize {
        self.simplified
    }

    fn simplify(graph: &Graph, id: InsnId) -> Option<Rewrite> {
        let insn = graph.instruction(id);
        let constant = |value: InsnId| graph.instruction(value).kind().constant_value();

        match *insn.kind() {
            InstructionKind::Binary(op) => {
                let (lhs, rhs) = (insn.inputs()[0], insn.inputs()[1]);
                if lhs == rhs {
                    return match op {
                        BinaryOp::And | BinaryOp::Or => Some(Rewrite::Value(lhs)),
                        BinaryOp::Xor | BinaryOp::Sub => Some(Rewrite::Zero),
                        _ => None,
                    };
                }

                // Put a constant operand on the right for commutative ops.
                let (value, literal) = match (constant(lhs), constant(rhs)) {
                    (_, Some(literal)) => (lhs, literal),
                    (Some(literal), None) if op.is_commutative() => (rhs, literal),
                    _ => return None,
                };
                match (op, literal) {
                    (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Or | BinaryOp::Xor, 0)
                    | (BinaryOp::Mul, 1) => Some(Rewrite::Value(value)),
                    (BinaryOp::Mul | BinaryOp::And, 0) => Some(Rewrite::Zero),
                    _ => None,
                }
            }
            InstructionKind::Unary(op) => {
                let input = graph.instruction(insn.inputs()[0]);
                match *input.kind() {
                    InstructionKind::Unary(inner) if inner == op => {
                        Some(Rewrite::Value(input.inputs()[0]))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl Optimization for InstructionSimplifier {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, graph: &mut Graph) {
        self.simplified = 0;
        for block in graph.reverse_post_order() {
            let instructions = graph.block(block).instructions().to_vec();
            for id in instructions {
                let Some(rewrite) = Self::simplify(graph, id) else {
                    continue;
                };
                let replacement = match rewrite {
                    Rewrite::Value(value) => value,
                    Rewrite::Zero => {
                        let ty = graph.instruction(id).ty();
                        let kind = if ty == DataType::Long {
                            InstructionKind::LongConstant(0)
                        } else {
                            InstructionKind::IntConstant(0)
                        };
                        graph.insert_before(id, kind, ty, Vec::new())
                    }
                };
                graph.replace_uses(id, replacement);
                graph.remove_instruction(id);
                self.simplified += 1;
            }
        }
        trace!(pass = self.name, simplified = self.simplified, "instruction simplifier");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::DexAssembler,
        compiler::passes::testing::{count, ssa_graph},
        ir::UnaryOp,
        Result,
    };

    fn returned_kind(graph: &Graph) -> Option<InstructionKind> {
        graph
            .instructions()
            .find(|insn| *insn.kind() == InstructionKind::Return)
            .map(|ret| graph.instruction(ret.inputs()[0]).kind().clone())
    }

    #[test]
    fn identities_collapse_to_the_operand() -> Result<()> {
        let code = DexAssembler::new()
            .binop_lit8(BinaryOp::Add, 0, 1, 0)
            .binop_lit8(BinaryOp::Mul, 0, 0, 1)
            .binop_lit8(BinaryOp::Or, 0, 0, 0)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        let mut pass = InstructionSimplifier::new();
        pass.run(&mut graph);

        assert_eq!(pass.simplified(), 3);
        assert_eq!(returned_kind(&graph), Some(InstructionKind::Parameter { index: 0 }));
        assert!(pass.check(&graph).is_ok());
        Ok(())
    }

    #[test]
    fn self_cancelling_operations_become_zero() -> Result<()> {
        let code = DexAssembler::new()
            .binop(BinaryOp::Xor, 0, 1, 1)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        InstructionSimplifier::new().run(&mut graph);

        assert_eq!(returned_kind(&graph), Some(InstructionKind::IntConstant(0)));
        assert_eq!(count(&graph, "Binary"), 0);
        Ok(())
    }

    #[test]
    fn double_negation_cancels() -> Result<()> {
        let code = DexAssembler::new()
            .unop(UnaryOp::Neg, 0, 1)
            .unop(UnaryOp::Neg, 0, 0)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        InstructionSimplifier::named("instruction_simplifier_after_gvn").run(&mut graph);

        assert_eq!(returned_kind(&graph), Some(InstructionKind::Parameter { index: 0 }));
        Ok(())
    }

    #[test]
    fn subtraction_from_a_constant_is_not_an_identity() -> Result<()> {
        let code = DexAssembler::new()
            .binop_lit8(BinaryOp::Sub, 0, 1, 0)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        let mut pass = InstructionSimplifier::new();
        pass.run(&mut graph);

        // rsub-int/lit8 computes 0 - v1
        assert_eq!(pass.simplified(), 0);
        Ok(())
    }
}
