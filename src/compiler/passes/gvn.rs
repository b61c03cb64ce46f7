//! Global value numbering.
//!
//! Walks the dominator tree in pre-order with a scoped table from value keys
//! to the instruction that first computed them. A pure instruction whose key
//! is already in scope is dominated by an equivalent computation and is
//! replaced by it:
//!
//! ```text
//! B1: v4 = Binary add (v1, v2)
//! B2: v7 = Binary add (v2, v1)    // B1 dominates B2; uses of v7 become v4
//! ```
//!
//! Keys of commutative operations are normalized by sorting their operands.
//! Instructions with side effects are never numbered.

use std::collections::HashMap;

use tracing::trace;

use crate::{
    compiler::Optimization,
    ir::{BlockId, DataType, Graph, InsnId, InstructionKind},
};

/// A hashable description of the value an instruction computes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ValueKey {
    kind: InstructionKind,
    ty: DataType,
    inputs: Vec<InsnId>,
}

impl ValueKey {
    fn of(graph: &Graph, id: InsnId) -> Option<Self> {
        let insn = graph.instruction(id);
        if !insn.kind().is_pure() {
            return None;
        }
        let mut inputs = insn.inputs().to_vec();
        let commutative = match insn.kind() {
            InstructionKind::Binary(op) => op.is_commutative(),
            InstructionKind::Condition(cmp) => cmp.is_commutative(),
            _ => false,
        };
        if commutative {
            inputs.sort_unstable();
        }
        Some(Self {
            kind: insn.kind().clone(),
            ty: insn.ty(),
            inputs,
        })
    }
}

/// Global value numbering pass.
#[derive(Debug, Default)]
pub struct GlobalValueNumbering {
    replaced: usize,
}

impl GlobalValueNumbering {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instructions replaced by the last run.
    #[must_use]
    pub fn replaced(&self) -> usize {
        self.replaced
    }
}

enum Visit {
    Enter(BlockId),
    Exit(usize),
}

impl Optimization for GlobalValueNumbering {
    fn name(&self) -> &'static str {
        "global_value_numbering"
    }

    fn run(&mut self, graph: &mut Graph) {
        self.replaced = 0;
        let Some(dominance) = graph.dominance() else {
            panic!("value numbering requires the dominator tree");
        };
        let children = dominance.tree().children();

        let mut table: HashMap<ValueKey, InsnId> = HashMap::new();
        let mut scope: Vec<ValueKey> = Vec::new();
        let mut stack = vec![Visit::Enter(graph.entry_block())];

        while let Some(visit) = stack.pop() {
            let block = match visit {
                Visit::Enter(block) => block,
                Visit::Exit(mark) => {
                    for key in scope.drain(mark..) {
                        table.remove(&key);
                    }
                    continue;
                }
            };

            stack.push(Visit::Exit(scope.len()));
            let instructions = graph.block(block).instructions().to_vec();
            for id in instructions {
                let Some(key) = ValueKey::of(graph, id) else {
                    continue;
                };
                if let Some(&existing) = table.get(&key) {
                    graph.replace_uses(id, existing);
                    graph.remove_instruction(id);
                    self.replaced += 1;
                } else {
                    table.insert(key.clone(), id);
                    scope.push(key);
                }
            }
            for &child in children[block.index()].iter().rev() {
                stack.push(Visit::Enter(child.into()));
            }
        }
        trace!(replaced = self.replaced, "global value numbering");
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
    fn commuted_duplicates_are_merged() -> Result<()> {
        let code = DexAssembler::new()
            .binop(BinaryOp::Add, 0, 1, 2)
            .binop(BinaryOp::Add, 1, 2, 1)
            .binop(BinaryOp::Mul, 0, 0, 1)
            .return_value(0)
            .finish()?;
        let mut graph = ssa_graph(code)?;
        let mut pass = GlobalValueNumbering::new();
        pass.run(&mut graph);

        assert_eq!(pass.replaced(), 1);
        let mul = graph
            .instructions()
            .find(|insn| *insn.kind() == InstructionKind::Binary(BinaryOp::Mul))
            .map(|insn| insn.inputs().to_vec());
        let Some(inputs) = mul else {
            panic!("no multiplication");
        };
        assert_eq!(inputs[0], inputs[1]);
        assert!(pass.check(&graph).is_ok());
        Ok(())
    }

    #[test]
    fn dominating_computations_are_reused_across_blocks() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.binop(BinaryOp::Sub, 0, 1, 2)
            .if_testz(Comparison::Eq, 0, "zero")
            .binop(BinaryOp::Sub, 0, 1, 2)
            .return_value(0)
            .label("zero")
            .return_value(1);
        let mut graph = ssa_graph(asm.finish()?)?;
        GlobalValueNumbering::new().run(&mut graph);
        assert_eq!(count(&graph, "Binary"), 1);
        Ok(())
    }

    #[test]
    fn siblings_do_not_share_values() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.if_testz(Comparison::Eq, 1, "else")
            .binop(BinaryOp::Sub, 0, 1, 2)
            .return_value(0)
            .label("else")
            .binop(BinaryOp::Sub, 0, 1, 2)
            .return_value(0);
        let mut graph = ssa_graph(asm.finish()?)?;
        let mut pass = GlobalValueNumbering::new();
        pass.run(&mut graph);

        assert_eq!(count(&graph, "Binary"), 2);
        assert!(pass.check(&graph).is_ok());
        Ok(())
    }
}
