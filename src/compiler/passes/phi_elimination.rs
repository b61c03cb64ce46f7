//! Phi cleanup after SSA construction.
//!
//! SSA construction places phis on the whole iterated dominance frontier,
//! which leaves two kinds of useless phis behind:
//!
//! - *redundant* phis whose inputs are all the same value (or the phi
//!   itself, through a loop), which [`RedundantPhiElimination`] replaces by
//!   that value
//! - *dead* phis that only feed other phis, which [`DeadPhiElimination`]
//!   removes

use tracing::trace;

use crate::{
    compiler::Optimization,
    ir::{Graph, InsnId},
    utils::BitSet,
};

/// Replaces phis merging a single value with that value.
#[derive(Debug, Default)]
pub struct RedundantPhiElimination {
    replaced: usize,
}

impl RedundantPhiElimination {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Phis replaced by the last run.
    #[must_use]
    pub fn replaced(&self) -> usize {
        self.replaced
    }
}

/// The single value a phi merges, ignoring self references.
fn unique_input(graph: &Graph, phi: InsnId) -> Option<InsnId> {
    let mut unique = None;
    for &input in graph.instruction(phi).inputs() {
        if input == phi || Some(input) == unique {
            continue;
        }
        if unique.is_some() {
            return None;
        }
        unique = Some(input);
    }
    unique
}

impl Optimization for RedundantPhiElimination {
    fn name(&self) -> &'static str {
        "redundant_phi_elimination"
    }

    fn run(&mut self, graph: &mut Graph) {
        self.replaced = 0;
        let mut worklist: Vec<InsnId> = graph
            .reverse_post_order()
            .into_iter()
            .rev()
            .flat_map(|block| graph.block(block).phis().to_vec())
            .collect();

        while let Some(phi) = worklist.pop() {
            if !graph.instruction(phi).is_live() {
                continue;
            }
            let Some(value) = unique_input(graph, phi) else {
                continue;
            };

            // Phis using this one may become redundant in turn.
            let users: Vec<InsnId> = graph
                .instruction(phi)
                .users()
                .iter()
                .copied()
                .filter(|&user| user != phi && graph.instruction(user).is_phi())
                .collect();
            graph.replace_uses(phi, value);
            graph.set_inputs(phi, Vec::new());
            graph.remove_instruction(phi);
            worklist.extend(users);
            self.replaced += 1;
        }
        trace!(replaced = self.replaced, "redundant phi elimination");
    }
}

/// Removes phis not transitively used by a non-phi instruction.
#[derive(Debug, Default)]
pub struct DeadPhiElimination {
    removed: usize,
}

impl DeadPhiElimination {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Phis removed by the last run.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.removed
    }
}

impl Optimization for DeadPhiElimination {
    fn name(&self) -> &'static str {
        "dead_phi_elimination"
    }

    fn run(&mut self, graph: &mut Graph) {
        self.removed = 0;
        let phis: Vec<InsnId> = graph
            .blocks()
            .flat_map(|block| block.phis().to_vec())
            .collect();

        let mut live = BitSet::new(graph.instruction_count());
        let mut worklist: Vec<InsnId> = phis
            .iter()
            .copied()
            .filter(|&phi| {
                graph
                    .instruction(phi)
                    .users()
                    .iter()
                    .any(|&user| !graph.instruction(user).is_phi())
            })
            .collect();
        for &phi in &worklist {
            live.insert(phi.index());
        }
        while let Some(phi) = worklist.pop() {
            for &input in graph.instruction(phi).inputs() {
                if graph.instruction(input).is_phi() && live.insert(input.index()) {
                    worklist.push(input);
                }
            }
        }

        let dead: Vec<InsnId> = phis
            .into_iter()
            .filter(|phi| !live.contains(phi.index()))
            .collect();
        // Dead phis may use each other; drop all their inputs first.
        for &phi in &dead {
            graph.set_inputs(phi, Vec::new());
        }
        for &phi in &dead {
            graph.remove_instruction(phi);
        }
        self.removed = dead.len();
        trace!(removed = self.removed, "dead phi elimination");
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
    fn self_referencing_loop_phis_are_redundant() -> Result<()> {
        // v1 is rewritten with itself inside the loop, so its header phi only
        // merges the incoming argument with itself.
        let mut asm = DexAssembler::new();
        asm.const4(0, 0)
            .label("loop")
            .mov(1, 1)
            .binop_2addr(BinaryOp::Add, 0, 1)
            .if_test(Comparison::Lt, 0, 2, "loop")
            .return_value(0);
        let mut graph = ssa_graph(asm.finish()?)?;
        assert_eq!(count(&graph, "Phi"), 2);

        let mut pass = RedundantPhiElimination::new();
        pass.run(&mut graph);

        assert_eq!(pass.replaced(), 1);
        assert_eq!(count(&graph, "Phi"), 1);
        assert!(pass.check(&graph).is_ok());
        for insn in graph.instructions().filter(|insn| insn.is_phi()) {
            assert!(unique_input(&graph, insn.id()).is_none());
        }
        Ok(())
    }

    #[test]
    fn phis_feeding_only_phis_are_dead() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.if_testz(Comparison::Eq, 1, "else")
            .const4(0, 1)
            .goto("join")
            .label("else")
            .const4(0, 2)
            .label("join")
            .return_value(1);
        let mut graph = ssa_graph(asm.finish()?)?;
        assert!(count(&graph, "Phi") > 0);

        let mut pass = DeadPhiElimination::new();
        pass.run(&mut graph);
        assert_eq!(count(&graph, "Phi"), 0);
        assert!(pass.removed() > 0);
        assert!(pass.check(&graph).is_ok());
        Ok(())
    }

    #[test]
    fn used_phis_are_kept() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.if_testz(Comparison::Eq, 1, "else")
            .const4(0, 1)
            .goto("join")
            .label("else")
            .const4(0, 2)
            .label("join")
            .return_value(0);
        let mut graph = ssa_graph(asm.finish()?)?;
        DeadPhiElimination::new().run(&mut graph);
        assert_eq!(count(&graph, "Phi"), 1);
        Ok(())
    }
}
