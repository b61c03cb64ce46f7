//! Virtual registers that hold references, for the baseline GC map.
//!
//! Baseline code keeps every virtual register in its frame slot, so the
//! collector needs to know which slots hold references at each safepoint.
//! A register is reported only if it *definitely* holds a reference on every
//! path, which makes this a forward dataflow problem with intersection as
//! the meet:
//!
//! - `IN[entry]` = {}
//! - `IN[B]` = ∩ `OUT[P]` over visited predecessors `P`
//! - `OUT[B]` = `IN[B]` updated by the `StoreLocal`s of `B`

use crate::{
    ir::{BlockId, DataType, Graph, Instruction, InstructionKind},
    utils::BitSet,
};

/// Per-block entry states of the reference dataflow.
#[derive(Debug, Clone)]
pub struct VregReferenceAnalysis {
    entry_states: Vec<Option<BitSet>>,
    vregs: usize,
}

impl VregReferenceAnalysis {
    /// Solves the dataflow over a graph that still uses `LoadLocal` and
    /// `StoreLocal`.
    #[must_use]
    pub fn analyze(graph: &Graph) -> Self {
        let vregs = usize::from(graph.number_of_vregs());
        let mut entry_states: Vec<Option<BitSet>> = vec![None; graph.block_capacity()];
        let mut exit_states: Vec<Option<BitSet>> = vec![None; graph.block_capacity()];
        entry_states[graph.entry_block().index()] = Some(BitSet::new(vregs));

        let mut changed = true;
        while changed {
            changed = false;
            for block in graph.blocks() {
                let id = block.id();
                let incoming = if id == graph.entry_block() {
                    Some(BitSet::new(vregs))
                } else {
                    Self::meet(block.predecessors(), &exit_states)
                };
                let Some(mut state) = incoming else {
                    continue;
                };
                entry_states[id.index()] = Some(state.clone());
                for &insn in block.instructions() {
                    Self::apply(&mut state, graph.instruction(insn), graph);
                }
                if exit_states[id.index()].as_ref() != Some(&state) {
                    exit_states[id.index()] = Some(state);
                    changed = true;
                }
            }
        }

        Self {
            entry_states,
            vregs,
        }
    }

    fn meet(predecessors: &[BlockId], exit_states: &[Option<BitSet>]) -> Option<BitSet> {
        let mut result: Option<BitSet> = None;
        for pred in predecessors {
            let Some(state) = &exit_states[pred.index()] else {
                continue;
            };
            match &mut result {
                Some(merged) => {
                    merged.intersect_with(state);
                }
                None => result = Some(state.clone()),
            }
        }
        result
    }

    /// References held on entry to `block`; empty for unreachable blocks.
    #[must_use]
    pub fn entry_state(&self, block: BlockId) -> BitSet {
        self.entry_states
            .get(block.index())
            .cloned()
            .flatten()
            .unwrap_or_else(|| BitSet::new(self.vregs))
    }

    /// Applies the effect of `insn` to `state`.
    pub fn apply(state: &mut BitSet, insn: &Instruction, graph: &Graph) {
        let InstructionKind::StoreLocal { vreg } = *insn.kind() else {
            return;
        };
        let vreg = usize::from(vreg);
        let Some(&value) = insn.inputs().first() else {
            return;
        };
        let ty = graph.instruction(value).ty();
        if ty.is_wide() {
            state.remove(vreg);
            if vreg + 1 < state.len() {
                state.remove(vreg + 1);
            }
        } else if ty == DataType::Reference {
            state.insert(vreg);
        } else {
            state.remove(vreg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{AccessFlags, CodeItem, DexAssembler, MethodDescriptor},
        ir::{Comparison, DexGraphBuilder, GraphBuilder},
        Result,
    };

    fn method(registers: u16, ins: u16, shorty: &str, insns: Vec<u16>) -> MethodDescriptor {
        MethodDescriptor::new(
            0,
            "LTest;->gc".to_string(),
            shorty.to_string(),
            AccessFlags::STATIC,
            CodeItem {
                registers_size: registers,
                ins_size: ins,
                insns,
                tries: Vec::new(),
            },
        )
    }

    fn state_after_block(graph: &Graph, analysis: &VregReferenceAnalysis, block: BlockId) -> BitSet {
        let mut state = analysis.entry_state(block);
        for &insn in graph.block(block).instructions() {
            VregReferenceAnalysis::apply(&mut state, graph.instruction(insn), graph);
        }
        state
    }

    #[test]
    fn parameters_seed_the_entry() -> Result<()> {
        let insns = DexAssembler::new().return_void().finish()?;
        let graph = DexGraphBuilder.build(&method(2, 2, "VLI", insns))?;
        let analysis = VregReferenceAnalysis::analyze(&graph);
        let state = state_after_block(&graph, &analysis, graph.entry_block());
        assert!(state.contains(0));
        assert!(!state.contains(1));
        Ok(())
    }

    #[test]
    fn merges_keep_only_common_references() -> Result<()> {
        // v1 holds a reference on one path and an int on the other.
        let insns = DexAssembler::new()
            .if_testz(Comparison::Eq, 2, "int")
            .move_object(1, 2)
            .goto("join")
            .label("int")
            .const4(1, 3)
            .label("join")
            .return_void()
            .finish()?;
        let graph = DexGraphBuilder.build(&method(3, 1, "VL", insns))?;
        let analysis = VregReferenceAnalysis::analyze(&graph);
        let join = graph
            .blocks()
            .find(|block| {
                block
                    .instructions()
                    .iter()
                    .any(|&id| matches!(graph.instruction(id).kind(), InstructionKind::ReturnVoid))
            })
            .map(|block| block.id())
            .ok_or(crate::Error::Empty)?;
        let state = analysis.entry_state(join);
        assert!(!state.contains(1));
        assert!(state.contains(2));
        Ok(())
    }
}
