//! SSA construction (Cytron et al.).
//!
//! The builder leaves virtual registers as `LoadLocal`/`StoreLocal` pairs.
//! This module rewrites them into direct value references:
//!
//! 1. **Phi placement**: for every register, phis go on the iterated
//!    dominance frontier of the blocks storing to it.
//! 2. **Renaming**: blocks are visited in reverse post-order, which visits
//!    every block after its immediate dominator. The register state entering
//!    a block is the state leaving its immediate dominator, overridden by the
//!    block's phis. Loads are replaced by the reaching value, stores update
//!    the state, and safepoints snapshot it into their [`Environment`].
//! 3. **Phi inputs**: once every block's outgoing state is known, each phi
//!    receives the value leaving each predecessor.
//!
//! Reads of a register with no reaching definition resolve to a zero
//! constant placed in the entry block.
//!
//! # References
//!
//! > Cytron et al., "Efficiently Computing Static Single Assignment Form and the
//! > Control Dependence Graph", ACM TOPLAS 1991

use crate::{
    ir::{BlockId, DataType, Environment, Graph, InsnId, InstructionKind},
    utils::{
        graph::{algorithms::compute_dominance_frontiers, NodeId},
        BitSet,
    },
};

/// Rewrites `graph` into SSA form.
///
/// # Panics
///
/// Panics if dominance has not been computed or the graph is already in SSA
/// form.
pub fn transform_to_ssa(graph: &mut Graph) {
    assert!(!graph.in_ssa(), "graph is already in SSA form");
    let Some(dominance) = graph.dominance() else {
        panic!("SSA construction requires the dominator tree");
    };
    let frontiers = compute_dominance_frontiers(graph, dominance.tree());
    let order = dominance.reverse_post_order().to_vec();

    place_phis(graph, &frontiers);
    let mut zeros = ZeroConstants::default();
    let exit_states = rename(graph, &order, &mut zeros);
    fill_phi_inputs(graph, &order, &exit_states, &mut zeros);
    graph.set_in_ssa();
}

fn place_phis(graph: &mut Graph, frontiers: &[Vec<NodeId>]) {
    let vregs = usize::from(graph.number_of_vregs());
    let mut def_blocks = vec![BitSet::new(graph.block_capacity()); vregs];
    for insn in graph.instructions() {
        if let InstructionKind::StoreLocal { vreg } = insn.kind() {
            if let Some(block) = insn.block() {
                def_blocks[usize::from(*vreg)].insert(block.index());
            }
        }
    }

    for (vreg, defs) in def_blocks.iter().enumerate() {
        let mut has_phi = BitSet::new(graph.block_capacity());
        let mut worklist: Vec<usize> = defs.iter().collect();
        let mut queued = defs.clone();
        while let Some(block) = worklist.pop() {
            for frontier in &frontiers[block] {
                if has_phi.insert(frontier.index()) {
                    let target = BlockId::from(*frontier);
                    let dex_pc = graph.block(target).dex_pc();
                    graph.add_instruction(
                        target,
                        InstructionKind::Phi { vreg: vreg as u16 },
                        DataType::Void,
                        Vec::new(),
                        dex_pc,
                    );
                    if queued.insert(frontier.index()) {
                        worklist.push(frontier.index());
                    }
                }
            }
        }
    }
}

/// Zero constants standing in for never-defined registers, one per type.
#[derive(Default)]
struct ZeroConstants {
    int: Option<InsnId>,
    long: Option<InsnId>,
}

impl ZeroConstants {
    fn get(&mut self, graph: &mut Graph, ty: DataType) -> InsnId {
        let wide = ty.is_wide();
        let slot = if wide { &mut self.long } else { &mut self.int };
        if let Some(zero) = *slot {
            return zero;
        }
        let entry = graph.entry_block();
        let Some(anchor) = graph.block(entry).last_instruction() else {
            panic!("entry block has no terminator");
        };
        let (kind, ty) = if wide {
            (InstructionKind::LongConstant(0), DataType::Long)
        } else {
            (InstructionKind::IntConstant(0), DataType::Int)
        };
        let zero = graph.insert_before(anchor, kind, ty, Vec::new());
        *slot = Some(zero);
        zero
    }
}

type RegisterState = Vec<Option<InsnId>>;

fn rename(graph: &mut Graph, order: &[BlockId], zeros: &mut ZeroConstants) -> Vec<RegisterState> {
    let vregs = usize::from(graph.number_of_vregs());
    let mut exit_states: Vec<RegisterState> = vec![Vec::new(); graph.block_capacity()];

    for &block in order {
        let mut state = match graph.dominator_of(block) {
            Some(idom) => exit_states[idom.index()].clone(),
            None => vec![None; vregs],
        };
        for &phi in graph.block(block).phis() {
            if let InstructionKind::Phi { vreg } = *graph.instruction(phi).kind() {
                state[usize::from(vreg)] = Some(phi);
            }
        }

        let instructions = graph.block(block).instructions().to_vec();
        for id in instructions {
            let insn = graph.instruction(id);
            let kind = insn.kind().clone();
            let ty = insn.ty();
            let stored = insn.inputs().first().copied();
            match kind {
                InstructionKind::LoadLocal { vreg } => {
                    let value = match state[usize::from(vreg)] {
                        Some(value) => value,
                        None => zeros.get(graph, ty),
                    };
                    graph.replace_uses(id, value);
                    graph.remove_instruction(id);
                }
                InstructionKind::StoreLocal { vreg } => {
                    state[usize::from(vreg)] = stored;
                    graph.remove_instruction(id);
                }
                kind if kind.is_safepoint() => {
                    graph.set_environment(id, Environment::new(state.clone()));
                }
                _ => {}
            }
        }
        exit_states[block.index()] = state;
    }
    exit_states
}

fn fill_phi_inputs(
    graph: &mut Graph,
    order: &[BlockId],
    exit_states: &[RegisterState],
    zeros: &mut ZeroConstants,
) {
    let mut pending: Vec<(InsnId, Vec<Option<InsnId>>)> = Vec::new();
    for &block in order {
        for &phi in graph.block(block).phis() {
            let InstructionKind::Phi { vreg } = *graph.instruction(phi).kind() else {
                continue;
            };
            let inputs = graph
                .block(block)
                .predecessors()
                .iter()
                .map(|pred| {
                    exit_states[pred.index()]
                        .get(usize::from(vreg))
                        .copied()
                        .flatten()
                })
                .collect();
            pending.push((phi, inputs));
        }
    }

    // Phi types come from their defined inputs; loop phis may depend on each
    // other, so iterate until nothing changes.
    let mut types: Vec<Option<DataType>> = vec![None; graph.instruction_count()];
    let type_of = |graph: &Graph, types: &[Option<DataType>], value: InsnId| {
        if graph.instruction(value).is_phi() {
            types[value.index()]
        } else {
            Some(graph.instruction(value).ty())
        }
    };
    for _ in 0..=pending.len() {
        let mut changed = false;
        for (phi, inputs) in &pending {
            let mut merged: Option<DataType> = None;
            for input in inputs.iter().flatten() {
                match (merged, type_of(graph, &types, *input)) {
                    (_, None) => {}
                    (None, Some(ty)) => merged = Some(ty),
                    (Some(current), Some(ty)) if current != ty => merged = Some(DataType::Int),
                    _ => {}
                }
            }
            if merged.is_some() && types[phi.index()] != merged {
                types[phi.index()] = merged;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (phi, inputs) in pending {
        let ty = types[phi.index()].unwrap_or(DataType::Int);
        graph.set_type(phi, ty);
        let inputs = inputs
            .into_iter()
            .map(|input| match input {
                Some(value) => value,
                None => zeros.get(graph, ty),
            })
            .collect();
        graph.set_inputs(phi, inputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::build_dominator_tree,
        bytecode::{AccessFlags, CodeItem, DexAssembler, MethodDescriptor},
        ir::{BinaryOp, Comparison, DexGraphBuilder, GraphBuilder},
        Result,
    };

    fn ssa(registers: u16, insns: Vec<u16>) -> Result<Graph> {
        let method = MethodDescriptor::new(
            0,
            "int Ssa.test(int)",
            "II",
            AccessFlags::STATIC,
            CodeItem {
                registers_size: registers,
                ins_size: 1,
                insns,
                tries: Vec::new(),
            },
        );
        let mut graph = DexGraphBuilder.build(&method)?;
        build_dominator_tree(&mut graph);
        transform_to_ssa(&mut graph);
        Ok(graph)
    }

    fn count(graph: &Graph, name: &str) -> usize {
        graph
            .instructions()
            .filter(|insn| insn.kind().name() == name)
            .count()
    }

    #[test]
    fn locals_disappear() -> Result<()> {
        let code = DexAssembler::new()
            .binop_lit8(BinaryOp::Add, 0, 1, 2)
            .return_value(0)
            .finish()?;
        let graph = ssa(2, code)?;

        assert!(graph.in_ssa());
        assert_eq!(count(&graph, "LoadLocal"), 0);
        assert_eq!(count(&graph, "StoreLocal"), 0);
        let ret = graph
            .instructions()
            .find(|insn| *insn.kind() == InstructionKind::Return)
            .map(|insn| graph.instruction(insn.inputs()[0]).kind().clone());
        assert_eq!(ret, Some(InstructionKind::Binary(BinaryOp::Add)));
        Ok(())
    }

    #[test]
    fn joins_receive_phis() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.if_testz(Comparison::Eq, 1, "zero")
            .const4(0, 1)
            .goto("join")
            .label("zero")
            .const4(0, 2)
            .label("join")
            .return_value(0);
        let graph = ssa(2, asm.finish()?)?;

        let phis: Vec<_> = graph.instructions().filter(|insn| insn.is_phi()).collect();
        let merged = phis
            .iter()
            .find(|phi| *phi.kind() == InstructionKind::Phi { vreg: 0 } && phi.has_users());
        let Some(phi) = merged else {
            panic!("no live phi for v0:\n{graph}");
        };
        assert_eq!(phi.ty(), DataType::Int);
        let constants: Vec<_> = phi
            .inputs()
            .iter()
            .filter_map(|&input| graph.instruction(input).kind().constant_value())
            .collect();
        assert_eq!(constants.len(), 2);
        assert!(constants.contains(&1) && constants.contains(&2));
        Ok(())
    }

    #[test]
    fn loop_headers_merge_the_back_edge_value() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.const4(0, 0)
            .label("loop")
            .binop_lit8(BinaryOp::Add, 0, 0, 1)
            .if_test(Comparison::Lt, 0, 1, "loop")
            .return_value(0);
        let graph = ssa(2, asm.finish()?)?;

        let header_phi = graph
            .instructions()
            .find(|insn| *insn.kind() == InstructionKind::Phi { vreg: 0 })
            .map(|phi| phi.inputs().to_vec());
        let Some(inputs) = header_phi else {
            panic!("no phi for v0:\n{graph}");
        };
        assert_eq!(inputs.len(), 2);
        assert!(inputs
            .iter()
            .any(|&input| *graph.instruction(input).kind() == InstructionKind::Binary(BinaryOp::Add)));
        Ok(())
    }

    #[test]
    fn undefined_reads_become_zero() -> Result<()> {
        let code = DexAssembler::new().return_value(0).finish()?;
        let graph = ssa(2, code)?;

        let entry = graph.block(graph.entry_block());
        let zero = entry
            .instructions()
            .iter()
            .find(|&&id| *graph.instruction(id).kind() == InstructionKind::IntConstant(0));
        assert!(zero.is_some());
        Ok(())
    }

    #[test]
    fn safepoints_capture_the_register_state() -> Result<()> {
        let code = DexAssembler::new()
            .const4(0, 7)
            .invoke_static(3, &[0])
            .return_value(0)
            .finish()?;
        let graph = ssa(2, code)?;

        let invoke = graph
            .instructions()
            .find(|insn| matches!(insn.kind(), InstructionKind::Invoke { .. }));
        let Some(environment) = invoke.and_then(|insn| insn.environment()) else {
            panic!("invoke without environment:\n{graph}");
        };
        assert_eq!(environment.len(), 2);
        let v0 = environment.get(0).map(|value| graph.instruction(value).kind().clone());
        assert_eq!(v0, Some(InstructionKind::IntConstant(7)));
        assert!(environment.get(1).is_some());
        Ok(())
    }
}
