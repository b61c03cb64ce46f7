//! The control-flow graph and its instruction table.
//!
//! [`Graph`] owns every [`BasicBlock`] and [`Instruction`] of one method in
//! flat tables. Blocks and instructions refer to each other only through
//! [`BlockId`] and [`InsnId`], so passes can freely rewrite the graph through
//! `&mut Graph` without fighting the borrow checker over cyclic structure.
//!
//! # Def-use bookkeeping
//!
//! Every instruction keeps a `users` list with one entry per use occurrence.
//! An instruction using the same value twice (`add v0, v0`), or a safepoint
//! holding the same value in two environment slots, appears twice in that
//! value's list. All mutation helpers keep the lists in sync:
//!
//! - [`Graph::add_instruction`] / [`Graph::insert_before`] register the new
//!   instruction as a user of each input
//! - [`Graph::set_input`] and [`Graph::set_environment`] move use entries
//! - [`Graph::replace_uses`] redirects every use of a value
//! - [`Graph::remove_instruction`] unlinks an instruction without users
//!
//! # Lifecycle
//!
//! The builder adds blocks and edges, then calls [`Graph::freeze`]. After that
//! the block set can only shrink (unreachable blocks are removed by dominator
//! tree construction), and edges stay fixed for the rest of the pipeline.

use crate::{
    ir::{
        BasicBlock, BlockId, DataType, Environment, InsnId, Instruction, InstructionKind,
        LoopInformation,
    },
    utils::graph::{
        algorithms::DominatorTree, GraphBase, NodeId, Predecessors, RootedGraph, Successors,
    },
};

/// Dominance facts computed once the graph is frozen.
#[derive(Debug, Clone)]
pub struct Dominance {
    pub(crate) tree: DominatorTree,
    pub(crate) reverse_post_order: Vec<BlockId>,
    pub(crate) edge_count: usize,
}

impl Dominance {
    /// The dominator tree over block ids.
    #[must_use]
    pub fn tree(&self) -> &DominatorTree {
        &self.tree
    }

    /// Live blocks in reverse post-order from the entry.
    #[must_use]
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.reverse_post_order
    }

    /// Number of edges when the tree was computed.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}

/// Control-flow graph of one method.
#[derive(Debug, Clone)]
pub struct Graph {
    blocks: Vec<BasicBlock>,
    instructions: Vec<Instruction>,
    entry: Option<BlockId>,
    exit: Option<BlockId>,
    number_of_vregs: u16,
    number_of_in_vregs: u16,
    frozen: bool,
    in_ssa: bool,
    dominance: Option<Dominance>,
    loops: Vec<LoopInformation>,
}

impl Graph {
    /// Creates an empty graph for a method with `number_of_vregs` registers,
    /// the last `number_of_in_vregs` of which hold the incoming arguments.
    #[must_use]
    pub fn new(number_of_vregs: u16, number_of_in_vregs: u16) -> Self {
        Self {
            blocks: Vec::new(),
            instructions: Vec::new(),
            entry: None,
            exit: None,
            number_of_vregs,
            number_of_in_vregs,
            frozen: false,
            in_ssa: false,
            dominance: None,
            loops: Vec::new(),
        }
    }

    /// Number of virtual registers of the method.
    #[must_use]
    pub fn number_of_vregs(&self) -> u16 {
        self.number_of_vregs
    }

    /// Number of registers holding incoming arguments.
    #[must_use]
    pub fn number_of_in_vregs(&self) -> u16 {
        self.number_of_in_vregs
    }

    /// The entry block.
    ///
    /// # Panics
    ///
    /// Panics if the builder never set one.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        match self.entry {
            Some(entry) => entry,
            None => panic!("graph has no entry block"),
        }
    }

    /// The exit block, absent for methods that never return.
    #[must_use]
    pub fn exit_block(&self) -> Option<BlockId> {
        self.exit
    }

    pub(crate) fn set_entry_block(&mut self, block: BlockId) {
        self.entry = Some(block);
    }

    pub(crate) fn set_exit_block(&mut self, block: BlockId) {
        self.exit = Some(block);
    }

    /// `true` once the block set is fixed.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Fixes the block set. Blocks can still be removed afterwards.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// `true` once SSA construction has run.
    #[must_use]
    pub fn in_ssa(&self) -> bool {
        self.in_ssa
    }

    pub(crate) fn set_in_ssa(&mut self) {
        self.in_ssa = true;
    }

    // Blocks

    /// Appends a new empty block.
    ///
    /// # Panics
    ///
    /// Panics if the graph is frozen.
    pub fn add_block(&mut self, dex_pc: u32) -> BlockId {
        assert!(!self.frozen, "cannot add a block to a frozen graph");
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock::new(id, dex_pc));
        id
    }

    /// Adds the edge `from -> to` at the end of both edge lists.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        assert!(!self.frozen, "cannot add an edge to a frozen graph");
        self.blocks[from.index()].successors.push(to);
        self.blocks[to.index()].predecessors.push(from);
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Iterates the blocks that have not been removed, in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.blocks.iter().filter(|block| !block.removed)
    }

    /// Iterates the ids of live blocks in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks().map(BasicBlock::id)
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks().count()
    }

    /// Size of the block table, removed blocks included.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Total number of edges between live blocks.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.blocks().map(|block| block.successors.len()).sum()
    }

    /// Splits the `index`-th successor edge of `from` by inserting a block
    /// that only jumps to the original target. Returns the new block.
    pub fn split_edge(&mut self, from: BlockId, index: usize) -> BlockId {
        let to = self.blocks[from.index()].successors[index];
        let dex_pc = self.blocks[to.index()].dex_pc;
        let middle = self.add_block(dex_pc);

        self.blocks[from.index()].successors[index] = middle;
        if let Some(slot) = self.blocks[to.index()]
            .predecessors
            .iter_mut()
            .find(|pred| **pred == from)
        {
            *slot = middle;
        }
        self.blocks[middle.index()].predecessors.push(from);
        self.blocks[middle.index()].successors.push(to);
        self.add_instruction(middle, InstructionKind::Goto, DataType::Void, Vec::new(), dex_pc);
        middle
    }

    /// Splits every edge from a block with several successors to a block
    /// with several predecessors.
    pub fn split_critical_edges(&mut self) {
        for index in 0..self.blocks.len() {
            let from = BlockId::new(index);
            if self.blocks[index].removed || self.blocks[index].successors.len() < 2 {
                continue;
            }
            for edge in 0..self.blocks[index].successors.len() {
                let to = self.blocks[index].successors[edge];
                if self.blocks[to.index()].predecessors.len() > 1 {
                    self.split_edge(from, edge);
                }
            }
        }
    }

    /// Disconnects `block` from its successors and marks it removed. Its
    /// instructions are unlinked; their users must be gone or removed with
    /// them.
    pub(crate) fn remove_block(&mut self, block: BlockId) {
        let successors = std::mem::take(&mut self.blocks[block.index()].successors);
        for succ in successors {
            let Some(index) = self.blocks[succ.index()].predecessor_index(block) else {
                continue;
            };
            self.blocks[succ.index()].predecessors.remove(index);
            let phis = self.blocks[succ.index()].phis.clone();
            for phi in phis {
                let input = self.instructions[phi.index()].inputs.remove(index);
                self.remove_user(input, phi);
            }
        }
        self.blocks[block.index()].predecessors.clear();

        let ids: Vec<InsnId> = self.blocks[block.index()]
            .phis
            .iter()
            .chain(&self.blocks[block.index()].instructions)
            .copied()
            .collect();
        for id in ids.iter().rev() {
            self.detach(*id);
        }
        self.blocks[block.index()].phis.clear();
        self.blocks[block.index()].instructions.clear();
        self.blocks[block.index()].removed = true;
    }

    // Instructions

    /// Returns the instruction with the given id.
    #[must_use]
    pub fn instruction(&self, id: InsnId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Size of the instruction table, removed instructions included.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Iterates every live instruction, phis included, block by block.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.blocks().flat_map(move |block| {
            block
                .phis
                .iter()
                .chain(&block.instructions)
                .map(move |id| &self.instructions[id.index()])
        })
    }

    fn create(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: DataType,
        inputs: Vec<InsnId>,
        dex_pc: u32,
    ) -> InsnId {
        let id = InsnId::new(self.instructions.len());
        for input in &inputs {
            self.instructions[input.index()].users.push(id);
        }
        self.instructions.push(Instruction {
            id,
            block: Some(block),
            kind,
            ty,
            inputs,
            users: Vec::new(),
            environment: None,
            dex_pc,
            emitted_at_use_site: false,
        });
        id
    }

    /// Appends an instruction to `block`. Phis go to the phi list.
    pub fn add_instruction(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: DataType,
        inputs: Vec<InsnId>,
        dex_pc: u32,
    ) -> InsnId {
        let is_phi = matches!(kind, InstructionKind::Phi { .. });
        let id = self.create(block, kind, ty, inputs, dex_pc);
        let target = &mut self.blocks[block.index()];
        if is_phi {
            target.phis.push(id);
        } else {
            target.instructions.push(id);
        }
        id
    }

    /// Inserts an instruction immediately before `anchor`, in the same block.
    ///
    /// # Panics
    ///
    /// Panics if `anchor` is a phi or has been removed.
    pub fn insert_before(
        &mut self,
        anchor: InsnId,
        kind: InstructionKind,
        ty: DataType,
        inputs: Vec<InsnId>,
    ) -> InsnId {
        let anchor_insn = &self.instructions[anchor.index()];
        let Some(block) = anchor_insn.block else {
            panic!("cannot insert before removed instruction {anchor}");
        };
        let dex_pc = anchor_insn.dex_pc;
        let Some(position) = self.blocks[block.index()]
            .instructions
            .iter()
            .position(|&id| id == anchor)
        else {
            panic!("{anchor} is not an ordinary instruction of {block}");
        };
        let id = self.create(block, kind, ty, inputs, dex_pc);
        self.blocks[block.index()].instructions.insert(position, id);
        id
    }

    /// Changes the result type of an instruction.
    pub fn set_type(&mut self, id: InsnId, ty: DataType) {
        self.instructions[id.index()].ty = ty;
    }

    pub(crate) fn set_emitted_at_use_site(&mut self, id: InsnId, value: bool) {
        self.instructions[id.index()].emitted_at_use_site = value;
    }

    /// Replaces input `index` of `id` with `value`.
    pub fn set_input(&mut self, id: InsnId, index: usize, value: InsnId) {
        let old = std::mem::replace(&mut self.instructions[id.index()].inputs[index], value);
        self.remove_user(old, id);
        self.instructions[value.index()].users.push(id);
    }

    /// Sets every input of `id` at once, typically a phi once all its
    /// predecessors have been renamed.
    pub fn set_inputs(&mut self, id: InsnId, inputs: Vec<InsnId>) {
        let old = std::mem::replace(&mut self.instructions[id.index()].inputs, inputs);
        for input in old {
            self.remove_user(input, id);
        }
        for i in 0..self.instructions[id.index()].inputs.len() {
            let input = self.instructions[id.index()].inputs[i];
            self.instructions[input.index()].users.push(id);
        }
    }

    /// Attaches an environment to `id`, replacing any previous one.
    pub fn set_environment(&mut self, id: InsnId, environment: Environment) {
        if let Some(old) = self.instructions[id.index()].environment.take() {
            for value in old.values() {
                self.remove_user(value, id);
            }
        }
        for value in environment.values() {
            self.instructions[value.index()].users.push(id);
        }
        self.instructions[id.index()].environment = Some(environment);
    }

    /// Redirects every use of `old`, in inputs and environments, to `new`.
    pub fn replace_uses(&mut self, old: InsnId, new: InsnId) {
        if old == new {
            return;
        }
        let mut users = std::mem::take(&mut self.instructions[old.index()].users);
        users.sort_unstable();
        users.dedup();

        for user in users {
            let insn = &mut self.instructions[user.index()];
            let mut moved = 0usize;
            for input in insn.inputs.iter_mut().filter(|input| **input == old) {
                *input = new;
                moved += 1;
            }
            if let Some(environment) = insn.environment.as_mut() {
                for slot in environment.vregs.iter_mut().filter(|slot| **slot == Some(old)) {
                    *slot = Some(new);
                    moved += 1;
                }
            }
            let target = &mut self.instructions[new.index()].users;
            target.extend(std::iter::repeat(user).take(moved));
        }
    }

    /// Unlinks `id` from its block and from its inputs' user lists.
    ///
    /// # Panics
    ///
    /// Panics if the instruction still has users.
    pub fn remove_instruction(&mut self, id: InsnId) {
        let insn = &self.instructions[id.index()];
        assert!(
            insn.users.is_empty(),
            "cannot remove {id} ({}): still used by {:?}",
            insn.kind.name(),
            insn.users
        );
        let Some(block) = insn.block else {
            return;
        };
        let is_phi = insn.is_phi();
        let list = if is_phi {
            &mut self.blocks[block.index()].phis
        } else {
            &mut self.blocks[block.index()].instructions
        };
        list.retain(|&other| other != id);
        self.detach(id);
    }

    /// Drops the uses held by `id` and marks it removed, leaving block lists
    /// untouched.
    fn detach(&mut self, id: InsnId) {
        let inputs = std::mem::take(&mut self.instructions[id.index()].inputs);
        for input in inputs {
            self.remove_user(input, id);
        }
        if let Some(environment) = self.instructions[id.index()].environment.take() {
            for value in environment.values() {
                self.remove_user(value, id);
            }
        }
        self.instructions[id.index()].block = None;
    }

    fn remove_user(&mut self, value: InsnId, user: InsnId) {
        let users = &mut self.instructions[value.index()].users;
        if let Some(position) = users.iter().position(|&other| other == user) {
            users.swap_remove(position);
        }
    }

    // Dominance and loops

    pub(crate) fn set_dominance(&mut self, dominance: Dominance) {
        self.dominance = Some(dominance);
    }

    /// Dominance facts, present once the dominator tree has been built.
    #[must_use]
    pub fn dominance(&self) -> Option<&Dominance> {
        self.dominance.as_ref()
    }

    /// Immediate dominator of `block`.
    #[must_use]
    pub fn dominator_of(&self, block: BlockId) -> Option<BlockId> {
        self.dominance
            .as_ref()
            .and_then(|dominance| dominance.tree.immediate_dominator(block.into()))
            .map(BlockId::from)
    }

    /// `true` if `a` dominates `b`. Always `false` before dominance is known.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominance
            .as_ref()
            .is_some_and(|dominance| dominance.tree.dominates(a.into(), b.into()))
    }

    /// Live blocks in reverse post-order; id order before dominance is known.
    #[must_use]
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        match &self.dominance {
            Some(dominance) => dominance.reverse_post_order.clone(),
            None => self.block_ids().collect(),
        }
    }

    pub(crate) fn set_loops(&mut self, loops: Vec<LoopInformation>) {
        self.loops = loops;
    }

    /// Natural loops, outermost headers first.
    #[must_use]
    pub fn loops(&self) -> &[LoopInformation] {
        &self.loops
    }

    /// The innermost loop whose header is `block`.
    #[must_use]
    pub fn loop_headed_by(&self, block: BlockId) -> Option<&LoopInformation> {
        self.loops.iter().find(|info| info.header == block)
    }

    /// `true` if the edge `from -> to` jumps back to a loop header.
    #[must_use]
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.loop_headed_by(to)
            .is_some_and(|info| info.back_edges.contains(&from))
    }
}

impl GraphBase for Graph {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Successors for Graph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks[node.index()]
            .successors
            .iter()
            .map(|&block| NodeId::from(block))
    }
}

impl Predecessors for Graph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks[node.index()]
            .predecessors
            .iter()
            .map(|&block| NodeId::from(block))
    }
}

impl RootedGraph for Graph {
    fn entry(&self) -> NodeId {
        self.entry_block().into()
    }
}
