//! Basic blocks and loop descriptions.

use crate::{
    ir::{BlockId, InsnId},
    utils::BitSet,
};

/// A maximal straight-line sequence of instructions.
///
/// Phis are kept apart from the ordinary instruction list; they conceptually
/// execute in parallel on block entry. The last entry of `instructions` is
/// the block's terminator.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) phis: Vec<InsnId>,
    pub(crate) instructions: Vec<InsnId>,
    pub(crate) dex_pc: u32,
    pub(crate) removed: bool,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, dex_pc: u32) -> Self {
        Self {
            id,
            predecessors: Vec::new(),
            successors: Vec::new(),
            phis: Vec::new(),
            instructions: Vec::new(),
            dex_pc,
            removed: false,
        }
    }

    /// The block's id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Predecessors in edge order; phi inputs follow this order.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Successors in edge order; for an `If` the taken target comes first.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// Phis at the block entry.
    #[must_use]
    pub fn phis(&self) -> &[InsnId] {
        &self.phis
    }

    /// Non-phi instructions, terminator last.
    #[must_use]
    pub fn instructions(&self) -> &[InsnId] {
        &self.instructions
    }

    /// The terminator, if the block is complete.
    #[must_use]
    pub fn last_instruction(&self) -> Option<InsnId> {
        self.instructions.last().copied()
    }

    /// First bytecode offset covered by the block.
    #[must_use]
    pub fn dex_pc(&self) -> u32 {
        self.dex_pc
    }

    /// `true` once the block was disconnected as unreachable.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Position of `pred` in the predecessor list.
    #[must_use]
    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.predecessors.iter().position(|&p| p == pred)
    }
}

/// A natural loop.
#[derive(Debug, Clone)]
pub struct LoopInformation {
    pub(crate) header: BlockId,
    pub(crate) back_edges: Vec<BlockId>,
    pub(crate) blocks: BitSet,
}

impl LoopInformation {
    /// The loop header, dominating every block of the loop.
    #[must_use]
    pub fn header(&self) -> BlockId {
        self.header
    }

    /// Sources of the back edges into the header.
    #[must_use]
    pub fn back_edges(&self) -> &[BlockId] {
        &self.back_edges
    }

    /// `true` if `block` belongs to the loop body (header included).
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(block.index())
    }

    /// Blocks of the loop in ascending id order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(BlockId::new)
    }
}
