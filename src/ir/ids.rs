//! Index newtypes for the IR tables.
//!
//! The graph owns its blocks and instructions in flat tables; every relation
//! between them (edges, inputs, users, dominators) is stored as one of these
//! indices.

use std::fmt;

use crate::utils::graph::NodeId;

/// Index of a basic block in [`crate::ir::Graph`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Creates a block id from a table index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        BlockId(index as u32)
    }

    /// Returns the table index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl From<BlockId> for NodeId {
    fn from(block: BlockId) -> Self {
        NodeId::new(block.index())
    }
}

impl From<NodeId> for BlockId {
    fn from(node: NodeId) -> Self {
        BlockId::new(node.index())
    }
}

/// Index of an instruction (phis included) in [`crate::ir::Graph`].
///
/// An instruction producing a value is referred to by its id; there is no
/// separate value namespace.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsnId(pub(crate) u32);

impl InsnId {
    /// Creates an instruction id from a table index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        InsnId(index as u32)
    }

    /// Returns the table index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
