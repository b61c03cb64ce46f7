//! Structural validation of a graph in SSA form.
//!
//! Every optimization re-validates the graph after it ran. The checks are
//! read-only, so running them twice on an unchanged graph gives the same
//! answer.

use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{BlockId, Graph, InsnId};

/// A broken graph invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckFailure {
    /// Dominance was never computed.
    #[error("dominance has not been computed")]
    NoDominance,

    /// A reachable block other than the entry lacks an immediate dominator.
    #[error("{block} has no immediate dominator")]
    MissingDominator {
        /// The block
        block: BlockId,
    },

    /// Edges were added or removed after dominance was computed.
    #[error("edge count changed from {expected} to {actual} since dominance was computed")]
    EdgeCountChanged {
        /// Edge count recorded with the dominator tree
        expected: usize,
        /// Current edge count
        actual: usize,
    },

    /// An instruction refers to a removed instruction.
    #[error("{user} refers to removed instruction {value}")]
    DanglingReference {
        /// The referring instruction
        user: InsnId,
        /// The removed instruction
        value: InsnId,
    },

    /// An instruction's block link disagrees with the block's lists.
    #[error("{insn} is listed in {block} but records {recorded:?}")]
    WrongBlock {
        /// The instruction
        insn: InsnId,
        /// Block listing it
        block: BlockId,
        /// Block recorded on the instruction
        recorded: Option<BlockId>,
    },

    /// A use list does not mirror its users' inputs and environments.
    #[error("{value} records {recorded} uses by {user}, but {user} uses it {actual} times")]
    UseListMismatch {
        /// The used value
        value: InsnId,
        /// The user
        user: InsnId,
        /// Entries in the use list
        recorded: usize,
        /// Actual occurrences
        actual: usize,
    },

    /// A phi does not have one input per predecessor.
    #[error("phi {phi} has {inputs} inputs but {block} has {predecessors} predecessors")]
    PhiArity {
        /// The phi
        phi: InsnId,
        /// Its block
        block: BlockId,
        /// Number of inputs
        inputs: usize,
        /// Number of predecessors
        predecessors: usize,
    },

    /// A use is not dominated by its definition.
    #[error("{value} does not dominate its use by {user}")]
    NotDominated {
        /// The definition
        value: InsnId,
        /// The use
        user: InsnId,
    },

    /// A block does not end with exactly one terminator.
    #[error("{block} does not end with exactly one terminator")]
    BadTerminator {
        /// The block
        block: BlockId,
    },
}

/// Validates dominance, def-use consistency and the SSA property.
pub struct SsaChecker;

impl SsaChecker {
    /// Checks every invariant, returning the first violation found.
    ///
    /// # Errors
    ///
    /// Returns the [`CheckFailure`] describing the first broken invariant.
    pub fn check(graph: &Graph) -> Result<(), CheckFailure> {
        Self::check_dominance(graph)?;
        Self::check_blocks(graph)?;
        Self::check_use_lists(graph)?;
        Self::check_dominated_uses(graph)
    }

    fn check_dominance(graph: &Graph) -> Result<(), CheckFailure> {
        let dominance = graph.dominance().ok_or(CheckFailure::NoDominance)?;
        let actual = graph.edge_count();
        if actual != dominance.edge_count() {
            return Err(CheckFailure::EdgeCountChanged {
                expected: dominance.edge_count(),
                actual,
            });
        }
        let entry = graph.entry_block();
        for block in graph.block_ids() {
            if block != entry && graph.dominator_of(block).is_none() {
                return Err(CheckFailure::MissingDominator { block });
            }
        }
        Ok(())
    }

    fn check_blocks(graph: &Graph) -> Result<(), CheckFailure> {
        for block in graph.blocks() {
            for &id in block.phis().iter().chain(block.instructions()) {
                let recorded = graph.instruction(id).block();
                if recorded != Some(block.id()) {
                    return Err(CheckFailure::WrongBlock {
                        insn: id,
                        block: block.id(),
                        recorded,
                    });
                }
            }

            for &phi in block.phis() {
                let inputs = graph.instruction(phi).inputs().len();
                if inputs != block.predecessors().len() {
                    return Err(CheckFailure::PhiArity {
                        phi,
                        block: block.id(),
                        inputs,
                        predecessors: block.predecessors().len(),
                    });
                }
            }

            let terminators = block
                .instructions()
                .iter()
                .filter(|&&id| graph.instruction(id).kind().is_terminator())
                .count();
            let ends_in_terminator = block
                .last_instruction()
                .is_some_and(|id| graph.instruction(id).kind().is_terminator());
            if terminators != 1 || !ends_in_terminator {
                return Err(CheckFailure::BadTerminator { block: block.id() });
            }
        }
        Ok(())
    }

    fn check_use_lists(graph: &Graph) -> Result<(), CheckFailure> {
        let mut expected: HashMap<(InsnId, InsnId), usize> = HashMap::new();
        for insn in graph.instructions() {
            for value in insn.all_uses() {
                if !graph.instruction(value).is_live() {
                    return Err(CheckFailure::DanglingReference {
                        user: insn.id(),
                        value,
                    });
                }
                *expected.entry((value, insn.id())).or_default() += 1;
            }
        }

        let mut recorded: HashMap<(InsnId, InsnId), usize> = HashMap::new();
        for insn in graph.instructions() {
            for &user in insn.users() {
                if !graph.instruction(user).is_live() {
                    return Err(CheckFailure::DanglingReference {
                        user,
                        value: insn.id(),
                    });
                }
                *recorded.entry((insn.id(), user)).or_default() += 1;
            }
        }

        let mut keys: Vec<_> = expected.keys().chain(recorded.keys()).copied().collect();
        keys.sort_unstable();
        keys.dedup();
        for (value, user) in keys {
            let actual = expected.get(&(value, user)).copied().unwrap_or(0);
            let listed = recorded.get(&(value, user)).copied().unwrap_or(0);
            if actual != listed {
                return Err(CheckFailure::UseListMismatch {
                    value,
                    user,
                    recorded: listed,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn check_dominated_uses(graph: &Graph) -> Result<(), CheckFailure> {
        // Index of every instruction inside its block; phis share index 0.
        let mut order = vec![0usize; graph.instruction_count()];
        for block in graph.blocks() {
            for (index, &id) in block.instructions().iter().enumerate() {
                order[id.index()] = index + 1;
            }
        }

        for insn in graph.instructions() {
            let Some(block) = insn.block() else {
                continue;
            };
            if insn.is_phi() {
                let predecessors = graph.block(block).predecessors();
                for (&value, &pred) in insn.inputs().iter().zip(predecessors) {
                    let def_block = graph.instruction(value).block();
                    if !def_block.is_some_and(|def| graph.dominates(def, pred)) {
                        return Err(CheckFailure::NotDominated {
                            value,
                            user: insn.id(),
                        });
                    }
                }
                continue;
            }

            for value in insn.all_uses() {
                let def = graph.instruction(value);
                let dominated = match def.block() {
                    Some(def_block) if def_block == block => {
                        def.is_phi() || order[value.index()] < order[insn.id().index()]
                    }
                    Some(def_block) => graph.dominates(def_block, block),
                    None => false,
                };
                if !dominated {
                    return Err(CheckFailure::NotDominated {
                        value,
                        user: insn.id(),
                    });
                }
            }
        }
        Ok(())
    }
}
