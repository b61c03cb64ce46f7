//! Last rewrite before liveness analysis.
//!
//! Null checks stop producing a value: their users read the checked
//! reference directly, so the check only keeps its throwing behavior. A
//! condition consumed solely by the branch right after it is marked to be
//! generated at the branch, which turns compare-and-branch into one sequence
//! and leaves the condition without a register.

use tracing::trace;

use crate::{
    compiler::Optimization,
    ir::{Graph, InsnId, InstructionKind},
};

/// Prepares a graph for register allocation.
#[derive(Debug, Default)]
pub struct PrepareForRegisterAllocation {
    forwarded: usize,
    merged: usize,
}

impl PrepareForRegisterAllocation {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Null checks whose users were forwarded to the checked value.
    #[must_use]
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    /// Conditions merged into the branch that follows them.
    #[must_use]
    pub fn merged(&self) -> usize {
        self.merged
    }

    fn merges_into_branch(graph: &Graph, condition: InsnId, next: Option<&InsnId>) -> bool {
        let insn = graph.instruction(condition);
        let [user] = insn.users() else {
            return false;
        };
        next == Some(user) && *graph.instruction(*user).kind() == InstructionKind::If
    }
}

impl Optimization for PrepareForRegisterAllocation {
    fn name(&self) -> &'static str {
        "prepare_for_register_allocation"
    }

    fn run(&mut self, graph: &mut Graph) {
        self.forwarded = 0;
        self.merged = 0;

        for block in graph.reverse_post_order() {
            let instructions = graph.block(block).instructions().to_vec();
            for (index, &id) in instructions.iter().enumerate() {
                match graph.instruction(id).kind() {
                    InstructionKind::NullCheck => {
                        let checked = graph.instruction(id).inputs()[0];
                        if graph.instruction(id).has_users() {
                            graph.replace_uses(id, checked);
                            self.forwarded += 1;
                        }
                    }
                    InstructionKind::Condition(_) => {
                        if Self::merges_into_branch(graph, id, instructions.get(index + 1)) {
                            graph.set_emitted_at_use_site(id, true);
                            self.merged += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        trace!(
            forwarded = self.forwarded,
            merged = self.merged,
            "prepared for register allocation"
        );
    }
}
