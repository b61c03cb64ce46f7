//! The optimizations run between SSA construction and register allocation.
//!
//! Each pass implements [`crate::compiler::Optimization`] and is run once, in
//! the order fixed by [`crate::compiler::OptimizationPipeline`]. All of them
//! rewrite through the [`crate::ir::Graph`] editing API, which keeps use
//! lists consistent, so the shared SSA checker can validate every result.

mod constant_folding;
mod dce;
mod gvn;
mod phi_elimination;
mod prepare;
mod simplifier;

pub use constant_folding::ConstantFolding;
pub use dce::DeadCodeElimination;
pub use gvn::GlobalValueNumbering;
pub use phi_elimination::{DeadPhiElimination, RedundantPhiElimination};
pub use prepare::PrepareForRegisterAllocation;
pub use simplifier::InstructionSimplifier;

#[cfg(test)]
pub(crate) mod testing {
    use crate::{
        analysis::{build_dominator_tree, find_natural_loops, transform_to_ssa},
        bytecode::{AccessFlags, CodeItem, MethodDescriptor},
        ir::{DexGraphBuilder, Graph, GraphBuilder},
        Result,
    };

    /// Builds `int run(int, int)` with a single local `v0` and takes it to
    /// SSA form.
    pub(crate) fn ssa_graph(insns: Vec<u16>) -> Result<Graph> {
        let method = MethodDescriptor::new(
            0,
            "int Test.run(int, int)",
            "III",
            AccessFlags::STATIC,
            CodeItem {
                registers_size: 3,
                ins_size: 2,
                insns,
                tries: Vec::new(),
            },
        );
        let mut graph = DexGraphBuilder.build(&method)?;
        build_dominator_tree(&mut graph);
        transform_to_ssa(&mut graph);
        find_natural_loops(&mut graph);
        Ok(graph)
    }

    /// Live instructions of the given kind.
    pub(crate) fn count(graph: &Graph, name: &str) -> usize {
        graph
            .instructions()
            .filter(|insn| insn.kind().name() == name)
            .count()
    }
}
