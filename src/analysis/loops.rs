//! Natural loop detection.
//!
//! An edge `latch -> header` is a back edge when `header` dominates `latch`.
//! The natural loop of a header is the header plus every block that reaches
//! one of its latches without passing through the header. Loops sharing a
//! header are merged into one [`LoopInformation`].

use crate::{
    ir::{BlockId, Graph, LoopInformation},
    utils::BitSet,
};

/// Finds the natural loops of `graph` and records them on it.
///
/// Loops are stored in reverse post-order of their headers, so an enclosing
/// loop always precedes the loops nested in it.
///
/// # Panics
///
/// Panics if dominance has not been computed.
pub fn find_natural_loops(graph: &mut Graph) {
    let Some(dominance) = graph.dominance() else {
        panic!("loop detection requires the dominator tree");
    };

    let mut loops = Vec::new();
    for &header in dominance.reverse_post_order() {
        let back_edges: Vec<BlockId> = graph
            .block(header)
            .predecessors()
            .iter()
            .copied()
            .filter(|&pred| graph.dominates(header, pred))
            .collect();
        if back_edges.is_empty() {
            continue;
        }

        let mut blocks = BitSet::new(graph.block_capacity());
        blocks.insert(header.index());
        let mut worklist = back_edges.clone();
        while let Some(block) = worklist.pop() {
            if blocks.insert(block.index()) {
                worklist.extend(graph.block(block).predecessors().iter().copied());
            }
        }

        loops.push(LoopInformation {
            header,
            back_edges,
            blocks,
        });
    }
    graph.set_loops(loops);
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

    fn analyze(insns: Vec<u16>) -> Result<Graph> {
        let method = MethodDescriptor::new(
            0,
            "int Loops.test(int)",
            "II",
            AccessFlags::STATIC,
            CodeItem {
                registers_size: 2,
                ins_size: 1,
                insns,
                tries: Vec::new(),
            },
        );
        let mut graph = DexGraphBuilder.build(&method)?;
        build_dominator_tree(&mut graph);
        find_natural_loops(&mut graph);
        Ok(graph)
    }

    #[test]
    fn straight_line_code_has_no_loops() -> Result<()> {
        let graph = analyze(DexAssembler::new().return_value(1).finish()?)?;
        assert!(graph.loops().is_empty());
        Ok(())
    }

    #[test]
    fn counted_loop_is_found() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.const4(0, 0)
            .label("loop")
            .binop_lit8(BinaryOp::Add, 0, 0, 1)
            .if_test(Comparison::Lt, 0, 1, "loop")
            .return_value(0);
        let graph = analyze(asm.finish()?)?;

        assert_eq!(graph.loops().len(), 1);
        let info = &graph.loops()[0];
        assert_eq!(info.back_edges().len(), 1);
        // header plus the block splitting the back edge
        assert_eq!(info.blocks().count(), 2);
        assert!(info.contains(info.back_edges()[0]));
        assert!(!info.contains(graph.entry_block()));
        assert!(graph.is_back_edge(info.back_edges()[0], info.header()));
        Ok(())
    }

    #[test]
    fn nested_loops_list_the_outer_loop_first() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.label("outer")
            .binop_lit8(BinaryOp::Add, 1, 1, -1)
            .label("inner")
            .binop_lit8(BinaryOp::Add, 0, 0, 1)
            .if_testz(Comparison::Lt, 0, "inner")
            .if_testz(Comparison::Gt, 1, "outer")
            .return_value(0);
        let graph = analyze(asm.finish()?)?;

        assert_eq!(graph.loops().len(), 2);
        let outer = &graph.loops()[0];
        let inner = &graph.loops()[1];
        assert!(outer.blocks().count() > inner.blocks().count());
        assert!(inner.blocks().all(|block| outer.contains(block)));
        Ok(())
    }
}
