//! Integration tests for the optimized path's graph phases.
//!
//! These tests drive the public analysis and optimization API directly:
//! 1. Assemble bytecode with `DexAssembler`
//! 2. Build the graph with `DexGraphBuilder`
//! 3. Compute dominance, construct SSA form and find loops
//! 4. Run the standard optimization pipeline
//! 5. Verify the graph still satisfies the SSA checker

use methodc::{
    analysis::{build_dominator_tree, find_natural_loops, transform_to_ssa, SsaLivenessAnalysis},
    bytecode::{AccessFlags, CodeItem, DexAssembler, MethodDescriptor},
    compiler::{passes::PrepareForRegisterAllocation, Optimization, OptimizationPipeline, SsaChecker},
    ir::{BinaryOp, Comparison, DexGraphBuilder, Graph, GraphBuilder, InstructionKind},
    Result,
};

fn static_method(shorty: &str, registers: u16, ins: u16, asm: &DexAssembler) -> Result<MethodDescriptor> {
    Ok(MethodDescriptor::new(
        0,
        "Test.method",
        shorty,
        AccessFlags::STATIC,
        CodeItem {
            registers_size: registers,
            ins_size: ins,
            insns: asm.finish()?,
            tries: Vec::new(),
        },
    ))
}

/// Builds the graph and brings it into SSA form with loops detected.
fn ssa_graph(method: &MethodDescriptor) -> Result<Graph> {
    let mut graph = DexGraphBuilder.build(method)?;
    build_dominator_tree(&mut graph);
    transform_to_ssa(&mut graph);
    find_natural_loops(&mut graph);
    Ok(graph)
}

fn optimize(graph: &mut Graph) -> Vec<&'static str> {
    let mut seen = Vec::new();
    OptimizationPipeline::standard().run(graph, |pass, _| seen.push(pass));
    seen
}

fn count(graph: &Graph, name: &str) -> usize {
    graph
        .instructions()
        .filter(|insn| insn.is_live() && insn.kind().name() == name)
        .count()
}

/// Method indices of the invokes in block order.
fn invoke_order(graph: &Graph) -> Vec<u32> {
    graph
        .blocks()
        .flat_map(|block| block.instructions().iter())
        .filter_map(|&id| match graph.instruction(id).kind() {
            InstructionKind::Invoke { method_idx } => Some(*method_idx),
            _ => None,
        })
        .collect()
}

#[test]
fn test_loop_keeps_ssa_form_through_the_pipeline() -> Result<()> {
    let mut asm = DexAssembler::new();
    asm.const4(0, 0)
        .label("loop")
        .if_testz(Comparison::Le, 1, "done")
        .binop_2addr(BinaryOp::Add, 0, 1)
        .binop_lit8(BinaryOp::Add, 1, 1, -1)
        .goto("loop")
        .label("done")
        .return_value(0);
    let mut graph = ssa_graph(&static_method("II", 2, 1, &asm)?)?;

    assert_eq!(graph.loops().len(), 1);
    assert!(count(&graph, "Phi") >= 2);
    assert!(SsaChecker::check(&graph).is_ok());

    let passes = optimize(&mut graph);
    assert_eq!(passes.len(), 7);
    assert!(SsaChecker::check(&graph).is_ok());
    assert_eq!(count(&graph, "LoadLocal"), 0);
    assert_eq!(count(&graph, "StoreLocal"), 0);
    Ok(())
}

#[test]
fn test_constant_arithmetic_folds_away() -> Result<()> {
    let mut asm = DexAssembler::new();
    asm.const4(0, 3)
        .const4(1, 4)
        .binop(BinaryOp::Mul, 0, 0, 1)
        .return_value(0);
    let mut graph = ssa_graph(&static_method("I", 2, 0, &asm)?)?;
    assert_eq!(count(&graph, "Binary"), 1);

    optimize(&mut graph);
    assert_eq!(count(&graph, "Binary"), 0);
    assert!(graph
        .instructions()
        .any(|insn| insn.is_live() && insn.kind().constant_value() == Some(12)));
    Ok(())
}

#[test]
fn test_side_effects_keep_their_order() -> Result<()> {
    let mut asm = DexAssembler::new();
    asm.invoke_static(3, &[0])
        .invoke_static(1, &[0])
        .invoke_static(2, &[0])
        .return_void();
    let mut graph = ssa_graph(&static_method("VI", 1, 1, &asm)?)?;

    let before = invoke_order(&graph);
    optimize(&mut graph);
    assert_eq!(before, vec![3, 1, 2]);
    assert_eq!(invoke_order(&graph), before);
    Ok(())
}

#[test]
fn test_redundant_computations_are_numbered_once() -> Result<()> {
    let mut asm = DexAssembler::new();
    // Parameters arrive in v2 and v3.
    asm.binop(BinaryOp::Xor, 0, 2, 3)
        .binop(BinaryOp::Xor, 1, 2, 3)
        .binop(BinaryOp::Or, 0, 0, 1)
        .return_value(0);
    let mut graph = ssa_graph(&static_method("III", 4, 2, &asm)?)?;

    assert_eq!(count(&graph, "Binary"), 3);
    optimize(&mut graph);
    // x | x simplifies to x once both xors are the same value
    assert_eq!(count(&graph, "Binary"), 1);
    assert!(SsaChecker::check(&graph).is_ok());
    Ok(())
}

#[test]
fn test_checker_is_stable_without_mutation() -> Result<()> {
    let mut asm = DexAssembler::new();
    asm.if_test(Comparison::Eq, 0, 1, "same")
        .const4(0, 1)
        .label("same")
        .return_value(0);
    let graph = ssa_graph(&static_method("III", 2, 2, &asm)?)?;

    let first = SsaChecker::check(&graph);
    let second = SsaChecker::check(&graph);
    assert_eq!(first, second);
    assert!(first.is_ok());
    Ok(())
}

#[test]
fn test_liveness_after_preparation_covers_every_value() -> Result<()> {
    let mut asm = DexAssembler::new();
    asm.binop(BinaryOp::Add, 2, 0, 1)
        .invoke_static(9, &[2])
        .binop(BinaryOp::Sub, 2, 2, 0)
        .return_value(2);
    let mut graph = ssa_graph(&static_method("III", 3, 2, &asm)?)?;
    optimize(&mut graph);
    PrepareForRegisterAllocation::new().run(&mut graph);

    let liveness = SsaLivenessAnalysis::analyze(&graph);
    assert!(!liveness.safepoints().is_empty());
    let arithmetic = graph
        .instructions()
        .filter(|insn| insn.is_live() && insn.kind().name() == "Binary");
    for insn in arithmetic {
        assert!(
            liveness.interval(insn.id()).is_some(),
            "{} has no interval",
            insn.id()
        );
    }
    Ok(())
}
