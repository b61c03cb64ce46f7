//! End-to-end compilation scenarios through `OptimizingCompiler`.
//!
//! Each test compiles small methods built with `DexAssembler` and checks
//! which path produced the artifact, which metadata it carries and how the
//! statistics moved.

use methodc::prelude::*;
use strum::IntoEnumIterator;

const SUPPORTED: [Architecture; 4] = [
    Architecture::Thumb2,
    Architecture::Arm64,
    Architecture::X86,
    Architecture::X86_64,
];

fn method(name: &str, shorty: &str, registers: u16, ins: u16, asm: &DexAssembler) -> Result<MethodDescriptor> {
    Ok(MethodDescriptor::new(
        0,
        name,
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

/// `int add(int a, int b) { return helper(a + b) * b; }`
fn straight_line() -> Result<MethodDescriptor> {
    let mut asm = DexAssembler::new();
    asm.binop(BinaryOp::Add, 0, 1, 2)
        .invoke_static(4, &[0])
        .move_result(0)
        .binop_2addr(BinaryOp::Mul, 0, 2)
        .return_value(0);
    method("Main.straightLine", "III", 3, 2, &asm)
}

/// `long widen(long a, long b) { return a + b; }`
fn wide_add() -> Result<MethodDescriptor> {
    let mut asm = DexAssembler::new();
    asm.binop_wide(BinaryOp::Add, 0, 0, 2).return_wide(0);
    method("Main.wideAdd", "JJJ", 4, 4, &asm)
}

fn with_try_block(mut method: MethodDescriptor) -> MethodDescriptor {
    method.code.tries.push(TryItem {
        start_addr: 0,
        insn_count: 2,
        handler_off: 1,
    });
    method
}

fn compiler_for(arch: Architecture) -> OptimizingCompiler {
    OptimizingCompiler::with_defaults(CompilerOptions::default().with_instruction_set(arch))
}

#[test]
fn test_loop_free_method_takes_the_optimized_path() -> Result<()> {
    let method = straight_line()?;
    for arch in SUPPORTED {
        let compiler = compiler_for(arch);
        let Some(artifact) = compiler.compile(&method) else {
            panic!("{arch} declined a supported method");
        };

        assert!(artifact.is_optimized(), "{arch}");
        assert_eq!(artifact.architecture(), arch);
        assert!(!artifact.code().is_empty());
        assert!(artifact.stack_map_table().is_some_and(|table| !table.is_empty()));
        assert_eq!(artifact.vmap_table(), None);
        assert_eq!(artifact.native_gc_map(), None);
        assert_eq!(artifact.fp_spill_mask(), 0);
        assert!(artifact.frame_size() >= arch.pointer_size());

        let stats = compiler.stats();
        assert_eq!((stats.total, stats.optimized, stats.baseline), (1, 1, 0));
    }
    Ok(())
}

#[test]
fn test_try_block_forces_the_baseline_path() -> Result<()> {
    let method = with_try_block(straight_line()?);
    for filter in [CompilerFilter::Speed, CompilerFilter::Time] {
        let options = CompilerOptions::default().with_compiler_filter(filter);
        let compiler = OptimizingCompiler::with_defaults(options);
        let Some(artifact) = compiler.compile(&method) else {
            panic!("baseline compilation declined");
        };

        assert!(matches!(artifact.layout(), ArtifactLayout::Baseline { .. }));
        assert_eq!(artifact.stack_map_table(), None);
        assert!(artifact.vmap_table().is_some());
        assert!(artifact.native_gc_map().is_some_and(|map| map.len() >= 4));
        assert_eq!(compiler.stats().baseline, 1);
    }
    Ok(())
}

#[test]
fn test_unsupported_architecture_is_ineligible() -> Result<()> {
    let method = straight_line()?;
    let unsupported: Vec<_> = Architecture::iter()
        .filter(|arch| !SUPPORTED.contains(arch) && *arch != Architecture::Arm)
        .collect();
    assert!(!unsupported.is_empty());

    for arch in unsupported {
        let compiler = compiler_for(arch);
        let before = compiler.stats();
        assert!(compiler.compile(&method).is_none());
        assert_eq!(compiler.stats(), before);
        assert_eq!(compiler.report(), "Did not compile any method.");
    }
    Ok(())
}

#[test]
fn test_disabled_optimization_compiles_everything_as_baseline() -> Result<()> {
    let options = CompilerOptions::default().with_compiler_filter(CompilerFilter::Time);
    let compiler = OptimizingCompiler::with_defaults(options);
    let methods = [straight_line()?, wide_add()?, with_try_block(straight_line()?)];

    for method in &methods {
        let artifact = compiler.compile(method);
        assert!(artifact.is_some_and(|artifact| !artifact.is_optimized()));
        assert_eq!(compiler.stats().optimized, 0);
    }
    assert_eq!(compiler.stats().baseline, methods.len());
    Ok(())
}

#[test]
fn test_arm_is_compiled_as_thumb2() -> Result<()> {
    let compiler = compiler_for(Architecture::Arm);
    let artifact = compiler.compile(&straight_line()?);
    assert!(artifact.is_some_and(|artifact| artifact.architecture() == Architecture::Thumb2));
    Ok(())
}

#[test]
fn test_wide_arithmetic_needs_a_64_bit_target_to_optimize() -> Result<()> {
    let method = wide_add()?;
    for arch in SUPPORTED {
        let compiler = compiler_for(arch);
        let Some(artifact) = compiler.compile(&method) else {
            panic!("{arch} declined wide arithmetic");
        };
        assert_eq!(artifact.is_optimized(), arch.pointer_size() == 8, "{arch}");
    }
    Ok(())
}

#[test]
fn test_debug_symbols_only_extend_the_mapping_table() -> Result<()> {
    let method = straight_line()?;
    let plain = compiler_for(Architecture::Arm64).compile(&method);
    let debug = OptimizingCompiler::with_defaults(
        CompilerOptions::default()
            .with_instruction_set(Architecture::Arm64)
            .with_debug_symbols(true),
    )
    .compile(&method);

    let (Some(plain), Some(debug)) = (plain, debug) else {
        panic!("compilation declined");
    };
    assert_eq!(plain.code(), debug.code());
    assert_eq!(plain.stack_map_table(), debug.stack_map_table());
    assert!(debug.mapping_table().len() > plain.mapping_table().len());
    Ok(())
}

#[test]
fn test_report_after_mixed_paths() -> Result<()> {
    let compiler = compiler_for(Architecture::X86);
    let _ = compiler.compile(&straight_line()?);
    let _ = compiler.compile(&wide_add()?);
    let _ = compiler.compile(&with_try_block(straight_line()?));
    let _ = compiler.compile(&straight_line()?);

    assert_eq!(
        compiler.report(),
        "Compiled 4 methods: 50% (2) unoptimized, 50% (2) optimized."
    );
    Ok(())
}
