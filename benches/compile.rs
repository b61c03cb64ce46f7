//! Benchmarks for whole-method compilation.
//!
//! Measures both paths on the same bodies:
//! - Straight-line arithmetic with a call
//! - A counting loop
//! - The loop with a try block, forcing the baseline generator
//! - A batch compiled on the rayon pool

extern crate methodc;

use criterion::{criterion_group, criterion_main, Criterion};
use methodc::prelude::*;
use std::hint::black_box;

fn method(name: &str, shorty: &str, registers: u16, ins: u16, asm: &DexAssembler) -> MethodDescriptor {
    MethodDescriptor::new(
        0,
        name,
        shorty,
        AccessFlags::STATIC,
        CodeItem {
            registers_size: registers,
            ins_size: ins,
            insns: asm.finish().unwrap(),
            tries: Vec::new(),
        },
    )
}

fn straight_line() -> MethodDescriptor {
    let mut asm = DexAssembler::new();
    asm.binop(BinaryOp::Add, 0, 1, 2)
        .invoke_static(4, &[0])
        .move_result(0)
        .binop_2addr(BinaryOp::Mul, 0, 2)
        .return_value(0);
    method("Bench.straightLine", "III", 3, 2, &asm)
}

fn counting_loop() -> MethodDescriptor {
    let mut asm = DexAssembler::new();
    asm.const4(0, 0)
        .label("loop")
        .if_testz(Comparison::Le, 1, "done")
        .binop_2addr(BinaryOp::Add, 0, 1)
        .binop_lit8(BinaryOp::Add, 1, 1, -1)
        .goto("loop")
        .label("done")
        .return_value(0);
    method("Bench.countingLoop", "II", 2, 1, &asm)
}

/// Benchmark the optimized path on straight-line code.
fn bench_optimized_straight_line(c: &mut Criterion) {
    let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
    let method = straight_line();

    c.bench_function("compile_optimized_straight_line", |b| {
        b.iter(|| black_box(compiler.compile(black_box(&method))));
    });
}

/// Benchmark the optimized path on a loop, per target.
fn bench_optimized_loop(c: &mut Criterion) {
    let method = counting_loop();
    for arch in [Architecture::Thumb2, Architecture::Arm64, Architecture::X86, Architecture::X86_64] {
        let compiler =
            OptimizingCompiler::with_defaults(CompilerOptions::default().with_instruction_set(arch));
        c.bench_function(&format!("compile_optimized_loop_{arch}"), |b| {
            b.iter(|| black_box(compiler.compile(black_box(&method))));
        });
    }
}

/// Benchmark the baseline path on the same loop.
fn bench_baseline_loop(c: &mut Criterion) {
    let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
    let mut method = counting_loop();
    method.code.tries.push(TryItem {
        start_addr: 0,
        insn_count: 2,
        handler_off: 1,
    });

    c.bench_function("compile_baseline_loop", |b| {
        b.iter(|| black_box(compiler.compile(black_box(&method))));
    });
}

/// Benchmark a batch of methods on the rayon pool.
fn bench_compile_all(c: &mut Criterion) {
    let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
    let methods: Vec<_> = (0..256)
        .map(|i| if i % 2 == 0 { straight_line() } else { counting_loop() })
        .collect();

    c.bench_function("compile_all_256", |b| {
        b.iter(|| black_box(compiler.compile_all(black_box(&methods))));
    });
}

criterion_group!(
    benches,
    bench_optimized_straight_line,
    bench_optimized_loop,
    bench_baseline_loop,
    bench_compile_all
);
criterion_main!(benches);
