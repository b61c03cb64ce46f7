#![no_main]

use libfuzzer_sys::fuzz_target;
use methodc::{
    bytecode::{AccessFlags, CodeItem},
    Architecture, CompilerOptions, MethodDescriptor, OptimizingCompiler,
};

// Layout: [registers][ins][arch][code units...]
fuzz_target!(|data: &[u8]| {
    let [registers, ins, arch, code @ ..] = data else {
        return;
    };
    let arch = match arch % 4 {
        0 => Architecture::Thumb2,
        1 => Architecture::Arm64,
        2 => Architecture::X86,
        _ => Architecture::X86_64,
    };
    let insns = code
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let method = MethodDescriptor::new(
        0,
        "Fuzz.method",
        "V",
        AccessFlags::STATIC,
        CodeItem {
            registers_size: u16::from(*registers % 16),
            ins_size: u16::from(*ins % 4),
            insns,
            tries: Vec::new(),
        },
    );
    let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default().with_instruction_set(arch));
    let _ = compiler.compile(&method);
});
