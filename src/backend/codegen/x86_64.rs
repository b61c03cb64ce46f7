//! AMD64 flavor of the x86 encoder.

use crate::backend::{
    arch,
    codegen::x86::{X86Family, X86Mode},
    Architecture, RegisterFile,
};

/// 64-bit mode.
#[derive(Debug, Default)]
pub struct LongMode;

impl X86Mode for LongMode {
    const ARCHITECTURE: Architecture = Architecture::X86_64;
    const REGISTERS: &'static RegisterFile = &arch::X86_64;
    const LONG_MODE: bool = true;
    const THREAD_SEGMENT: u8 = 0x65;
}

/// AMD64 assembler.
pub type X86_64Assembler = X86Family<LongMode>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            codegen::{Assembler, FrameLayout, OperandSize},
            Register,
        },
        ir::{BinaryOp, Comparison},
    };

    const RAX: Register = Register(0);
    const RCX: Register = Register(1);
    const RSP: Register = Register(4);
    const RDI: Register = Register(7);
    const R9: Register = Register(9);
    const R12: Register = Register(12);

    fn emit(build: impl FnOnce(&mut X86_64Assembler)) -> Vec<u8> {
        let mut asm = X86_64Assembler::default();
        build(&mut asm);
        asm.finalize()
    }

    #[test]
    fn rex_prefixes() {
        assert_eq!(
            emit(|a| a.binary(BinaryOp::Add, RCX, R9, OperandSize::DoubleWord)),
            [0x4C, 0x01, 0xC9]
        );
        assert_eq!(
            emit(|a| a.binary(BinaryOp::Xor, RCX, RAX, OperandSize::Word)),
            [0x31, 0xC1]
        );
        assert_eq!(
            emit(|a| a.store(RDI, RSP, 0, OperandSize::DoubleWord)),
            [0x48, 0x89, 0xBC, 0x24, 0, 0, 0, 0]
        );
    }

    #[test]
    fn immediates_pick_the_shortest_form() {
        assert_eq!(emit(|a| a.load_immediate(RAX, -1, OperandSize::Word)), [0xB8, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(
            emit(|a| a.load_immediate(RAX, -1, OperandSize::DoubleWord)),
            [0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(emit(|a| a.load_immediate(RAX, 1 << 40, OperandSize::DoubleWord)).len(), 10);
    }

    #[test]
    fn byte_registers_above_bl_need_rex() {
        let code = emit(|a| a.set_if(Comparison::Lt, Register(6)));
        assert_eq!(code, [0x40, 0x0F, 0x9C, 0xC6, 0x40, 0x0F, 0xB6, 0xF6]);
    }

    #[test]
    fn frames_push_callee_saves() {
        let frame = FrameLayout::new(&arch::X86_64, 8, 0, 1, R12.mask());
        let code = emit(|a| {
            a.build_frame(&frame);
            a.remove_frame_and_return(&frame);
        });
        assert_eq!(&code[..2], &[0x41, 0x54]);
        assert_eq!(code.last(), Some(&0xC3));
        assert_eq!(&code[code.len() - 3..code.len() - 1], &[0x41, 0x5C]);
    }
}
