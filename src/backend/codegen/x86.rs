//! IA-32 and AMD64 encoder.
//!
//! Both modes share one encoder; [`X86Mode`] selects REX prefixes, the
//! thread segment and the register conventions. Memory operands always use
//! the `[base + disp32]` form, and branches are emitted as `rel32` so every
//! fixup has the same width.

use std::marker::PhantomData;

use crate::{
    backend::{
        arch,
        codegen::{
            assembler::{write_u32, Assembler, BranchKind, CodeBuffer, Label, OperandSize},
            FrameLayout,
        },
        runtime::{entry_point_offset, QuickEntrypoint, THREAD_FLAGS_OFFSET},
        Architecture, Register, RegisterFile,
    },
    ir::{BinaryOp, Comparison, UnaryOp},
};

/// Selects between the 32-bit and 64-bit flavor of the encoder.
pub trait X86Mode: Default + Send {
    /// The target.
    const ARCHITECTURE: Architecture;
    /// Register conventions.
    const REGISTERS: &'static RegisterFile;
    /// `true` for AMD64.
    const LONG_MODE: bool;
    /// Segment override prefix addressing thread data.
    const THREAD_SEGMENT: u8;
}

/// 32-bit mode.
#[derive(Debug, Default)]
pub struct Ia32;

impl X86Mode for Ia32 {
    const ARCHITECTURE: Architecture = Architecture::X86;
    const REGISTERS: &'static RegisterFile = &arch::X86;
    const LONG_MODE: bool = false;
    const THREAD_SEGMENT: u8 = 0x64;
}

/// Encoder for the x86 family.
#[derive(Debug, Default)]
pub struct X86Family<M: X86Mode> {
    code: CodeBuffer,
    mode: PhantomData<M>,
}

/// IA-32 assembler.
pub type X86Assembler = X86Family<Ia32>;

const ESP: u8 = 4;
const EBP: u8 = 5;

const OP_ADD: u8 = 0x01;
const OP_OR: u8 = 0x09;
const OP_AND: u8 = 0x21;
const OP_SUB: u8 = 0x29;
const OP_XOR: u8 = 0x31;
const OP_CMP: u8 = 0x39;
const OP_TEST: u8 = 0x85;
const OP_STORE: u8 = 0x89;
const OP_LOAD: u8 = 0x8B;

fn condition_code(cmp: Comparison) -> u8 {
    match cmp {
        Comparison::Eq => 0x4,
        Comparison::Ne => 0x5,
        Comparison::Lt => 0xC,
        Comparison::Ge => 0xD,
        Comparison::Le => 0xE,
        Comparison::Gt => 0xF,
    }
}

const fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 7) << 3) | (rm & 7)
}

impl<M: X86Mode> X86Family<M> {
    fn pointer_size() -> u32 {
        M::ARCHITECTURE.pointer_size()
    }

    /// Emits a REX prefix when one is needed. `force` requests one even
    /// without extension bits, for byte access to `sil`/`dil`.
    fn rex(&mut self, wide: bool, reg: u8, base: u8, force: bool) {
        if !M::LONG_MODE {
            assert!(!wide, "64-bit operation on a 32-bit target");
            assert!(reg < 8 && base < 8, "register out of range");
            return;
        }
        let value = 0x40
            | (u8::from(wide) << 3)
            | (u8::from(reg >= 8) << 2)
            | u8::from(base >= 8);
        if value != 0x40 || force {
            self.code.emit_u8(value);
        }
    }

    /// `opcode reg, rm` with a register operand.
    fn register_form(&mut self, opcode: &[u8], reg: u8, rm: u8, size: OperandSize) {
        self.rex(size.is_double(), reg, rm, false);
        for &byte in opcode {
            self.code.emit_u8(byte);
        }
        self.code.emit_u8(modrm(0b11, reg, rm));
    }

    /// `opcode reg, [base + disp32]`.
    fn memory_form(&mut self, opcode: &[u8], reg: u8, base: u8, offset: i32, size: OperandSize) {
        self.rex(size.is_double(), reg, base, false);
        for &byte in opcode {
            self.code.emit_u8(byte);
        }
        self.code.emit_u8(modrm(0b10, reg, base));
        if base & 7 == ESP {
            self.code.emit_u8(0x24);
        }
        self.code.emit_i32(offset);
    }

    /// `opcode /digit` on a thread-relative absolute address.
    fn thread_form(&mut self, opcode: &[u8], digit: u8, offset: i32) {
        self.code.emit_u8(M::THREAD_SEGMENT);
        for &byte in opcode {
            self.code.emit_u8(byte);
        }
        if M::LONG_MODE {
            // SIB with no base and no index: absolute disp32.
            self.code.emit_u8(modrm(0b00, digit, ESP));
            self.code.emit_u8(0x25);
        } else {
            self.code.emit_u8(modrm(0b00, digit, EBP));
        }
        self.code.emit_i32(offset);
    }

    fn skip_over_runtime_call(&mut self, entrypoint: QuickEntrypoint, jump_opcode: u8) {
        let skip = if M::LONG_MODE { 8 } else { 7 };
        self.code.emit_u8(jump_opcode);
        self.code.emit_u8(skip);
        self.call_runtime(entrypoint);
    }

    fn push(&mut self, reg: u8) {
        self.rex(false, 0, reg, false);
        self.code.emit_u8(0x50 + (reg & 7));
    }

    fn pop(&mut self, reg: u8) {
        self.rex(false, 0, reg, false);
        self.code.emit_u8(0x58 + (reg & 7));
    }

    fn adjust_stack(&mut self, digit: u8, amount: u32) {
        self.rex(M::LONG_MODE, 0, ESP, false);
        self.code.emit_u8(0x81);
        self.code.emit_u8(modrm(0b11, digit, ESP));
        self.code.emit_u32(amount);
    }
}

impl<M: X86Mode> Assembler for X86Family<M> {
    const ARCHITECTURE: Architecture = M::ARCHITECTURE;
    const REGISTERS: &'static RegisterFile = M::REGISTERS;

    fn code(&mut self) -> &mut CodeBuffer {
        &mut self.code
    }

    fn patch_branch(bytes: &mut [u8], at: usize, target: usize, _kind: BranchKind) {
        let relative = target as i64 - (at as i64 + 4);
        write_u32(bytes, at, relative as i32 as u32);
    }

    fn build_frame(&mut self, frame: &FrameLayout) {
        for reg in frame.callee_saves() {
            self.push(reg.number());
        }
        // The call already pushed the return address.
        self.adjust_stack(5, frame.adjustment());
        let size = OperandSize::pointer(Self::pointer_size());
        self.store(
            M::REGISTERS.method_register,
            M::REGISTERS.stack_pointer,
            frame.method_offset(),
            size,
        );
    }

    fn remove_frame_and_return(&mut self, frame: &FrameLayout) {
        self.adjust_stack(0, frame.adjustment());
        let saved: Vec<Register> = frame.callee_saves().collect();
        for reg in saved.into_iter().rev() {
            self.pop(reg.number());
        }
        self.code.emit_u8(0xC3);
    }

    fn move_register(&mut self, dst: Register, src: Register, size: OperandSize) {
        if dst != src {
            self.register_form(&[OP_STORE], src.number(), dst.number(), size);
        }
    }

    fn load_immediate(&mut self, dst: Register, value: i64, size: OperandSize) {
        let dst = dst.number();
        match (size, i32::try_from(value)) {
            (OperandSize::Word, _) => {
                self.rex(false, 0, dst, false);
                self.code.emit_u8(0xB8 + (dst & 7));
                self.code.emit_u32(value as u32);
            }
            (OperandSize::DoubleWord, Ok(small)) => {
                // Sign-extended imm32.
                self.rex(true, 0, dst, false);
                self.code.emit_u8(0xC7);
                self.code.emit_u8(modrm(0b11, 0, dst));
                self.code.emit_i32(small);
            }
            (OperandSize::DoubleWord, Err(_)) => {
                self.rex(true, 0, dst, false);
                self.code.emit_u8(0xB8 + (dst & 7));
                self.code.emit_u64(value as u64);
            }
        }
    }

    fn load(&mut self, dst: Register, base: Register, offset: i32, size: OperandSize) {
        self.memory_form(&[OP_LOAD], dst.number(), base.number(), offset, size);
    }

    fn store(&mut self, src: Register, base: Register, offset: i32, size: OperandSize) {
        self.memory_form(&[OP_STORE], src.number(), base.number(), offset, size);
    }

    fn binary(&mut self, op: BinaryOp, dst: Register, src: Register, size: OperandSize) {
        let (dst, src) = (dst.number(), src.number());
        match op {
            BinaryOp::Add => self.register_form(&[OP_ADD], src, dst, size),
            BinaryOp::Sub => self.register_form(&[OP_SUB], src, dst, size),
            BinaryOp::And => self.register_form(&[OP_AND], src, dst, size),
            BinaryOp::Or => self.register_form(&[OP_OR], src, dst, size),
            BinaryOp::Xor => self.register_form(&[OP_XOR], src, dst, size),
            BinaryOp::Mul => self.register_form(&[0x0F, 0xAF], dst, src, size),
        }
    }

    fn unary(&mut self, op: UnaryOp, reg: Register, size: OperandSize) {
        let digit = match op {
            UnaryOp::Neg => 3,
            UnaryOp::Not => 2,
        };
        self.register_form(&[0xF7], digit, reg.number(), size);
    }

    fn compare(&mut self, lhs: Register, rhs: Register, size: OperandSize) {
        self.register_form(&[OP_CMP], rhs.number(), lhs.number(), size);
    }

    fn branch_if(&mut self, cmp: Comparison, target: Label) {
        self.code.emit_u8(0x0F);
        self.code.emit_u8(0x80 | condition_code(cmp));
        let at = self.code.len();
        self.code.emit_u32(0);
        self.code.add_fixup(at, target, BranchKind::Conditional);
    }

    fn jump(&mut self, target: Label) {
        self.code.emit_u8(0xE9);
        let at = self.code.len();
        self.code.emit_u32(0);
        self.code.add_fixup(at, target, BranchKind::Jump);
    }

    fn set_if(&mut self, cmp: Comparison, dst: Register) {
        let dst = dst.number();
        // setcc r8
        self.rex(false, 0, dst, M::LONG_MODE && dst >= 4);
        self.code.emit_u8(0x0F);
        self.code.emit_u8(0x90 | condition_code(cmp));
        self.code.emit_u8(modrm(0b11, 0, dst));
        // movzx r32, r8
        self.rex(false, dst, dst, M::LONG_MODE && dst >= 4);
        self.code.emit_u8(0x0F);
        self.code.emit_u8(0xB6);
        self.code.emit_u8(modrm(0b11, dst, dst));
    }

    fn call_method(&mut self, method: Register) {
        let size = OperandSize::pointer(Self::pointer_size());
        self.move_register(M::REGISTERS.method_register, method, size);
        // call [method + entry_point]
        self.memory_form(
            &[0xFF],
            2,
            method.number(),
            entry_point_offset(Self::pointer_size()),
            OperandSize::Word,
        );
    }

    fn call_runtime(&mut self, entrypoint: QuickEntrypoint) {
        self.thread_form(&[0xFF], 2, entrypoint.offset(Self::pointer_size()));
    }

    fn poll_suspend(&mut self) {
        // cmp word [thread.flags], 0
        self.code.emit_u8(0x66);
        self.thread_form(&[0x83], 7, THREAD_FLAGS_OFFSET);
        self.code.emit_u8(0);
        // je over the call
        self.skip_over_runtime_call(QuickEntrypoint::TestSuspend, 0x74);
    }

    fn check_null(&mut self, reg: Register) {
        self.register_form(&[OP_TEST], reg.number(), reg.number(), OperandSize::Word);
        // jne over the call
        self.skip_over_runtime_call(QuickEntrypoint::ThrowNullPointer, 0x75);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EAX: Register = Register(0);
    const ECX: Register = Register(1);
    const EBX: Register = Register(3);

    fn emit(build: impl FnOnce(&mut X86Assembler)) -> Vec<u8> {
        let mut asm = X86Assembler::default();
        build(&mut asm);
        asm.finalize()
    }

    #[test]
    fn register_arithmetic() {
        assert_eq!(emit(|a| a.binary(BinaryOp::Add, ECX, EBX, OperandSize::Word)), [0x01, 0xD9]);
        assert_eq!(emit(|a| a.binary(BinaryOp::Mul, ECX, EBX, OperandSize::Word)), [0x0F, 0xAF, 0xCB]);
        assert_eq!(emit(|a| a.unary(UnaryOp::Neg, EAX, OperandSize::Word)), [0xF7, 0xD8]);
        assert_eq!(emit(|a| a.move_register(EBX, ECX, OperandSize::Word)), [0x89, 0xCB]);
    }

    #[test]
    fn stack_accesses_use_a_sib_byte() {
        assert_eq!(
            emit(|a| a.load(EAX, Register(ESP), 8, OperandSize::Word)),
            [0x8B, 0x84, 0x24, 8, 0, 0, 0]
        );
    }

    #[test]
    fn branches_are_relative_to_the_next_instruction() {
        let code = emit(|a| {
            let label = a.new_label();
            a.jump(label);
            a.code().emit_u8(0x90);
            a.bind(label);
        });
        assert_eq!(code, [0xE9, 1, 0, 0, 0, 0x90]);
    }

    #[test]
    fn suspend_poll_skips_the_call() {
        let code = emit(|a| a.poll_suspend());
        // 64 66 83 3d <disp32> 00 | 74 07 | 64 ff 15 <disp32>
        assert_eq!(code.len(), 9 + 2 + 7);
        assert_eq!(&code[9..11], &[0x74, 0x07]);
        assert_eq!(code[0], 0x66);
    }

    #[test]
    #[should_panic(expected = "64-bit operation")]
    fn wide_registers_do_not_exist() {
        let _ = emit(|a| a.move_register(EAX, ECX, OperandSize::DoubleWord));
    }
}
