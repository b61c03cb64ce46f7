//! T32 (Thumb-2) encoder.
//!
//! Everything is emitted in 32-bit encodings except a few fixed 16-bit
//! instructions (`blx`, `it`, short forward `b<c>` over runtime calls).
//! Each 32-bit instruction is stored as two little-endian half-words, the
//! first half-word first.

use crate::{
    backend::{
        arch,
        codegen::{
            assembler::{Assembler, BranchKind, CodeBuffer, Label, OperandSize},
            FrameLayout,
        },
        runtime::{entry_point_offset, QuickEntrypoint, THREAD_FLAGS_OFFSET},
        Architecture, Register, RegisterFile,
    },
    ir::{BinaryOp, Comparison, UnaryOp},
};

const SP: u16 = 13;
const LR: Register = Register(14);
const PC_BIT: u16 = 1 << 15;
const LR_BIT: u16 = 1 << 14;

const BLX_LR: u16 = 0x47F0;

fn condition_code(cmp: Comparison) -> u16 {
    match cmp {
        Comparison::Eq => 0x0,
        Comparison::Ne => 0x1,
        Comparison::Ge => 0xA,
        Comparison::Lt => 0xB,
        Comparison::Gt => 0xC,
        Comparison::Le => 0xD,
    }
}

fn reg(register: Register) -> u16 {
    u16::from(register.number())
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn write_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

/// T32 assembler.
#[derive(Debug, Default)]
pub struct Thumb2Assembler {
    code: CodeBuffer,
}

impl Thumb2Assembler {
    fn emit16(&mut self, half: u16) {
        self.code.emit_u16(half);
    }

    fn emit32(&mut self, first: u16, second: u16) {
        self.code.emit_u16(first);
        self.code.emit_u16(second);
    }

    fn assert_word(size: OperandSize) {
        assert!(!size.is_double(), "64-bit operation on a 32-bit target");
    }

    /// `movw`/`movt` share one immediate layout.
    fn move_wide_immediate(&mut self, opcode: u16, dst: Register, imm16: u16) {
        let imm4 = imm16 >> 12;
        let i = (imm16 >> 11) & 1;
        let imm3 = (imm16 >> 8) & 7;
        let imm8 = imm16 & 0xFF;
        self.emit32(opcode | i << 10 | imm4, imm3 << 12 | reg(dst) << 8 | imm8);
    }

    fn memory(&mut self, immediate: u16, register: u16, rt: Register, base: Register, offset: i32) {
        if (0..4096).contains(&offset) {
            self.emit32(immediate | reg(base), reg(rt) << 12 | offset as u16);
        } else {
            let temp = arch::THUMB2.address_temp;
            self.load_immediate(temp, i64::from(offset), OperandSize::Word);
            self.emit32(register | reg(base), reg(rt) << 12 | reg(temp));
        }
    }

    /// `addw/subw sp, sp, #amount`, through the address temporary when the
    /// amount does not fit 12 bits.
    fn adjust_stack(&mut self, add: bool, amount: u32) {
        if amount < 4096 {
            let amount = amount as u16;
            let opcode = if add { 0xF200 } else { 0xF2A0 };
            let (i, imm3, imm8) = ((amount >> 11) & 1, (amount >> 8) & 7, amount & 0xFF);
            self.emit32(opcode | i << 10 | SP, imm3 << 12 | SP << 8 | imm8);
        } else {
            let temp = arch::THUMB2.address_temp;
            self.load_immediate(temp, i64::from(amount), OperandSize::Word);
            let opcode = if add { 0xEB0D } else { 0xEBAD };
            self.emit32(opcode, SP << 8 | reg(temp));
        }
    }

    fn call_through(&mut self, base: Register, offset: i32) {
        self.load(LR, base, offset, OperandSize::Word);
        self.emit16(BLX_LR);
    }

    fn thread() -> Register {
        arch::THUMB2.thread_register.unwrap_or(Register(9))
    }

    /// `cmp.w reg, #0` then a 16-bit `b<c>` over the runtime call that
    /// follows.
    fn skip_if_zero_compare(&mut self, register: Register, cmp: Comparison) {
        self.emit32(0xF1B0 | reg(register), 0x0F00);
        // Skips ldr.w (4 bytes) and blx (2 bytes).
        self.emit16(0xD000 | condition_code(cmp) << 8 | 2);
    }

    fn saved_list(frame: &FrameLayout) -> u16 {
        frame
            .callee_saves()
            .fold(0, |list, saved| list | 1 << saved.number())
    }
}

impl Assembler for Thumb2Assembler {
    const ARCHITECTURE: Architecture = Architecture::Thumb2;
    const REGISTERS: &'static RegisterFile = &arch::THUMB2;

    fn code(&mut self) -> &mut CodeBuffer {
        &mut self.code
    }

    fn patch_branch(bytes: &mut [u8], at: usize, target: usize, kind: BranchKind) {
        let offset = (target as i64 - (at as i64 + 4)) as u32;
        let s = (offset >> 24) & 1;
        let (first, second) = match kind {
            BranchKind::Conditional => {
                let s = (offset >> 20) & 1;
                let j2 = (offset >> 19) & 1;
                let j1 = (offset >> 18) & 1;
                let imm6 = (offset >> 12) & 0x3F;
                let imm11 = (offset >> 1) & 0x7FF;
                (s << 10 | imm6, j1 << 13 | j2 << 11 | imm11)
            }
            BranchKind::Jump => {
                let i1 = (offset >> 23) & 1;
                let i2 = (offset >> 22) & 1;
                let j1 = (!(i1 ^ s)) & 1;
                let j2 = (!(i2 ^ s)) & 1;
                let imm10 = (offset >> 12) & 0x3FF;
                let imm11 = (offset >> 1) & 0x7FF;
                (s << 10 | imm10, j1 << 13 | j2 << 11 | imm11)
            }
        };
        write_u16(bytes, at, read_u16(bytes, at) | first as u16);
        write_u16(bytes, at + 2, read_u16(bytes, at + 2) | second as u16);
    }

    fn build_frame(&mut self, frame: &FrameLayout) {
        let list = Self::saved_list(frame);
        if list == 0 {
            // push {lr}
            self.emit16(0xB500);
        } else {
            self.emit32(0xE92D, list | LR_BIT);
        }
        self.adjust_stack(false, frame.adjustment());
        self.store(
            Self::REGISTERS.method_register,
            Self::REGISTERS.stack_pointer,
            frame.method_offset(),
            OperandSize::Word,
        );
    }

    fn remove_frame_and_return(&mut self, frame: &FrameLayout) {
        self.adjust_stack(true, frame.adjustment());
        let list = Self::saved_list(frame);
        if list == 0 {
            // pop {pc}
            self.emit16(0xBD00);
        } else {
            self.emit32(0xE8BD, list | PC_BIT);
        }
    }

    fn move_register(&mut self, dst: Register, src: Register, size: OperandSize) {
        Self::assert_word(size);
        if dst != src {
            self.emit32(0xEA4F, reg(dst) << 8 | reg(src));
        }
    }

    fn load_immediate(&mut self, dst: Register, value: i64, size: OperandSize) {
        Self::assert_word(size);
        let bits = value as u32;
        self.move_wide_immediate(0xF240, dst, bits as u16);
        let high = (bits >> 16) as u16;
        if high != 0 {
            self.move_wide_immediate(0xF2C0, dst, high);
        }
    }

    fn load(&mut self, dst: Register, base: Register, offset: i32, size: OperandSize) {
        Self::assert_word(size);
        self.memory(0xF8D0, 0xF850, dst, base, offset);
    }

    fn store(&mut self, src: Register, base: Register, offset: i32, size: OperandSize) {
        Self::assert_word(size);
        self.memory(0xF8C0, 0xF840, src, base, offset);
    }

    fn binary(&mut self, op: BinaryOp, dst: Register, src: Register, size: OperandSize) {
        Self::assert_word(size);
        let (d, m) = (reg(dst), reg(src));
        match op {
            BinaryOp::Add => self.emit32(0xEB00 | d, d << 8 | m),
            BinaryOp::Sub => self.emit32(0xEBA0 | d, d << 8 | m),
            BinaryOp::And => self.emit32(0xEA00 | d, d << 8 | m),
            BinaryOp::Or => self.emit32(0xEA40 | d, d << 8 | m),
            BinaryOp::Xor => self.emit32(0xEA80 | d, d << 8 | m),
            BinaryOp::Mul => self.emit32(0xFB00 | d, 0xF000 | d << 8 | m),
        }
    }

    fn unary(&mut self, op: UnaryOp, register: Register, size: OperandSize) {
        Self::assert_word(size);
        let r = reg(register);
        match op {
            // rsb.w r, r, #0
            UnaryOp::Neg => self.emit32(0xF1C0 | r, r << 8),
            UnaryOp::Not => self.emit32(0xEA6F, r << 8 | r),
        }
    }

    fn compare(&mut self, lhs: Register, rhs: Register, size: OperandSize) {
        Self::assert_word(size);
        self.emit32(0xEBB0 | reg(lhs), 0x0F00 | reg(rhs));
    }

    fn branch_if(&mut self, cmp: Comparison, target: Label) {
        let at = self.code.len();
        self.emit32(0xF000 | condition_code(cmp) << 6, 0x8000);
        self.code.add_fixup(at, target, BranchKind::Conditional);
    }

    fn jump(&mut self, target: Label) {
        let at = self.code.len();
        self.emit32(0xF000, 0x9000);
        self.code.add_fixup(at, target, BranchKind::Jump);
    }

    fn set_if(&mut self, cmp: Comparison, dst: Register) {
        let d = reg(dst);
        self.emit32(0xF04F, d << 8);
        // it <cmp>
        self.emit16(0xBF08 | condition_code(cmp) << 4);
        self.emit32(0xF04F, d << 8 | 1);
    }

    fn call_method(&mut self, method: Register) {
        self.move_register(Self::REGISTERS.method_register, method, OperandSize::Word);
        self.call_through(method, entry_point_offset(4));
    }

    fn call_runtime(&mut self, entrypoint: QuickEntrypoint) {
        self.call_through(Self::thread(), entrypoint.offset(4));
    }

    fn poll_suspend(&mut self) {
        let flags = Self::REGISTERS.scratch[0];
        // ldrh.w ip, [tr, #flags]
        self.emit32(0xF8B0 | reg(Self::thread()), reg(flags) << 12 | THREAD_FLAGS_OFFSET as u16);
        self.skip_if_zero_compare(flags, Comparison::Eq);
        self.call_runtime(QuickEntrypoint::TestSuspend);
    }

    fn check_null(&mut self, register: Register) {
        self.skip_if_zero_compare(register, Comparison::Ne);
        self.call_runtime(QuickEntrypoint::ThrowNullPointer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halves(build: impl FnOnce(&mut Thumb2Assembler)) -> Vec<u16> {
        let mut asm = Thumb2Assembler::default();
        build(&mut asm);
        asm.finalize()
            .chunks(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect()
    }

    #[test]
    fn data_processing() {
        let (r0, r1, r8) = (Register(0), Register(1), Register(8));
        assert_eq!(halves(|a| a.binary(BinaryOp::Add, r8, r1, OperandSize::Word)), [0xEB08, 0x0801]);
        assert_eq!(halves(|a| a.move_register(r0, r8, OperandSize::Word)), [0xEA4F, 0x0008]);
        assert_eq!(halves(|a| a.compare(r0, r1, OperandSize::Word)), [0xEBB0, 0x0F01]);
    }

    #[test]
    fn immediates_use_movw_and_movt() {
        let r2 = Register(2);
        assert_eq!(halves(|a| a.load_immediate(r2, 0x1234, OperandSize::Word)), [0xF241, 0x2234]);
        assert_eq!(halves(|a| a.load_immediate(r2, -1, OperandSize::Word)).len(), 4);
    }

    #[test]
    fn forward_and_backward_branches() {
        let code = halves(|a| {
            let back = a.new_label();
            a.bind(back);
            let ahead = a.new_label();
            a.branch_if(Comparison::Eq, ahead);
            a.jump(back);
            a.bind(ahead);
        });
        // beq.w +4 from pc (at + 4): imm11 = 2.
        assert_eq!(&code[..2], &[0xF000, 0x8002]);
        // b.w -8: S = 1, J1 = J2 = 1, all immediates ones except the last bits.
        assert_eq!(&code[2..], &[0xF7FF, 0xBFFC]);
    }

    #[test]
    fn leaf_frames_push_only_lr() {
        let frame = FrameLayout::new(&arch::THUMB2, 4, 0, 0, 0);
        let code = halves(|a| {
            a.build_frame(&frame);
            a.remove_frame_and_return(&frame);
        });
        assert_eq!(code[0], 0xB500);
        assert_eq!(code.last(), Some(&0xBD00));
    }

    #[test]
    #[should_panic(expected = "64-bit operation")]
    fn no_wide_registers() {
        let _ = halves(|a| a.load_immediate(Register(0), 1, OperandSize::DoubleWord));
    }
}
