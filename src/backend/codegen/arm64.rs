//! AArch64 encoder.

use crate::{
    backend::{
        arch,
        codegen::{
            assembler::{read_u32, write_u32, Assembler, BranchKind, CodeBuffer, Label, OperandSize},
            FrameLayout,
        },
        runtime::{entry_point_offset, QuickEntrypoint, THREAD_FLAGS_OFFSET},
        Architecture, Register, RegisterFile,
    },
    ir::{BinaryOp, Comparison, UnaryOp},
};

const ZR: u32 = 31;
const LR: Register = Register(30);
const SF: u32 = 1 << 31;

const RET: u32 = 0xD65F_03C0;
const BLR: u32 = 0xD63F_0000;
const B: u32 = 0x1400_0000;
const B_COND: u32 = 0x5400_0000;
const CBZ_W: u32 = 0x3400_0000;
const CBNZ_W: u32 = 0x3500_0000;

fn condition_code(cmp: Comparison) -> u32 {
    match cmp {
        Comparison::Eq => 0x0,
        Comparison::Ne => 0x1,
        Comparison::Ge => 0xA,
        Comparison::Lt => 0xB,
        Comparison::Gt => 0xC,
        Comparison::Le => 0xD,
    }
}

fn sf(size: OperandSize) -> u32 {
    if size.is_double() {
        SF
    } else {
        0
    }
}

fn reg(register: Register) -> u32 {
    u32::from(register.number())
}

/// A64 assembler.
#[derive(Debug, Default)]
pub struct Arm64Assembler {
    code: CodeBuffer,
}

impl Arm64Assembler {
    fn emit(&mut self, instruction: u32) {
        self.code.emit_u32(instruction);
    }

    /// Load/store with a scaled unsigned offset, falling back to a register
    /// offset built in the address temporary.
    fn memory(&mut self, load: bool, rt: Register, base: Register, offset: i32, size: OperandSize) {
        let scale = if size.is_double() { 8 } else { 4 };
        let (immediate, register) = match (size, load) {
            (OperandSize::DoubleWord, true) => (0xF940_0000, 0xF860_6800),
            (OperandSize::DoubleWord, false) => (0xF900_0000, 0xF820_6800),
            (OperandSize::Word, true) => (0xB940_0000, 0xB860_6800),
            (OperandSize::Word, false) => (0xB900_0000, 0xB820_6800),
        };
        if offset >= 0 && offset % scale == 0 && offset / scale < 4096 {
            let imm12 = (offset / scale) as u32;
            self.emit(immediate | imm12 << 10 | reg(base) << 5 | reg(rt));
        } else {
            let temp = arch::ARM64.address_temp;
            self.load_immediate(temp, i64::from(offset), OperandSize::DoubleWord);
            self.emit(register | reg(temp) << 16 | reg(base) << 5 | reg(rt));
        }
    }

    /// `add/sub sp, sp, #amount` split into a shifted and a plain part.
    fn adjust_stack(&mut self, opcode: u32, amount: u32) {
        let (high, low) = (amount >> 12, amount & 0xFFF);
        assert!(high < 0x1000, "frame of {amount} bytes is too large");
        if high != 0 {
            self.emit(opcode | 1 << 22 | high << 10 | ZR << 5 | ZR);
        }
        if low != 0 || high == 0 {
            self.emit(opcode | low << 10 | ZR << 5 | ZR);
        }
    }

    fn call_through(&mut self, base: Register, offset: i32) {
        self.memory(true, LR, base, offset, OperandSize::DoubleWord);
        self.emit(BLR | reg(LR) << 5);
    }

    fn thread() -> Register {
        arch::ARM64.thread_register.unwrap_or(Register(19))
    }
}

impl Assembler for Arm64Assembler {
    const ARCHITECTURE: Architecture = Architecture::Arm64;
    const REGISTERS: &'static RegisterFile = &arch::ARM64;

    fn code(&mut self) -> &mut CodeBuffer {
        &mut self.code
    }

    fn patch_branch(bytes: &mut [u8], at: usize, target: usize, kind: BranchKind) {
        let words = (target as i64 - at as i64) / 4;
        let instruction = read_u32(bytes, at);
        let patched = match kind {
            BranchKind::Jump => instruction | (words as u32 & 0x03FF_FFFF),
            BranchKind::Conditional => instruction | ((words as u32 & 0x7FFFF) << 5),
        };
        write_u32(bytes, at, patched);
    }

    fn build_frame(&mut self, frame: &FrameLayout) {
        let size = frame.frame_size();
        self.adjust_stack(0xD100_0000, size);
        let sp = Self::REGISTERS.stack_pointer;
        self.store(LR, sp, size as i32 - 8, OperandSize::DoubleWord);
        for (index, saved) in frame.callee_saves().enumerate() {
            let offset = size as i32 - 16 - 8 * index as i32;
            self.store(saved, sp, offset, OperandSize::DoubleWord);
        }
        self.store(
            Self::REGISTERS.method_register,
            sp,
            frame.method_offset(),
            OperandSize::DoubleWord,
        );
    }

    fn remove_frame_and_return(&mut self, frame: &FrameLayout) {
        let size = frame.frame_size();
        let sp = Self::REGISTERS.stack_pointer;
        for (index, saved) in frame.callee_saves().enumerate() {
            let offset = size as i32 - 16 - 8 * index as i32;
            self.load(saved, sp, offset, OperandSize::DoubleWord);
        }
        self.load(LR, sp, size as i32 - 8, OperandSize::DoubleWord);
        self.adjust_stack(0x9100_0000, size);
        self.emit(RET);
    }

    fn move_register(&mut self, dst: Register, src: Register, size: OperandSize) {
        if dst != src {
            // orr dst, zr, src
            self.emit(sf(size) | 0x2A00_03E0 | reg(src) << 16 | reg(dst));
        }
    }

    fn load_immediate(&mut self, dst: Register, value: i64, size: OperandSize) {
        let chunks = if size.is_double() { 4 } else { 2 };
        let bits = value as u64;
        let mut opcode = 0x5280_0000; // movz, then movk
        for hw in 0..chunks {
            let imm16 = ((bits >> (16 * hw)) & 0xFFFF) as u32;
            if imm16 == 0 {
                continue;
            }
            self.emit(sf(size) | opcode | hw << 21 | imm16 << 5 | reg(dst));
            opcode = 0x7280_0000;
        }
        if opcode == 0x5280_0000 {
            self.emit(sf(size) | opcode | reg(dst));
        }
    }

    fn load(&mut self, dst: Register, base: Register, offset: i32, size: OperandSize) {
        self.memory(true, dst, base, offset, size);
    }

    fn store(&mut self, src: Register, base: Register, offset: i32, size: OperandSize) {
        self.memory(false, src, base, offset, size);
    }

    fn binary(&mut self, op: BinaryOp, dst: Register, src: Register, size: OperandSize) {
        let opcode = match op {
            BinaryOp::Add => 0x0B00_0000,
            BinaryOp::Sub => 0x4B00_0000,
            BinaryOp::And => 0x0A00_0000,
            BinaryOp::Or => 0x2A00_0000,
            BinaryOp::Xor => 0x4A00_0000,
            // madd dst, dst, src, zr
            BinaryOp::Mul => 0x1B00_7C00,
        };
        self.emit(sf(size) | opcode | reg(src) << 16 | reg(dst) << 5 | reg(dst));
    }

    fn unary(&mut self, op: UnaryOp, register: Register, size: OperandSize) {
        let opcode = match op {
            // sub reg, zr, reg
            UnaryOp::Neg => 0x4B00_03E0,
            // orn reg, zr, reg
            UnaryOp::Not => 0x2A20_03E0,
        };
        self.emit(sf(size) | opcode | reg(register) << 16 | reg(register));
    }

    fn compare(&mut self, lhs: Register, rhs: Register, size: OperandSize) {
        // subs zr, lhs, rhs
        self.emit(sf(size) | 0x6B00_001F | reg(rhs) << 16 | reg(lhs) << 5);
    }

    fn branch_if(&mut self, cmp: Comparison, target: Label) {
        let at = self.code.len();
        self.emit(B_COND | condition_code(cmp));
        self.code.add_fixup(at, target, BranchKind::Conditional);
    }

    fn jump(&mut self, target: Label) {
        let at = self.code.len();
        self.emit(B);
        self.code.add_fixup(at, target, BranchKind::Jump);
    }

    fn set_if(&mut self, cmp: Comparison, dst: Register) {
        // csinc dst, wzr, wzr, !cmp
        let inverted = condition_code(cmp) ^ 1;
        self.emit(0x1A9F_07E0 | inverted << 12 | reg(dst));
    }

    fn call_method(&mut self, method: Register) {
        self.move_register(Self::REGISTERS.method_register, method, OperandSize::DoubleWord);
        self.call_through(method, entry_point_offset(8));
    }

    fn call_runtime(&mut self, entrypoint: QuickEntrypoint) {
        self.call_through(Self::thread(), entrypoint.offset(8));
    }

    fn poll_suspend(&mut self) {
        let flags = Self::REGISTERS.scratch[0];
        // ldrh w16, [tr, #flags]
        let imm12 = (THREAD_FLAGS_OFFSET / 2) as u32;
        self.emit(0x7940_0000 | imm12 << 10 | reg(Self::thread()) << 5 | reg(flags));
        // cbz w16, over the two-instruction call
        self.emit(CBZ_W | 3 << 5 | reg(flags));
        self.call_runtime(QuickEntrypoint::TestSuspend);
    }

    fn check_null(&mut self, register: Register) {
        self.emit(CBNZ_W | 3 << 5 | reg(register));
        self.call_runtime(QuickEntrypoint::ThrowNullPointer);
    }
}
