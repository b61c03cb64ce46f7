//! Decoding of the supported Dalvik instruction subset.
//!
//! Instructions are sequences of little-endian 16-bit code units. The low
//! byte of the first unit is the opcode; the high byte carries either one
//! 8-bit register (`AA`) or two 4-bit registers (`B|A`, `A` in the low nibble).
//! Branch offsets are signed and counted in code units relative to the
//! branch itself.
//!
//! Only the opcodes listed in [`opcodes`] are decoded; everything else is
//! reported as [`crate::Error::UnsupportedOpcode`] so the caller can fall back
//! to another execution strategy.

use crate::{
    ir::{BinaryOp, Comparison, UnaryOp},
    Error, Result,
};

/// Opcode values of the decoded subset.
#[allow(missing_docs)]
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const MOVE: u8 = 0x01;
    pub const MOVE_FROM16: u8 = 0x02;
    pub const MOVE_WIDE: u8 = 0x04;
    pub const MOVE_WIDE_FROM16: u8 = 0x05;
    pub const MOVE_OBJECT: u8 = 0x07;
    pub const MOVE_OBJECT_FROM16: u8 = 0x08;
    pub const MOVE_RESULT: u8 = 0x0a;
    pub const MOVE_RESULT_WIDE: u8 = 0x0b;
    pub const MOVE_RESULT_OBJECT: u8 = 0x0c;
    pub const RETURN_VOID: u8 = 0x0e;
    pub const RETURN: u8 = 0x0f;
    pub const RETURN_WIDE: u8 = 0x10;
    pub const RETURN_OBJECT: u8 = 0x11;
    pub const CONST_4: u8 = 0x12;
    pub const CONST_16: u8 = 0x13;
    pub const CONST: u8 = 0x14;
    pub const CONST_HIGH16: u8 = 0x15;
    pub const CONST_WIDE_16: u8 = 0x16;
    pub const CONST_WIDE_32: u8 = 0x17;
    pub const GOTO: u8 = 0x28;
    pub const GOTO_16: u8 = 0x29;
    pub const GOTO_32: u8 = 0x2a;
    pub const IF_EQ: u8 = 0x32;
    pub const IF_LE: u8 = 0x37;
    pub const IF_EQZ: u8 = 0x38;
    pub const IF_LEZ: u8 = 0x3d;
    pub const INVOKE_DIRECT: u8 = 0x70;
    pub const INVOKE_STATIC: u8 = 0x71;
    pub const NEG_INT: u8 = 0x7b;
    pub const NOT_INT: u8 = 0x7c;
    pub const NEG_LONG: u8 = 0x7d;
    pub const NOT_LONG: u8 = 0x7e;
    pub const ADD_INT: u8 = 0x90;
    pub const XOR_INT: u8 = 0x97;
    pub const ADD_LONG: u8 = 0x9b;
    pub const XOR_LONG: u8 = 0xa2;
    pub const ADD_INT_2ADDR: u8 = 0xb0;
    pub const XOR_INT_2ADDR: u8 = 0xb7;
    pub const ADD_LONG_2ADDR: u8 = 0xbb;
    pub const XOR_LONG_2ADDR: u8 = 0xc2;
    pub const ADD_INT_LIT16: u8 = 0xd0;
    pub const RSUB_INT: u8 = 0xd1;
    pub const XOR_INT_LIT16: u8 = 0xd7;
    pub const ADD_INT_LIT8: u8 = 0xd8;
    pub const RSUB_INT_LIT8: u8 = 0xd9;
    pub const XOR_INT_LIT8: u8 = 0xdf;
}

/// How many virtual registers a value occupies and whether it is a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// One register, non-reference.
    Single,
    /// Register pair, 64-bit.
    Wide,
    /// One register holding a reference.
    Object,
}

/// Call flavour of an invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    /// Static method, no receiver.
    Static,
    /// Non-virtual instance call, first argument is the receiver.
    Direct,
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexInstruction {
    /// No operation.
    Nop,
    /// Register to register copy.
    Move {
        /// Width and reference-ness.
        kind: RegisterKind,
        /// Destination register.
        dst: u16,
        /// Source register.
        src: u16,
    },
    /// Stores the result of the preceding invoke.
    MoveResult {
        /// Width and reference-ness.
        kind: RegisterKind,
        /// Destination register.
        dst: u16,
    },
    /// Return without value.
    ReturnVoid,
    /// Return a register.
    Return {
        /// Width and reference-ness.
        kind: RegisterKind,
        /// Returned register.
        src: u16,
    },
    /// 32-bit constant.
    Const {
        /// Destination register.
        dst: u16,
        /// Sign-extended value.
        value: i32,
    },
    /// 64-bit constant.
    ConstWide {
        /// Destination register pair.
        dst: u16,
        /// Sign-extended value.
        value: i64,
    },
    /// Unconditional branch.
    Goto {
        /// Offset in code units.
        offset: i32,
    },
    /// Two-register conditional branch.
    IfTest {
        /// Comparison taken on `a` and `b`.
        cmp: Comparison,
        /// Left operand.
        a: u16,
        /// Right operand.
        b: u16,
        /// Offset in code units.
        offset: i32,
    },
    /// Compare-with-zero conditional branch.
    IfTestZ {
        /// Comparison of `a` against zero.
        cmp: Comparison,
        /// Tested register.
        a: u16,
        /// Offset in code units.
        offset: i32,
    },
    /// Method call with up to five argument registers.
    Invoke {
        /// Call flavour.
        kind: InvokeKind,
        /// Callee index into the method table.
        method_idx: u16,
        /// Argument registers, `arg_count` of them are valid.
        args: [u16; 5],
        /// Number of argument registers.
        arg_count: u8,
    },
    /// Negation or complement.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// 64-bit operands.
        wide: bool,
        /// Destination register.
        dst: u16,
        /// Source register.
        src: u16,
    },
    /// Three-register arithmetic (the `/2addr` forms decode with `dst == lhs`).
    Binary {
        /// Operator.
        op: BinaryOp,
        /// 64-bit operands.
        wide: bool,
        /// Destination register.
        dst: u16,
        /// Left operand.
        lhs: u16,
        /// Right operand.
        rhs: u16,
    },
    /// Arithmetic with an immediate; `reverse` computes `literal op src`.
    BinaryLiteral {
        /// Operator.
        op: BinaryOp,
        /// Destination register.
        dst: u16,
        /// Register operand.
        src: u16,
        /// Sign-extended immediate.
        literal: i32,
        /// Operand order is `literal, src`.
        reverse: bool,
    },
}

impl DexInstruction {
    /// `true` if control never falls through to the next instruction.
    #[must_use]
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            DexInstruction::Goto { .. } | DexInstruction::Return { .. } | DexInstruction::ReturnVoid
        )
    }

    /// `true` for instructions that end a basic block.
    #[must_use]
    pub fn is_block_end(&self) -> bool {
        self.ends_flow() || self.branch_offset().is_some()
    }

    /// Branch offset in code units, if this is a branch.
    #[must_use]
    pub fn branch_offset(&self) -> Option<i32> {
        match *self {
            DexInstruction::Goto { offset }
            | DexInstruction::IfTest { offset, .. }
            | DexInstruction::IfTestZ { offset, .. } => Some(offset),
            _ => None,
        }
    }
}

const BINARY_OPS: [Option<BinaryOp>; 8] = [
    Some(BinaryOp::Add),
    Some(BinaryOp::Sub),
    Some(BinaryOp::Mul),
    None, // div
    None, // rem
    Some(BinaryOp::And),
    Some(BinaryOp::Or),
    Some(BinaryOp::Xor),
];

const COMPARISONS: [Comparison; 6] = [
    Comparison::Eq,
    Comparison::Ne,
    Comparison::Lt,
    Comparison::Ge,
    Comparison::Gt,
    Comparison::Le,
];

/// Reads code units of one instruction.
struct UnitReader<'a> {
    code: &'a [u16],
    pc: usize,
}

impl UnitReader<'_> {
    fn unit(&self, index: usize) -> Result<u16> {
        self.code.get(self.pc + index).copied().ok_or(Error::OutOfBounds)
    }

    fn aa(&self) -> Result<u16> {
        Ok(self.unit(0)? >> 8)
    }

    fn a(&self) -> Result<u16> {
        Ok((self.unit(0)? >> 8) & 0xf)
    }

    fn b(&self) -> Result<u16> {
        Ok(self.unit(0)? >> 12)
    }

    fn i32_at(&self, index: usize) -> Result<i32> {
        let low = u32::from(self.unit(index)?);
        let high = u32::from(self.unit(index + 1)?);
        Ok((low | (high << 16)) as i32)
    }
}

/// Decodes the instruction at `pc`, returning it with its size in code units.
///
/// # Errors
///
/// - [`Error::UnsupportedOpcode`] for opcodes outside the subset
/// - [`Error::OutOfBounds`] when the instruction runs past the end of `code`
pub fn decode(code: &[u16], pc: usize) -> Result<(DexInstruction, usize)> {
    use opcodes::*;

    let r = UnitReader { code, pc };
    let opcode = (r.unit(0)? & 0xff) as u8;
    let unsupported = || Error::UnsupportedOpcode {
        opcode,
        dex_pc: pc as u32,
    };

    let decoded = match opcode {
        NOP => (DexInstruction::Nop, 1),
        MOVE | MOVE_WIDE | MOVE_OBJECT => {
            let kind = move_kind(opcode - MOVE);
            (DexInstruction::Move { kind, dst: r.a()?, src: r.b()? }, 1)
        }
        MOVE_FROM16 | MOVE_WIDE_FROM16 | MOVE_OBJECT_FROM16 => {
            let kind = move_kind(opcode - MOVE_FROM16);
            (DexInstruction::Move { kind, dst: r.aa()?, src: r.unit(1)? }, 2)
        }
        MOVE_RESULT | MOVE_RESULT_WIDE | MOVE_RESULT_OBJECT => {
            let kind = result_kind(opcode - MOVE_RESULT);
            (DexInstruction::MoveResult { kind, dst: r.aa()? }, 1)
        }
        RETURN_VOID => (DexInstruction::ReturnVoid, 1),
        RETURN | RETURN_WIDE | RETURN_OBJECT => {
            let kind = result_kind(opcode - RETURN);
            (DexInstruction::Return { kind, src: r.aa()? }, 1)
        }
        CONST_4 => {
            // Sign-extend the high nibble.
            let value = i32::from((r.unit(0)? as i16) >> 12);
            (DexInstruction::Const { dst: r.a()?, value }, 1)
        }
        CONST_16 => {
            let value = i32::from(r.unit(1)? as i16);
            (DexInstruction::Const { dst: r.aa()?, value }, 2)
        }
        CONST => (DexInstruction::Const { dst: r.aa()?, value: r.i32_at(1)? }, 3),
        CONST_HIGH16 => {
            let value = (u32::from(r.unit(1)?) << 16) as i32;
            (DexInstruction::Const { dst: r.aa()?, value }, 2)
        }
        CONST_WIDE_16 => {
            let value = i64::from(r.unit(1)? as i16);
            (DexInstruction::ConstWide { dst: r.aa()?, value }, 2)
        }
        CONST_WIDE_32 => {
            let value = i64::from(r.i32_at(1)?);
            (DexInstruction::ConstWide { dst: r.aa()?, value }, 3)
        }
        GOTO => {
            let offset = i32::from((r.aa()? as u8) as i8);
            (DexInstruction::Goto { offset }, 1)
        }
        GOTO_16 => (DexInstruction::Goto { offset: i32::from(r.unit(1)? as i16) }, 2),
        GOTO_32 => (DexInstruction::Goto { offset: r.i32_at(1)? }, 3),
        IF_EQ..=IF_LE => {
            let cmp = COMPARISONS[usize::from(opcode - IF_EQ)];
            let offset = i32::from(r.unit(1)? as i16);
            (DexInstruction::IfTest { cmp, a: r.a()?, b: r.b()?, offset }, 2)
        }
        IF_EQZ..=IF_LEZ => {
            let cmp = COMPARISONS[usize::from(opcode - IF_EQZ)];
            let offset = i32::from(r.unit(1)? as i16);
            (DexInstruction::IfTestZ { cmp, a: r.aa()?, offset }, 2)
        }
        INVOKE_DIRECT | INVOKE_STATIC => {
            let kind = if opcode == INVOKE_STATIC {
                InvokeKind::Static
            } else {
                InvokeKind::Direct
            };
            let first = r.unit(0)?;
            let arg_count = (first >> 12) as u8;
            if arg_count > 5 {
                return Err(malformed_error!(
                    "invoke at {} declares {} arguments",
                    pc,
                    arg_count
                ));
            }
            let method_idx = r.unit(1)?;
            let packed = r.unit(2)?;
            let args = [
                packed & 0xf,
                (packed >> 4) & 0xf,
                (packed >> 8) & 0xf,
                packed >> 12,
                (first >> 8) & 0xf,
            ];
            (
                DexInstruction::Invoke {
                    kind,
                    method_idx,
                    args,
                    arg_count,
                },
                3,
            )
        }
        NEG_INT..=NOT_LONG => {
            let op = if (opcode - NEG_INT) % 2 == 0 {
                UnaryOp::Neg
            } else {
                UnaryOp::Not
            };
            let wide = opcode >= NEG_LONG;
            (DexInstruction::Unary { op, wide, dst: r.a()?, src: r.b()? }, 1)
        }
        ADD_INT..=XOR_INT | ADD_LONG..=XOR_LONG => {
            let wide = opcode >= ADD_LONG;
            let base = if wide { ADD_LONG } else { ADD_INT };
            let op = BINARY_OPS[usize::from(opcode - base)].ok_or_else(unsupported)?;
            let operands = r.unit(1)?;
            (
                DexInstruction::Binary {
                    op,
                    wide,
                    dst: r.aa()?,
                    lhs: operands & 0xff,
                    rhs: operands >> 8,
                },
                2,
            )
        }
        ADD_INT_2ADDR..=XOR_INT_2ADDR | ADD_LONG_2ADDR..=XOR_LONG_2ADDR => {
            let wide = opcode >= ADD_LONG_2ADDR;
            let base = if wide { ADD_LONG_2ADDR } else { ADD_INT_2ADDR };
            let op = BINARY_OPS[usize::from(opcode - base)].ok_or_else(unsupported)?;
            let dst = r.a()?;
            (
                DexInstruction::Binary {
                    op,
                    wide,
                    dst,
                    lhs: dst,
                    rhs: r.b()?,
                },
                1,
            )
        }
        ADD_INT_LIT16..=XOR_INT_LIT16 => {
            let reverse = opcode == RSUB_INT;
            let op = if reverse {
                BinaryOp::Sub
            } else {
                BINARY_OPS[usize::from(opcode - ADD_INT_LIT16)].ok_or_else(unsupported)?
            };
            let literal = i32::from(r.unit(1)? as i16);
            (
                DexInstruction::BinaryLiteral {
                    op,
                    dst: r.a()?,
                    src: r.b()?,
                    literal,
                    reverse,
                },
                2,
            )
        }
        ADD_INT_LIT8..=XOR_INT_LIT8 => {
            let reverse = opcode == RSUB_INT_LIT8;
            let op = if reverse {
                BinaryOp::Sub
            } else {
                BINARY_OPS[usize::from(opcode - ADD_INT_LIT8)].ok_or_else(unsupported)?
            };
            let operands = r.unit(1)?;
            let literal = i32::from((operands >> 8) as u8 as i8);
            (
                DexInstruction::BinaryLiteral {
                    op,
                    dst: r.aa()?,
                    src: operands & 0xff,
                    literal,
                    reverse,
                },
                2,
            )
        }
        _ => return Err(unsupported()),
    };

    // Make sure every unit of the instruction is present.
    r.unit(decoded.1 - 1)?;
    Ok(decoded)
}

// The move family spaces its variants three opcodes apart (move, /from16, /16).
fn move_kind(delta: u8) -> RegisterKind {
    match delta {
        0..=2 => RegisterKind::Single,
        3..=5 => RegisterKind::Wide,
        _ => RegisterKind::Object,
    }
}

// move-result and return place their variants on consecutive opcodes.
fn result_kind(delta: u8) -> RegisterKind {
    match delta {
        0 => RegisterKind::Single,
        1 => RegisterKind::Wide,
        _ => RegisterKind::Object,
    }
}

/// Decodes a whole method body into `(dex_pc, instruction)` pairs.
///
/// # Errors
///
/// Returns [`Error::Empty`] for an empty body and propagates [`decode`] errors.
pub fn decode_all(code: &[u16]) -> Result<Vec<(u32, DexInstruction)>> {
    if code.is_empty() {
        return Err(Error::Empty);
    }

    let mut decoded = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let (insn, size) = decode(code, pc)?;
        decoded.push((pc as u32, insn));
        pc += size;
    }
    Ok(decoded)
}
