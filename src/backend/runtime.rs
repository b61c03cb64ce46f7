//! Runtime layout constants generated code depends on.
//!
//! Offsets are in bytes. Thread-local data is reached through the thread
//! register on ARM and through a segment register on x86.

use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::ir::{BinaryOp, UnaryOp};

/// Offset of the 16-bit suspend/checkpoint request flags in the thread.
pub const THREAD_FLAGS_OFFSET: i32 = 0;

/// First entrypoint slot in the thread.
const ENTRYPOINTS_OFFSET: i32 = 0x80;

/// Offset of the resolved-methods array pointer in a method.
pub const METHOD_RESOLVED_METHODS_OFFSET: i32 = 8;

/// Offset of the first element of a pointer array.
#[must_use]
pub const fn array_data_offset(pointer_size: u32) -> i32 {
    if pointer_size == 8 {
        16
    } else {
        12
    }
}

/// Offset of the compiled-code entry point in a method.
#[must_use]
pub const fn entry_point_offset(pointer_size: u32) -> i32 {
    if pointer_size == 8 {
        48
    } else {
        40
    }
}

/// Runtime helpers called from generated code.
///
/// The 64-bit arithmetic helpers are only used on 32-bit targets. They take
/// their operands from the first two outgoing argument slots and return the
/// result in the return register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount, IntoStaticStr)]
pub enum QuickEntrypoint {
    /// Services a pending suspend request.
    TestSuspend,
    /// Throws `NullPointerException` at the current pc.
    ThrowNullPointer,
    /// 64-bit addition
    LongAdd,
    /// 64-bit subtraction
    LongSub,
    /// 64-bit multiplication
    LongMul,
    /// 64-bit bitwise and
    LongAnd,
    /// 64-bit bitwise or
    LongOr,
    /// 64-bit bitwise exclusive or
    LongXor,
    /// 64-bit negation
    LongNeg,
    /// 64-bit complement
    LongNot,
}

impl QuickEntrypoint {
    /// Offset of the entrypoint's slot in the thread.
    #[must_use]
    pub fn offset(self, pointer_size: u32) -> i32 {
        ENTRYPOINTS_OFFSET + self as i32 * pointer_size as i32
    }

    /// Helper computing a 64-bit binary operation.
    #[must_use]
    pub const fn for_binary(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => QuickEntrypoint::LongAdd,
            BinaryOp::Sub => QuickEntrypoint::LongSub,
            BinaryOp::Mul => QuickEntrypoint::LongMul,
            BinaryOp::And => QuickEntrypoint::LongAnd,
            BinaryOp::Or => QuickEntrypoint::LongOr,
            BinaryOp::Xor => QuickEntrypoint::LongXor,
        }
    }

    /// Helper computing a 64-bit unary operation.
    #[must_use]
    pub const fn for_unary(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Neg => QuickEntrypoint::LongNeg,
            UnaryOp::Not => QuickEntrypoint::LongNot,
        }
    }
}
