//! Value types and operator kinds of the IR.

use strum::{Display, EnumIter, IntoStaticStr};

/// The type of a value produced by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    /// Result of a comparison, 0 or 1.
    Bool,
    /// 32-bit integer; also covers byte, short and char.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE float.
    Double,
    /// Object reference.
    Reference,
    /// No value.
    Void,
}

impl DataType {
    /// Maps a shorty character to its type.
    #[must_use]
    pub fn from_shorty(c: char) -> Option<Self> {
        Some(match c {
            'Z' | 'B' | 'S' | 'C' | 'I' => DataType::Int,
            'J' => DataType::Long,
            'F' => DataType::Float,
            'D' => DataType::Double,
            'L' | '[' => DataType::Reference,
            'V' => DataType::Void,
            _ => return None,
        })
    }

    /// `true` for types occupying two virtual registers and a 64-bit slot.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, DataType::Long | DataType::Double)
    }

    /// `true` for floating-point types.
    #[must_use]
    pub const fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// `true` for `Void`.
    #[must_use]
    pub const fn is_void(self) -> bool {
        matches!(self, DataType::Void)
    }
}

/// Two-operand arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
}

impl BinaryOp {
    /// `true` if operand order does not matter.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        !matches!(self, BinaryOp::Sub)
    }

    /// Evaluates the operator on 32-bit operands with wrapping semantics.
    #[must_use]
    pub fn fold_int(self, lhs: i32, rhs: i32) -> i32 {
        match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
        }
    }

    /// Evaluates the operator on 64-bit operands with wrapping semantics.
    #[must_use]
    pub fn fold_long(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
        }
    }
}

/// One-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOp {
    /// Two's complement negation.
    Neg,
    /// Bitwise complement.
    Not,
}

impl UnaryOp {
    /// Evaluates the operator on a 32-bit operand.
    #[must_use]
    pub fn fold_int(self, value: i32) -> i32 {
        match self {
            UnaryOp::Neg => value.wrapping_neg(),
            UnaryOp::Not => !value,
        }
    }

    /// Evaluates the operator on a 64-bit operand.
    #[must_use]
    pub fn fold_long(self, value: i64) -> i64 {
        match self {
            UnaryOp::Neg => value.wrapping_neg(),
            UnaryOp::Not => !value,
        }
    }
}

/// Signed integer comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Comparison {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
}

impl Comparison {
    /// `true` if swapping the operands does not change the result.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Comparison::Eq | Comparison::Ne)
    }

    /// Evaluates the comparison.
    #[must_use]
    pub fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Le => lhs <= rhs,
        }
    }

    /// The comparison that holds exactly when `self` does not.
    #[must_use]
    pub const fn negate(self) -> Self {
        match self {
            Comparison::Eq => Comparison::Ne,
            Comparison::Ne => Comparison::Eq,
            Comparison::Lt => Comparison::Ge,
            Comparison::Ge => Comparison::Lt,
            Comparison::Gt => Comparison::Le,
            Comparison::Le => Comparison::Gt,
        }
    }
}
