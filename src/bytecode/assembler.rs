//! A small label-aware assembler producing Dalvik code units.
//!
//! Used to build method bodies in tests, benchmarks and fuzz seeds without
//! hand-encoding code units. Branches refer to named labels that are resolved
//! in [`DexAssembler::finish`].
//!
//! # Example
//!
//! ```rust
//! use methodc::{bytecode::DexAssembler, ir::{BinaryOp, Comparison}};
//!
//! # fn main() -> methodc::Result<()> {
//! // int sum(int n) { int s = 0; while (n > 0) { s += n; n--; } return s; }
//! let mut asm = DexAssembler::new();
//! asm.const4(0, 0)
//!     .label("loop")
//!     .if_testz(Comparison::Le, 1, "done")
//!     .binop_2addr(BinaryOp::Add, 0, 1)
//!     .binop_lit8(BinaryOp::Add, 1, 1, -1)
//!     .goto("loop")
//!     .label("done")
//!     .return_value(0);
//! let code = asm.finish()?;
//! assert!(!code.is_empty());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use crate::{
    bytecode::instruction::opcodes,
    ir::{BinaryOp, Comparison, UnaryOp},
    Result,
};

#[derive(Debug, Clone, Copy)]
enum FixupKind {
    /// 16-bit offset in the unit after the opcode unit.
    Offset16,
}

#[derive(Debug)]
struct Fixup {
    insn_pc: usize,
    label: String,
    kind: FixupKind,
}

/// Builder for Dalvik code units.
#[derive(Debug, Default)]
pub struct DexAssembler {
    units: Vec<u16>,
    labels: HashMap<String, usize>,
    fixups: Vec<Fixup>,
    errors: Vec<String>,
}

fn binary_index(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::And => 5,
        BinaryOp::Or => 6,
        BinaryOp::Xor => 7,
    }
}

fn comparison_index(cmp: Comparison) -> u8 {
    match cmp {
        Comparison::Eq => 0,
        Comparison::Ne => 1,
        Comparison::Lt => 2,
        Comparison::Ge => 3,
        Comparison::Gt => 4,
        Comparison::Le => 5,
    }
}

impl DexAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in code units.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.units.len()
    }

    fn nibble(&mut self, reg: u8) -> u16 {
        if reg > 0xf {
            self.errors
                .push(format!("register v{reg} does not fit a 4-bit operand"));
        }
        u16::from(reg & 0xf)
    }

    fn op_ba(&mut self, opcode: u8, a: u8, b: u8) -> &mut Self {
        let a = self.nibble(a);
        let b = self.nibble(b);
        self.units.push(u16::from(opcode) | (a << 8) | (b << 12));
        self
    }

    fn op_aa(&mut self, opcode: u8, aa: u8) -> &mut Self {
        self.units.push(u16::from(opcode) | (u16::from(aa) << 8));
        self
    }

    /// Appends a raw code unit.
    pub fn raw(&mut self, unit: u16) -> &mut Self {
        self.units.push(unit);
        self
    }

    /// Binds `name` to the current position.
    pub fn label(&mut self, name: &str) -> &mut Self {
        if self.labels.insert(name.to_string(), self.pc()).is_some() {
            self.errors.push(format!("label '{name}' bound twice"));
        }
        self
    }

    /// `nop`
    pub fn nop(&mut self) -> &mut Self {
        self.units.push(u16::from(opcodes::NOP));
        self
    }

    /// `const/4 vA, #value` with `value` in `-8..=7`.
    pub fn const4(&mut self, dst: u8, value: i8) -> &mut Self {
        if !(-8..=7).contains(&value) {
            self.errors.push(format!("const/4 literal {value} out of range"));
        }
        let literal = (value as u8) & 0xf;
        self.op_ba(opcodes::CONST_4, dst, literal)
    }

    /// `const/16 vAA, #value`
    pub fn const16(&mut self, dst: u8, value: i16) -> &mut Self {
        self.op_aa(opcodes::CONST_16, dst).raw(value as u16)
    }

    /// `const vAA, #value`
    pub fn const32(&mut self, dst: u8, value: i32) -> &mut Self {
        let bits = value as u32;
        self.op_aa(opcodes::CONST, dst)
            .raw(bits as u16)
            .raw((bits >> 16) as u16)
    }

    /// `const/high16 vAA, #high << 16`
    pub fn const_high16(&mut self, dst: u8, high: u16) -> &mut Self {
        self.op_aa(opcodes::CONST_HIGH16, dst).raw(high)
    }

    /// `const-wide/16 vAA, #value`
    pub fn const_wide16(&mut self, dst: u8, value: i16) -> &mut Self {
        self.op_aa(opcodes::CONST_WIDE_16, dst).raw(value as u16)
    }

    /// `const-wide/32 vAA, #value`
    pub fn const_wide32(&mut self, dst: u8, value: i32) -> &mut Self {
        let bits = value as u32;
        self.op_aa(opcodes::CONST_WIDE_32, dst)
            .raw(bits as u16)
            .raw((bits >> 16) as u16)
    }

    /// `move vA, vB`
    pub fn mov(&mut self, dst: u8, src: u8) -> &mut Self {
        self.op_ba(opcodes::MOVE, dst, src)
    }

    /// `move-wide vA, vB`
    pub fn move_wide(&mut self, dst: u8, src: u8) -> &mut Self {
        self.op_ba(opcodes::MOVE_WIDE, dst, src)
    }

    /// `move-object vA, vB`
    pub fn move_object(&mut self, dst: u8, src: u8) -> &mut Self {
        self.op_ba(opcodes::MOVE_OBJECT, dst, src)
    }

    /// `move/from16 vAA, vBBBB`
    pub fn move_from16(&mut self, dst: u8, src: u16) -> &mut Self {
        self.op_aa(opcodes::MOVE_FROM16, dst).raw(src)
    }

    /// `move-result vAA`
    pub fn move_result(&mut self, dst: u8) -> &mut Self {
        self.op_aa(opcodes::MOVE_RESULT, dst)
    }

    /// `move-result-wide vAA`
    pub fn move_result_wide(&mut self, dst: u8) -> &mut Self {
        self.op_aa(opcodes::MOVE_RESULT_WIDE, dst)
    }

    /// `move-result-object vAA`
    pub fn move_result_object(&mut self, dst: u8) -> &mut Self {
        self.op_aa(opcodes::MOVE_RESULT_OBJECT, dst)
    }

    /// `return-void`
    pub fn return_void(&mut self) -> &mut Self {
        self.units.push(u16::from(opcodes::RETURN_VOID));
        self
    }

    /// `return vAA`
    pub fn return_value(&mut self, src: u8) -> &mut Self {
        self.op_aa(opcodes::RETURN, src)
    }

    /// `return-wide vAA`
    pub fn return_wide(&mut self, src: u8) -> &mut Self {
        self.op_aa(opcodes::RETURN_WIDE, src)
    }

    /// `return-object vAA`
    pub fn return_object(&mut self, src: u8) -> &mut Self {
        self.op_aa(opcodes::RETURN_OBJECT, src)
    }

    /// `<op>-int vAA, vBB, vCC`
    pub fn binop(&mut self, op: BinaryOp, dst: u8, lhs: u8, rhs: u8) -> &mut Self {
        self.op_aa(opcodes::ADD_INT + binary_index(op), dst)
            .raw(u16::from(lhs) | (u16::from(rhs) << 8))
    }

    /// `<op>-long vAA, vBB, vCC`
    pub fn binop_wide(&mut self, op: BinaryOp, dst: u8, lhs: u8, rhs: u8) -> &mut Self {
        self.op_aa(opcodes::ADD_LONG + binary_index(op), dst)
            .raw(u16::from(lhs) | (u16::from(rhs) << 8))
    }

    /// `<op>-int/2addr vA, vB`
    pub fn binop_2addr(&mut self, op: BinaryOp, dst: u8, src: u8) -> &mut Self {
        self.op_ba(opcodes::ADD_INT_2ADDR + binary_index(op), dst, src)
    }

    /// `<op>-long/2addr vA, vB`
    pub fn binop_wide_2addr(&mut self, op: BinaryOp, dst: u8, src: u8) -> &mut Self {
        self.op_ba(opcodes::ADD_LONG_2ADDR + binary_index(op), dst, src)
    }

    /// `<op>-int/lit8 vAA, vBB, #literal`; `Sub` encodes `rsub-int/lit8`.
    pub fn binop_lit8(&mut self, op: BinaryOp, dst: u8, src: u8, literal: i8) -> &mut Self {
        self.op_aa(opcodes::ADD_INT_LIT8 + binary_index(op), dst)
            .raw(u16::from(src) | (u16::from(literal as u8) << 8))
    }

    /// `<op>-int/lit16 vA, vB, #literal`; `Sub` encodes `rsub-int`.
    pub fn binop_lit16(&mut self, op: BinaryOp, dst: u8, src: u8, literal: i16) -> &mut Self {
        self.op_ba(opcodes::ADD_INT_LIT16 + binary_index(op), dst, src)
            .raw(literal as u16)
    }

    /// `neg-int` / `not-int vA, vB`
    pub fn unop(&mut self, op: UnaryOp, dst: u8, src: u8) -> &mut Self {
        let opcode = match op {
            UnaryOp::Neg => opcodes::NEG_INT,
            UnaryOp::Not => opcodes::NOT_INT,
        };
        self.op_ba(opcode, dst, src)
    }

    /// `neg-long` / `not-long vA, vB`
    pub fn unop_wide(&mut self, op: UnaryOp, dst: u8, src: u8) -> &mut Self {
        let opcode = match op {
            UnaryOp::Neg => opcodes::NEG_LONG,
            UnaryOp::Not => opcodes::NOT_LONG,
        };
        self.op_ba(opcode, dst, src)
    }

    fn invoke(&mut self, opcode: u8, method_idx: u16, args: &[u8]) -> &mut Self {
        if args.len() > 5 {
            self.errors
                .push(format!("invoke with {} arguments exceeds 5", args.len()));
            return self;
        }
        let mut regs = [0u16; 5];
        for (slot, &arg) in regs.iter_mut().zip(args) {
            *slot = self.nibble(arg);
        }
        let first = u16::from(opcode) | ((args.len() as u16) << 12) | (regs[4] << 8);
        let packed = regs[0] | (regs[1] << 4) | (regs[2] << 8) | (regs[3] << 12);
        self.raw(first).raw(method_idx).raw(packed)
    }

    /// `invoke-static {args}, method@method_idx`
    pub fn invoke_static(&mut self, method_idx: u16, args: &[u8]) -> &mut Self {
        self.invoke(opcodes::INVOKE_STATIC, method_idx, args)
    }

    /// `invoke-direct {args}, method@method_idx`
    pub fn invoke_direct(&mut self, method_idx: u16, args: &[u8]) -> &mut Self {
        self.invoke(opcodes::INVOKE_DIRECT, method_idx, args)
    }

    fn branch(&mut self, first: u16, label: &str) -> &mut Self {
        self.fixups.push(Fixup {
            insn_pc: self.pc(),
            label: label.to_string(),
            kind: FixupKind::Offset16,
        });
        self.raw(first).raw(0)
    }

    /// `goto/16 label`
    pub fn goto(&mut self, label: &str) -> &mut Self {
        self.branch(u16::from(opcodes::GOTO_16), label)
    }

    /// `if-<cmp> vA, vB, label`
    pub fn if_test(&mut self, cmp: Comparison, a: u8, b: u8, label: &str) -> &mut Self {
        let a = self.nibble(a);
        let b = self.nibble(b);
        let first = u16::from(opcodes::IF_EQ + comparison_index(cmp)) | (a << 8) | (b << 12);
        self.branch(first, label)
    }

    /// `if-<cmp>z vAA, label`
    pub fn if_testz(&mut self, cmp: Comparison, a: u8, label: &str) -> &mut Self {
        let first = u16::from(opcodes::IF_EQZ + comparison_index(cmp)) | (u16::from(a) << 8);
        self.branch(first, label)
    }

    /// Resolves labels and returns the code units.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for unknown labels, out-of-range
    /// offsets or operands recorded while assembling.
    pub fn finish(&self) -> Result<Vec<u16>> {
        if let Some(first) = self.errors.first() {
            return Err(malformed_error!("{}", first));
        }

        let mut units = self.units.clone();
        for fixup in &self.fixups {
            let Some(&target) = self.labels.get(&fixup.label) else {
                return Err(malformed_error!("Unknown label '{}'", fixup.label));
            };
            let offset = target as i64 - fixup.insn_pc as i64;
            match fixup.kind {
                FixupKind::Offset16 => {
                    let offset = i16::try_from(offset).map_err(|_| {
                        malformed_error!("Branch to '{}' out of range", fixup.label)
                    })?;
                    units[fixup.insn_pc + 1] = offset as u16;
                }
            }
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::{decode, decode_all, DexInstruction};

    #[test]
    fn branches_resolve_relative_to_instruction() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.label("top").nop().goto("top");
        let code = asm.finish()?;
        let (insn, _) = decode(&code, 1)?;
        assert_eq!(insn, DexInstruction::Goto { offset: -1 });
        Ok(())
    }

    #[test]
    fn literal_forms_round_trip_through_decoder() -> Result<()> {
        let mut asm = DexAssembler::new();
        asm.binop_lit8(BinaryOp::Sub, 2, 3, -5)
            .binop_lit16(BinaryOp::Mul, 1, 4, 300);
        let decoded = decode_all(&asm.finish()?)?;
        assert_eq!(
            decoded[0].1,
            DexInstruction::BinaryLiteral {
                op: BinaryOp::Sub,
                dst: 2,
                src: 3,
                literal: -5,
                reverse: true
            }
        );
        assert_eq!(
            decoded[1].1,
            DexInstruction::BinaryLiteral {
                op: BinaryOp::Mul,
                dst: 1,
                src: 4,
                literal: 300,
                reverse: false
            }
        );
        Ok(())
    }

    #[test]
    fn unknown_label_is_reported() {
        let mut asm = DexAssembler::new();
        asm.goto("nowhere");
        assert!(asm.finish().is_err());
    }

    #[test]
    fn wide_nibble_register_is_reported() {
        let mut asm = DexAssembler::new();
        asm.mov(16, 0);
        assert!(asm.finish().is_err());
    }
}
