//! The instruction-level interface code generation is written against.
//!
//! Each target implements [`Assembler`] over a [`CodeBuffer`]. Branches are
//! emitted with fixed-width placeholders and recorded as fixups; once every
//! label is bound, [`Assembler::finalize`] patches them in place.

use crate::{
    backend::{codegen::FrameLayout, runtime::QuickEntrypoint, Architecture, Register, RegisterFile},
    ir::{BinaryOp, Comparison, DataType, UnaryOp},
};

/// Width of a register operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSize {
    /// 32 bits
    Word,
    /// 64 bits
    DoubleWord,
}

impl OperandSize {
    /// Operation width for values of type `ty`. References are 32-bit.
    #[must_use]
    pub fn of(ty: DataType) -> Self {
        if ty.is_wide() {
            OperandSize::DoubleWord
        } else {
            OperandSize::Word
        }
    }

    /// Width of a pointer on a target with `pointer_size`-byte pointers.
    #[must_use]
    pub fn pointer(pointer_size: u32) -> Self {
        if pointer_size == 8 {
            OperandSize::DoubleWord
        } else {
            OperandSize::Word
        }
    }

    /// `true` for 64-bit operations.
    #[must_use]
    pub fn is_double(self) -> bool {
        self == OperandSize::DoubleWord
    }
}

/// A branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Branch encodings needing a patch once their target is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Unconditional branch
    Jump,
    /// Conditional branch
    Conditional,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Fixup {
    pub(crate) at: usize,
    pub(crate) label: Label,
    pub(crate) kind: BranchKind,
}

/// Growing code with labels and pending branch fixups.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl CodeBuffer {
    /// Current size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` before anything was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Emitted bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Appends one byte.
    pub fn emit_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Appends a little-endian half-word.
    pub fn emit_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a little-endian word.
    pub fn emit_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a little-endian signed word.
    pub fn emit_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a little-endian double word.
    pub fn emit_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Creates an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current position.
    ///
    /// # Panics
    ///
    /// Panics if the label is already bound.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0];
        assert!(slot.is_none(), "label bound twice");
        *slot = Some(self.bytes.len());
    }

    /// Records a branch at `at` to be patched with the position of `label`.
    pub fn add_fixup(&mut self, at: usize, label: Label, kind: BranchKind) {
        self.fixups.push(Fixup { at, label, kind });
    }

    /// Patches every fixup with `patch(bytes, at, target, kind)` and returns
    /// the code.
    ///
    /// # Panics
    ///
    /// Panics if a branch targets a label that was never bound.
    pub(crate) fn resolve(
        &mut self,
        patch: impl Fn(&mut [u8], usize, usize, BranchKind),
    ) -> Vec<u8> {
        for fixup in std::mem::take(&mut self.fixups) {
            let Some(target) = self.labels[fixup.label.0] else {
                panic!("branch at {:#x} to an unbound label", fixup.at);
            };
            patch(&mut self.bytes, fixup.at, target, fixup.kind);
        }
        std::mem::take(&mut self.bytes)
    }
}

/// Reads a little-endian word at `at`.
pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Writes a little-endian word at `at`.
pub(crate) fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Target instruction encoder.
///
/// Arithmetic is two-address (`dst = dst op src`); code generation routes
/// operands through the scratch registers of [`Assembler::REGISTERS`], so
/// the encoders never see overlapping operands they cannot handle.
pub trait Assembler: Default + Send {
    /// The target.
    const ARCHITECTURE: Architecture;
    /// The target's register conventions.
    const REGISTERS: &'static RegisterFile;

    /// The underlying buffer.
    fn code(&mut self) -> &mut CodeBuffer;

    /// Patches one branch once its target is known.
    fn patch_branch(bytes: &mut [u8], at: usize, target: usize, kind: BranchKind);

    /// Current code offset.
    fn offset(&mut self) -> usize {
        self.code().len()
    }

    /// Creates an unbound label.
    fn new_label(&mut self) -> Label {
        self.code().new_label()
    }

    /// Binds `label` here.
    fn bind(&mut self, label: Label) {
        self.code().bind(label);
    }

    /// Resolves all branches and returns the finished code.
    fn finalize(&mut self) -> Vec<u8> {
        self.code().resolve(Self::patch_branch)
    }

    /// Saves callee-saved registers, allocates the frame and stores the
    /// current method at the bottom of it.
    fn build_frame(&mut self, frame: &FrameLayout);

    /// Tears the frame down and returns to the caller.
    fn remove_frame_and_return(&mut self, frame: &FrameLayout);

    /// `dst = src`
    fn move_register(&mut self, dst: Register, src: Register, size: OperandSize);

    /// `dst = value`
    fn load_immediate(&mut self, dst: Register, value: i64, size: OperandSize);

    /// `dst = [base + offset]`
    fn load(&mut self, dst: Register, base: Register, offset: i32, size: OperandSize);

    /// `[base + offset] = src`
    fn store(&mut self, src: Register, base: Register, offset: i32, size: OperandSize);

    /// `dst = dst op src`
    fn binary(&mut self, op: BinaryOp, dst: Register, src: Register, size: OperandSize);

    /// `reg = op reg`
    fn unary(&mut self, op: UnaryOp, reg: Register, size: OperandSize);

    /// Sets the flags from `lhs - rhs`.
    fn compare(&mut self, lhs: Register, rhs: Register, size: OperandSize);

    /// Branches to `target` if the last comparison satisfied `cmp`.
    fn branch_if(&mut self, cmp: Comparison, target: Label);

    /// Branches to `target`.
    fn jump(&mut self, target: Label);

    /// `dst = 1` if the last comparison satisfied `cmp`, else `0`.
    fn set_if(&mut self, cmp: Comparison, dst: Register);

    /// Calls the compiled code of the method pointed to by `method`, which
    /// is also passed in the method register.
    fn call_method(&mut self, method: Register);

    /// Calls a runtime helper through the thread's entrypoint table.
    fn call_runtime(&mut self, entrypoint: QuickEntrypoint);

    /// Calls the suspend helper if the thread has a pending request.
    fn poll_suspend(&mut self);

    /// Throws if `reg` holds null.
    fn check_null(&mut self, reg: Register);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixups_are_patched_with_bound_positions() {
        let mut code = CodeBuffer::default();
        let label = code.new_label();
        code.emit_u32(0);
        code.add_fixup(0, label, BranchKind::Jump);
        code.emit_u32(0xffff_ffff);
        code.bind(label);

        let bytes = code.resolve(|bytes, at, target, _| write_u32(bytes, at, target as u32));
        assert_eq!(read_u32(&bytes, 0), 8);
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    #[should_panic(expected = "unbound label")]
    fn unbound_labels_are_bugs() {
        let mut code = CodeBuffer::default();
        let label = code.new_label();
        code.add_fixup(0, label, BranchKind::Conditional);
        code.emit_u32(0);
        let _ = code.resolve(|_, _, _, _| {});
    }

    #[test]
    fn sizes_follow_types() {
        assert_eq!(OperandSize::of(DataType::Long), OperandSize::DoubleWord);
        assert_eq!(OperandSize::of(DataType::Reference), OperandSize::Word);
        assert_eq!(OperandSize::pointer(8), OperandSize::DoubleWord);
    }
}
