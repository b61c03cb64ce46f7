//! Method input: descriptors, the Dalvik instruction subset and a test assembler.
//!
//! # Key Components
//!
//! - [`MethodDescriptor`] - identity, signature and code of a method
//! - [`decode`] / [`decode_all`] - instruction decoding
//! - [`DexAssembler`] - label-aware builder for code units

mod assembler;
mod instruction;
mod method;

pub use assembler::DexAssembler;
pub use instruction::{decode, decode_all, opcodes, DexInstruction, InvokeKind, RegisterKind};
pub use method::{AccessFlags, CodeItem, MethodDescriptor, TryItem};
