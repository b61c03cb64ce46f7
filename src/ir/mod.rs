//! Intermediate representation.
//!
//! A method is represented as a [`Graph`] of [`BasicBlock`]s holding typed
//! [`Instruction`]s. The graph starts out in a register-based form built by a
//! [`GraphBuilder`], where virtual registers are read and written through
//! `LoadLocal`/`StoreLocal`, and is later rewritten into SSA form by
//! [`crate::analysis::transform_to_ssa`].
//!
//! # Key Components
//!
//! - [`Graph`] - flat tables of blocks and instructions plus dominance facts
//! - [`InstructionKind`] - the closed set of operations
//! - [`Environment`] - per-safepoint deoptimization state
//! - [`DexGraphBuilder`] - builder for the supported bytecode subset

mod block;
mod builder;
mod dump;
mod graph;
mod ids;
mod instruction;
mod types;

pub use block::{BasicBlock, LoopInformation};
pub use builder::{DexGraphBuilder, GraphBuilder};
pub use graph::{Dominance, Graph};
pub use ids::{BlockId, InsnId};
pub use instruction::{Environment, Instruction, InstructionKind};
pub use types::{BinaryOp, Comparison, DataType, UnaryOp};
