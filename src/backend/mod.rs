//! Target-specific code generation.
//!
//! # Key Components
//!
//! - [`Architecture`] and [`RegisterFile`] - supported targets and their register conventions
//! - [`RegisterAllocator`] / [`LinearScanAllocator`] - maps live intervals to [`Location`]s
//! - [`codegen::CodeEmitter`] - lowers graphs to bytes and builds the metadata tables
//! - [`runtime`] - runtime offsets and helpers generated code relies on

pub(crate) mod arch;
pub mod codegen;
mod location;
mod regalloc;
pub mod runtime;

pub use arch::{Architecture, Register, RegisterFile};
pub use location::Location;
pub use regalloc::{Allocation, AllocationFailure, LinearScanAllocator, RegisterAllocator};
