//! # methodc Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the methodc library. Import this module to get quick access to everything needed
//! to describe a method, compile it and inspect the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all methodc operations
pub use crate::Error;

/// The result type used throughout methodc
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The compiler and its configuration
pub use crate::driver::{
    CompilationPath, CompilerFilter, CompilerOptions, OptimizingCompiler, StatsSnapshot,
    VisualizerOptions, VisualizerOutput,
};

/// Compiled output
pub use crate::artifact::{ArtifactLayout, CompiledArtifact};

// ================================================================================================
// Method Input
// ================================================================================================

/// Method descriptors and the bytecode assembler
pub use crate::bytecode::{AccessFlags, CodeItem, DexAssembler, MethodDescriptor, TryItem};

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// Graph, operations and the builder contract
pub use crate::ir::{
    BinaryOp, BlockId, Comparison, DataType, DexGraphBuilder, Graph, GraphBuilder, InsnId,
    UnaryOp,
};

// ================================================================================================
// Backend
// ================================================================================================

/// Targets and the register allocator contract
pub use crate::backend::{Architecture, LinearScanAllocator, RegisterAllocator};
