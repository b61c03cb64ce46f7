// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0


#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
#![deny(unsafe_code)]

//! # methodc
//!
//! A per-method ahead-of-time compiler for Dalvik bytecode. Each method is
//! either compiled by a full optimizing pipeline (SSA construction, a fixed
//! sequence of optimizations, linear scan register allocation) or by a
//! baseline generator that keeps every virtual register in its frame slot.
//! Methods the compiler can not handle are left to the interpreter.
//!
//! ## Features
//!
//! - **Two code paths** - optimized code with stack maps, baseline code with
//!   interpreter-style vmap and GC maps
//! - **Four targets** - `thumb2`, `arm64`, `x86` and `x86_64`
//! - **Shareable** - one compiler serves any number of worker threads
//! - **Diagnostics** - per-pass graph dumps filtered by method name
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use methodc::prelude::*;
//!
//! let mut asm = DexAssembler::new();
//! asm.binop_2addr(BinaryOp::Add, 0, 1).return_value(0);
//!
//! let method = MethodDescriptor::new(
//!     0,
//!     "Main.add",
//!     "III",
//!     AccessFlags::STATIC,
//!     CodeItem {
//!         registers_size: 2,
//!         ins_size: 2,
//!         insns: asm.finish()?,
//!         tries: Vec::new(),
//!     },
//! );
//!
//! let options = CompilerOptions::default().with_instruction_set(Architecture::Arm64);
//! let compiler = OptimizingCompiler::with_defaults(options);
//! if let Some(artifact) = compiler.compile(&method) {
//!     println!("{} bytes, frame {}", artifact.code().len(), artifact.frame_size());
//! }
//! # Ok::<(), methodc::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`bytecode`] - method descriptors, instruction decoding, a test assembler
//! - [`ir`] - the graph, its instructions and the graph builder
//! - [`analysis`] - dominance, SSA construction, loops and liveness
//! - [`compiler`] - optimization passes, their checker and the pipeline
//! - [`backend`] - register allocation, assemblers and code generation
//! - [`driver`] - options, the eligibility gate, path selection and statistics
//! - [`artifact`] - the compiled output
//!
//! ## Error Handling
//!
//! Compilation does not return errors: [`OptimizingCompiler::compile`]
//! returns `None` for methods it declines. [`Error`] is produced by the
//! pieces underneath, mostly by graph building:
//!
//! ```rust,no_run
//! use methodc::{ir::{DexGraphBuilder, GraphBuilder}, Error, MethodDescriptor};
//!
//! # fn example(method: &MethodDescriptor) {
//! match DexGraphBuilder.build(method) {
//!     Ok(graph) => println!("{} blocks", graph.block_count()),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed: {message}"),
//!     Err(e) => println!("Other error: {e}"),
//! }
//! # }
//! ```
//!
//! Broken internal invariants, such as a pass leaving the graph
//! inconsistent, panic.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use methodc::prelude::*;
///
/// let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
/// println!("{}", compiler.report());
/// ```
pub mod prelude;

pub mod analysis;
pub mod artifact;
pub mod backend;
pub mod bytecode;
pub mod compiler;
pub mod driver;
pub mod ir;
pub mod utils;

/// `methodc` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use artifact::{ArtifactLayout, CompiledArtifact};
pub use backend::Architecture;
pub use bytecode::MethodDescriptor;
pub use driver::{CompilationPath, CompilerFilter, CompilerOptions, OptimizingCompiler};
pub use error::Error;
