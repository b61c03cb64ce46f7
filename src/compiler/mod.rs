//! Graph optimizations and their validation.
//!
//! The optimized path runs [`OptimizationPipeline::standard`] over a graph
//! in SSA form and then [`passes::PrepareForRegisterAllocation`]:
//!
//! ```text
//! SSA graph
//!   │  dead_code_elimination
//!   │  constant_folding
//!   │  redundant_phi_elimination
//!   │  dead_phi_elimination          each pass: run → check → dump
//!   │  instruction_simplifier
//!   │  global_value_numbering
//!   │  instruction_simplifier_after_gvn
//!   ▼
//! prepare_for_register_allocation → liveness
//! ```
//!
//! Every pass is checked by [`SsaChecker`] after it ran. A failure panics:
//! it means a pass produced an inconsistent graph.

mod checker;
mod pass;
pub mod passes;
mod pipeline;

pub use checker::{CheckFailure, SsaChecker};
pub use pass::Optimization;
pub use pipeline::OptimizationPipeline;
