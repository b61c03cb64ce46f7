//! Analyses over the IR.
//!
//! These run in a fixed order on the optimized path:
//!
//! 1. [`build_dominator_tree`] - once, on the frozen graph
//! 2. [`transform_to_ssa`] - phi placement and renaming
//! 3. [`find_natural_loops`] - loop headers and bodies
//! 4. [`SsaLivenessAnalysis`] - live intervals for register allocation

mod dominance;
mod liveness;
mod loops;
mod ssa;

pub use dominance::build_dominator_tree;
pub use liveness::{LiveInterval, LiveRange, LivenessResult, RegisterClass, SsaLivenessAnalysis};
pub use loops::find_natural_loops;
pub use ssa::transform_to_ssa;
