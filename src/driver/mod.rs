//! Compilation driver: configuration, the eligibility gate, path selection
//! and statistics.
//!
//! [`OptimizingCompiler`] is the entry point. It owns a [`CompilerOptions`]
//! value, shares [`CompilationStats`] between all threads compiling with it
//! and optionally writes graph dumps through a [`Visualizer`].

mod compiler;
mod eligibility;
mod options;
mod stats;
mod visualizer;

pub use compiler::{CompilationPath, OptimizingCompiler};
pub use eligibility::{Eligibility, EligibilityGate, IneligibleReason};
pub use options::{CompilerFilter, CompilerOptions, VisualizerOptions, VisualizerOutput};
pub use stats::{CompilationStats, StatsSnapshot};
pub use visualizer::Visualizer;
