//! Configuration of an [`OptimizingCompiler`](crate::OptimizingCompiler).
//!
//! Options are fixed when the compiler is created and consulted on every
//! compilation; nothing is read from the environment.

use std::{path::PathBuf, time::Duration};

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::backend::Architecture;

/// How much effort to spend on each method.
///
/// Every filter except [`CompilerFilter::Time`] allows the optimizing
/// pipeline; `Time` restricts compilation to the baseline generator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter, IntoStaticStr,
)]
pub enum CompilerFilter {
    /// Skip verification and compilation
    #[strum(serialize = "verify-none")]
    VerifyNone,
    /// Verify only, leave the method to the interpreter
    #[strum(serialize = "interpret-only")]
    InterpretOnly,
    /// Favor code size
    #[strum(serialize = "space")]
    Space,
    /// Balance size and speed
    #[strum(serialize = "balanced")]
    Balanced,
    /// Favor execution speed
    #[default]
    #[strum(serialize = "speed")]
    Speed,
    /// Compile everything regardless of size
    #[strum(serialize = "everything")]
    Everything,
    /// Favor compile time
    #[strum(serialize = "time")]
    Time,
}

impl CompilerFilter {
    /// `true` if methods may take the optimized path.
    #[must_use]
    pub fn allows_optimization(self) -> bool {
        self != CompilerFilter::Time
    }
}

/// Where graph dumps go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualizerOutput {
    /// Keep dumps in memory, see [`Visualizer::dumps`](crate::driver::Visualizer::dumps).
    Memory,
    /// Append dumps to a file, created or truncated when the compiler is built.
    File(PathBuf),
}

/// Diagnostics dump settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizerOptions {
    /// Only methods whose name contains this string are dumped. Empty
    /// matches every method.
    pub filter: String,
    /// Destination of the dumps.
    pub output: VisualizerOutput,
}

impl VisualizerOptions {
    /// Dumps methods matching `filter` into memory.
    #[must_use]
    pub fn in_memory(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            output: VisualizerOutput::Memory,
        }
    }

    /// Dumps methods matching `filter` into the file at `path`.
    #[must_use]
    pub fn to_file(filter: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            filter: filter.into(),
            output: VisualizerOutput::File(path.into()),
        }
    }
}

/// Configuration of the compiler.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Target instruction set (default: `x86_64`).
    pub instruction_set: Architecture,

    /// Compilation effort (default: `speed`).
    pub compiler_filter: CompilerFilter,

    /// Add per-instruction positions to mapping tables (default: false).
    pub include_debug_symbols: bool,

    /// The 32-bit ARM target uses the soft-float ABI, which the Thumb2
    /// generator does not implement (default: false).
    pub arm32_soft_float: bool,

    /// Testing-only: abort instead of falling back when a method tagged with
    /// one of the markers below misses the optimized path (default: false).
    pub enforce_register_allocation: bool,

    /// Name fragment of methods that must build (default: `$opt$`).
    pub must_compile_marker: String,

    /// Name fragment of methods that must be register allocated
    /// (default: `$reg$`).
    pub must_allocate_marker: String,

    /// Graph dumps, disabled by default.
    pub visualizer: Option<VisualizerOptions>,

    /// Compilations slower than this log a warning (default: 100 ms).
    pub warn_threshold: Duration,

    /// Methods with at least this many code units or registers are not
    /// compiled (default: `u16::MAX / 4`).
    pub pathological_limit: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            instruction_set: Architecture::X86_64,
            compiler_filter: CompilerFilter::default(),
            include_debug_symbols: false,
            arm32_soft_float: false,
            enforce_register_allocation: false,
            must_compile_marker: "$opt$".to_string(),
            must_allocate_marker: "$reg$".to_string(),
            visualizer: None,
            warn_threshold: Duration::from_millis(100),
            pathological_limit: usize::from(u16::MAX / 4),
        }
    }
}

impl CompilerOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target instruction set.
    #[must_use]
    pub fn with_instruction_set(mut self, instruction_set: Architecture) -> Self {
        self.instruction_set = instruction_set;
        self
    }

    /// Sets the compiler filter.
    #[must_use]
    pub fn with_compiler_filter(mut self, filter: CompilerFilter) -> Self {
        self.compiler_filter = filter;
        self
    }

    /// Enables or disables debug positions in mapping tables.
    #[must_use]
    pub fn with_debug_symbols(mut self, enabled: bool) -> Self {
        self.include_debug_symbols = enabled;
        self
    }

    /// Selects the soft-float ABI on 32-bit ARM.
    #[must_use]
    pub fn with_arm32_soft_float(mut self, enabled: bool) -> Self {
        self.arm32_soft_float = enabled;
        self
    }

    /// Turns the testing-only marker checks on or off.
    #[must_use]
    pub fn with_enforced_register_allocation(mut self, enabled: bool) -> Self {
        self.enforce_register_allocation = enabled;
        self
    }

    /// Enables graph dumps.
    #[must_use]
    pub fn with_visualizer(mut self, visualizer: VisualizerOptions) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    /// Sets the slow-compilation warning threshold.
    #[must_use]
    pub fn with_warn_threshold(mut self, threshold: Duration) -> Self {
        self.warn_threshold = threshold;
        self
    }

    /// Sets the size at which methods count as pathological.
    #[must_use]
    pub fn with_pathological_limit(mut self, limit: usize) -> Self {
        self.pathological_limit = limit;
        self
    }

    /// `true` if the filter lets methods take the optimized path.
    #[must_use]
    pub fn optimization_enabled(&self) -> bool {
        self.compiler_filter.allows_optimization()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn filters_parse_from_their_command_line_names() {
        assert_eq!(CompilerFilter::from_str("interpret-only").ok(), Some(CompilerFilter::InterpretOnly));
        assert_eq!(CompilerFilter::from_str("time").ok(), Some(CompilerFilter::Time));
        assert_eq!(CompilerFilter::Everything.to_string(), "everything");
        assert!(CompilerFilter::from_str("fast").is_err());
    }

    #[test]
    fn only_time_disables_optimization() {
        let options = CompilerOptions::new();
        assert!(options.optimization_enabled());
        assert!(!options
            .with_compiler_filter(CompilerFilter::Time)
            .optimization_enabled());
    }

    #[test]
    fn defaults_keep_the_safety_valve_off() {
        let options = CompilerOptions::default();
        assert!(!options.enforce_register_allocation);
        assert_eq!(options.must_allocate_marker, "$reg$");
        assert_eq!(options.pathological_limit, 16383);
        assert_eq!(options.warn_threshold, Duration::from_millis(100));
    }
}
