//! The per-method compilation driver.
//!
//! ```text
//! method --gate--> ineligible (None)
//!    |
//!  build --fails--> None
//!    |
//!  path decision --> optimized: dominance, ssa, loops, passes, prepare,
//!    |                          liveness, allocation, emission, stack maps
//!    +-------------> baseline:  emission, vmap table, native gc map
//! ```
//!
//! The optimized path is taken when the filter allows optimization, the
//! method has no try blocks and the register allocator accepts the built
//! graph. Anything else that was built is compiled by the baseline generator.

use std::time::Instant;

use rayon::prelude::*;
use strum::Display;
use tracing::{debug, info, trace, warn};

use crate::{
    analysis::{build_dominator_tree, find_natural_loops, transform_to_ssa, SsaLivenessAnalysis},
    artifact::CompiledArtifact,
    backend::{
        codegen::{CodeEmitter, SourceMap},
        Architecture, LinearScanAllocator, RegisterAllocator,
    },
    bytecode::MethodDescriptor,
    compiler::{passes::PrepareForRegisterAllocation, Optimization, OptimizationPipeline},
    driver::{
        CompilationStats, CompilerOptions, Eligibility, EligibilityGate, StatsSnapshot, Visualizer,
    },
    ir::{DexGraphBuilder, Graph, GraphBuilder},
};

/// Which code generator compiles a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CompilationPath {
    /// SSA optimizations, register allocation and stack maps.
    #[strum(serialize = "optimized")]
    Optimized,
    /// Direct translation of the built graph with interpreter-style frames.
    #[strum(serialize = "baseline")]
    Baseline,
}

/// Compiles methods to native code.
///
/// One compiler is shared by every worker thread; per-method state lives on
/// the compiling thread only. Dropping the compiler logs how many methods
/// each path compiled.
///
/// # Panics
///
/// [`OptimizingCompiler::compile`] panics when an optimization breaks the
/// graph or the register allocator fails after accepting the graph. With
/// [`CompilerOptions::enforce_register_allocation`] it also panics for marked
/// methods that miss the optimized path.
///
/// # Examples
///
/// ```rust,no_run
/// use methodc::{CompilerOptions, MethodDescriptor, OptimizingCompiler};
///
/// # fn example(methods: &[MethodDescriptor]) {
/// let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
/// for artifact in compiler.compile_all(methods).into_iter().flatten() {
///     println!("{} bytes", artifact.code().len());
/// }
/// println!("{}", compiler.report());
/// # }
/// ```
pub struct OptimizingCompiler {
    options: CompilerOptions,
    gate: EligibilityGate,
    builder: Box<dyn GraphBuilder>,
    allocator: Box<dyn RegisterAllocator>,
    stats: CompilationStats,
    visualizer: Visualizer,
}

impl OptimizingCompiler {
    /// Creates a compiler using `builder` to build graphs and `allocator`
    /// for the optimized path.
    pub fn new(
        options: CompilerOptions,
        builder: impl GraphBuilder + 'static,
        allocator: impl RegisterAllocator + 'static,
    ) -> Self {
        let visualizer = Visualizer::new(options.visualizer.as_ref());
        Self {
            gate: EligibilityGate::new(&options),
            options,
            builder: Box::new(builder),
            allocator: Box::new(allocator),
            stats: CompilationStats::new(),
            visualizer,
        }
    }

    /// Creates a compiler with the Dalvik graph builder and the linear scan
    /// allocator.
    #[must_use]
    pub fn with_defaults(options: CompilerOptions) -> Self {
        Self::new(options, DexGraphBuilder, LinearScanAllocator)
    }

    /// The compiler's configuration.
    #[must_use]
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Human readable summary of the counters.
    #[must_use]
    pub fn report(&self) -> String {
        self.stats.snapshot().to_string()
    }

    /// Graph dumps kept in memory.
    #[must_use]
    pub fn visualizer(&self) -> &Visualizer {
        &self.visualizer
    }

    /// Compiles `method`, `None` if it is left to the interpreter.
    #[must_use]
    pub fn compile(&self, method: &MethodDescriptor) -> Option<CompiledArtifact> {
        let start = Instant::now();
        let arch = match self.gate.evaluate(self.options.instruction_set, method) {
            Eligibility::Eligible(arch) => arch,
            Eligibility::Ineligible(reason) => {
                debug!(method = %method.name, %reason, "not compiled");
                return None;
            }
        };

        let graph = match self.builder.build(method) {
            Ok(graph) => graph,
            Err(error) => {
                if self.is_marked(method, &self.options.must_compile_marker) {
                    panic!("could not build the graph of {}: {error}", method.name);
                }
                debug!(method = %method.name, %error, "graph building failed");
                return None;
            }
        };

        let Some(emitter) = CodeEmitter::create(arch) else {
            debug!(method = %method.name, %arch, "no code generator");
            return None;
        };
        self.dump(method, "builder", &graph);

        let path = self.choose_path(method, arch, &graph);
        debug!(method = %method.name, %arch, %path, "compiling");
        let artifact = match path {
            CompilationPath::Optimized => self.compile_optimized(method, graph, emitter),
            CompilationPath::Baseline => self.compile_baseline(method, graph, emitter),
        };
        self.stats.record(path);

        let elapsed = start.elapsed();
        if elapsed > self.options.warn_threshold {
            warn!(method = %method.name, ?elapsed, "slow compilation");
        }
        Some(artifact)
    }

    /// Compiles `methods` on the rayon thread pool. Results are in input
    /// order.
    #[must_use]
    pub fn compile_all(&self, methods: &[MethodDescriptor]) -> Vec<Option<CompiledArtifact>> {
        methods.par_iter().map(|method| self.compile(method)).collect()
    }

    fn is_marked(&self, method: &MethodDescriptor, marker: &str) -> bool {
        self.options.enforce_register_allocation && method.name.contains(marker)
    }

    fn choose_path(&self, method: &MethodDescriptor, arch: Architecture, graph: &Graph) -> CompilationPath {
        let can_allocate = self.allocator.can_allocate(graph, arch);
        if self.options.optimization_enabled() && !method.has_try_blocks() && can_allocate {
            return CompilationPath::Optimized;
        }
        if !can_allocate
            && self.allocator.supports(arch)
            && self.is_marked(method, &self.options.must_allocate_marker)
        {
            panic!("could not allocate registers for {} on {arch}", method.name);
        }
        CompilationPath::Baseline
    }

    fn compile_optimized(
        &self,
        method: &MethodDescriptor,
        mut graph: Graph,
        mut emitter: CodeEmitter,
    ) -> CompiledArtifact {
        let arch = emitter.architecture();
        build_dominator_tree(&mut graph);
        transform_to_ssa(&mut graph);
        self.dump(method, "ssa", &graph);
        find_natural_loops(&mut graph);

        OptimizationPipeline::standard().run(&mut graph, |pass, graph| self.dump(method, pass, graph));

        let mut prepare = PrepareForRegisterAllocation::new();
        prepare.run(&mut graph);
        trace!(pass = prepare.name(), "ran");

        let liveness = SsaLivenessAnalysis::analyze(&graph);
        self.dump(method, "liveness", &graph);

        let allocation = match self.allocator.allocate(&liveness, arch) {
            Ok(allocation) => allocation,
            Err(failure) => panic!(
                "register allocation of {} failed after the graph was accepted: {failure}",
                method.name
            ),
        };
        self.dump(method, "register", &graph);

        let code = emitter.compile_optimized(&graph, &liveness, &allocation);
        let mut source_map = SourceMap::default();
        let mapping_table = emitter
            .build_mapping_table(self.options.include_debug_symbols.then_some(&mut source_map));
        let stack_map_table = emitter.build_stack_maps();

        CompiledArtifact::optimized(
            arch,
            code,
            emitter.frame_size(),
            emitter.core_spill_mask(),
            mapping_table,
            stack_map_table,
        )
    }

    fn compile_baseline(
        &self,
        method: &MethodDescriptor,
        mut graph: Graph,
        mut emitter: CodeEmitter,
    ) -> CompiledArtifact {
        let arch = emitter.architecture();
        let code = emitter.compile_baseline(&graph);

        if !method.has_try_blocks() && self.options.optimization_enabled() {
            self.run_coverage_analyses(method, &mut graph);
        }

        let mut source_map = SourceMap::default();
        let mapping_table = emitter
            .build_mapping_table(self.options.include_debug_symbols.then_some(&mut source_map));
        let vmap_table = emitter.build_vmap_table();
        let native_gc_map = emitter.build_native_gc_map(method);

        CompiledArtifact::baseline(
            arch,
            code,
            emitter.frame_size(),
            emitter.core_spill_mask(),
            mapping_table,
            vmap_table,
            native_gc_map,
        )
    }

    /// Exercises the SSA analyses on a baseline-compiled method. Nothing
    /// computed here reaches the artifact.
    fn run_coverage_analyses(&self, method: &MethodDescriptor, graph: &mut Graph) {
        build_dominator_tree(graph);
        transform_to_ssa(graph);
        self.dump(method, "ssa", graph);
        find_natural_loops(graph);
        OptimizationPipeline::coverage().run(graph, |_, _| {});
        let liveness = SsaLivenessAnalysis::analyze(graph);
        trace!(method = %method.name, intervals = liveness.intervals().len(), "coverage liveness");
        self.dump(method, "liveness", graph);
    }

    fn dump(&self, method: &MethodDescriptor, pass: &str, graph: &Graph) {
        self.visualizer.dump(&method.name, pass, graph);
    }
}

impl Drop for OptimizingCompiler {
    fn drop(&mut self) {
        info!("{}", self.report());
    }
}

impl std::fmt::Debug for OptimizingCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizingCompiler")
            .field("options", &self.options)
            .field("stats", &self.stats.snapshot())
            .field("visualizer", &self.visualizer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::LivenessResult,
        backend::{Allocation, AllocationFailure},
        bytecode::{AccessFlags, CodeItem, DexAssembler, TryItem},
        driver::{CompilerFilter, VisualizerOptions},
        ir::{BinaryOp, Comparison},
        Result,
    };

    fn add_method(name: &str) -> Result<MethodDescriptor> {
        let mut asm = DexAssembler::new();
        asm.binop_2addr(BinaryOp::Add, 0, 1).return_value(0);
        Ok(MethodDescriptor::new(
            1,
            name,
            "III",
            AccessFlags::STATIC,
            CodeItem {
                registers_size: 2,
                ins_size: 2,
                insns: asm.finish()?,
                tries: Vec::new(),
            },
        ))
    }

    struct RejectingAllocator;

    impl RegisterAllocator for RejectingAllocator {
        fn supports(&self, _arch: Architecture) -> bool {
            true
        }

        fn can_allocate(&self, _graph: &Graph, _arch: Architecture) -> bool {
            false
        }

        fn allocate(
            &self,
            _liveness: &LivenessResult,
            arch: Architecture,
        ) -> std::result::Result<Allocation, AllocationFailure> {
            Err(AllocationFailure::UnsupportedArchitecture(arch))
        }
    }

    #[test]
    fn simple_method_is_optimized() -> Result<()> {
        let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
        let artifact = compiler.compile(&add_method("Main.add")?);
        assert!(artifact.is_some_and(|artifact| artifact.is_optimized()));
        assert_eq!(compiler.stats().optimized, 1);
        Ok(())
    }

    #[test]
    fn try_blocks_force_baseline() -> Result<()> {
        let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
        let mut method = add_method("Main.add")?;
        method.code.tries.push(TryItem {
            start_addr: 0,
            insn_count: 1,
            handler_off: 0,
        });
        let artifact = compiler.compile(&method);
        assert!(artifact.is_some_and(|artifact| artifact.vmap_table().is_some()));
        assert_eq!(compiler.stats().baseline, 1);
        Ok(())
    }

    #[test]
    fn time_filter_disables_the_optimized_path() -> Result<()> {
        let options = CompilerOptions::default().with_compiler_filter(CompilerFilter::Time);
        let compiler = OptimizingCompiler::with_defaults(options);
        let artifact = compiler.compile(&add_method("Main.add")?);
        assert!(artifact.is_some_and(|artifact| !artifact.is_optimized()));
        Ok(())
    }

    #[test]
    fn coverage_analyses_leave_baseline_output_unchanged() -> Result<()> {
        // long r = 1; while (n != 0) { r *= x; n -= 1; } return r
        let mut asm = DexAssembler::new();
        asm.const_wide16(0, 1)
            .label("head")
            .if_testz(Comparison::Eq, 4, "done")
            .binop_wide(BinaryOp::Mul, 0, 0, 2)
            .binop_lit8(BinaryOp::Add, 4, 4, -1)
            .goto("head")
            .label("done")
            .return_wide(0);
        let method = MethodDescriptor::new(
            1,
            "Main.pow",
            "JJI",
            AccessFlags::STATIC,
            CodeItem {
                registers_size: 5,
                ins_size: 3,
                insns: asm.finish()?,
                tries: Vec::new(),
            },
        );

        for arch in [Architecture::X86, Architecture::Thumb2] {
            let speed = OptimizingCompiler::with_defaults(CompilerOptions::default().with_instruction_set(arch));
            let time = OptimizingCompiler::with_defaults(
                CompilerOptions::default()
                    .with_instruction_set(arch)
                    .with_compiler_filter(CompilerFilter::Time),
            );
            let analyzed = speed.compile(&method);
            let plain = time.compile(&method);
            assert!(analyzed.as_ref().is_some_and(|artifact| !artifact.is_optimized()), "{arch}");
            assert_eq!(analyzed, plain, "{arch}");
        }
        Ok(())
    }

    #[test]
    fn rejected_graphs_fall_back_to_baseline() -> Result<()> {
        let compiler = OptimizingCompiler::new(CompilerOptions::default(), DexGraphBuilder, RejectingAllocator);
        let artifact = compiler.compile(&add_method("Main.$reg$add")?);
        assert!(artifact.is_some_and(|artifact| !artifact.is_optimized()));
        Ok(())
    }

    #[test]
    #[should_panic(expected = "could not allocate registers")]
    fn enforced_allocation_panics_for_marked_methods() {
        let options = CompilerOptions::default().with_enforced_register_allocation(true);
        let compiler = OptimizingCompiler::new(options, DexGraphBuilder, RejectingAllocator);
        let Ok(method) = add_method("Main.$reg$add") else {
            return;
        };
        let _ = compiler.compile(&method);
    }

    #[test]
    #[should_panic(expected = "could not build the graph")]
    fn enforced_build_panics_for_marked_methods() {
        let options = CompilerOptions::default().with_enforced_register_allocation(true);
        let compiler = OptimizingCompiler::with_defaults(options);
        let method = MethodDescriptor::new(0, "Main.$opt$empty", "V", AccessFlags::STATIC, CodeItem::default());
        let _ = compiler.compile(&method);
    }

    #[test]
    fn build_failures_are_ineligible() {
        let compiler = OptimizingCompiler::with_defaults(CompilerOptions::default());
        let method = MethodDescriptor::new(0, "Main.empty", "V", AccessFlags::STATIC, CodeItem::default());
        assert!(compiler.compile(&method).is_none());
        assert_eq!(compiler.stats().total, 0);
    }

    #[test]
    fn visualizer_sees_every_stage() -> Result<()> {
        let options = CompilerOptions::default().with_visualizer(VisualizerOptions::in_memory("add"));
        let compiler = OptimizingCompiler::with_defaults(options);
        let _ = compiler.compile(&add_method("Main.add")?);

        let dumps = compiler.visualizer().dumps();
        let passes: Vec<_> = ["builder", "ssa", "constant_folding", "global_value_numbering", "liveness", "register"]
            .into_iter()
            .filter(|pass| dumps.iter().any(|dump| dump.contains(&format!("pass \"{pass}\""))))
            .collect();
        assert_eq!(passes.len(), 6);
        assert_eq!(dumps.len(), 11);
        Ok(())
    }
}
