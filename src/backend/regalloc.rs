//! Register allocation.
//!
//! [`LinearScanAllocator`] walks live intervals in order of their start
//! position and keeps the set of intervals currently holding a register:
//!
//! ```text
//! for each interval by start:
//!     expire active intervals ending at or before its start
//!     take a free register of the right kind
//!     otherwise spill whichever of (current, furthest-ending active) ends last
//! ```
//!
//! Every value receives one location for its whole lifetime. Values that
//! must survive a call are restricted to callee-saved registers; all others
//! prefer caller-saved ones so callee saves stay unused as long as possible.

use thiserror::Error;
use tracing::trace;

use crate::{
    analysis::{LiveInterval, LivenessResult, RegisterClass},
    backend::{Architecture, Location, Register, RegisterFile},
    ir::{DataType, Graph, InsnId},
};

/// Why an allocation could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationFailure {
    /// No register file is known for the target.
    #[error("no register allocation support for {0}")]
    UnsupportedArchitecture(Architecture),

    /// A value needs a register class the allocator does not handle.
    #[error("{value} of type {ty} can not be allocated on {arch}")]
    UnsupportedValue {
        /// The value
        value: InsnId,
        /// Its type
        ty: DataType,
        /// The target
        arch: Architecture,
    },
}

/// Result of register allocation: one location per value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    locations: Vec<Location>,
    spill_slots: u32,
    used_callee_saves: u32,
}

impl Allocation {
    /// Location of `value`, [`Location::Unallocated`] for values without an
    /// interval.
    #[must_use]
    pub fn location(&self, value: InsnId) -> Location {
        self.locations
            .get(value.index())
            .copied()
            .unwrap_or_default()
    }

    /// Locations indexed by instruction id.
    #[must_use]
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Number of frame slots holding spilled values.
    #[must_use]
    pub fn spill_slots(&self) -> u32 {
        self.spill_slots
    }

    /// Mask of callee-saved registers handed out.
    #[must_use]
    pub fn used_callee_saves(&self) -> u32 {
        self.used_callee_saves
    }
}

/// Assigns a location to every live interval.
pub trait RegisterAllocator: Send + Sync {
    /// `true` if the allocator knows the target's registers.
    fn supports(&self, arch: Architecture) -> bool;

    /// `true` if every value of the built graph can be allocated on `arch`.
    fn can_allocate(&self, graph: &Graph, arch: Architecture) -> bool;

    /// Allocates the intervals in `liveness`.
    ///
    /// # Errors
    ///
    /// Returns an [`AllocationFailure`] for unsupported targets or values.
    fn allocate(
        &self,
        liveness: &LivenessResult,
        arch: Architecture,
    ) -> Result<Allocation, AllocationFailure>;
}

/// Linear scan over whole intervals.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScanAllocator;

impl LinearScanAllocator {
    fn check_value(interval: &LiveInterval, arch: Architecture) -> Result<(), AllocationFailure> {
        let unsupported = interval.register_class() == RegisterClass::FloatingPoint
            || (interval.ty().is_wide() && !arch.is_64bit());
        if unsupported {
            return Err(AllocationFailure::UnsupportedValue {
                value: interval.value(),
                ty: interval.ty(),
                arch,
            });
        }
        Ok(())
    }
}

impl RegisterAllocator for LinearScanAllocator {
    fn supports(&self, arch: Architecture) -> bool {
        arch.register_file().is_some()
    }

    fn can_allocate(&self, graph: &Graph, arch: Architecture) -> bool {
        if !self.supports(arch) {
            return false;
        }
        graph.instructions().all(|insn| {
            let ty = insn.ty();
            !ty.is_floating_point() && (arch.is_64bit() || !ty.is_wide())
        })
    }

    fn allocate(
        &self,
        liveness: &LivenessResult,
        arch: Architecture,
    ) -> Result<Allocation, AllocationFailure> {
        let registers = arch
            .register_file()
            .ok_or(AllocationFailure::UnsupportedArchitecture(arch))?;
        for interval in liveness.intervals() {
            Self::check_value(interval, arch)?;
        }

        let mut scan = LinearScan::new(registers, liveness);
        for (index, interval) in liveness.intervals().iter().enumerate() {
            scan.expire(interval.start());
            scan.assign(index, interval);
        }
        trace!(
            intervals = liveness.intervals().len(),
            spill_slots = scan.spill_slots,
            "linear scan finished"
        );
        Ok(Allocation {
            locations: scan.locations,
            spill_slots: scan.spill_slots,
            used_callee_saves: scan.used_callee_saves,
        })
    }
}

struct Active {
    interval: usize,
    end: usize,
    register: Register,
}

struct LinearScan<'a> {
    registers: &'static RegisterFile,
    intervals: &'a [LiveInterval],
    active: Vec<Active>,
    free: Vec<Register>,
    locations: Vec<Location>,
    spill_slots: u32,
    used_callee_saves: u32,
}

impl<'a> LinearScan<'a> {
    fn new(registers: &'static RegisterFile, liveness: &'a LivenessResult) -> Self {
        let mut locations = vec![Location::Unallocated; liveness.value_count()];
        for &(value, constant) in liveness.constants() {
            locations[value.index()] = Location::Constant(constant);
        }
        Self {
            registers,
            intervals: liveness.intervals(),
            active: Vec::new(),
            free: registers
                .caller_saved
                .iter()
                .chain(registers.callee_saved)
                .copied()
                .collect(),
            locations,
            spill_slots: 0,
            used_callee_saves: 0,
        }
    }

    fn is_callee_saved(&self, register: Register) -> bool {
        self.registers.callee_saved.contains(&register)
    }

    fn expire(&mut self, position: usize) {
        let mut index = 0;
        while index < self.active.len() {
            if self.active[index].end <= position {
                let done = self.active.swap_remove(index);
                self.free.push(done.register);
            } else {
                index += 1;
            }
        }
    }

    fn take_free(&mut self, spans_call: bool) -> Option<Register> {
        // Caller-saved registers first, lowest number first.
        let pick = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, &reg)| !spans_call || self.is_callee_saved(reg))
            .min_by_key(|(_, &reg)| (self.is_callee_saved(reg), reg))
            .map(|(index, _)| index)?;
        Some(self.free.swap_remove(pick))
    }

    fn spill(&mut self, interval: usize) {
        let value = self.intervals[interval].value();
        self.locations[value.index()] = Location::StackSlot(self.spill_slots);
        self.spill_slots += 1;
    }

    fn give(&mut self, interval: usize, register: Register) {
        let value = self.intervals[interval].value();
        self.locations[value.index()] = Location::Register(register);
        if self.is_callee_saved(register) {
            self.used_callee_saves |= register.mask();
        }
        self.active.push(Active {
            interval,
            end: self.intervals[interval].end(),
            register,
        });
    }

    fn assign(&mut self, index: usize, interval: &LiveInterval) {
        if let Some(register) = self.take_free(interval.spans_call()) {
            self.give(index, register);
            return;
        }

        let victim = self
            .active
            .iter()
            .enumerate()
            .filter(|(_, active)| !interval.spans_call() || self.is_callee_saved(active.register))
            .max_by_key(|(_, active)| active.end)
            .map(|(position, active)| (position, active.end));
        match victim {
            Some((position, end)) if end > interval.end() => {
                let evicted = self.active.swap_remove(position);
                self.spill(evicted.interval);
                self.give(index, evicted.register);
            }
            _ => self.spill(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{build_dominator_tree, find_natural_loops, transform_to_ssa, SsaLivenessAnalysis},
        bytecode::{AccessFlags, CodeItem, DexAssembler, MethodDescriptor},
        compiler::passes::testing::ssa_graph,
        ir::{BinaryOp, DexGraphBuilder, GraphBuilder},
        Result,
    };

    fn graph(registers: u16, ins: u16, shorty: &str, insns: Vec<u16>) -> Result<Graph> {
        let method = MethodDescriptor::new(
            0,
            "Test.run",
            shorty,
            AccessFlags::STATIC,
            CodeItem {
                registers_size: registers,
                ins_size: ins,
                insns,
                tries: Vec::new(),
            },
        );
        let mut graph = DexGraphBuilder.build(&method)?;
        build_dominator_tree(&mut graph);
        transform_to_ssa(&mut graph);
        find_natural_loops(&mut graph);
        Ok(graph)
    }

    fn allocate(liveness: &LivenessResult, arch: Architecture) -> Allocation {
        match LinearScanAllocator.allocate(liveness, arch) {
            Ok(allocation) => allocation,
            Err(failure) => panic!("allocation failed: {failure}"),
        }
    }

    fn assert_no_conflicts(liveness: &LivenessResult, allocation: &Allocation) {
        let intervals = liveness.intervals();
        for (i, a) in intervals.iter().enumerate() {
            for b in &intervals[i + 1..] {
                let (la, lb) = (allocation.location(a.value()), allocation.location(b.value()));
                if la == lb && a.intersects(b) {
                    panic!("{} and {} share {la}", a.value(), b.value());
                }
            }
        }
    }

    #[test]
    fn small_methods_live_in_caller_saved_registers() -> Result<()> {
        let code = DexAssembler::new()
            .binop(BinaryOp::Add, 0, 1, 2)
            .binop(BinaryOp::Mul, 0, 0, 1)
            .return_value(0)
            .finish()?;
        let graph = ssa_graph(code)?;
        let liveness = SsaLivenessAnalysis::analyze(&graph);
        let allocation = allocate(&liveness, Architecture::X86_64);
        let Some(file) = Architecture::X86_64.register_file() else {
            panic!("x86_64 has a register file");
        };

        assert_eq!(allocation.spill_slots(), 0);
        // Parameters live across the entry suspend check.
        let (across, local): (Vec<_>, Vec<_>) =
            liveness.intervals().iter().partition(|interval| interval.spans_call());
        assert!(!local.is_empty());
        for interval in local {
            let reg = allocation.location(interval.value()).register();
            assert!(reg.is_some_and(|reg| file.caller_saved.contains(&reg)), "{}", interval.value());
        }
        for interval in across {
            let reg = allocation.location(interval.value()).register();
            assert!(reg.is_some_and(|reg| file.callee_saved.contains(&reg)), "{}", interval.value());
        }
        assert_no_conflicts(&liveness, &allocation);
        Ok(())
    }

    #[test]
    fn pressure_spills_to_the_frame() -> Result<()> {
        let mut asm = DexAssembler::new();
        for reg in 0..8 {
            asm.binop(BinaryOp::Add, reg, 8, 9);
        }
        for reg in 1..8 {
            asm.binop(BinaryOp::Xor, 0, 0, reg);
        }
        asm.return_value(0);
        let graph = graph(10, 2, "III", asm.finish()?)?;
        let liveness = SsaLivenessAnalysis::analyze(&graph);
        let allocation = allocate(&liveness, Architecture::X86);

        assert!(allocation.spill_slots() > 0);
        assert_no_conflicts(&liveness, &allocation);
        Ok(())
    }

    #[test]
    fn values_live_across_calls_use_callee_saves() -> Result<()> {
        let code = DexAssembler::new()
            .binop(BinaryOp::Add, 0, 1, 2)
            .invoke_static(4, &[1])
            .binop(BinaryOp::Add, 0, 0, 2)
            .return_value(0)
            .finish()?;
        let graph = ssa_graph(code)?;
        let liveness = SsaLivenessAnalysis::analyze(&graph);
        let allocation = allocate(&liveness, Architecture::Arm64);

        let file = Architecture::Arm64.register_file();
        let Some(file) = file else {
            panic!("arm64 has a register file");
        };
        for interval in liveness.intervals().iter().filter(|i| i.spans_call()) {
            match allocation.location(interval.value()) {
                Location::Register(reg) => assert!(file.callee_saved.contains(&reg)),
                Location::StackSlot(_) => {}
                other => panic!("unexpected {other}"),
            }
        }
        assert_ne!(allocation.used_callee_saves(), 0);
        Ok(())
    }

    #[test]
    fn allocability_depends_on_the_target() -> Result<()> {
        let code = DexAssembler::new()
            .binop_wide(BinaryOp::Add, 0, 2, 2)
            .return_wide(0)
            .finish()?;
        let graph = graph(4, 2, "JJ", code)?;
        assert!(LinearScanAllocator.can_allocate(&graph, Architecture::X86_64));
        assert!(LinearScanAllocator.can_allocate(&graph, Architecture::Arm64));
        assert!(!LinearScanAllocator.can_allocate(&graph, Architecture::X86));
        assert!(!LinearScanAllocator.can_allocate(&graph, Architecture::Mips));

        let liveness = SsaLivenessAnalysis::analyze(&graph);
        assert!(matches!(
            LinearScanAllocator.allocate(&liveness, Architecture::Thumb2),
            Err(AllocationFailure::UnsupportedValue { .. })
        ));
        Ok(())
    }
}
