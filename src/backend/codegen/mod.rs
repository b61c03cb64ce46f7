//! Lowering of graphs to machine code.
//!
//! [`CodeGenerator`] holds everything that is independent of the target and
//! drives an [`Assembler`] for the instruction encodings. [`CodeEmitter`]
//! closes the set of supported targets into one enum so the driver can pick
//! a generator at runtime without trait objects.
//!
//! # Code shape
//!
//! Generated code uses a private calling convention:
//!
//! - arguments are passed in the caller's outgoing-argument slots, the callee
//!   finds them above its own frame ([`FrameLayout::incoming_arg_offset`])
//! - the callee's method pointer is passed in the method register and stored
//!   at the bottom of the frame
//! - results come back in the return register (a register pair for 64-bit
//!   values on 32-bit targets)
//!
//! Every operation routes its operands through the two scratch registers of
//! the target, so the register allocator never has to reason about encoder
//! constraints.
//!
//! # Modes
//!
//! | Mode      | Input              | Locations                          | Safepoint metadata |
//! |-----------|--------------------|------------------------------------|--------------------|
//! | optimized | SSA, allocated     | registers, spill slots, constants  | stack maps         |
//! | baseline  | `LoadLocal`/`StoreLocal` graph | one frame slot per vreg and per value | native GC map |
//!
//! On 32-bit targets baseline code keeps 64-bit values in memory and calls
//! runtime helpers for 64-bit arithmetic; the optimized path never sees them
//! because the allocator refuses such graphs.

mod arm64;
mod assembler;
mod frame;
mod gc;
mod moves;
mod tables;
mod thumb2;
mod x86;
mod x86_64;

pub use arm64::Arm64Assembler;
pub use assembler::{Assembler, BranchKind, CodeBuffer, Label, OperandSize};
pub use frame::FrameLayout;
pub use gc::VregReferenceAnalysis;
pub use moves::{Move, ParallelMove};
pub use tables::{
    encode_mapping_table, encode_native_gc_map, encode_stack_maps, encode_vmap_table,
    DexRegisterLocation, PcInfo, SourceMap, StackMapEntry, VMAP_FP_MARKER,
};
pub use thumb2::Thumb2Assembler;
pub use x86::{Ia32, X86Assembler, X86Family, X86Mode};
pub use x86_64::{LongMode, X86_64Assembler};

use crate::{
    analysis::LivenessResult,
    backend::{
        regalloc::Allocation,
        runtime::{array_data_offset, QuickEntrypoint, METHOD_RESOLVED_METHODS_OFFSET},
        Architecture, Location, Register,
    },
    bytecode::MethodDescriptor,
    ir::{BlockId, Comparison, DataType, Graph, InsnId, Instruction, InstructionKind},
    utils::BitSet,
};

/// Mode-specific state while a method is lowered.
enum Mode<'a> {
    Optimized {
        liveness: &'a LivenessResult,
    },
    Baseline {
        references: VregReferenceAnalysis,
        state: BitSet,
    },
}

/// Target-independent code generation over an [`Assembler`].
#[derive(Debug, Default)]
pub struct CodeGenerator<A: Assembler> {
    asm: A,
    frame: FrameLayout,
    locations: Vec<Location>,
    labels: Vec<Option<Label>>,
    number_of_vregs: u16,
    pc_infos: Vec<PcInfo>,
    source_positions: Vec<PcInfo>,
    stack_maps: Vec<StackMapEntry>,
    gc_entries: Vec<(u32, Vec<u8>)>,
}

impl<A: Assembler> CodeGenerator<A> {
    fn scratch(index: usize) -> Register {
        A::REGISTERS.scratch[index]
    }

    fn pointer_size() -> u32 {
        A::ARCHITECTURE.pointer_size()
    }

    /// `true` for 64-bit values the target can not hold in one register.
    fn is_pair(ty: DataType) -> bool {
        ty.is_wide() && !A::ARCHITECTURE.is_64bit()
    }

    fn size_of(ty: DataType) -> OperandSize {
        if Self::is_pair(ty) {
            OperandSize::Word
        } else {
            OperandSize::of(ty)
        }
    }

    /// Lowers an allocated SSA graph.
    ///
    /// # Panics
    ///
    /// Panics if a value the allocator was supposed to place has no
    /// location, or if the graph holds 64-bit values on a 32-bit target.
    pub fn compile_optimized(
        &mut self,
        graph: &Graph,
        liveness: &LivenessResult,
        allocation: &Allocation,
    ) -> Vec<u8> {
        self.reset(graph);
        self.locations = allocation.locations().to_vec();
        self.locations.resize(graph.instruction_count(), Location::Unallocated);
        self.frame = FrameLayout::new(
            A::REGISTERS,
            Self::pointer_size(),
            max_out_args(graph, false),
            allocation.spill_slots(),
            allocation.used_callee_saves(),
        );
        let order = liveness.linear_order().to_vec();
        self.emit_method(graph, &order, Mode::Optimized { liveness })
    }

    /// Lowers a graph that still accesses virtual registers through
    /// `LoadLocal`/`StoreLocal`.
    pub fn compile_baseline(&mut self, graph: &Graph) -> Vec<u8> {
        self.reset(graph);
        let vregs = u32::from(graph.number_of_vregs());
        let mut slots = vregs;
        // Indexed by InsnId; ids are not allocated in block order.
        self.locations = vec![Location::Unallocated; graph.instruction_count()];
        for insn in graph.instructions() {
            self.locations[insn.id().index()] = match insn.kind().constant_value() {
                Some(value) => Location::Constant(value),
                None if insn.ty().is_void() => Location::Unallocated,
                None => {
                    slots += 1;
                    Location::StackSlot(slots - 1)
                }
            };
        }
        self.frame = FrameLayout::new(
            A::REGISTERS,
            Self::pointer_size(),
            max_out_args(graph, !A::ARCHITECTURE.is_64bit()),
            slots,
            0,
        );
        let order: Vec<BlockId> = graph.block_ids().collect();
        let references = VregReferenceAnalysis::analyze(graph);
        let state = BitSet::new(usize::from(graph.number_of_vregs()));
        self.emit_method(graph, &order, Mode::Baseline { references, state })
    }

    fn reset(&mut self, graph: &Graph) {
        *self = Self {
            number_of_vregs: graph.number_of_vregs(),
            ..Self::default()
        };
    }

    fn emit_method(&mut self, graph: &Graph, order: &[BlockId], mut mode: Mode<'_>) -> Vec<u8> {
        self.labels = vec![None; graph.block_capacity()];
        for &block in order {
            self.labels[block.index()] = Some(self.asm.new_label());
        }

        self.asm.build_frame(&self.frame);
        for (index, &block) in order.iter().enumerate() {
            let label = self.label(block);
            self.asm.bind(label);
            if let Mode::Baseline { references, state } = &mut mode {
                *state = references.entry_state(block);
            }
            let next = order.get(index + 1).copied();
            for &id in graph.block(block).instructions() {
                let insn = graph.instruction(id);
                self.source_positions.push(PcInfo {
                    native_pc: self.asm.offset() as u32,
                    dex_pc: insn.dex_pc(),
                });
                self.lower(graph, insn, next, &mode);
                if let Mode::Baseline { state, .. } = &mut mode {
                    VregReferenceAnalysis::apply(state, insn, graph);
                }
            }
        }
        self.asm.finalize()
    }

    fn label(&self, block: BlockId) -> Label {
        match self.labels.get(block.index()).copied().flatten() {
            Some(label) => label,
            None => panic!("branch to {block}, which is not laid out"),
        }
    }

    fn location(&self, value: InsnId) -> Location {
        self.locations
            .get(value.index())
            .copied()
            .unwrap_or_default()
    }

    fn lower(&mut self, graph: &Graph, insn: &Instruction, next: Option<BlockId>, mode: &Mode<'_>) {
        let ty = insn.ty();
        let dst = self.location(insn.id());
        match *insn.kind() {
            InstructionKind::Parameter { index } => {
                let offset = self.frame.incoming_arg_offset(u32::from(index));
                self.read_frame(offset, dst, ty);
            }
            InstructionKind::IntConstant(_)
            | InstructionKind::LongConstant(_)
            | InstructionKind::Exit => {}
            InstructionKind::Binary(op) => {
                let (lhs, rhs) = (insn.inputs()[0], insn.inputs()[1]);
                if Self::is_pair(ty) {
                    self.write_frame(self.frame.out_arg_offset(0), self.location(lhs), ty);
                    self.write_frame(self.frame.out_arg_offset(1), self.location(rhs), ty);
                    self.asm.call_runtime(QuickEntrypoint::for_binary(op));
                    self.store_return_value(dst, ty);
                } else {
                    let (s0, s1) = (Self::scratch(0), Self::scratch(1));
                    self.load_into(s0, self.location(lhs), ty);
                    self.load_into(s1, self.location(rhs), ty);
                    self.asm.binary(op, s0, s1, Self::size_of(ty));
                    self.copy(Location::Register(s0), dst, ty);
                }
            }
            InstructionKind::Unary(op) => {
                let input = self.location(insn.inputs()[0]);
                if Self::is_pair(ty) {
                    self.write_frame(self.frame.out_arg_offset(0), input, ty);
                    self.asm.call_runtime(QuickEntrypoint::for_unary(op));
                    self.store_return_value(dst, ty);
                } else {
                    let s0 = Self::scratch(0);
                    self.load_into(s0, input, ty);
                    self.asm.unary(op, s0, Self::size_of(ty));
                    self.copy(Location::Register(s0), dst, ty);
                }
            }
            InstructionKind::Condition(cmp) => {
                if insn.is_emitted_at_use_site() {
                    return;
                }
                let s0 = Self::scratch(0);
                self.compare_inputs(graph, insn);
                self.asm.set_if(cmp, s0);
                self.copy(Location::Register(s0), dst, DataType::Int);
            }
            InstructionKind::If => self.lower_if(graph, insn, next),
            InstructionKind::Goto => {
                let block = graph.block(insn_block(insn));
                let Some(&successor) = block.successors().first() else {
                    panic!("goto in {} has no successor", block.id());
                };
                self.emit_phi_moves(graph, block.id(), successor);
                if next != Some(successor) {
                    let label = self.label(successor);
                    self.asm.jump(label);
                }
            }
            InstructionKind::Return => {
                let value = insn.inputs()[0];
                let value_ty = graph.instruction(value).ty();
                self.load_return_value(self.location(value), value_ty);
                self.asm.remove_frame_and_return(&self.frame);
            }
            InstructionKind::ReturnVoid => self.asm.remove_frame_and_return(&self.frame),
            InstructionKind::Invoke { method_idx } => {
                self.lower_invoke(graph, insn, method_idx);
                self.record_safepoint(graph, insn, mode);
                if !ty.is_void() {
                    self.store_return_value(dst, ty);
                }
            }
            InstructionKind::LoadLocal { vreg } => {
                self.copy(Location::StackSlot(u32::from(vreg)), dst, ty);
            }
            InstructionKind::StoreLocal { vreg } => {
                let value = insn.inputs()[0];
                let value_ty = graph.instruction(value).ty();
                self.copy(self.location(value), Location::StackSlot(u32::from(vreg)), value_ty);
            }
            InstructionKind::SuspendCheck => {
                self.asm.poll_suspend();
                self.record_safepoint(graph, insn, mode);
            }
            InstructionKind::NullCheck => {
                let s0 = Self::scratch(0);
                self.load_into(s0, self.location(insn.inputs()[0]), DataType::Reference);
                self.asm.check_null(s0);
                self.record_safepoint(graph, insn, mode);
                self.copy(Location::Register(s0), dst, DataType::Reference);
            }
            InstructionKind::Phi { .. } => panic!("{} listed among instructions", insn.id()),
        }
    }

    /// Loads both inputs of `condition` into the scratch registers and
    /// compares them.
    fn compare_inputs(&mut self, graph: &Graph, condition: &Instruction) {
        let (s0, s1) = (Self::scratch(0), Self::scratch(1));
        let (lhs, rhs) = (condition.inputs()[0], condition.inputs()[1]);
        let ty = graph.instruction(lhs).ty();
        self.load_into(s0, self.location(lhs), ty);
        self.load_into(s1, self.location(rhs), ty);
        self.asm.compare(s0, s1, Self::size_of(ty));
    }

    fn lower_if(&mut self, graph: &Graph, insn: &Instruction, next: Option<BlockId>) {
        let block = graph.block(insn_block(insn));
        let [taken, fallthrough] = block.successors() else {
            panic!("if in {} needs two successors", block.id());
        };
        let (taken, fallthrough) = (*taken, *fallthrough);

        let condition = graph.instruction(insn.inputs()[0]);
        let cmp = match *condition.kind() {
            InstructionKind::Condition(cmp) if condition.is_emitted_at_use_site() => {
                self.compare_inputs(graph, condition);
                cmp
            }
            _ => {
                let (s0, s1) = (Self::scratch(0), Self::scratch(1));
                self.load_into(s0, self.location(condition.id()), DataType::Int);
                self.asm.load_immediate(s1, 0, OperandSize::Word);
                self.asm.compare(s0, s1, OperandSize::Word);
                Comparison::Ne
            }
        };

        if next == Some(taken) {
            let label = self.label(fallthrough);
            self.asm.branch_if(cmp.negate(), label);
        } else {
            let label = self.label(taken);
            self.asm.branch_if(cmp, label);
            if next != Some(fallthrough) {
                let label = self.label(fallthrough);
                self.asm.jump(label);
            }
        }
    }

    fn lower_invoke(&mut self, graph: &Graph, insn: &Instruction, method_idx: u32) {
        for (index, &argument) in insn.inputs().iter().enumerate() {
            let ty = graph.instruction(argument).ty();
            let offset = self.frame.out_arg_offset(index as u32);
            self.write_frame(offset, self.location(argument), ty);
        }

        let s0 = Self::scratch(0);
        let pointer_size = Self::pointer_size();
        let pointer = OperandSize::pointer(pointer_size);
        let sp = A::REGISTERS.stack_pointer;
        let entry = array_data_offset(pointer_size) + (method_idx * pointer_size) as i32;
        self.asm.load(s0, sp, self.frame.method_offset(), pointer);
        self.asm.load(s0, s0, METHOD_RESOLVED_METHODS_OFFSET, pointer);
        self.asm.load(s0, s0, entry, pointer);
        self.asm.call_method(s0);
    }

    fn emit_phi_moves(&mut self, graph: &Graph, from: BlockId, to: BlockId) {
        let target = graph.block(to);
        if target.phis().is_empty() {
            return;
        }
        let Some(index) = target.predecessor_index(from) else {
            panic!("{from} is not a predecessor of {to}");
        };
        let mut parallel = ParallelMove::default();
        for &phi in target.phis() {
            let phi = graph.instruction(phi);
            let input = phi.inputs()[index];
            parallel.add(self.location(input), self.location(phi.id()), Self::size_of(phi.ty()));
        }
        let temp = Location::Register(Self::scratch(1));
        for step in parallel.resolve(temp) {
            let ty = match step.size {
                OperandSize::Word => DataType::Int,
                OperandSize::DoubleWord => DataType::Long,
            };
            self.copy(step.source, step.destination, ty);
        }
    }

    /// Records the pc info and the mode's safepoint metadata at the current
    /// native pc.
    fn record_safepoint(&mut self, graph: &Graph, insn: &Instruction, mode: &Mode<'_>) {
        let native_pc = self.asm.offset() as u32;
        let dex_pc = insn.dex_pc();
        self.pc_infos.push(PcInfo { native_pc, dex_pc });
        match mode {
            Mode::Optimized { liveness } => {
                let entry = self.stack_map_entry(graph, insn, liveness, native_pc);
                self.stack_maps.push(entry);
            }
            Mode::Baseline { state, .. } => self.gc_entries.push((native_pc, state.to_bytes())),
        }
    }

    fn stack_map_entry(
        &self,
        graph: &Graph,
        insn: &Instruction,
        liveness: &LivenessResult,
        native_pc: u32,
    ) -> StackMapEntry {
        let mut register_mask = 0;
        let mut stack_mask = BitSet::new(self.frame.slots() as usize);
        if let Some(position) = liveness.position(insn.id()) {
            let live_across = liveness.intervals().iter().filter(|interval| {
                interval.value() != insn.id()
                    && interval.covers(position)
                    && interval.covers(position + 1)
                    && interval.ty() == DataType::Reference
            });
            for interval in live_across {
                match self.location(interval.value()) {
                    Location::Register(reg) => register_mask |= reg.mask(),
                    Location::StackSlot(slot) => {
                        stack_mask.insert(slot as usize);
                    }
                    Location::Constant(_) | Location::Unallocated => {}
                }
            }
        }

        let dex_registers = match insn.environment() {
            Some(environment) => environment
                .vregs()
                .iter()
                .map(|value| match value.map(|value| self.location(value)) {
                    Some(Location::Register(reg)) => DexRegisterLocation::InRegister(reg),
                    Some(Location::StackSlot(slot)) => {
                        DexRegisterLocation::InStack(self.frame.slot_offset(slot))
                    }
                    Some(Location::Constant(value)) => DexRegisterLocation::Constant(value),
                    Some(Location::Unallocated) | None => DexRegisterLocation::None,
                })
                .collect(),
            None => vec![DexRegisterLocation::None; usize::from(graph.number_of_vregs())],
        };

        StackMapEntry {
            native_pc,
            dex_pc: insn.dex_pc(),
            register_mask,
            stack_mask,
            dex_registers,
        }
    }

    /// Moves a value of type `ty` from `src` to `dst`.
    fn copy(&mut self, src: Location, dst: Location, ty: DataType) {
        if src == dst {
            return;
        }
        match dst {
            Location::Unallocated => {}
            Location::Register(reg) => self.load_into(reg, src, ty),
            Location::StackSlot(slot) => {
                let offset = self.frame.slot_offset(slot);
                self.write_frame(offset, src, ty);
            }
            Location::Constant(_) => panic!("copy into constant {dst}"),
        }
    }

    /// Materializes `src` in `reg`.
    fn load_into(&mut self, reg: Register, src: Location, ty: DataType) {
        let size = Self::size_of(ty);
        match src {
            Location::Register(from) => self.asm.move_register(reg, from, size),
            Location::StackSlot(slot) => {
                let offset = self.frame.slot_offset(slot);
                self.asm.load(reg, A::REGISTERS.stack_pointer, offset, size);
            }
            Location::Constant(value) => self.asm.load_immediate(reg, value, size),
            Location::Unallocated => panic!("use of a value without a location"),
        }
    }

    /// Stores `src` at `[sp + offset]`, as two words for register pairs.
    fn write_frame(&mut self, offset: i32, src: Location, ty: DataType) {
        let sp = A::REGISTERS.stack_pointer;
        let s0 = Self::scratch(0);
        if !Self::is_pair(ty) {
            let size = Self::size_of(ty);
            let reg = match src {
                Location::Register(reg) => reg,
                other => {
                    self.load_into(s0, other, ty);
                    s0
                }
            };
            self.asm.store(reg, sp, offset, size);
            return;
        }

        for half in 0..2 {
            match src {
                Location::Constant(value) => {
                    let word = (value >> (32 * half)) as i32;
                    self.asm.load_immediate(s0, i64::from(word), OperandSize::Word);
                }
                Location::StackSlot(slot) => {
                    let from = self.frame.slot_offset(slot) + 4 * half;
                    self.asm.load(s0, sp, from, OperandSize::Word);
                }
                Location::Register(_) | Location::Unallocated => {
                    panic!("64-bit value in {src} on a 32-bit target")
                }
            }
            self.asm.store(s0, sp, offset + 4 * half, OperandSize::Word);
        }
    }

    /// Loads `[sp + offset]` into `dst`.
    fn read_frame(&mut self, offset: i32, dst: Location, ty: DataType) {
        let sp = A::REGISTERS.stack_pointer;
        match dst {
            Location::Unallocated | Location::Constant(_) => {}
            Location::Register(reg) => self.asm.load(reg, sp, offset, Self::size_of(ty)),
            Location::StackSlot(slot) => {
                let s0 = Self::scratch(0);
                let to = self.frame.slot_offset(slot);
                let halves = if Self::is_pair(ty) { 2 } else { 1 };
                for half in 0..halves {
                    self.asm.load(s0, sp, offset + 4 * half, Self::size_of(ty));
                    self.asm.store(s0, sp, to + 4 * half, Self::size_of(ty));
                }
            }
        }
    }

    fn load_return_value(&mut self, src: Location, ty: DataType) {
        let registers = A::REGISTERS;
        if !Self::is_pair(ty) {
            self.load_into(registers.return_register, src, ty);
            return;
        }
        let Some(high) = registers.return_register_high else {
            panic!("{} has no return register pair", A::ARCHITECTURE);
        };
        match src {
            Location::Constant(value) => {
                self.asm
                    .load_immediate(registers.return_register, i64::from(value as i32), OperandSize::Word);
                self.asm
                    .load_immediate(high, i64::from((value >> 32) as i32), OperandSize::Word);
            }
            Location::StackSlot(slot) => {
                let offset = self.frame.slot_offset(slot);
                let sp = registers.stack_pointer;
                self.asm.load(registers.return_register, sp, offset, OperandSize::Word);
                self.asm.load(high, sp, offset + 4, OperandSize::Word);
            }
            Location::Register(_) | Location::Unallocated => {
                panic!("64-bit value in {src} on a 32-bit target")
            }
        }
    }

    fn store_return_value(&mut self, dst: Location, ty: DataType) {
        let registers = A::REGISTERS;
        if !Self::is_pair(ty) {
            self.copy(Location::Register(registers.return_register), dst, ty);
            return;
        }
        let Location::StackSlot(slot) = dst else {
            return;
        };
        let Some(high) = registers.return_register_high else {
            panic!("{} has no return register pair", A::ARCHITECTURE);
        };
        let offset = self.frame.slot_offset(slot);
        let sp = registers.stack_pointer;
        self.asm.store(registers.return_register, sp, offset, OperandSize::Word);
        self.asm.store(high, sp, offset + 4, OperandSize::Word);
    }

    /// Encodes the pc-to-dex mapping of the last compiled method. With a
    /// `source_map`, the per-instruction positions are recorded in it and
    /// included in the table.
    pub fn build_mapping_table(&self, source_map: Option<&mut SourceMap>) -> Vec<u8> {
        match source_map {
            Some(map) => {
                for &entry in &self.source_positions {
                    map.push(entry);
                }
                encode_mapping_table(&self.pc_infos, map.entries())
            }
            None => encode_mapping_table(&self.pc_infos, &[]),
        }
    }

    /// Encodes the stack maps of the last optimized compilation.
    #[must_use]
    pub fn build_stack_maps(&self) -> Vec<u8> {
        encode_stack_maps(&self.stack_maps, self.number_of_vregs, self.frame.slots())
    }

    /// Encodes the vmap table of the last baseline compilation.
    #[must_use]
    pub fn build_vmap_table(&self) -> Vec<u8> {
        encode_vmap_table(&[])
    }

    /// Encodes the native GC map of the last baseline compilation of
    /// `method`.
    #[must_use]
    pub fn build_native_gc_map(&self, method: &MethodDescriptor) -> Vec<u8> {
        let width = usize::from(method.code.registers_size).div_ceil(8);
        encode_native_gc_map(&self.gc_entries, width)
    }

    /// Size of the frame of the last compiled method.
    #[must_use]
    pub fn frame_size(&self) -> u32 {
        self.frame.frame_size()
    }

    /// Saved core registers of the last compiled method.
    #[must_use]
    pub fn core_spill_mask(&self) -> u32 {
        self.frame.core_spill_mask()
    }

    /// Safepoints of the last compiled method.
    #[must_use]
    pub fn pc_infos(&self) -> &[PcInfo] {
        &self.pc_infos
    }
}

fn insn_block(insn: &Instruction) -> BlockId {
    match insn.block() {
        Some(block) => block,
        None => panic!("{} is not in a block", insn.id()),
    }
}

/// Outgoing argument slots the method's calls need. 32-bit targets call
/// runtime helpers with two 64-bit operands for wide arithmetic.
fn max_out_args(graph: &Graph, wide_helpers: bool) -> u32 {
    graph
        .instructions()
        .map(|insn| match insn.kind() {
            InstructionKind::Invoke { .. } => insn.inputs().len() as u32,
            InstructionKind::Binary(_) | InstructionKind::Unary(_)
                if wide_helpers && insn.ty().is_wide() =>
            {
                2
            }
            _ => 0,
        })
        .max()
        .unwrap_or(0)
}

macro_rules! dispatch {
    ($emitter:expr, $generator:ident => $body:expr) => {
        match $emitter {
            CodeEmitter::Arm64($generator) => $body,
            CodeEmitter::Thumb2($generator) => $body,
            CodeEmitter::X86($generator) => $body,
            CodeEmitter::X86_64($generator) => $body,
        }
    };
}

/// A code generator for one of the supported targets.
#[derive(Debug)]
pub enum CodeEmitter {
    /// AArch64
    Arm64(CodeGenerator<Arm64Assembler>),
    /// 32-bit ARM in T32 encoding
    Thumb2(CodeGenerator<Thumb2Assembler>),
    /// IA-32
    X86(CodeGenerator<X86Assembler>),
    /// AMD64
    X86_64(CodeGenerator<X86_64Assembler>),
}

impl CodeEmitter {
    /// Creates the generator for `arch`, `None` if there is none.
    #[must_use]
    pub fn create(arch: Architecture) -> Option<Self> {
        match arch {
            Architecture::Arm64 => Some(CodeEmitter::Arm64(CodeGenerator::default())),
            Architecture::Thumb2 => Some(CodeEmitter::Thumb2(CodeGenerator::default())),
            Architecture::X86 => Some(CodeEmitter::X86(CodeGenerator::default())),
            Architecture::X86_64 => Some(CodeEmitter::X86_64(CodeGenerator::default())),
            Architecture::Arm | Architecture::Mips | Architecture::Mips64 => None,
        }
    }

    /// The target.
    #[must_use]
    pub fn architecture(&self) -> Architecture {
        match self {
            CodeEmitter::Arm64(_) => Architecture::Arm64,
            CodeEmitter::Thumb2(_) => Architecture::Thumb2,
            CodeEmitter::X86(_) => Architecture::X86,
            CodeEmitter::X86_64(_) => Architecture::X86_64,
        }
    }

    /// See [`CodeGenerator::compile_optimized`].
    pub fn compile_optimized(
        &mut self,
        graph: &Graph,
        liveness: &LivenessResult,
        allocation: &Allocation,
    ) -> Vec<u8> {
        dispatch!(self, generator => generator.compile_optimized(graph, liveness, allocation))
    }

    /// See [`CodeGenerator::compile_baseline`].
    pub fn compile_baseline(&mut self, graph: &Graph) -> Vec<u8> {
        dispatch!(self, generator => generator.compile_baseline(graph))
    }

    /// See [`CodeGenerator::build_mapping_table`].
    pub fn build_mapping_table(&self, source_map: Option<&mut SourceMap>) -> Vec<u8> {
        dispatch!(self, generator => generator.build_mapping_table(source_map))
    }

    /// See [`CodeGenerator::build_stack_maps`].
    #[must_use]
    pub fn build_stack_maps(&self) -> Vec<u8> {
        dispatch!(self, generator => generator.build_stack_maps())
    }

    /// See [`CodeGenerator::build_vmap_table`].
    #[must_use]
    pub fn build_vmap_table(&self) -> Vec<u8> {
        dispatch!(self, generator => generator.build_vmap_table())
    }

    /// See [`CodeGenerator::build_native_gc_map`].
    #[must_use]
    pub fn build_native_gc_map(&self, method: &MethodDescriptor) -> Vec<u8> {
        dispatch!(self, generator => generator.build_native_gc_map(method))
    }

    /// Frame size of the last compiled method.
    #[must_use]
    pub fn frame_size(&self) -> u32 {
        dispatch!(self, generator => generator.frame_size())
    }

    /// Core spill mask of the last compiled method.
    #[must_use]
    pub fn core_spill_mask(&self) -> u32 {
        dispatch!(self, generator => generator.core_spill_mask())
    }

    /// Safepoints of the last compiled method.
    #[must_use]
    pub fn pc_infos(&self) -> &[PcInfo] {
        dispatch!(self, generator => generator.pc_infos())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::{
        analysis::{build_dominator_tree, find_natural_loops, transform_to_ssa, SsaLivenessAnalysis},
        backend::regalloc::{LinearScanAllocator, RegisterAllocator},
        bytecode::{AccessFlags, CodeItem, DexAssembler},
        compiler::{passes::PrepareForRegisterAllocation, Optimization, OptimizationPipeline},
        ir::{BinaryOp, DexGraphBuilder, GraphBuilder},
        Result,
    };

    fn method(registers: u16, ins: u16, shorty: &str, insns: Vec<u16>) -> MethodDescriptor {
        MethodDescriptor::new(
            1,
            "LTest;->codegen".to_string(),
            shorty.to_string(),
            AccessFlags::STATIC,
            CodeItem {
                registers_size: registers,
                ins_size: ins,
                insns,
                tries: Vec::new(),
            },
        )
    }

    fn loop_method() -> Result<MethodDescriptor> {
        // sum = 0; while (n != 0) { sum += n; n -= 1; } return sum + f(sum)
        let insns = DexAssembler::new()
            .const4(0, 0)
            .label("head")
            .if_testz(Comparison::Eq, 2, "done")
            .binop_2addr(BinaryOp::Add, 0, 2)
            .binop_lit8(BinaryOp::Add, 2, 2, -1)
            .goto("head")
            .label("done")
            .invoke_static(4, &[0])
            .move_result(1)
            .binop_2addr(BinaryOp::Add, 0, 1)
            .return_value(0)
            .finish()?;
        Ok(method(3, 1, "II", insns))
    }

    fn compile_optimized(method: &MethodDescriptor, arch: Architecture) -> Result<CodeEmitter> {
        let mut graph = DexGraphBuilder.build(method)?;
        build_dominator_tree(&mut graph);
        transform_to_ssa(&mut graph);
        find_natural_loops(&mut graph);
        OptimizationPipeline::standard().run(&mut graph, |_, _| {});
        PrepareForRegisterAllocation::new().run(&mut graph);
        let liveness = SsaLivenessAnalysis::analyze(&graph);
        let allocation = match LinearScanAllocator.allocate(&liveness, arch) {
            Ok(allocation) => allocation,
            Err(failure) => panic!("{failure}"),
        };
        let mut emitter = CodeEmitter::create(arch).ok_or(crate::Error::Empty)?;
        let code = emitter.compile_optimized(&graph, &liveness, &allocation);
        assert!(!code.is_empty());
        Ok(emitter)
    }

    #[test]
    fn only_real_backends_exist() {
        let supported: Vec<Architecture> = Architecture::iter()
            .filter(|&arch| CodeEmitter::create(arch).is_some())
            .collect();
        assert_eq!(
            supported,
            [Architecture::Thumb2, Architecture::Arm64, Architecture::X86, Architecture::X86_64]
        );
    }

    #[test]
    fn optimized_code_records_a_stack_map_per_safepoint() -> Result<()> {
        let method = loop_method()?;
        for arch in [Architecture::Thumb2, Architecture::Arm64, Architecture::X86, Architecture::X86_64] {
            let emitter = compile_optimized(&method, arch)?;
            // Entry suspend check, back edge suspend check, invoke.
            assert_eq!(emitter.pc_infos().len(), 3, "{arch}");
            assert_eq!(emitter.build_stack_maps()[0], 3, "{arch}");
            assert_eq!(emitter.frame_size() % 16, 0);
        }
        Ok(())
    }

    #[test]
    fn baseline_lowers_values_numbered_out_of_block_order() -> Result<()> {
        let method = loop_method()?;
        let graph = DexGraphBuilder.build(&method)?;
        assert!(graph
            .instructions()
            .enumerate()
            .any(|(index, insn)| insn.id().index() != index));
        for arch in [Architecture::Thumb2, Architecture::Arm64, Architecture::X86, Architecture::X86_64] {
            let mut emitter = CodeEmitter::create(arch).ok_or(crate::Error::Empty)?;
            let code = emitter.compile_baseline(&graph);
            assert!(!code.is_empty(), "{arch}");
            assert!(!emitter.pc_infos().is_empty(), "{arch}");
        }
        Ok(())
    }

    #[test]
    fn baseline_handles_wide_arithmetic_on_32_bit_targets() -> Result<()> {
        let insns = DexAssembler::new()
            .const_wide16(0, 7)
            .binop_wide(BinaryOp::Mul, 0, 0, 2)
            .return_wide(0)
            .finish()?;
        let method = method(4, 2, "JJ", insns);
        let graph = DexGraphBuilder.build(&method)?;
        for arch in [Architecture::Thumb2, Architecture::X86, Architecture::Arm64] {
            let mut emitter = CodeEmitter::create(arch).ok_or(crate::Error::Empty)?;
            let code = emitter.compile_baseline(&graph);
            assert!(!code.is_empty());
            assert_eq!(emitter.build_vmap_table(), [1, 1]);
            // One safepoint, at the entry.
            let gc_map = emitter.build_native_gc_map(&method);
            assert_eq!(gc_map[2], 1);
        }
        Ok(())
    }

    #[test]
    fn baseline_gc_map_reports_reference_registers() -> Result<()> {
        let insns = DexAssembler::new()
            .move_object(0, 1)
            .invoke_direct(2, &[0])
            .return_void()
            .finish()?;
        let method = MethodDescriptor::new(
            2,
            "LTest;-><init>".to_string(),
            "V".to_string(),
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            CodeItem {
                registers_size: 2,
                ins_size: 1,
                insns,
                tries: Vec::new(),
            },
        );
        let graph = DexGraphBuilder.build(&method)?;
        let mut emitter = CodeEmitter::create(Architecture::X86_64).ok_or(crate::Error::Empty)?;
        emitter.compile_baseline(&graph);

        let gc_map = emitter.build_native_gc_map(&method);
        // suspend check, null check, invoke
        assert_eq!(gc_map[2], 3);
        let width = usize::from(gc_map[0] & 7);
        let entry = 1 + width;
        let last = &gc_map[4 + 2 * entry..];
        assert_eq!(last[width], 0b11);
        Ok(())
    }

    #[test]
    fn debug_positions_extend_the_mapping_table() -> Result<()> {
        let method = loop_method()?;
        let emitter = compile_optimized(&method, Architecture::Arm64)?;
        let plain = emitter.build_mapping_table(None);
        let mut source_map = SourceMap::default();
        let with_positions = emitter.build_mapping_table(Some(&mut source_map));
        assert!(!source_map.is_empty());
        assert!(with_positions.len() > plain.len());
        Ok(())
    }
}
