//! Translation of method bytecode into a [`Graph`].
//!
//! The builder works in two passes over the decoded instruction stream:
//!
//! 1. **Leaders**: the first instruction, every branch target and every
//!    instruction following a block end start a new basic block.
//! 2. **Translation**: each instruction becomes IR in its block. Virtual
//!    registers are accessed through `LoadLocal`/`StoreLocal`, which SSA
//!    construction later replaces by direct value references.
//!
//! The resulting graph has an entry block storing the incoming arguments into
//! the parameter registers, one block per leader, and an exit block that every
//! return jumps to. Critical edges are split before the graph is frozen so
//! later phases can place moves on any edge.

use std::collections::BTreeMap;

use crate::{
    bytecode::{decode_all, DexInstruction, InvokeKind, MethodDescriptor, RegisterKind},
    ir::{BinaryOp, BlockId, Comparison, DataType, Graph, InsnId, InstructionKind},
    Error, Result,
};

/// Builds the control-flow graph of a method.
///
/// Implementations never hand out a partially built graph: on failure they
/// return `Err` and the caller treats the method as not compilable.
pub trait GraphBuilder: Send + Sync {
    /// Builds and freezes the graph of `method`.
    ///
    /// # Errors
    ///
    /// Returns an error for bytecode outside the supported subset, malformed
    /// bodies and branches into the middle of an instruction.
    fn build(&self, method: &MethodDescriptor) -> Result<Graph>;
}

/// [`GraphBuilder`] for the supported Dalvik instruction subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct DexGraphBuilder;

impl GraphBuilder for DexGraphBuilder {
    fn build(&self, method: &MethodDescriptor) -> Result<Graph> {
        let code = &method.code;
        let insns = decode_all(&code.insns)?;
        if code.ins_size > code.registers_size {
            return Err(malformed_error!(
                "{} incoming registers exceed the frame of {} registers",
                code.ins_size,
                code.registers_size
            ));
        }

        let mut state = BuildState::new(method);
        state.create_blocks(&insns)?;
        state.build_entry(method)?;
        state.translate(&insns)?;

        let mut graph = state.graph;
        graph.split_critical_edges();
        graph.freeze();
        Ok(graph)
    }
}

struct BuildState {
    graph: Graph,
    entry: BlockId,
    exit: BlockId,
    /// Block starting at each leader dex pc.
    leaders: BTreeMap<u32, BlockId>,
    registers_size: u16,
}

impl BuildState {
    fn new(method: &MethodDescriptor) -> Self {
        let code = &method.code;
        let mut graph = Graph::new(code.registers_size, code.ins_size);
        let entry = graph.add_block(0);
        graph.set_entry_block(entry);
        Self {
            graph,
            entry,
            exit: entry,
            leaders: BTreeMap::new(),
            registers_size: code.registers_size,
        }
    }

    fn create_blocks(&mut self, insns: &[(u32, DexInstruction)]) -> Result<()> {
        let mut starts = vec![0u32];
        for (index, (pc, insn)) in insns.iter().enumerate() {
            if let Some(offset) = insn.branch_offset() {
                let target = i64::from(*pc) + i64::from(offset);
                let valid = u32::try_from(target)
                    .ok()
                    .filter(|target| insns.binary_search_by_key(target, |(pc, _)| *pc).is_ok());
                match valid {
                    Some(target) => starts.push(target),
                    None => {
                        return Err(Error::InvalidBranchTarget {
                            dex_pc: *pc,
                            target,
                        })
                    }
                }
            }
            if insn.is_block_end() {
                if let Some((next, _)) = insns.get(index + 1) {
                    starts.push(*next);
                }
            }
        }
        starts.sort_unstable();
        starts.dedup();

        for pc in starts {
            let block = self.graph.add_block(pc);
            self.leaders.insert(pc, block);
        }
        self.exit = self.graph.add_block(0);
        self.graph.set_exit_block(self.exit);
        self.graph
            .add_instruction(self.exit, InstructionKind::Exit, DataType::Void, Vec::new(), 0);
        Ok(())
    }

    fn block_at(&self, pc: u32) -> Result<BlockId> {
        self.leaders
            .get(&pc)
            .copied()
            .ok_or_else(|| malformed_error!("no block starts at dex pc {}", pc))
    }

    fn check_vreg(&self, vreg: u16) -> Result<u16> {
        if vreg >= self.registers_size {
            return Err(malformed_error!(
                "register v{} outside frame of {} registers",
                vreg,
                self.registers_size
            ));
        }
        Ok(vreg)
    }

    fn build_entry(&mut self, method: &MethodDescriptor) -> Result<()> {
        let code = &method.code;
        let mut vreg = code.registers_size - code.ins_size;
        for (index, ty) in method.parameter_types().enumerate() {
            let width = if ty.is_wide() { 2 } else { 1 };
            if vreg + width > code.registers_size {
                return Err(malformed_error!(
                    "signature {} needs more than {} incoming registers",
                    method.shorty,
                    code.ins_size
                ));
            }
            let parameter = self.graph.add_instruction(
                self.entry,
                InstructionKind::Parameter {
                    index: index as u16,
                },
                ty,
                Vec::new(),
                0,
            );
            self.graph.add_instruction(
                self.entry,
                InstructionKind::StoreLocal { vreg },
                DataType::Void,
                vec![parameter],
                0,
            );
            vreg += width;
        }

        self.graph.add_instruction(
            self.entry,
            InstructionKind::SuspendCheck,
            DataType::Void,
            Vec::new(),
            0,
        );
        self.graph
            .add_instruction(self.entry, InstructionKind::Goto, DataType::Void, Vec::new(), 0);
        let first = self.block_at(0)?;
        self.graph.add_edge(self.entry, first);
        Ok(())
    }

    fn translate(&mut self, insns: &[(u32, DexInstruction)]) -> Result<()> {
        let mut current = self.block_at(0)?;
        let mut open = true;
        let mut last_invoke: Option<InsnId> = None;

        for (pc, insn) in insns {
            let pc = *pc;
            if let Some(&block) = self.leaders.get(&pc) {
                if block != current {
                    if open {
                        self.emit(current, InstructionKind::Goto, DataType::Void, Vec::new(), pc);
                        self.graph.add_edge(current, block);
                    }
                    current = block;
                    open = true;
                    last_invoke = None;
                }
            }

            let mut emitter = BlockEmitter {
                state: self,
                block: current,
                dex_pc: pc,
            };
            let invoke = emitter.translate(insn, last_invoke.take())?;
            last_invoke = invoke;
            if insn.is_block_end() {
                open = false;
            }
        }

        if open {
            return Err(malformed_error!("control flow falls off the end of the method"));
        }
        Ok(())
    }

    fn emit(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: DataType,
        inputs: Vec<InsnId>,
        dex_pc: u32,
    ) -> InsnId {
        self.graph.add_instruction(block, kind, ty, inputs, dex_pc)
    }
}

/// Translates instructions into one block.
struct BlockEmitter<'a> {
    state: &'a mut BuildState,
    block: BlockId,
    dex_pc: u32,
}

impl BlockEmitter<'_> {
    fn emit(&mut self, kind: InstructionKind, ty: DataType, inputs: Vec<InsnId>) -> InsnId {
        self.state.emit(self.block, kind, ty, inputs, self.dex_pc)
    }

    fn load(&mut self, vreg: u16, ty: DataType) -> Result<InsnId> {
        let vreg = self.state.check_vreg(vreg)?;
        Ok(self.emit(InstructionKind::LoadLocal { vreg }, ty, Vec::new()))
    }

    fn store(&mut self, vreg: u16, value: InsnId) -> Result<()> {
        let vreg = self.state.check_vreg(vreg)?;
        self.emit(InstructionKind::StoreLocal { vreg }, DataType::Void, vec![value]);
        Ok(())
    }

    fn int_constant(&mut self, value: i32) -> InsnId {
        self.emit(InstructionKind::IntConstant(value), DataType::Int, Vec::new())
    }

    fn target(&self, offset: i32) -> Result<BlockId> {
        let target = i64::from(self.dex_pc) + i64::from(offset);
        let target = u32::try_from(target).map_err(|_| Error::InvalidBranchTarget {
            dex_pc: self.dex_pc,
            target,
        })?;
        self.state.block_at(target)
    }

    fn suspend_on_back_edge(&mut self, offset: i32) {
        if offset <= 0 {
            self.emit(InstructionKind::SuspendCheck, DataType::Void, Vec::new());
        }
    }

    fn branch_to(&mut self, target: BlockId) {
        self.state.graph.add_edge(self.block, target);
    }

    /// Translates one instruction. Returns the invoke a following
    /// `move-result` may type.
    fn translate(
        &mut self,
        insn: &DexInstruction,
        last_invoke: Option<InsnId>,
    ) -> Result<Option<InsnId>> {
        match *insn {
            DexInstruction::Nop => {}
            DexInstruction::Move { kind, dst, src } => {
                let value = self.load(src, kind_type(kind))?;
                self.store(dst, value)?;
            }
            DexInstruction::MoveResult { kind, dst } => {
                let Some(invoke) = last_invoke else {
                    return Err(malformed_error!(
                        "move-result at dex pc {} does not follow an invoke",
                        self.dex_pc
                    ));
                };
                self.state.graph.set_type(invoke, kind_type(kind));
                self.store(dst, invoke)?;
            }
            DexInstruction::ReturnVoid => {
                self.emit(InstructionKind::ReturnVoid, DataType::Void, Vec::new());
                let exit = self.state.exit;
                self.branch_to(exit);
            }
            DexInstruction::Return { kind, src } => {
                let value = self.load(src, kind_type(kind))?;
                self.emit(InstructionKind::Return, DataType::Void, vec![value]);
                let exit = self.state.exit;
                self.branch_to(exit);
            }
            DexInstruction::Const { dst, value } => {
                let constant = self.int_constant(value);
                self.store(dst, constant)?;
            }
            DexInstruction::ConstWide { dst, value } => {
                let constant =
                    self.emit(InstructionKind::LongConstant(value), DataType::Long, Vec::new());
                self.store(dst, constant)?;
            }
            DexInstruction::Goto { offset } => {
                let target = self.target(offset)?;
                self.suspend_on_back_edge(offset);
                self.emit(InstructionKind::Goto, DataType::Void, Vec::new());
                self.branch_to(target);
            }
            DexInstruction::IfTest { cmp, a, b, offset } => {
                let target = self.target(offset)?;
                self.suspend_on_back_edge(offset);
                let lhs = self.load(a, DataType::Int)?;
                let rhs = self.load(b, DataType::Int)?;
                self.conditional(cmp, lhs, rhs, target)?;
            }
            DexInstruction::IfTestZ { cmp, a, offset } => {
                let target = self.target(offset)?;
                self.suspend_on_back_edge(offset);
                let lhs = self.load(a, DataType::Int)?;
                let zero = self.int_constant(0);
                self.conditional(cmp, lhs, zero, target)?;
            }
            DexInstruction::Invoke {
                kind,
                method_idx,
                args,
                arg_count,
            } => {
                let mut inputs = Vec::with_capacity(usize::from(arg_count));
                for (position, &vreg) in args.iter().take(usize::from(arg_count)).enumerate() {
                    if position == 0 && kind == InvokeKind::Direct {
                        let receiver = self.load(vreg, DataType::Reference)?;
                        let checked = self.emit(
                            InstructionKind::NullCheck,
                            DataType::Reference,
                            vec![receiver],
                        );
                        inputs.push(checked);
                    } else {
                        inputs.push(self.load(vreg, DataType::Int)?);
                    }
                }
                let invoke = self.emit(
                    InstructionKind::Invoke {
                        method_idx: u32::from(method_idx),
                    },
                    DataType::Void,
                    inputs,
                );
                return Ok(Some(invoke));
            }
            DexInstruction::Unary { op, wide, dst, src } => {
                let ty = if wide { DataType::Long } else { DataType::Int };
                let value = self.load(src, ty)?;
                let result = self.emit(InstructionKind::Unary(op), ty, vec![value]);
                self.store(dst, result)?;
            }
            DexInstruction::Binary {
                op,
                wide,
                dst,
                lhs,
                rhs,
            } => {
                let ty = if wide { DataType::Long } else { DataType::Int };
                let lhs = self.load(lhs, ty)?;
                let rhs = self.load(rhs, ty)?;
                let result = self.emit(InstructionKind::Binary(op), ty, vec![lhs, rhs]);
                self.store(dst, result)?;
            }
            DexInstruction::BinaryLiteral {
                op,
                dst,
                src,
                literal,
                reverse,
            } => {
                let value = self.load(src, DataType::Int)?;
                let literal = self.int_constant(literal);
                // rsub computes `literal - src`.
                let inputs = if reverse && op == BinaryOp::Sub {
                    vec![literal, value]
                } else {
                    vec![value, literal]
                };
                let result = self.emit(InstructionKind::Binary(op), DataType::Int, inputs);
                self.store(dst, result)?;
            }
        }
        Ok(None)
    }

    fn conditional(
        &mut self,
        cmp: Comparison,
        lhs: InsnId,
        rhs: InsnId,
        target: BlockId,
    ) -> Result<()> {
        let condition = self.emit(InstructionKind::Condition(cmp), DataType::Bool, vec![lhs, rhs]);
        self.emit(InstructionKind::If, DataType::Void, vec![condition]);
        self.branch_to(target);
        // The fall-through block is the next leader; it always exists because
        // control cannot fall off the end.
        let next = self
            .state
            .leaders
            .range(self.dex_pc + 1..)
            .next()
            .map(|(_, &block)| block)
            .ok_or_else(|| malformed_error!("conditional branch at the end of the method"))?;
        self.branch_to(next);
        Ok(())
    }
}

fn kind_type(kind: RegisterKind) -> DataType {
    match kind {
        RegisterKind::Single => DataType::Int,
        RegisterKind::Wide => DataType::Long,
        RegisterKind::Object => DataType::Reference,
    }
}
