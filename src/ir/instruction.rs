//! IR instructions.

use strum::IntoStaticStr;

use crate::ir::{BinaryOp, BlockId, Comparison, DataType, InsnId, UnaryOp};

/// What an instruction does. Operands live in [`Instruction::inputs`].
///
/// | Kind | Inputs |
/// |------|--------|
/// | `Binary`, `Condition` | lhs, rhs |
/// | `Unary`, `Return`, `NullCheck`, `StoreLocal`, `If` | one value |
/// | `Invoke` | arguments in order |
/// | `Phi` | one value per predecessor, in predecessor order |
/// | everything else | none |
#[derive(Debug, Clone, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum InstructionKind {
    /// Incoming argument number `index`.
    Parameter {
        /// Argument position, receiver first.
        index: u16,
    },
    /// 32-bit constant (also used for booleans).
    IntConstant(i32),
    /// 64-bit constant.
    LongConstant(i64),
    /// Two-operand arithmetic.
    Binary(BinaryOp),
    /// One-operand arithmetic.
    Unary(UnaryOp),
    /// Produces 1 if the comparison holds, 0 otherwise.
    Condition(Comparison),
    /// Two-way branch: first successor when the input is non-zero.
    If,
    /// Unconditional branch to the single successor.
    Goto,
    /// Returns its input.
    Return,
    /// Returns without a value.
    ReturnVoid,
    /// Terminator of the exit block.
    Exit,
    /// Static or direct call.
    Invoke {
        /// Callee index into the method table.
        method_idx: u32,
    },
    /// Reads a virtual register. Only present before SSA construction.
    LoadLocal {
        /// Register number.
        vreg: u16,
    },
    /// Writes a virtual register. Only present before SSA construction.
    StoreLocal {
        /// Register number.
        vreg: u16,
    },
    /// Safepoint where the runtime may suspend the thread.
    SuspendCheck,
    /// Throws when its input is null, otherwise yields it.
    NullCheck,
    /// SSA merge of the values of `vreg` flowing in from each predecessor.
    Phi {
        /// Register this phi merges.
        vreg: u16,
    },
}

impl InstructionKind {
    /// `true` for the kinds that end a block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstructionKind::If
                | InstructionKind::Goto
                | InstructionKind::Return
                | InstructionKind::ReturnVoid
                | InstructionKind::Exit
        )
    }

    /// `true` for kinds that must never be removed, reordered or merged.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        self.is_terminator()
            || matches!(
                self,
                InstructionKind::Invoke { .. }
                    | InstructionKind::StoreLocal { .. }
                    | InstructionKind::SuspendCheck
                    | InstructionKind::NullCheck
            )
    }

    /// `true` for kinds whose result depends only on their inputs.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            InstructionKind::IntConstant(_)
                | InstructionKind::LongConstant(_)
                | InstructionKind::Binary(_)
                | InstructionKind::Unary(_)
                | InstructionKind::Condition(_)
        )
    }

    /// `true` for the kinds that record an [`Environment`] and a stack map.
    #[must_use]
    pub fn is_safepoint(&self) -> bool {
        matches!(
            self,
            InstructionKind::Invoke { .. } | InstructionKind::SuspendCheck | InstructionKind::NullCheck
        )
    }

    /// The constant value, widened to 64 bits.
    #[must_use]
    pub fn constant_value(&self) -> Option<i64> {
        match *self {
            InstructionKind::IntConstant(value) => Some(i64::from(value)),
            InstructionKind::LongConstant(value) => Some(value),
            _ => None,
        }
    }

    /// Variant name used in dumps.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Deoptimization state at a safepoint: the SSA value held by every virtual
/// register, `None` for registers without a reaching definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    pub(crate) vregs: Vec<Option<InsnId>>,
}

impl Environment {
    /// Creates an environment from per-register values.
    #[must_use]
    pub fn new(vregs: Vec<Option<InsnId>>) -> Self {
        Self { vregs }
    }

    /// Number of virtual registers described.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vregs.len()
    }

    /// `true` if no register is described.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vregs.is_empty()
    }

    /// The value held by register `vreg`.
    #[must_use]
    pub fn get(&self, vreg: usize) -> Option<InsnId> {
        self.vregs.get(vreg).copied().flatten()
    }

    /// All per-register entries.
    #[must_use]
    pub fn vregs(&self) -> &[Option<InsnId>] {
        &self.vregs
    }

    /// The defined values, one per register holding one.
    pub fn values(&self) -> impl Iterator<Item = InsnId> + '_ {
        self.vregs.iter().flatten().copied()
    }
}

/// An instruction in the graph's instruction table.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) id: InsnId,
    pub(crate) block: Option<BlockId>,
    pub(crate) kind: InstructionKind,
    pub(crate) ty: DataType,
    pub(crate) inputs: Vec<InsnId>,
    /// One entry per use occurrence, input slots and environment slots alike.
    pub(crate) users: Vec<InsnId>,
    pub(crate) environment: Option<Environment>,
    pub(crate) dex_pc: u32,
    pub(crate) emitted_at_use_site: bool,
}

impl Instruction {
    /// The id of this instruction (and of the value it produces).
    #[must_use]
    pub fn id(&self) -> InsnId {
        self.id
    }

    /// Containing block, `None` once removed.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// `true` while the instruction is linked into a block.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.block.is_some()
    }

    /// The operation.
    #[must_use]
    pub fn kind(&self) -> &InstructionKind {
        &self.kind
    }

    /// Result type, `Void` for instructions without a value.
    #[must_use]
    pub fn ty(&self) -> DataType {
        self.ty
    }

    /// Operands.
    #[must_use]
    pub fn inputs(&self) -> &[InsnId] {
        &self.inputs
    }

    /// Instructions using this value, one entry per use.
    #[must_use]
    pub fn users(&self) -> &[InsnId] {
        &self.users
    }

    /// `true` if anything uses this value.
    #[must_use]
    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    /// Deoptimization state, present on safepoints after SSA construction.
    #[must_use]
    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }

    /// Bytecode offset this instruction was built from.
    #[must_use]
    pub fn dex_pc(&self) -> u32 {
        self.dex_pc
    }

    /// `true` if code is generated at the (single) user instead of here.
    #[must_use]
    pub fn is_emitted_at_use_site(&self) -> bool {
        self.emitted_at_use_site
    }

    /// `true` for phis.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstructionKind::Phi { .. })
    }

    /// Every value this instruction uses: inputs, then environment entries.
    pub fn all_uses(&self) -> impl Iterator<Item = InsnId> + '_ {
        self.inputs
            .iter()
            .copied()
            .chain(self.environment.iter().flat_map(Environment::values))
    }
}
