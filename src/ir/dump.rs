//! Human-readable rendering of a [`Graph`].
//!
//! Used by the diagnostics sink and in test failure messages. The format is
//! not stable.

use std::fmt::{self, Write};

use crate::ir::{Graph, Instruction, InstructionKind};

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.blocks() {
            write!(f, "{} (pc {})", block.id(), block.dex_pc())?;
            write_list(f, " pred", block.predecessors())?;
            write_list(f, " succ", block.successors())?;
            if let Some(idom) = self.dominator_of(block.id()) {
                write!(f, " idom {idom}")?;
            }
            if self.loop_headed_by(block.id()).is_some() {
                f.write_str(" loop-header")?;
            }
            f.write_char('\n')?;

            for &id in block.phis().iter().chain(block.instructions()) {
                writeln!(f, "  {}", DisplayInstruction(self.instruction(id)))?;
            }
        }
        Ok(())
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, label: &str, items: &[T]) -> fmt::Result {
    if items.is_empty() {
        return Ok(());
    }
    f.write_str(label)?;
    for item in items {
        write!(f, " {item}")?;
    }
    Ok(())
}

struct DisplayInstruction<'a>(&'a Instruction);

impl fmt::Display for DisplayInstruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let insn = self.0;
        write!(f, "{} = {}", insn.id(), insn.kind().name())?;
        match insn.kind() {
            InstructionKind::Parameter { index } => write!(f, " #{index}")?,
            InstructionKind::IntConstant(value) => write!(f, " {value}")?,
            InstructionKind::LongConstant(value) => write!(f, " {value}L")?,
            InstructionKind::Binary(op) => write!(f, " {op}")?,
            InstructionKind::Unary(op) => write!(f, " {op}")?,
            InstructionKind::Condition(cmp) => write!(f, " {cmp}")?,
            InstructionKind::Invoke { method_idx } => write!(f, " @{method_idx}")?,
            InstructionKind::LoadLocal { vreg }
            | InstructionKind::StoreLocal { vreg }
            | InstructionKind::Phi { vreg } => write!(f, " v{vreg}")?,
            _ => {}
        }
        if !insn.inputs().is_empty() {
            f.write_str(" (")?;
            for (index, input) in insn.inputs().iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{input}")?;
            }
            f.write_char(')')?;
        }
        if !insn.ty().is_void() {
            write!(f, " : {}", insn.ty())?;
        }
        if let Some(environment) = insn.environment() {
            f.write_str(" env [")?;
            for (index, value) in environment.vregs().iter().enumerate() {
                if index > 0 {
                    f.write_char(' ')?;
                }
                match value {
                    Some(value) => write!(f, "{value}")?,
                    None => f.write_char('_')?,
                }
            }
            f.write_char(']')?;
        }
        if insn.is_emitted_at_use_site() {
            f.write_str(" [at use]")?;
        }
        Ok(())
    }
}
