//! Where a value lives while compiled code runs.

use std::fmt;

use crate::backend::Register;

/// Storage assigned to an SSA value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Location {
    /// A core register.
    Register(Register),
    /// A frame slot, numbered from the start of the slot area.
    StackSlot(u32),
    /// A constant, materialized at each use.
    Constant(i64),
    /// The value needs no storage.
    #[default]
    Unallocated,
}

impl Location {
    /// The register, if the value lives in one.
    #[must_use]
    pub fn register(self) -> Option<Register> {
        match self {
            Location::Register(reg) => Some(reg),
            _ => None,
        }
    }

    /// `true` for frame slots.
    #[must_use]
    pub fn is_stack_slot(self) -> bool {
        matches!(self, Location::StackSlot(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(reg) => write!(f, "{reg}"),
            Location::StackSlot(slot) => write!(f, "slot{slot}"),
            Location::Constant(value) => write!(f, "#{value}"),
            Location::Unallocated => f.write_str("-"),
        }
    }
}
