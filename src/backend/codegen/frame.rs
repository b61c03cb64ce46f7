//! Frame layout shared by every target.
//!
//! ```text
//!   incoming arguments        frame_size + 8 + 8*i   (caller's outgoing area)
//!   ─────────────────────────  frame_size
//!   return address / saved registers (spill area)
//!   value slots                8 + 8*out_args + 8*i
//!   outgoing arguments         8 + 8*i
//!   current method             0
//!   ─────────────────────────  sp
//! ```
//!
//! All slots are 8 bytes wide regardless of the pointer size, so 64-bit
//! values fit in a single slot on every target.

use crate::backend::{Register, RegisterFile};

const SLOT_SIZE: u32 = 8;
const STACK_ALIGNMENT: u32 = 16;

/// Sizes and offsets of one method's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    frame_size: u32,
    core_spill_mask: u32,
    return_address_bit: u32,
    out_args: u32,
    slots: u32,
    pointer_size: u32,
}

impl FrameLayout {
    /// Lays out a frame with `out_args` outgoing argument slots, `slots`
    /// value slots and the callee-saved registers in `callee_saves`.
    #[must_use]
    pub fn new(
        registers: &RegisterFile,
        pointer_size: u32,
        out_args: u32,
        slots: u32,
        callee_saves: u32,
    ) -> Self {
        let core_spill_mask = callee_saves | registers.return_address_bit;
        let spill_area = core_spill_mask.count_ones() * pointer_size;
        let locals = SLOT_SIZE * (1 + out_args + slots);
        let frame_size = (spill_area + locals).next_multiple_of(STACK_ALIGNMENT);
        Self {
            frame_size,
            core_spill_mask,
            return_address_bit: registers.return_address_bit,
            out_args,
            slots,
            pointer_size,
        }
    }

    /// Total frame size in bytes, return address included.
    #[must_use]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Saved core registers, with the bit standing for the return address.
    #[must_use]
    pub fn core_spill_mask(&self) -> u32 {
        self.core_spill_mask
    }

    /// Bytes occupied by the return address and saved registers.
    #[must_use]
    pub fn spill_area_size(&self) -> u32 {
        self.core_spill_mask.count_ones() * self.pointer_size
    }

    /// Bytes to subtract from the stack pointer once registers are saved.
    #[must_use]
    pub fn adjustment(&self) -> u32 {
        self.frame_size - self.spill_area_size()
    }

    /// Callee-saved registers to preserve, ascending.
    pub fn callee_saves(&self) -> impl Iterator<Item = Register> {
        let mask = self.core_spill_mask & !self.return_address_bit;
        (0..32u8).filter(move |bit| mask & (1 << bit) != 0).map(Register)
    }

    /// Number of outgoing argument slots.
    #[must_use]
    pub fn out_args(&self) -> u32 {
        self.out_args
    }

    /// Number of value slots.
    #[must_use]
    pub fn slots(&self) -> u32 {
        self.slots
    }

    /// Offset of the current method.
    #[must_use]
    pub fn method_offset(&self) -> i32 {
        0
    }

    /// Offset of outgoing argument `index`.
    #[must_use]
    pub fn out_arg_offset(&self, index: u32) -> i32 {
        (SLOT_SIZE * (1 + index)) as i32
    }

    /// Offset of value slot `slot`.
    #[must_use]
    pub fn slot_offset(&self, slot: u32) -> i32 {
        (SLOT_SIZE * (1 + self.out_args + slot)) as i32
    }

    /// Offset of incoming argument `index` in the caller's frame.
    #[must_use]
    pub fn incoming_arg_offset(&self, index: u32) -> i32 {
        (self.frame_size + SLOT_SIZE * (1 + index)) as i32
    }
}
