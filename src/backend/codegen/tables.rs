//! Metadata tables attached to compiled code.
//!
//! Integers are LEB128 encoded unless noted otherwise.
//!
//! ```text
//! mapping table   [total][pc2dex count] { native_pc delta (u), dex_pc delta (s) }*
//! stack maps      [count][dex registers][stack mask bytes]
//!                 { native_pc (u), dex_pc (u), register mask (u), stack mask, locations }*
//! vmap table      [count] { promoted vreg + 2 (u) }* [marker]
//! native GC map   width | refs width << 3, refs width >> 5, count lo, count hi (bytes)
//!                 { native_pc (width bytes LE), reference bitmap }*
//! ```

use crate::{
    backend::Register,
    utils::{leb128, BitSet},
};

/// A native pc paired with the dex pc it was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PcInfo {
    /// Offset into the compiled code.
    pub native_pc: u32,
    /// Offset into the method's bytecode, in code units.
    pub dex_pc: u32,
}

/// Native-to-dex correspondence for every emitted instruction, collected
/// when debug symbols are requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    entries: Vec<PcInfo>,
}

impl SourceMap {
    /// Appends an entry.
    pub fn push(&mut self, entry: PcInfo) {
        self.entries.push(entry);
    }

    /// Entries in emission order.
    #[must_use]
    pub fn entries(&self) -> &[PcInfo] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where a virtual register's value lives at a safepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexRegisterLocation {
    /// No live value.
    None,
    /// In a core register.
    InRegister(Register),
    /// In the frame, at this offset from the stack pointer.
    InStack(i32),
    /// A known constant.
    Constant(i64),
}

impl DexRegisterLocation {
    fn kind(self) -> u8 {
        match self {
            DexRegisterLocation::None => 0,
            DexRegisterLocation::InRegister(_) => 1,
            DexRegisterLocation::InStack(_) => 2,
            DexRegisterLocation::Constant(_) => 3,
        }
    }
}

/// Frame state recorded at one safepoint of optimized code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapEntry {
    /// Native pc right after the safepoint.
    pub native_pc: u32,
    /// Dex pc of the safepoint.
    pub dex_pc: u32,
    /// Core registers holding references.
    pub register_mask: u32,
    /// Spill slots holding references.
    pub stack_mask: BitSet,
    /// Location of every virtual register.
    pub dex_registers: Vec<DexRegisterLocation>,
}

/// Encodes the pc-to-dex mapping of `safepoints` merged with the optional
/// per-instruction `source` entries.
#[must_use]
pub fn encode_mapping_table(safepoints: &[PcInfo], source: &[PcInfo]) -> Vec<u8> {
    let mut entries: Vec<PcInfo> = safepoints.iter().chain(source).copied().collect();
    entries.sort_unstable();
    entries.dedup();

    let mut out = Vec::new();
    let count = entries.len() as u32;
    leb128::write_unsigned(&mut out, count);
    leb128::write_unsigned(&mut out, count);
    let mut previous = PcInfo {
        native_pc: 0,
        dex_pc: 0,
    };
    for entry in entries {
        leb128::write_unsigned(&mut out, entry.native_pc - previous.native_pc);
        leb128::write_signed(&mut out, entry.dex_pc as i32 - previous.dex_pc as i32);
        previous = entry;
    }
    out
}

/// Encodes optimized stack maps for a method with `number_of_vregs`
/// virtual registers and `spill_slots` frame slots.
#[must_use]
pub fn encode_stack_maps(entries: &[StackMapEntry], number_of_vregs: u16, spill_slots: u32) -> Vec<u8> {
    let mask_bytes = (spill_slots as usize).div_ceil(8);
    let mut out = Vec::new();
    leb128::write_unsigned(&mut out, entries.len() as u32);
    leb128::write_unsigned(&mut out, u32::from(number_of_vregs));
    leb128::write_unsigned(&mut out, mask_bytes as u32);
    for entry in entries {
        leb128::write_unsigned(&mut out, entry.native_pc);
        leb128::write_unsigned(&mut out, entry.dex_pc);
        leb128::write_unsigned(&mut out, entry.register_mask);
        let mut mask = entry.stack_mask.to_bytes();
        mask.resize(mask_bytes, 0);
        out.extend_from_slice(&mask);
        for &location in &entry.dex_registers {
            out.push(location.kind());
            match location {
                DexRegisterLocation::None => {}
                DexRegisterLocation::InRegister(reg) => {
                    leb128::write_unsigned(&mut out, u32::from(reg.number()));
                }
                DexRegisterLocation::InStack(offset) => leb128::write_signed(&mut out, offset),
                DexRegisterLocation::Constant(value) => {
                    leb128::write_signed(&mut out, value as i32);
                    leb128::write_signed(&mut out, (value >> 32) as i32);
                }
            }
        }
    }
    out
}

/// Marker separating core from floating-point entries of a vmap table.
pub const VMAP_FP_MARKER: u16 = 0xffff;

/// Entries are stored biased so the marker encodes in one byte.
const VMAP_ENTRY_ADJUSTMENT: u16 = 2;

/// Encodes a vmap table for virtual registers promoted to core registers.
/// Baseline code promotes none.
#[must_use]
pub fn encode_vmap_table(promoted: &[u16]) -> Vec<u8> {
    let mut out = Vec::new();
    leb128::write_unsigned(&mut out, promoted.len() as u32 + 1);
    for &vreg in promoted.iter().chain(std::iter::once(&VMAP_FP_MARKER)) {
        leb128::write_unsigned(&mut out, u32::from(vreg.wrapping_add(VMAP_ENTRY_ADJUSTMENT)));
    }
    out
}

/// Encodes the native GC map: one reference bitmap of `bitmap_width` bytes
/// per safepoint, sorted by native pc.
#[must_use]
pub fn encode_native_gc_map(entries: &[(u32, Vec<u8>)], bitmap_width: usize) -> Vec<u8> {
    let max_pc = entries.iter().map(|(pc, _)| *pc).max().unwrap_or(0);
    let pc_width = match max_pc {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    };
    let count = entries.len();

    let mut out = Vec::with_capacity(4 + count * (pc_width + bitmap_width));
    out.push((pc_width as u8) | ((bitmap_width as u8 & 0x1f) << 3));
    out.push((bitmap_width >> 5) as u8);
    out.push((count & 0xff) as u8);
    out.push(((count >> 8) & 0xff) as u8);

    let mut sorted: Vec<&(u32, Vec<u8>)> = entries.iter().collect();
    sorted.sort_by_key(|(pc, _)| *pc);
    for (pc, bitmap) in sorted {
        out.extend_from_slice(&pc.to_le_bytes()[..pc_width]);
        let mut bitmap = bitmap.clone();
        bitmap.resize(bitmap_width, 0);
        out.extend_from_slice(&bitmap);
    }
    out
}
