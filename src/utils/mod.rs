//! Shared utilities: bit sets, graph algorithms and LEB128 helpers.

mod bitset;
pub mod graph;
pub mod leb128;

pub use bitset::BitSet;
