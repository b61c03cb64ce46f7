//! Target architectures and their register files.

use std::fmt;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// A machine register, numbered as in the target's instruction encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Register(pub u8);

impl Register {
    /// Encoding number.
    #[must_use]
    #[inline]
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Single-bit mask for spill masks and stack maps.
    #[must_use]
    #[inline]
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Instruction sets a compilation can target.
///
/// Only `thumb2`, `arm64`, `x86` and `x86_64` have a code generator; `arm`
/// is compiled as `thumb2`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
pub enum Architecture {
    /// 32-bit ARM, A32 encoding
    #[strum(serialize = "arm")]
    Arm,
    /// 32-bit ARM, T32 encoding
    #[strum(serialize = "thumb2")]
    Thumb2,
    /// AArch64
    #[strum(serialize = "arm64")]
    Arm64,
    /// IA-32
    #[strum(serialize = "x86")]
    X86,
    /// AMD64
    #[strum(serialize = "x86_64")]
    X86_64,
    /// 32-bit MIPS
    #[strum(serialize = "mips")]
    Mips,
    /// 64-bit MIPS
    #[strum(serialize = "mips64")]
    Mips64,
}

impl Architecture {
    /// Register file of the architectures with a code generator.
    #[must_use]
    pub fn register_file(self) -> Option<&'static RegisterFile> {
        match self {
            Architecture::Thumb2 => Some(&THUMB2),
            Architecture::Arm64 => Some(&ARM64),
            Architecture::X86 => Some(&X86),
            Architecture::X86_64 => Some(&X86_64),
            Architecture::Arm | Architecture::Mips | Architecture::Mips64 => None,
        }
    }

    /// Pointer width in bytes.
    #[must_use]
    pub const fn pointer_size(self) -> u32 {
        match self {
            Architecture::Arm64 | Architecture::X86_64 | Architecture::Mips64 => 8,
            Architecture::Arm | Architecture::Thumb2 | Architecture::X86 | Architecture::Mips => 4,
        }
    }

    /// `true` for targets whose core registers hold 64 bits.
    #[must_use]
    pub const fn is_64bit(self) -> bool {
        self.pointer_size() == 8
    }
}

/// How generated code uses a target's core registers.
///
/// Values are passed to callees through the outgoing argument area of the
/// frame, so argument registers only carry the callee method. The scratch
/// pair and the address temporary are never allocated: code generation uses
/// them to reload spilled operands and to build large offsets.
#[derive(Debug)]
pub struct RegisterFile {
    /// Number of core registers, including reserved ones.
    pub core_registers: u8,
    /// Allocatable registers the callee may clobber.
    pub caller_saved: &'static [Register],
    /// Allocatable registers preserved across calls.
    pub callee_saved: &'static [Register],
    /// Two temporaries for operand reloads.
    pub scratch: [Register; 2],
    /// Temporary for out-of-range memory offsets.
    pub address_temp: Register,
    /// Stack pointer.
    pub stack_pointer: Register,
    /// Holds the callee method on entry and at calls.
    pub method_register: Register,
    /// Return value, low half on 32-bit targets.
    pub return_register: Register,
    /// High half of a 64-bit return value on 32-bit targets.
    pub return_register_high: Option<Register>,
    /// Spill-mask bit standing for the return address.
    pub return_address_bit: u32,
    /// Thread register, `None` where thread data is segment addressed.
    pub thread_register: Option<Register>,
}

impl RegisterFile {
    /// Mask of every allocatable callee-saved register.
    #[must_use]
    pub fn callee_saved_mask(&self) -> u32 {
        self.callee_saved.iter().fold(0, |mask, reg| mask | reg.mask())
    }

    /// Number of allocatable registers.
    #[must_use]
    pub fn allocatable(&self) -> usize {
        self.caller_saved.len() + self.callee_saved.len()
    }
}

const fn regs<const N: usize>(numbers: [u8; N]) -> [Register; N] {
    let mut out = [Register(0); N];
    let mut i = 0;
    while i < N {
        out[i] = Register(numbers[i]);
        i += 1;
    }
    out
}

const THUMB2_CALLER: [Register; 3] = regs([0, 1, 2]);
const THUMB2_CALLEE: [Register; 6] = regs([5, 6, 7, 8, 10, 11]);

/// T32: r9 is the thread register, r12 (ip) and lr are scratch.
pub const THUMB2: RegisterFile = RegisterFile {
    core_registers: 16,
    caller_saved: &THUMB2_CALLER,
    callee_saved: &THUMB2_CALLEE,
    scratch: [Register(12), Register(14)],
    address_temp: Register(3),
    stack_pointer: Register(13),
    method_register: Register(0),
    return_register: Register(0),
    return_register_high: Some(Register(1)),
    return_address_bit: 1 << 14,
    thread_register: Some(Register(9)),
};

const ARM64_CALLER: [Register; 15] = regs([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]);
const ARM64_CALLEE: [Register; 9] = regs([20, 21, 22, 23, 24, 25, 26, 27, 28]);

/// A64: x19 is the thread register, ip0/ip1 are scratch, x15 builds offsets.
pub const ARM64: RegisterFile = RegisterFile {
    core_registers: 32,
    caller_saved: &ARM64_CALLER,
    callee_saved: &ARM64_CALLEE,
    scratch: [Register(16), Register(17)],
    address_temp: Register(15),
    stack_pointer: Register(31),
    method_register: Register(0),
    return_register: Register(0),
    return_register_high: None,
    return_address_bit: 1 << 30,
    thread_register: Some(Register(19)),
};

const X86_CALLER: [Register; 2] = regs([1, 3]);
const X86_CALLEE: [Register; 3] = regs([5, 6, 7]);

/// IA-32: eax/edx are scratch and the return pair; thread data lives in `fs`.
pub const X86: RegisterFile = RegisterFile {
    core_registers: 8,
    caller_saved: &X86_CALLER,
    callee_saved: &X86_CALLEE,
    scratch: [Register(0), Register(2)],
    address_temp: Register(0),
    stack_pointer: Register(4),
    method_register: Register(0),
    return_register: Register(0),
    return_register_high: Some(Register(2)),
    return_address_bit: 1 << 8,
    thread_register: None,
};

const X86_64_CALLER: [Register; 7] = regs([1, 2, 6, 7, 8, 9, 10]);
const X86_64_CALLEE: [Register; 6] = regs([3, 5, 12, 13, 14, 15]);

/// AMD64: rax/r11 are scratch; thread data lives in `gs`.
pub const X86_64: RegisterFile = RegisterFile {
    core_registers: 16,
    caller_saved: &X86_64_CALLER,
    callee_saved: &X86_64_CALLEE,
    scratch: [Register(0), Register(11)],
    address_temp: Register(11),
    stack_pointer: Register(4),
    method_register: Register(7),
    return_register: Register(0),
    return_register_high: None,
    return_address_bit: 1 << 16,
    thread_register: None,
};

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn names_round_trip() {
        for arch in Architecture::iter() {
            assert_eq!(Architecture::from_str(&arch.to_string()).ok(), Some(arch));
        }
        assert_eq!(Architecture::X86_64.to_string(), "x86_64");
    }

    #[test]
    fn reserved_registers_are_never_allocatable() {
        for arch in Architecture::iter() {
            let Some(file) = arch.register_file() else {
                continue;
            };
            let allocatable: Vec<_> = file
                .caller_saved
                .iter()
                .chain(file.callee_saved)
                .copied()
                .collect();
            let mut reserved = vec![file.stack_pointer, file.address_temp];
            reserved.extend(file.scratch);
            reserved.extend(file.thread_register);
            for reg in reserved {
                assert!(!allocatable.contains(&reg), "{arch}: {reg} is reserved");
            }
            assert!(allocatable.iter().all(|reg| reg.0 < file.core_registers));
        }
    }

    #[test]
    fn only_four_targets_generate_code() {
        let supported: Vec<_> = Architecture::iter()
            .filter(|arch| arch.register_file().is_some())
            .collect();
        assert_eq!(
            supported,
            [
                Architecture::Thumb2,
                Architecture::Arm64,
                Architecture::X86,
                Architecture::X86_64
            ]
        );
    }
}
