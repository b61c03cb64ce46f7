//! Decides whether a method is compiled at all.

use strum::Display;

use crate::{backend::Architecture, bytecode::MethodDescriptor, driver::CompilerOptions};

/// Why a method is left to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IneligibleReason {
    /// No code generator for the target.
    #[strum(serialize = "unsupported instruction set")]
    UnsupportedArchitecture,
    /// Too many code units or registers.
    #[strum(serialize = "pathological method")]
    Pathological,
}

/// The gate's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Compile for this architecture, which may differ from the requested one.
    Eligible(Architecture),
    /// Do not compile.
    Ineligible(IneligibleReason),
}

/// Checks the target and the method's shape before any work is done.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityGate {
    arm32_soft_float: bool,
    pathological_limit: usize,
}

impl EligibilityGate {
    /// Creates a gate from the compiler options.
    #[must_use]
    pub fn new(options: &CompilerOptions) -> Self {
        Self {
            arm32_soft_float: options.arm32_soft_float,
            pathological_limit: options.pathological_limit,
        }
    }

    /// Evaluates `method` for the `requested` target. `arm` is compiled as
    /// `thumb2`.
    #[must_use]
    pub fn evaluate(&self, requested: Architecture, method: &MethodDescriptor) -> Eligibility {
        let arch = match requested {
            Architecture::Arm => Architecture::Thumb2,
            other => other,
        };
        if !self.supports(arch) {
            return Eligibility::Ineligible(IneligibleReason::UnsupportedArchitecture);
        }
        if self.is_pathological(method) {
            return Eligibility::Ineligible(IneligibleReason::Pathological);
        }
        Eligibility::Eligible(arch)
    }

    fn supports(&self, arch: Architecture) -> bool {
        match arch {
            Architecture::Thumb2 => !self.arm32_soft_float,
            Architecture::Arm64 | Architecture::X86 | Architecture::X86_64 => true,
            Architecture::Arm | Architecture::Mips | Architecture::Mips64 => false,
        }
    }

    fn is_pathological(&self, method: &MethodDescriptor) -> bool {
        let code = &method.code;
        code.insns.len() >= self.pathological_limit
            || usize::from(code.registers_size) >= self.pathological_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{AccessFlags, CodeItem};

    fn method(registers_size: u16, insns: usize) -> MethodDescriptor {
        MethodDescriptor::new(
            0,
            "Main.run",
            "V",
            AccessFlags::STATIC,
            CodeItem {
                registers_size,
                ins_size: 0,
                insns: vec![0x000e; insns],
                tries: Vec::new(),
            },
        )
    }

    #[test]
    fn arm_is_upgraded_to_thumb2() {
        let gate = EligibilityGate::new(&CompilerOptions::default());
        assert_eq!(
            gate.evaluate(Architecture::Arm, &method(1, 1)),
            Eligibility::Eligible(Architecture::Thumb2)
        );
    }

    #[test]
    fn soft_float_disables_thumb2() {
        let gate = EligibilityGate::new(&CompilerOptions::default().with_arm32_soft_float(true));
        for arch in [Architecture::Arm, Architecture::Thumb2] {
            assert_eq!(
                gate.evaluate(arch, &method(1, 1)),
                Eligibility::Ineligible(IneligibleReason::UnsupportedArchitecture)
            );
        }
        assert!(matches!(
            gate.evaluate(Architecture::Arm64, &method(1, 1)),
            Eligibility::Eligible(Architecture::Arm64)
        ));
    }

    #[test]
    fn mips_is_unsupported() {
        let gate = EligibilityGate::new(&CompilerOptions::default());
        for arch in [Architecture::Mips, Architecture::Mips64] {
            assert_eq!(
                gate.evaluate(arch, &method(1, 1)),
                Eligibility::Ineligible(IneligibleReason::UnsupportedArchitecture)
            );
        }
    }

    #[test]
    fn huge_methods_are_pathological() {
        let gate = EligibilityGate::new(&CompilerOptions::default());
        let limit = usize::from(u16::MAX / 4);
        assert_eq!(
            gate.evaluate(Architecture::X86, &method(1, limit)),
            Eligibility::Ineligible(IneligibleReason::Pathological)
        );
        assert_eq!(
            gate.evaluate(Architecture::X86, &method(u16::MAX / 4, 1)),
            Eligibility::Ineligible(IneligibleReason::Pathological)
        );
        assert!(matches!(
            gate.evaluate(Architecture::X86, &method(u16::MAX / 4 - 1, limit - 1)),
            Eligibility::Eligible(_)
        ));
    }
}
