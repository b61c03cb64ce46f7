//! The immutable description of one method handed to the compiler.

use bitflags::bitflags;

use crate::ir::DataType;

bitflags! {
    /// Method access flags as stored in the class definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only to the defining class
        const PRIVATE = 0x0002;
        /// Visible to the package and subclasses
        const PROTECTED = 0x0004;
        /// No `this` argument
        const STATIC = 0x0008;
        /// Not overridable
        const FINAL = 0x0010;
        /// Acquires the monitor around the call
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge
        const BRIDGE = 0x0040;
        /// Last argument is a rest argument
        const VARARGS = 0x0080;
        /// Implemented in native code
        const NATIVE = 0x0100;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Strict floating point
        const STRICT = 0x0800;
        /// Not directly present in source
        const SYNTHETIC = 0x1000;
        /// Constructor or class initializer
        const CONSTRUCTOR = 0x0001_0000;
        /// Declared `synchronized`
        const DECLARED_SYNCHRONIZED = 0x0002_0000;
    }
}

/// One exception-handling region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryItem {
    /// First covered code unit.
    pub start_addr: u32,
    /// Number of covered code units.
    pub insn_count: u16,
    /// Offset of the handler list.
    pub handler_off: u16,
}

/// The body of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeItem {
    /// Virtual registers used by the method, parameters included.
    pub registers_size: u16,
    /// Registers occupied by incoming parameters, at the top of the frame.
    pub ins_size: u16,
    /// Code units.
    pub insns: Vec<u16>,
    /// Exception-handling regions.
    pub tries: Vec<TryItem>,
}

/// Identity, signature and body of the method to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Index of the method in its method table.
    pub method_idx: u32,
    /// Pretty name used for logs, diagnostics filters and testing markers.
    pub name: String,
    /// Return type followed by parameter types, one character each.
    pub shorty: String,
    /// Access flags.
    pub access_flags: AccessFlags,
    /// Method body.
    pub code: CodeItem,
}

impl MethodDescriptor {
    /// Creates a descriptor.
    pub fn new(
        method_idx: u32,
        name: impl Into<String>,
        shorty: impl Into<String>,
        access_flags: AccessFlags,
        code: CodeItem,
    ) -> Self {
        Self {
            method_idx,
            name: name.into(),
            shorty: shorty.into(),
            access_flags,
            code,
        }
    }

    /// `true` if the method has no receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    /// `true` if the method declares at least one exception-handling region.
    #[must_use]
    pub fn has_try_blocks(&self) -> bool {
        !self.code.tries.is_empty()
    }

    /// Declared return type. Unknown characters degrade to `Void`.
    #[must_use]
    pub fn return_type(&self) -> DataType {
        self.shorty
            .chars()
            .next()
            .and_then(DataType::from_shorty)
            .unwrap_or(DataType::Void)
    }

    /// Types of the incoming arguments in register order, receiver first.
    pub fn parameter_types(&self) -> impl Iterator<Item = DataType> + '_ {
        let receiver = (!self.is_static()).then_some(DataType::Reference);
        receiver.into_iter().chain(
            self.shorty
                .chars()
                .skip(1)
                .filter_map(DataType::from_shorty),
        )
    }
}
