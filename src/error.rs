use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type for everything this library can return.
///
/// Compilation itself never surfaces an `Error`: a method the compiler declines
/// is reported as `None` from [`crate::OptimizingCompiler::compile`]. Errors are
/// produced by the pieces underneath, chiefly the graph builder when it meets
/// bytecode it can not translate, and by the diagnostic sinks when a file can
/// not be opened.
///
/// # Error Categories
///
/// ## Bytecode Errors
/// - [`Error::Malformed`] - Truncated or structurally invalid bytecode
/// - [`Error::UnsupportedOpcode`] - An opcode outside the translated subset
/// - [`Error::InvalidBranchTarget`] - A branch landing in the middle of an instruction
/// - [`Error::OutOfBounds`] - An instruction running past the end of the code
/// - [`Error::Empty`] - A method without any code units
///
/// ## I/O Errors
/// - [`Error::FileError`] - Diagnostic output could not be opened or written
///
/// ## Runtime Errors
/// - [`Error::LockError`] - A diagnostic sink lock was poisoned
///
/// # Examples
///
/// ```rust,no_run
/// use methodc::{ir::{DexGraphBuilder, GraphBuilder}, Error, MethodDescriptor};
///
/// # fn example(method: &MethodDescriptor) {
/// match DexGraphBuilder.build(method) {
///     Ok(graph) => println!("{} blocks", graph.block_count()),
///     Err(Error::UnsupportedOpcode { opcode, dex_pc }) => {
///         println!("opcode {opcode:#04x} at {dex_pc} can not be translated");
///     }
///     Err(e) => println!("error: {e}"),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is damaged or structurally invalid.
    ///
    /// Carries the source location where the problem was detected so that
    /// bug reports against odd inputs can be traced back quickly.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The instruction at `dex_pc` uses an opcode the graph builder does not translate.
    #[error("Unsupported opcode {opcode:#04x} at dex pc {dex_pc}")]
    UnsupportedOpcode {
        /// The raw opcode byte
        opcode: u8,
        /// Code-unit offset of the instruction
        dex_pc: u32,
    },

    /// A branch at `dex_pc` targets an offset that is not the start of an instruction.
    #[error("Branch at dex pc {dex_pc} targets invalid offset {target}")]
    InvalidBranchTarget {
        /// Code-unit offset of the branch
        dex_pc: u32,
        /// The resolved target offset
        target: i64,
    },

    /// A read would have run past the end of the code units.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided method had no code units.
    #[error("Provided method body was empty")]
    Empty,

    /// Filesystem I/O error, raised by the file-backed diagnostic sink.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// A lock guarding shared diagnostic state was poisoned.
    #[error("Failed to lock target")]
    LockError,
}
