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

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! codec_error {
    ($offset:expr, $msg:expr) => {
        crate::Error::Codec {
            offset: $offset,
            message: $msg.to_string(),
        }
    };

    ($offset:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Codec {
            offset: $offset,
            message: format!($fmt, $($arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant is local to the method body that produced it. A batch run records the error
/// against that method and carries on with the next one, see
/// [`crate::pipeline::Pipeline::process_batch`].
///
/// # Error Categories
///
/// ## Codec Errors
/// - [`Error::Codec`] - Unknown opcode byte, truncated stream or operand overflow
/// - [`Error::OutOfBounds`] - Low-level reader overrun (the decoder reports it as [`Error::Codec`])
/// - [`Error::Relocation`] - A branch marker could not be resolved while encoding
///
/// ## Input Errors
/// - [`Error::Malformed`] - Input a conforming verifier would have rejected
/// - [`Error::Unsupported`] - A construct that is deliberately not modeled
///
/// ## Analysis Errors
/// - [`Error::GraphError`] - Invalid node or edge reference in a graph operation
///
/// # Examples
///
/// ```rust
/// use abcscope::{assembly::decode, Error};
///
/// match decode(&[0xFF]) {
///     Err(Error::Codec { offset, message }) => {
///         assert_eq!(offset, 0);
///         eprintln!("codec failure: {message}");
///     }
///     other => panic!("unexpected result: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The instruction stream could not be decoded or encoded.
    ///
    /// Raised for unknown opcode bytes, streams that end in the middle of an
    /// instruction and operands that do not fit their encoding.
    ///
    /// # Fields
    ///
    /// * `offset` - Byte offset (decode) or instruction position (encode) of the failure
    /// * `message` - Description of the failure
    #[error("Codec error at {offset}: {message}")]
    Codec {
        /// Byte offset or instruction position of the failure
        offset: usize,
        /// The message to be printed for the Codec error
        message: String,
    },

    /// A branch marker was never bound to an instruction, or the resolved
    /// offset does not fit into a signed 24-bit field.
    ///
    /// The `dump` field carries the full instruction listing of the method so
    /// the offending branch can be located without re-running the pipeline.
    #[error("Relocation error: {message}\n{dump}")]
    Relocation {
        /// What could not be resolved
        message: String,
        /// Textual listing of the instruction stream being encoded
        dump: String,
    },

    /// The method body is damaged or was not produced by a conforming compiler.
    ///
    /// Typical causes are operand stack depth mismatches at control-flow
    /// merges, stack underflow, out-of-range constant pool references and
    /// `null`/`undefined` pushed as a scope object. The error includes the
    /// source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a byte stream.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An opcode or operator combination that is intentionally not modeled.
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    /// Error during graph operations.
    #[error("{0}")]
    GraphError(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` for errors that are confined to the method being processed.
    ///
    /// The batch driver uses this to decide whether a failure may be recorded
    /// and skipped. Every error this crate produces is method-local.
    #[must_use]
    pub fn is_method_local(&self) -> bool {
        true
    }

    /// Short, stable name of the error category, used in batch reports.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Error::Codec { .. } | Error::OutOfBounds { .. } => "codec",
            Error::Relocation { .. } => "relocation",
            Error::Malformed { .. } => "malformed",
            Error::Unsupported(_) => "unsupported",
            Error::GraphError(_) => "graph",
            Error::Error(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_macro_captures_location() {
        let error = malformed_error!("stack depth {} vs {}", 1, 2);
        match error {
            Error::Malformed {
                message,
                file,
                line,
            } => {
                assert_eq!(message, "stack depth 1 vs 2");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(codec_error!(3, "truncated").category(), "codec");
        assert_eq!(out_of_bounds_error!().category(), "codec");
        assert_eq!(Error::Unsupported("x".into()).category(), "unsupported");
        assert!(Error::GraphError("x".into()).is_method_local());
    }
}
