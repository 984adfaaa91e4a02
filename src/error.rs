//! Error taxonomy shared by the library and the `scal` binary.
//!
//! Every variant maps to a process exit code so `main.rs` can stay a thin
//! wrapper, the same way the fitting pipeline reports failures to the shell.
//!
//! Solver non-convergence is deliberately *not* an error: it is reported as a
//! flag on the solve report and callers decide whether to accept the result.

#[derive(Clone, PartialEq)]
pub enum CalError {
    /// Too few aligned channels, or a channel shorter than one analysis window.
    InsufficientData(String),
    /// A parameter vector does not match the number of free model entries.
    DimensionMismatch { expected: usize, got: usize },
    /// A response model violates conjugate pairing or holds non-finite values.
    InvalidModel(String),
    /// Catalog lookup miss.
    UnknownResponseName(String),
    /// Channels participating in one computation disagree in length or interval.
    ChannelMismatch(String),
    /// Bad user-supplied configuration or argument.
    InvalidInput(String),
    /// An experiment operation was invoked from the wrong lifecycle state.
    InvalidState(String),
    /// A computation produced values that cannot be recovered from.
    NumericalFailure(String),
    /// File-system or decoding failure.
    Io(String),
}

impl CalError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CalError::InvalidInput(_) | CalError::Io(_) => 2,
            CalError::InsufficientData(_) | CalError::ChannelMismatch(_) => 3,
            CalError::DimensionMismatch { .. }
            | CalError::InvalidModel(_)
            | CalError::UnknownResponseName(_) => 4,
            CalError::InvalidState(_) | CalError::NumericalFailure(_) => 5,
        }
    }

    pub fn io(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        CalError::Io(format!("{context}: {err}"))
    }
}

impl std::fmt::Display for CalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalError::InsufficientData(msg) => write!(f, "Insufficient data: {msg}"),
            CalError::DimensionMismatch { expected, got } => write!(
                f,
                "Parameter vector has {got} entries, expected {expected}."
            ),
            CalError::InvalidModel(msg) => write!(f, "Invalid response model: {msg}"),
            CalError::UnknownResponseName(name) => {
                write!(f, "No response named '{name}' in the catalog.")
            }
            CalError::ChannelMismatch(msg) => write!(f, "Channel mismatch: {msg}"),
            CalError::InvalidInput(msg) => write!(f, "{msg}"),
            CalError::InvalidState(msg) => write!(f, "Invalid experiment state: {msg}"),
            CalError::NumericalFailure(msg) => write!(f, "Numerical failure: {msg}"),
            CalError::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::fmt::Debug for CalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalError")
            .field("exit_code", &self.exit_code())
            .field("message", &self.to_string())
            .finish()
    }
}

impl std::error::Error for CalError {}
