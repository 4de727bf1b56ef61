//! Error taxonomy for the flow-graph engine.

/// Errors the flow-graph engine can produce.
///
/// Construction-time variants ([`Error::MalformedConnection`],
/// [`Error::Topology`], [`Error::TypeMismatch`], [`Error::RateMismatch`])
/// are returned synchronously from [`crate::composite::Composite::start`]
/// or [`crate::composite::Composite::run`], before any block has been
/// initialized. The rest surface during or after execution.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A connection request was malformed: unknown port name,
    /// double-connect, an alias with the wrong polarity, or a nested
    /// alias that was already bound.
    #[error("malformed connection: {0}")]
    MalformedConnection(String),

    /// The topology itself is invalid: an input was never connected, or
    /// the dependency graph contains a cycle.
    #[error("topology error: {0}")]
    Topology(String),

    /// No declared type signature of a block matches its actual upstream
    /// output types.
    #[error("type mismatch on block {block}: {detail}")]
    TypeMismatch {
        /// Name of the block that failed differentiation.
        block: String,
        /// Human-readable detail (types seen vs. signatures available).
        detail: String,
    },

    /// Two inputs of the same block disagree on sample rate.
    #[error("rate mismatch on block {block}: {detail}")]
    RateMismatch {
        /// Name of the block whose inputs disagree.
        block: String,
        /// Human-readable detail (the rates seen).
        detail: String,
    },

    /// A pipe read or write failed for a reason other than EOF.
    #[error("transport failure: {0}")]
    Transport(String),

    /// An OS-level operation (fork, signal, wait, pipe) failed.
    #[error("OS failure: {0}")]
    Os(String),

    /// A block failed at runtime (returned an error from `run_once`, or
    /// the process driver observed a nonzero child exit).
    #[error("block {block} failed: {detail}")]
    BlockRuntime {
        /// Name of the failing block.
        block: String,
        /// Diagnostic detail.
        detail: String,
    },
}

impl Error {
    /// Shorthand for [`Error::MalformedConnection`].
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedConnection(msg.into())
    }

    /// Shorthand for [`Error::Topology`].
    pub fn topology(msg: impl Into<String>) -> Self {
        Error::Topology(msg.into())
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Os(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;
