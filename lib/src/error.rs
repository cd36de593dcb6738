use thiserror::Error;

/// Error taxonomy shared by every oiXX codec and the audio scheduler.
///
/// Mirrors the kind-based taxonomy the original engine keeps in a hand-rolled
/// `Error` struct (stack trace + two parameter slots); here each kind is its
/// own variant so `thiserror` can derive `Display` and `source` per-kind
/// instead of formatting a generic payload.
#[derive(Error, Debug)]
pub enum OxcError {
    #[error("null pointer: {0}")]
    NullPointer(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("out of bounds: {what} ({got} >= {limit})")]
    OutOfBounds {
        what: &'static str,
        got: u64,
        limit: u64,
    },

    #[error("out of memory")]
    OutOfMemory,

    #[error("attempted to write through a const reference: {0}")]
    ConstData(&'static str),

    #[error("integer overflow: {0}")]
    Overflow(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already defined: {0}")]
    AlreadyDefined(String),

    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("platform error ({code}): {message}")]
    PlatformError { code: i64, message: String },

    #[error("authentication failed (AES-GCM tag mismatch)")]
    AuthenticationFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OxcError>;

impl OxcError {
    pub fn out_of_bounds(what: &'static str, got: u64, limit: u64) -> Self {
        Self::OutOfBounds { what, got, limit }
    }
}
