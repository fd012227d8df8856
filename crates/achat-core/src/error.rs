//! Error types for achat channels and buffers

use crate::state::ChannelState;
use thiserror::Error;

/// Result type for every fallible achat operation
pub type Result<T> = std::result::Result<T, AchatError>;

/// The closed set of outcome codes a channel operation can report.
///
/// `AchatError` carries more detail than this; `AchatError::code()` folds it
/// back onto one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    Ok = 0,
    Error = 1,
    NotYetImplemented = 2,
    EndOfFile = 3,
    InvalidParameter = 4,
    OutOfMemory = 5,
    Pending = 6,
    NoSpace = 7,
    WrongState = 8,
}

impl ResultCode {
    /// Collapse a `Result` into its code.
    pub fn of<T>(res: &Result<T>) -> Self {
        match res {
            Ok(_) => ResultCode::Ok,
            Err(e) => e.code(),
        }
    }
}

/// Errors reported by buffers and channels
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AchatError {
    /// A syscall failed with something other than EINTR/EAGAIN
    #[error("{op} failed: errno {errno}")]
    Os { op: &'static str, errno: i32 },

    /// Received length prefix is not a valid frame size
    #[error("corrupt frame: length prefix {0}")]
    CorruptFrame(u32),

    /// Buffer refused to reserve space (chunk too large or hard cap reached)
    #[error("buffer cannot reserve {requested} bytes")]
    Capacity { requested: usize },

    /// Consume/truncate asked for more than the buffer holds
    #[error("buffer underflow: {requested} requested, {available} available")]
    Underflow { requested: usize, available: usize },

    /// Requested feature exists in the protocol but is not implemented
    #[error("not yet implemented: {0}")]
    NotYetImplemented(&'static str),

    /// Peer closed its write side
    #[error("end of file")]
    EndOfFile,

    /// Caller passed an argument outside its valid range
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Allocation failed
    #[error("out of memory")]
    OutOfMemory,

    /// Operation would block; retry once the descriptor is ready
    #[error("operation pending")]
    Pending,

    /// Caller's receive buffer cannot hold the next message
    #[error("receive buffer too small: {needed} bytes needed")]
    NoSpace { needed: usize },

    /// Operation is not valid in the channel's current state
    #[error("{op} not allowed in state {state}")]
    WrongState { op: &'static str, state: ChannelState },
}

impl AchatError {
    /// Map onto the closed result-code enumeration.
    pub fn code(&self) -> ResultCode {
        match self {
            AchatError::Os { .. }
            | AchatError::CorruptFrame(_)
            | AchatError::Capacity { .. }
            | AchatError::Underflow { .. } => ResultCode::Error,
            AchatError::NotYetImplemented(_) => ResultCode::NotYetImplemented,
            AchatError::EndOfFile => ResultCode::EndOfFile,
            AchatError::InvalidParameter(_) => ResultCode::InvalidParameter,
            AchatError::OutOfMemory => ResultCode::OutOfMemory,
            AchatError::Pending => ResultCode::Pending,
            AchatError::NoSpace { .. } => ResultCode::NoSpace,
            AchatError::WrongState { .. } => ResultCode::WrongState,
        }
    }

    /// True when retrying the same call later may succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, AchatError::Pending)
    }

    /// Build an `Os` error from a raw errno.
    #[inline]
    pub fn os(op: &'static str, errno: i32) -> Self {
        AchatError::Os { op, errno }
    }

    /// The errno carried by an `Os` error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            AchatError::Os { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = AchatError::os("connect", 111);
        assert_eq!(format!("{}", e), "connect failed: errno 111");

        let e = AchatError::WrongState { op: "open", state: ChannelState::Initialised };
        assert_eq!(format!("{}", e), "open not allowed in state INITIALISED");
    }

    #[test]
    fn test_codes_collapse_to_error() {
        assert_eq!(AchatError::CorruptFrame(2).code(), ResultCode::Error);
        assert_eq!(AchatError::Capacity { requested: 1 }.code(), ResultCode::Error);
        assert_eq!(AchatError::Underflow { requested: 2, available: 1 }.code(), ResultCode::Error);
        assert_eq!(AchatError::Pending.code(), ResultCode::Pending);
        assert_eq!(AchatError::NoSpace { needed: 3 }.code(), ResultCode::NoSpace);
    }

    #[test]
    fn test_result_code_of() {
        let ok: Result<()> = Ok(());
        assert_eq!(ResultCode::of(&ok), ResultCode::Ok);
        let eof: Result<()> = Err(AchatError::EndOfFile);
        assert_eq!(ResultCode::of(&eof), ResultCode::EndOfFile);
    }

    #[test]
    fn test_only_pending_is_transient() {
        assert!(AchatError::Pending.is_transient());
        assert!(!AchatError::EndOfFile.is_transient());
        assert!(!AchatError::os("write", 32).is_transient());
    }
}
