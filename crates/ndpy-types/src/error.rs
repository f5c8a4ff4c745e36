//! Error types for runtime type and array operations.

use thiserror::Error;

/// Result type for runtime type operations.
pub type NdResult<T> = Result<T, NdError>;

/// Errors raised by the array runtime itself, independent of any host bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NdError {
    /// A value does not fit in the destination's range
    #[error("overflow while assigning {value} to {target}")]
    Overflow { value: String, target: String },

    /// A floating value with a fractional part was assigned to an integer
    #[error("fractional part lost while assigning {value} to {target}")]
    Fractional { value: String, target: String },

    /// A value could not be represented exactly
    #[error("inexact assignment of {value} to {target}")]
    Inexact { value: String, target: String },

    /// No conversion exists between two types
    #[error("cannot assign a {src} value to a {dst} value")]
    NotAssignable { src: String, dst: String },

    /// Source extent neither matches nor broadcasts to the destination
    #[error("broadcast error: cannot broadcast {src} to {dst}")]
    Broadcast { src: String, dst: String },

    /// A value is outside the domain of the destination type
    #[error("invalid value for {target}: {reason}")]
    InvalidValue { target: String, reason: String },

    /// Malformed type string
    #[error("type parse error at offset {offset}: {message}")]
    TypeParse { offset: usize, message: String },

    /// Index outside of a dimension's extent
    #[error("index {index} is out of bounds for axis of size {size}")]
    IndexOutOfBounds { index: isize, size: usize },

    /// Read/write permission violation
    #[error("access error: {0}")]
    Access(String),

    /// Known feature that is not implemented
    #[error("not yet supported: {0}")]
    Unsupported(String),

    /// Internal consistency failure
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl NdError {
    pub fn overflow(value: impl ToString, target: impl ToString) -> Self {
        Self::Overflow {
            value: value.to_string(),
            target: target.to_string(),
        }
    }

    pub fn fractional(value: impl ToString, target: impl ToString) -> Self {
        Self::Fractional {
            value: value.to_string(),
            target: target.to_string(),
        }
    }

    pub fn inexact(value: impl ToString, target: impl ToString) -> Self {
        Self::Inexact {
            value: value.to_string(),
            target: target.to_string(),
        }
    }

    pub fn not_assignable(src: impl ToString, dst: impl ToString) -> Self {
        Self::NotAssignable {
            src: src.to_string(),
            dst: dst.to_string(),
        }
    }

    pub fn broadcast(src: impl ToString, dst: impl ToString) -> Self {
        Self::Broadcast {
            src: src.to_string(),
            dst: dst.to_string(),
        }
    }

    pub fn invalid_value(target: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    pub fn access(msg: impl Into<String>) -> Self {
        Self::Access(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Check if this is an arithmetic range error
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }

    /// Check if this is a broadcasting error
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast { .. })
    }
}
