//! Error Types for Host Conversion
//!
//! Every failure raised while converting host values into arrays maps onto
//! one of the variants below. The bridge layer that faces the host turns
//! them into host exceptions.
//!
//! ## Error Categories
//!
//! - Type mismatches (no conversion exists for the value's host type)
//! - Overflow (value outside the destination's range)
//! - Broadcast failures (sizes neither match nor broadcast)
//! - Unsupported features (timezones and the like)
//! - Indeterminate types (nothing to deduce a type from)
//! - Internal invariant violations, which are fatal

use ndpy_types::NdError;
use thiserror::Error;

/// Result type for conversion operations
pub type ConvertResult<T> = Result<T, ConvertError>;

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The conversion failed; the engine is still consistent
    Recoverable,
    /// The engine's own bookkeeping is broken
    Fatal,
}

/// Conversion error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    /// Host value cannot be converted to the destination type
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description naming both sides
        message: String,
    },

    /// Integer or float out of range for the destination
    #[error("overflow: {value} does not fit in {target_type}")]
    Overflow {
        /// Rendering of the offending value
        value: String,
        /// Destination type
        target_type: String,
    },

    /// Sizes neither match nor broadcast, or struct keys disagree
    #[error("broadcast error: {message}")]
    Broadcast {
        /// Description naming the value or field
        message: String,
    },

    /// A recognised but unimplemented feature
    #[error("not yet supported: {feature}")]
    UnsupportedFeature {
        /// The feature
        feature: String,
    },

    /// Deduction found no concrete type
    #[error("cannot deduce a type: {reason}")]
    IndeterminateType {
        /// Why deduction failed
        reason: String,
    },

    /// A value outside the destination's domain
    #[error("invalid value: {message}")]
    InvalidValue {
        /// Description
        message: String,
    },

    /// Read/write permission violation
    #[error("access error: {message}")]
    Access {
        /// Description
        message: String,
    },

    /// Operation a kernel does not provide
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// Description of the operation
        operation: String,
    },

    /// Error reported by host code
    #[error("host error: {exception_type}: {message}")]
    Host {
        /// Host exception type name
        exception_type: String,
        /// Exception message
        message: String,
    },

    /// Internal consistency failure
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description
        message: String,
    },
}

impl ConvertError {
    /// Create a type mismatch error
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        ConvertError::TypeMismatch {
            message: message.into(),
        }
    }

    /// Create an overflow error
    pub fn overflow(value: impl ToString, target_type: impl ToString) -> Self {
        ConvertError::Overflow {
            value: value.to_string(),
            target_type: target_type.to_string(),
        }
    }

    /// Create a broadcast error for a value that cannot be assigned to a type
    pub fn broadcast(value: impl std::fmt::Display, target_type: impl std::fmt::Display) -> Self {
        ConvertError::Broadcast {
            message: format!("cannot assign host value {value} to a {target_type} value"),
        }
    }

    /// Create a broadcast error for a dict key naming no field
    pub fn unknown_field(key: &str, target_type: impl std::fmt::Display) -> Self {
        ConvertError::Broadcast {
            message: format!("input dict has key {key:?}, but no such field is in {target_type}"),
        }
    }

    /// Create a broadcast error for a field absent from a dict
    pub fn missing_field(field: &str, target_type: impl std::fmt::Display) -> Self {
        ConvertError::Broadcast {
            message: format!("input dict does not contain the field {field:?} of {target_type}"),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        ConvertError::UnsupportedFeature {
            feature: feature.into(),
        }
    }

    /// Create an indeterminate type error
    pub fn indeterminate(reason: impl Into<String>) -> Self {
        ConvertError::IndeterminateType {
            reason: reason.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(message: impl Into<String>) -> Self {
        ConvertError::InvalidValue {
            message: message.into(),
        }
    }

    /// Create an access error
    pub fn access(message: impl Into<String>) -> Self {
        ConvertError::Access {
            message: message.into(),
        }
    }

    /// Create a not supported error
    pub fn not_supported(operation: impl Into<String>) -> Self {
        ConvertError::NotSupported {
            operation: operation.into(),
        }
    }

    /// Create a host error
    pub fn host(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::Host {
            exception_type: exception_type.into(),
            message: message.into(),
        }
    }

    /// Create an invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        ConvertError::InvariantViolation {
            message: message.into(),
        }
    }

    /// Whether the engine is still usable after this error
    pub fn severity(&self) -> Severity {
        match self {
            ConvertError::InvariantViolation { .. } => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    /// Check if this is a type-related error
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            ConvertError::TypeMismatch { .. } | ConvertError::IndeterminateType { .. }
        )
    }

    /// Check if this is an overflow
    pub fn is_overflow(&self) -> bool {
        matches!(self, ConvertError::Overflow { .. })
    }

    /// Check if this is a broadcast error
    pub fn is_broadcast(&self) -> bool {
        matches!(self, ConvertError::Broadcast { .. })
    }

    /// Check if this is an indeterminate type
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ConvertError::IndeterminateType { .. })
    }
}

impl From<NdError> for ConvertError {
    fn from(err: NdError) -> Self {
        match err {
            NdError::Overflow { value, target } => ConvertError::Overflow {
                value,
                target_type: target,
            },
            NdError::NotAssignable { .. } => ConvertError::type_mismatch(err.to_string()),
            NdError::Broadcast { .. } => ConvertError::Broadcast {
                message: err.to_string(),
            },
            NdError::Fractional { .. }
            | NdError::Inexact { .. }
            | NdError::InvalidValue { .. }
            | NdError::TypeParse { .. }
            | NdError::IndexOutOfBounds { .. } => ConvertError::invalid_value(err.to_string()),
            NdError::Access(message) => ConvertError::Access { message },
            NdError::Unsupported(feature) => ConvertError::UnsupportedFeature { feature },
            NdError::Invariant(message) => ConvertError::InvariantViolation { message },
        }
    }
}
