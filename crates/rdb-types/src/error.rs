//! Errors raised while moving values between Rust and the driver.

use thiserror::Error;

/// A value could not be converted.
#[derive(Debug, Error)]
pub enum TypeError {
    /// NULL arrived where the destination cannot hold it.
    #[error("NULL cannot be stored in a non-optional destination")]
    UnexpectedNull,

    /// The value's kind does not convert to the requested type.
    #[error("cannot convert {actual} to {expected}")]
    TypeMismatch {
        /// Rust or SQL name of the requested type.
        expected: &'static str,
        /// Name of the value's actual kind.
        actual: String,
    },

    /// The value does not fit the requested type.
    #[error("{target} cannot represent the value")]
    OutOfRange {
        /// Name of the requested type.
        target: &'static str,
    },

    /// Bytes or text that do not form a UUID.
    #[error("malformed uuid: {0}")]
    InvalidUuid(String),

    /// Text that does not form a decimal number.
    #[error("malformed decimal: {0}")]
    InvalidDecimal(String),
}
