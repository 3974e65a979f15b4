//! Error types for adios-core.

use thiserror::Error;

/// Errors surfaced by the scheduler's configuration and attribute paths.
#[derive(Debug, Error)]
pub enum Error {
    /// Attribute name is not part of the tunable surface.
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Value failed to parse or is out of range for the attribute.
    #[error("invalid value for {attr}: {value:?}")]
    InvalidValue {
        /// Attribute being written.
        attr: String,
        /// Rejected input.
        value: String,
    },

    /// Attribute can only be read.
    #[error("attribute {0} is read-only")]
    ReadOnlyAttribute(String),

    /// Attribute can only be written.
    #[error("attribute {0} is write-only")]
    WriteOnlyAttribute(String),

    /// Scheduler configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;
