//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while framing routine records
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid magic bytes in a record file
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported record version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Unexpected end of record data
    #[error("Unexpected end of record")]
    UnexpectedEnd,

    /// IO error during serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for record operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
