//! Error types for the car library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for archive operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Archive file does not exist or cannot be accessed
    #[error("archive file not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid magic bytes where a fixed-format structure was expected
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// A rendition carries a pixel format the codec cannot decode
    #[error("unsupported pixel format: {0:#010x}")]
    UnsupportedPixelFormat(u32),

    /// A payload chunk is tagged with a compression algorithm the backend
    /// cannot handle
    #[error("unsupported compression algorithm: {0}")]
    UnsupportedCompression(u32),

    /// Bad magic, truncated chunk, or mid-stream decompression failure
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Container or record creation failed; fatal to the whole write
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// A rendition lacks the "identifier" attribute and cannot be indexed
    #[error("rendition has no identifier attribute: {0}")]
    MissingIdentifier(String),

    /// Encoding a rendition payload failed (empty or opaque-data payload)
    #[error("cannot encode payload: {0}")]
    EmptyPayload(String),

    /// A named variable or subtree is absent from the container store
    #[error("store variable not found: {0}")]
    VariableNotFound(String),

    /// File is truncated or otherwise too short
    #[error("unexpected end of data at position {0}")]
    UnexpectedEof(u64),

    /// Memory mapping the store file failed
    #[error("memory mapping failed: {0}")]
    MmapFailed(String),

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored name or string is not valid UTF-8
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Anything without a dedicated variant
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a corrupt-data error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptData(msg.into())
    }
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
