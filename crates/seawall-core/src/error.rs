//! Error Types for Seawall Core
//!
//! Covers failures while encoding or decoding segment headers and records.
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: a segment header doesn't start with the expected magic
//! - `ChecksumMismatch`: corruption detected via CRC32
//! - `NonceMismatch`: the record was written by a different incarnation of
//!   the segment (stale data, usually the logical end of the segment)
//!
//! ### Structural Errors
//! - `Truncated`: the buffer ends before the structure does
//! - `MalformedRecord`: lengths or counts inside a record are inconsistent
//!
//! All decoding functions return `Result<T>` aliased to `Result<T, Error>`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u16),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Segment nonce mismatch: expected {expected:#018x}, found {found:#018x}")]
    NonceMismatch { expected: u64, found: u64 },

    #[error("Truncated input: needed {needed} bytes, had {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

pub type Result<T> = std::result::Result<T, Error>;
