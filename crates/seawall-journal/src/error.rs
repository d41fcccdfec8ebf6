//! Journal Error Types
//!
//! Two kinds of failure surface to submitters:
//!
//! - **I/O class** (`Io`, `WriteFailed`, `Closed`, `ProviderNotSet`): the
//!   device, segment provider, or scanner reported a failure, or the journal
//!   is not in a writable state. After one of these the journal is unsafe
//!   for further writes until reopened.
//! - **`RecordTooLarge`**: a single record, even submitted alone, exceeds
//!   the usable space of a segment. The submission fails; the journal
//!   remains usable.
//!
//! Replay additionally reports `Replay` for structural problems in the
//! persisted segment set (duplicate sequences, mid-segment corruption) and
//! `Format` for decoding failures bubbling up from `seawall-core`.
//!
//! A batch write failure is fanned out: every contributor of the batch
//! observes `WriteFailed`; the underlying device error is logged by the
//! write driver.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record of {len} encoded bytes exceeds the max write length {max}")]
    RecordTooLarge { len: u64, max: u64 },

    #[error("Journal is closed")]
    Closed,

    #[error("Segment provider not configured")]
    ProviderNotSet,

    #[error("Write failed")]
    WriteFailed,

    #[error("Replay failed: {0}")]
    Replay(String),

    #[error("Format error: {0}")]
    Format(#[from] seawall_core::Error),
}
