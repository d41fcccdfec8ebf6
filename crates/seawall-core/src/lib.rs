//! Core Types for the Seawall Journal
//!
//! This crate defines the data model shared by the journal write path and the
//! replay path:
//!
//! 1. **Addressing**: segment identifiers, per-segment offsets, physical
//!    addresses and totally ordered journal positions
//! 2. **Records**: metadata deltas plus optional data extents, the atomic
//!    unit of submission
//! 3. **On-disk formats**: segment headers and record headers with CRC32
//!    checksums and per-incarnation nonces
//!
//! Everything here is runtime-agnostic; the async machinery lives in
//! `seawall-journal`.

pub mod error;
pub mod format;
pub mod record;
pub mod types;

pub use error::{Error, Result};
pub use format::{RecordHeader, SegmentHeader};
pub use record::{DeltaInfo, Record, RecordSize};
pub use types::{JournalSeq, Paddr, SegmentId, SegmentNonce, SegmentOff, SegmentSeq};
