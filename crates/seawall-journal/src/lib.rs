//! Seawall Journal
//!
//! A segmented write-ahead journal for a transactional object-storage
//! engine. Records - bundles of metadata deltas plus optional data
//! extents - are appended atomically to fixed-size segments on a block
//! device and replayed in commit order on restart. The journal is the
//! durability boundary: a record is durable exactly when its encoded bytes
//! have hit the segment device.
//!
//! ## Architecture
//!
//! ```text
//! submit_record(record, handle)
//!        │
//!        ▼
//! ┌──────────────────┐   batches, io_depth bound,
//! │ RecordSubmitter  │   fast path / batching / suspension
//! └────────┬─────────┘
//!          │ encoded batches
//!          ▼
//! ┌───────────────────────┐   current segment, nonce,
//! │ JournalSegmentManager │   written_to / committed_to,
//! └────────┬──────────────┘   rolls via SegmentProvider
//!          │ block-aligned writes
//!          ▼
//! ┌──────────────────┐
//! │  SegmentManager  │   block device (file-backed, in-memory, ...)
//! └──────────────────┘
//! ```
//!
//! A separate replay driver sits above the scanner at startup and is done
//! before `open_for_write`.
//!
//! ## Main Components
//!
//! - [`Journal`]: the embedding surface - open, submit, replay, close
//! - [`OrderingHandle`] / [`WritePipeline`]: the caller's transaction
//!   ordering token and the two-stage pipeline behind it
//! - [`SegmentManager`] / [`Segment`] / [`SegmentProvider`]: the consumed
//!   device contracts
//! - [`FileSegmentManager`] / [`MemorySegmentManager`]: device
//!   implementations
//! - [`SegmentScanner`]: record iteration within a segment, used by replay
//! - [`DeltaHandler`]: the caller-supplied delta applier
//!
//! ## Error contract
//!
//! I/O-class failures poison the journal until it is reopened; an oversize
//! record fails only that submission. See [`error::Error`].

mod batch;
pub mod config;
pub mod device;
pub mod error;
pub mod file;
pub mod journal;
pub mod memory;
pub mod pipeline;
pub mod replay;
pub mod scanner;
pub mod segments;
mod submitter;

pub use config::JournalConfig;
pub use device::{Segment, SegmentManager, SegmentProvider};
pub use error::{Error, Result};
pub use file::FileSegmentManager;
pub use journal::Journal;
pub use memory::{MemorySegmentManager, SequentialSegmentProvider};
pub use pipeline::{OrderingHandle, WritePipeline};
pub use replay::DeltaHandler;
pub use scanner::{RecordScan, ScannedRecord, SegmentScanner};
pub use segments::JournalSegmentManager;
