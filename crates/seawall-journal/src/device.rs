//! Device Contracts
//!
//! The journal does not talk to hardware directly. It consumes three
//! collaborator contracts, injected at construction or shortly after:
//!
//! - [`SegmentManager`]: a block-addressable device exposing fixed-size
//!   segments. Writes to distinct offsets may be issued concurrently and may
//!   complete in any order; the journal serializes offset allocation, not
//!   device submission.
//! - [`Segment`]: one open segment. Append-only from the journal's point of
//!   view; the journal never writes the same offset twice.
//! - [`SegmentProvider`]: the policy component that names the next segment
//!   to use and is told when a segment is closed. It drives reclamation;
//!   the journal itself never frees a segment.
//!
//! The provider is handed to the journal after construction because the
//! provider's owner also owns the journal; the journal must not outlive it.
//! Shared `Arc` handles make that lifetime relationship explicit.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use seawall_core::{JournalSeq, Paddr, SegmentId};

use crate::error::Result;

/// A block-addressable device of fixed-size segments.
#[async_trait]
pub trait SegmentManager: Send + Sync {
    /// Size of every segment in bytes.
    fn get_segment_size(&self) -> u64;

    /// Device block size; all journal writes are multiples of this.
    fn get_block_size(&self) -> u64;

    /// Open a segment for writing. Opening an existing segment keeps its
    /// previous contents; stale records are fenced by the segment nonce.
    async fn open(&self, id: SegmentId) -> Result<Arc<dyn Segment>>;

    /// Read `len` bytes starting at `addr`.
    async fn read(&self, addr: Paddr, len: u64) -> Result<Bytes>;
}

/// One open, writable segment.
#[async_trait]
pub trait Segment: Send + Sync {
    fn get_segment_id(&self) -> SegmentId;

    /// Bytes writable in this segment; equals the segment size.
    fn get_write_capacity(&self) -> u64;

    /// Write `buf` at `offset`. `offset` and `buf.len()` are block aligned.
    /// Concurrent writes to disjoint ranges are allowed.
    async fn write(&self, offset: u64, buf: Bytes) -> Result<()>;

    /// Finalize the segment; no further writes will be issued.
    async fn close(&self) -> Result<()>;
}

/// Names the next segment for journal writes and observes closures.
pub trait SegmentProvider: Send + Sync {
    /// The segment the journal should roll into next.
    fn get_next_segment_id(&self) -> SegmentId;

    /// Called when the journal closes a segment during a roll. `last_seq`
    /// is the position one past the final byte written to it.
    fn close_segment(&self, id: SegmentId, last_seq: JournalSeq);
}
