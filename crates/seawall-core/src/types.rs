//! Journal Addressing
//!
//! This module defines how positions in the journal are named.
//!
//! ## The Address Hierarchy
//!
//! - `SegmentId`: names a physical segment on the backing device
//! - `SegmentOff`: a byte offset inside a segment (writes are block-aligned)
//! - `Paddr`: `(SegmentId, SegmentOff)` — a physical address, immutable once
//!   issued
//! - `SegmentSeq`: the logical sequence number of a journal segment, bumped
//!   on every roll
//! - `JournalSeq`: `(SegmentSeq, Paddr)` — a position in the journal's total
//!   order; compares by `(segment_seq, offset)`
//!
//! Segment identifiers are reusable (the segment provider may hand the same
//! physical segment back after reclamation), which is why ordering is driven
//! by `SegmentSeq` rather than `SegmentId`.
//!
//! `JournalSeq::NULL` is the distinguished "no position" value used in
//! on-disk headers before anything has committed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Logical sequence number of a journal segment. Bumped on every roll.
pub type SegmentSeq = u64;

/// Random value distinguishing reincarnations of the same physical segment.
pub type SegmentNonce = u64;

/// Byte offset within a segment.
pub type SegmentOff = u64;

/// Identifier of a physical segment on the backing device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg({})", self.0)
    }
}

/// A physical address: a byte position inside a specific segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Paddr {
    pub segment: SegmentId,
    pub offset: SegmentOff,
}

impl Paddr {
    pub fn new(segment: SegmentId, offset: SegmentOff) -> Self {
        Self { segment, offset }
    }

    /// The address `delta` bytes further into the same segment.
    pub fn add_offset(&self, delta: u64) -> Paddr {
        Paddr {
            segment: self.segment,
            offset: self.offset + delta,
        }
    }
}

impl fmt::Display for Paddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.segment, self.offset)
    }
}

/// A position in the journal's total order.
///
/// Ordering is `(segment_seq, offset)`; the segment id does not participate
/// because physical segments are reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JournalSeq {
    pub segment_seq: SegmentSeq,
    pub addr: Paddr,
}

impl JournalSeq {
    /// The distinguished "no position" value used in on-disk headers before
    /// anything has committed.
    pub const NULL: JournalSeq = JournalSeq {
        segment_seq: u64::MAX,
        addr: Paddr {
            segment: SegmentId(u64::MAX),
            offset: u64::MAX,
        },
    };

    pub fn new(segment_seq: SegmentSeq, addr: Paddr) -> Self {
        Self { segment_seq, addr }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// The position `delta` bytes further into the same segment.
    pub fn add_offset(&self, delta: u64) -> JournalSeq {
        debug_assert!(!self.is_null());
        JournalSeq {
            segment_seq: self.segment_seq,
            addr: self.addr.add_offset(delta),
        }
    }
}

impl PartialOrd for JournalSeq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JournalSeq {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segment_seq
            .cmp(&other.segment_seq)
            .then(self.addr.offset.cmp(&other.addr.offset))
    }
}

impl fmt::Display for JournalSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "jseq(null)")
        } else {
            write!(f, "jseq({}@{})", self.segment_seq, self.addr)
        }
    }
}

/// Round `len` up to the next multiple of `block_size`.
pub fn block_align_up(len: u64, block_size: u64) -> u64 {
    debug_assert!(block_size.is_power_of_two());
    (len + block_size - 1) & !(block_size - 1)
}

/// True iff `len` is a multiple of `block_size`.
pub fn is_block_aligned(len: u64, block_size: u64) -> bool {
    debug_assert!(block_size.is_power_of_two());
    len & (block_size - 1) == 0
}
