//! Record Data Structures
//!
//! This module defines the `Record` type - the atomic unit of journal
//! submission.
//!
//! ## What is a Record?
//!
//! A record bundles two things:
//! - **deltas**: serialized state changes that an external applier replays
//!   on restart; the journal carries them verbatim
//! - **data extents**: optional raw payload buffers written alongside the
//!   deltas so that a transaction's metadata and data hit the device in a
//!   single atomic append
//!
//! ## Sizing
//!
//! The encoded layout of a record is two block-aligned regions:
//!
//! ```text
//! [ record header | delta payloads | extent table | pad ]  <- mdlength
//! [ extent 0 (padded) | extent 1 (padded) | ...        ]  <- dlength
//! ```
//!
//! `RecordSize` captures both region lengths. It is computed once, before the
//! scheduling decision, because the submitter needs the encoded length to
//! decide between the fast path, batching, and segment rolls.
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` so moving a record into a batch never copies payload
//! - Deltas are opaque: the journal does not interpret them, it only
//!   guarantees ordered, durable redelivery

use bytes::Bytes;

use crate::format::RECORD_HEADER_SIZE;
use crate::types::block_align_up;

/// A single serialized state change, carried verbatim through the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaInfo {
    /// Opaque payload understood by the external applier.
    pub payload: Bytes,
}

impl DeltaInfo {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// The atomic unit of submission: metadata deltas plus optional data extents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Ordered deltas, replayed in this order.
    pub deltas: Vec<DeltaInfo>,
    /// Ordered raw data buffers.
    pub extents: Vec<Bytes>,
}

impl Record {
    pub fn new(deltas: Vec<DeltaInfo>, extents: Vec<Bytes>) -> Self {
        Self { deltas, extents }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.extents.is_empty()
    }
}

/// Block-aligned lengths of a record's two encoded regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSize {
    /// Length of the metadata region: header, delta payloads and the extent
    /// table, rounded up to the block size.
    pub mdlength: u64,
    /// Length of the data region: each extent individually rounded up to the
    /// block size.
    pub dlength: u64,
}

impl RecordSize {
    /// Compute the encoded footprint of `record` at the given block size.
    pub fn for_record(record: &Record, block_size: u64) -> Self {
        let mut md = RECORD_HEADER_SIZE as u64;
        for delta in &record.deltas {
            md += 4 + delta.payload.len() as u64;
        }
        // extent table: one u64 original length per extent
        md += 8 * record.extents.len() as u64;

        let mut data = 0u64;
        for extent in &record.extents {
            data += block_align_up(extent.len() as u64, block_size);
        }

        Self {
            mdlength: block_align_up(md, block_size),
            dlength: data,
        }
    }

    /// Total encoded length of the record.
    pub fn encoded_length(&self) -> u64 {
        self.mdlength + self.dlength
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u64 = 4096;

    fn delta(n: usize) -> DeltaInfo {
        DeltaInfo::new(vec![0xd_u8; n])
    }

    // ---------------------------------------------------------------
    // RecordSize
    // ---------------------------------------------------------------

    #[test]
    fn test_size_empty_record() {
        let r = Record::default();
        let size = RecordSize::for_record(&r, BLOCK);
        // just the header, rounded up to one block
        assert_eq!(size.mdlength, BLOCK);
        assert_eq!(size.dlength, 0);
        assert_eq!(size.encoded_length(), BLOCK);
    }

    #[test]
    fn test_size_small_deltas_fit_one_block() {
        let r = Record::new(vec![delta(100), delta(200)], vec![]);
        let size = RecordSize::for_record(&r, BLOCK);
        assert_eq!(size.mdlength, BLOCK);
        assert_eq!(size.dlength, 0);
    }

    #[test]
    fn test_size_large_delta_spills_to_second_block() {
        let r = Record::new(vec![delta(BLOCK as usize)], vec![]);
        let size = RecordSize::for_record(&r, BLOCK);
        assert_eq!(size.mdlength, 2 * BLOCK);
    }

    #[test]
    fn test_size_extents_individually_aligned() {
        let r = Record::new(
            vec![delta(16)],
            vec![Bytes::from(vec![1u8; 100]), Bytes::from(vec![2u8; 5000])],
        );
        let size = RecordSize::for_record(&r, BLOCK);
        // 100 -> 4096, 5000 -> 8192
        assert_eq!(size.dlength, 3 * BLOCK);
    }

    #[test]
    fn test_size_block_aligned_extent_not_padded() {
        let r = Record::new(vec![], vec![Bytes::from(vec![0u8; BLOCK as usize])]);
        let size = RecordSize::for_record(&r, BLOCK);
        assert_eq!(size.dlength, BLOCK);
    }

    #[test]
    fn test_encoded_length_sums_regions() {
        let r = Record::new(vec![delta(10)], vec![Bytes::from(vec![0u8; 10])]);
        let size = RecordSize::for_record(&r, BLOCK);
        assert_eq!(size.encoded_length(), size.mdlength + size.dlength);
    }

    // ---------------------------------------------------------------
    // Record
    // ---------------------------------------------------------------

    #[test]
    fn test_record_is_empty() {
        assert!(Record::default().is_empty());
        assert!(!Record::new(vec![delta(1)], vec![]).is_empty());
        assert!(!Record::new(vec![], vec![Bytes::from_static(b"x")]).is_empty());
    }

    #[test]
    fn test_delta_info_len() {
        let d = delta(42);
        assert_eq!(d.len(), 42);
        assert!(!d.is_empty());
        assert!(DeltaInfo::new(Bytes::new()).is_empty());
    }
}
