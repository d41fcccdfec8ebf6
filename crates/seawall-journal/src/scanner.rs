//! Segment Scanner
//!
//! Iterates the records persisted in one segment, starting just after the
//! segment header. Used by replay; never active while the journal is open
//! for writes.
//!
//! ## Where does a segment end?
//!
//! Segments are preallocated and reused, so the space past the last record
//! holds either zeroes (a fresh segment) or records from a previous
//! incarnation (a reused one). The scanner treats any of the following as
//! the logical end of the segment:
//!
//! - a record header that fails the structural sanity check (zeroed blocks)
//! - a nonce that doesn't match the segment header (stale records)
//! - a checksum mismatch (a torn write at the tail)
//! - a record that would run past the end of the segment
//!
//! None of these are errors: the scanner just stops yielding. Distinguishing
//! a *mid-segment* corruption is the caller's job - a record that passes all
//! of the above but whose delta payload fails to decode is real damage, and
//! replay fails on it.

use std::sync::Arc;

use bytes::Bytes;
use seawall_core::{Paddr, RecordHeader, SegmentHeader, SegmentId, SegmentOff};
use tracing::{debug, trace};

use crate::device::SegmentManager;
use crate::error::Result;

/// Scans record headers and payloads within journal segments.
pub struct SegmentScanner {
    manager: Arc<dyn SegmentManager>,
}

impl SegmentScanner {
    pub fn new(manager: Arc<dyn SegmentManager>) -> Self {
        Self { manager }
    }

    /// Begin scanning `segment` from the first record after its header.
    pub fn scan(&self, segment: SegmentId, header: SegmentHeader) -> RecordScan {
        let block_size = self.manager.get_block_size();
        RecordScan {
            manager: self.manager.clone(),
            segment,
            header,
            block_size,
            segment_size: self.manager.get_segment_size(),
            cursor: block_size,
            done: false,
        }
    }
}

/// One record yielded by a [`RecordScan`].
pub struct ScannedRecord {
    /// Offset of the record's first byte within the segment.
    pub start: SegmentOff,
    pub header: RecordHeader,
    /// The full metadata region, header included.
    pub mdata: Bytes,
    /// The data region.
    pub data: Bytes,
}

/// An in-progress scan over one segment.
pub struct RecordScan {
    manager: Arc<dyn SegmentManager>,
    segment: SegmentId,
    header: SegmentHeader,
    block_size: u64,
    segment_size: u64,
    cursor: u64,
    done: bool,
}

impl RecordScan {
    /// The next validated record, or `None` at the logical end of the
    /// segment. Errors are device read failures only.
    pub async fn next(&mut self) -> Result<Option<ScannedRecord>> {
        if self.done {
            return Ok(None);
        }
        if self.cursor + self.block_size > self.segment_size {
            self.done = true;
            return Ok(None);
        }

        // the record header lives in the first block of the metadata region
        let first_block = self
            .manager
            .read(Paddr::new(self.segment, self.cursor), self.block_size)
            .await?;
        let header = match RecordHeader::decode(&first_block) {
            Ok(header) => header,
            Err(_) => return self.finish("short header"),
        };

        let max_record = self.segment_size - self.cursor;
        if !header.sanity_check(self.block_size, max_record) {
            return self.finish("implausible header");
        }
        if header.segment_nonce != self.header.segment_nonce {
            return self.finish("stale nonce");
        }

        let mdata = if header.mdlength == self.block_size {
            first_block
        } else {
            self.manager
                .read(Paddr::new(self.segment, self.cursor), header.mdlength)
                .await?
        };
        let data = if header.dlength > 0 {
            self.manager
                .read(
                    Paddr::new(self.segment, self.cursor + header.mdlength),
                    header.dlength,
                )
                .await?
        } else {
            Bytes::new()
        };

        if header
            .verify(&mdata, &data, self.header.segment_nonce)
            .is_err()
        {
            return self.finish("checksum mismatch");
        }

        let start = self.cursor;
        self.cursor += header.mdlength + header.dlength;
        trace!(
            segment = %self.segment,
            start,
            mdlength = header.mdlength,
            dlength = header.dlength,
            "Scanned record"
        );
        Ok(Some(ScannedRecord {
            start,
            header,
            mdata,
            data,
        }))
    }

    fn finish(&mut self, reason: &str) -> Result<Option<ScannedRecord>> {
        debug!(
            segment = %self.segment,
            segment_seq = self.header.segment_seq,
            offset = self.cursor,
            reason,
            "End of segment records"
        );
        self.done = true;
        Ok(None)
    }

    /// Offset the scan has consumed up to.
    pub fn offset(&self) -> u64 {
        self.cursor
    }
}
