//! On-Disk Formats
//!
//! This module implements the binary layout of journal segments.
//!
//! ## Segment Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Segment header (padded to one block)                        │
//! │ - Magic bytes: "SWAL" (4 bytes)                             │
//! │ - Version (2 bytes)                                         │
//! │ - Reserved (2 bytes)                                        │
//! │ - Segment sequence (8 bytes)                                │
//! │ - Segment nonce (8 bytes)                                   │
//! │ - Journal tail hint (24 bytes)                              │
//! │ - CRC32 over the fields above (4 bytes)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Record 0                                                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Record 1                                                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │ ... (until stale or zeroed blocks mark the logical end)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Record Layout
//!
//! Each record is two block-aligned regions:
//!
//! ```text
//! metadata region (mdlength bytes):
//! ┌──────────────┬────────────────────┬──────────────┬─────┐
//! │ RecordHeader │ [len|payload] ...  │ extent table │ pad │
//! │ (64 bytes)   │ one per delta      │ u64 per ext  │     │
//! └──────────────┴────────────────────┴──────────────┴─────┘
//! data region (dlength bytes):
//! ┌──────────────────────┬──────────────────────┬─────┐
//! │ extent 0 (padded)    │ extent 1 (padded)    │ ... │
//! └──────────────────────┴──────────────────────┴─────┘
//! ```
//!
//! The record header carries two checksums: `mdata_checksum` covers the
//! metadata region after the header, and `full_checksum` covers the entire
//! record with the `full_checksum` field itself zeroed. The header also
//! repeats the segment's nonce; a record written by a previous incarnation
//! of the segment fails the nonce check and reads as the logical end of the
//! segment. There is no record magic - tail detection rests on the nonce and
//! the checksums.
//!
//! `committed_to` records the journal position durable at the moment the
//! record was encoded, as a full journal position (sequence plus address) so
//! it may point into an earlier segment.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::record::{DeltaInfo, Record, RecordSize};
use crate::types::{block_align_up, JournalSeq, Paddr, SegmentId, SegmentNonce, SegmentSeq};

/// Magic bytes for segment headers: "SWAL"
pub const SEGMENT_MAGIC: [u8; 4] = [0x53, 0x57, 0x41, 0x4C];

/// Version number for the on-disk format
pub const FORMAT_VERSION: u16 = 1;

/// Encoded size of a [`JournalSeq`]
const JOURNAL_SEQ_SIZE: usize = 24;

/// Encoded size of the segment header before block padding
pub const SEGMENT_HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 8 + JOURNAL_SEQ_SIZE + 4;

/// Encoded size of a record header
pub const RECORD_HEADER_SIZE: usize = 8 + 8 + 4 + 4 + JOURNAL_SEQ_SIZE + 8 + 4 + 4;

fn put_journal_seq(buf: &mut BytesMut, seq: &JournalSeq) {
    buf.put_u64(seq.segment_seq);
    buf.put_u64(seq.addr.segment.0);
    buf.put_u64(seq.addr.offset);
}

fn get_journal_seq(buf: &mut &[u8]) -> JournalSeq {
    let segment_seq = buf.get_u64();
    let segment = SegmentId(buf.get_u64());
    let offset = buf.get_u64();
    JournalSeq::new(segment_seq, Paddr::new(segment, offset))
}

/// Header written as the first block of every journal segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Logical sequence of this segment within the journal.
    pub segment_seq: SegmentSeq,
    /// Random value distinguishing this incarnation of the segment.
    pub segment_nonce: SegmentNonce,
    /// The journal position durable when this segment was initialized.
    /// Everything below it has been applied; the embedding system uses it
    /// to bound replay and drive segment reclamation.
    pub journal_tail: JournalSeq,
}

impl SegmentHeader {
    /// Encode the header, padded with zeros to one block.
    pub fn encode(&self, block_size: u64) -> Bytes {
        debug_assert!(block_size as usize >= SEGMENT_HEADER_SIZE);
        let mut buf = BytesMut::with_capacity(block_size as usize);
        buf.put_slice(&SEGMENT_MAGIC);
        buf.put_u16(FORMAT_VERSION);
        buf.put_u16(0);
        buf.put_u64(self.segment_seq);
        buf.put_u64(self.segment_nonce);
        put_journal_seq(&mut buf, &self.journal_tail);
        let crc = crc32fast::hash(&buf[..]);
        buf.put_u32(crc);
        debug_assert_eq!(buf.len(), SEGMENT_HEADER_SIZE);
        buf.resize(block_size as usize, 0);
        buf.freeze()
    }

    /// Decode and validate a segment header from the first block of a
    /// segment.
    pub fn decode(data: &[u8]) -> Result<SegmentHeader> {
        if data.len() < SEGMENT_HEADER_SIZE {
            return Err(Error::Truncated {
                needed: SEGMENT_HEADER_SIZE,
                actual: data.len(),
            });
        }
        if data[..4] != SEGMENT_MAGIC {
            return Err(Error::InvalidMagic);
        }

        let mut cur = &data[4..SEGMENT_HEADER_SIZE];
        let version = cur.get_u16();
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let _reserved = cur.get_u16();
        let segment_seq = cur.get_u64();
        let segment_nonce = cur.get_u64();
        let journal_tail = get_journal_seq(&mut cur);
        let stored_crc = cur.get_u32();

        let crc = crc32fast::hash(&data[..SEGMENT_HEADER_SIZE - 4]);
        if crc != stored_crc {
            return Err(Error::ChecksumMismatch);
        }

        Ok(SegmentHeader {
            segment_seq,
            segment_nonce,
            journal_tail,
        })
    }
}

/// Header prepended to every encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Length of the metadata region (header, deltas, extent table), block
    /// aligned.
    pub mdlength: u64,
    /// Length of the data region, block aligned.
    pub dlength: u64,
    /// Number of deltas in the metadata region.
    pub deltas_count: u32,
    /// Number of data extents.
    pub extents_count: u32,
    /// Journal position durable when this record was encoded.
    pub committed_to: JournalSeq,
    /// Nonce of the segment incarnation this record was written into.
    pub segment_nonce: SegmentNonce,
    /// CRC32 over the metadata region after the header.
    pub mdata_checksum: u32,
    /// CRC32 over the whole record with this field zeroed.
    pub full_checksum: u32,
}

impl RecordHeader {
    /// Decode a record header. Performs no validation beyond length; use
    /// [`RecordHeader::sanity_check`] and [`RecordHeader::verify`].
    pub fn decode(data: &[u8]) -> Result<RecordHeader> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(Error::Truncated {
                needed: RECORD_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let mut cur = &data[..RECORD_HEADER_SIZE];
        Ok(RecordHeader {
            mdlength: cur.get_u64(),
            dlength: cur.get_u64(),
            deltas_count: cur.get_u32(),
            extents_count: cur.get_u32(),
            committed_to: get_journal_seq(&mut cur),
            segment_nonce: cur.get_u64(),
            mdata_checksum: cur.get_u32(),
            full_checksum: cur.get_u32(),
        })
    }

    /// Cheap structural plausibility check, applied before reading the
    /// record's regions. Rejects headers decoded from zeroed or foreign
    /// blocks.
    pub fn sanity_check(&self, block_size: u64, max_record_length: u64) -> bool {
        if self.mdlength < RECORD_HEADER_SIZE as u64
            || self.mdlength % block_size != 0
            || self.dlength % block_size != 0
            || self.mdlength.saturating_add(self.dlength) > max_record_length
        {
            return false;
        }
        // every delta needs at least a length prefix, every extent a table slot
        self.deltas_count as u64 * 4 + self.extents_count as u64 * 8
            <= self.mdlength - RECORD_HEADER_SIZE as u64
    }

    /// Verify the nonce and both checksums against the record's regions.
    pub fn verify(
        &self,
        md_region: &[u8],
        data_region: &[u8],
        expected_nonce: SegmentNonce,
    ) -> Result<()> {
        if self.segment_nonce != expected_nonce {
            return Err(Error::NonceMismatch {
                expected: expected_nonce,
                found: self.segment_nonce,
            });
        }
        if md_region.len() as u64 != self.mdlength || data_region.len() as u64 != self.dlength {
            return Err(Error::Truncated {
                needed: self.mdlength.saturating_add(self.dlength) as usize,
                actual: md_region.len() + data_region.len(),
            });
        }

        let mdata_crc = crc32fast::hash(&md_region[RECORD_HEADER_SIZE..]);
        if mdata_crc != self.mdata_checksum {
            return Err(Error::ChecksumMismatch);
        }

        // full checksum is computed with its own field (the last four header
        // bytes) zeroed
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&md_region[..RECORD_HEADER_SIZE - 4]);
        hasher.update(&[0u8; 4]);
        hasher.update(&md_region[RECORD_HEADER_SIZE..]);
        hasher.update(data_region);
        if hasher.finalize() != self.full_checksum {
            return Err(Error::ChecksumMismatch);
        }
        Ok(())
    }
}

/// Append the encoded form of `record` to `buf`.
///
/// `rsize` must be the [`RecordSize`] computed for `record` at `block_size`.
/// `committed_to` is stamped into the record header so that replay can
/// observe how far the journal was durable when this record was encoded.
pub fn encode_record(
    buf: &mut BytesMut,
    record: &Record,
    rsize: &RecordSize,
    block_size: u64,
    committed_to: JournalSeq,
    segment_nonce: SegmentNonce,
) {
    debug_assert_eq!(*rsize, RecordSize::for_record(record, block_size));
    let start = buf.len();

    // metadata region: header placeholder, deltas, extent table, padding
    buf.resize(start + RECORD_HEADER_SIZE, 0);
    for delta in &record.deltas {
        buf.put_u32(delta.payload.len() as u32);
        buf.put_slice(&delta.payload);
    }
    for extent in &record.extents {
        buf.put_u64(extent.len() as u64);
    }
    buf.resize(start + rsize.mdlength as usize, 0);

    // data region: each extent padded to the block size
    for extent in &record.extents {
        buf.put_slice(extent);
        let padded = block_align_up(extent.len() as u64, block_size) as usize;
        buf.resize(buf.len() + padded - extent.len(), 0);
    }
    let total = rsize.encoded_length() as usize;
    debug_assert_eq!(buf.len(), start + total);

    let mdata_checksum =
        crc32fast::hash(&buf[start + RECORD_HEADER_SIZE..start + rsize.mdlength as usize]);

    let mut header = BytesMut::with_capacity(RECORD_HEADER_SIZE);
    header.put_u64(rsize.mdlength);
    header.put_u64(rsize.dlength);
    header.put_u32(record.deltas.len() as u32);
    header.put_u32(record.extents.len() as u32);
    put_journal_seq(&mut header, &committed_to);
    header.put_u64(segment_nonce);
    header.put_u32(mdata_checksum);
    header.put_u32(0); // full checksum patched below
    buf[start..start + RECORD_HEADER_SIZE].copy_from_slice(&header);

    let full_checksum = crc32fast::hash(&buf[start..start + total]);
    buf[start + RECORD_HEADER_SIZE - 4..start + RECORD_HEADER_SIZE]
        .copy_from_slice(&full_checksum.to_be_bytes());
}

/// Decode the deltas and the extent length table from a record's metadata
/// region.
///
/// Unlike checksum or nonce failures, a malformed metadata region on a record
/// that passed [`RecordHeader::verify`] is real corruption, not a torn tail.
pub fn decode_deltas(header: &RecordHeader, md_region: &[u8]) -> Result<(Vec<DeltaInfo>, Vec<u64>)> {
    if md_region.len() < RECORD_HEADER_SIZE {
        return Err(Error::Truncated {
            needed: RECORD_HEADER_SIZE,
            actual: md_region.len(),
        });
    }
    let mut cur = &md_region[RECORD_HEADER_SIZE..];

    // counts that cannot possibly fit their region are rejected up front
    if header.deltas_count as u64 * 4 + header.extents_count as u64 * 8 > cur.len() as u64 {
        return Err(Error::MalformedRecord(format!(
            "{} deltas and {} extents overrun a {}-byte metadata region",
            header.deltas_count,
            header.extents_count,
            cur.len()
        )));
    }

    let mut deltas = Vec::with_capacity(header.deltas_count as usize);
    for i in 0..header.deltas_count {
        if cur.remaining() < 4 {
            return Err(Error::MalformedRecord(format!(
                "delta {i} length prefix overruns metadata region"
            )));
        }
        let len = cur.get_u32() as usize;
        if cur.remaining() < len {
            return Err(Error::MalformedRecord(format!(
                "delta {i} payload of {len} bytes overruns metadata region"
            )));
        }
        let (payload, rest) = cur.split_at(len);
        deltas.push(DeltaInfo::new(Bytes::copy_from_slice(payload)));
        cur = rest;
    }

    let mut extent_lens = Vec::with_capacity(header.extents_count as usize);
    for i in 0..header.extents_count {
        if cur.remaining() < 8 {
            return Err(Error::MalformedRecord(format!(
                "extent table entry {i} overruns metadata region"
            )));
        }
        extent_lens.push(cur.get_u64());
    }
    Ok((deltas, extent_lens))
}

/// Decode a full record from its verified regions.
pub fn decode_record(
    header: &RecordHeader,
    md_region: &[u8],
    data_region: &[u8],
    block_size: u64,
) -> Result<Record> {
    let (deltas, extent_lens) = decode_deltas(header, md_region)?;

    let mut extents = Vec::with_capacity(extent_lens.len());
    let mut pos = 0u64;
    for (i, len) in extent_lens.iter().copied().enumerate() {
        if len > data_region.len() as u64 {
            return Err(Error::MalformedRecord(format!(
                "extent {i} of {len} bytes overruns data region"
            )));
        }
        let padded = block_align_up(len, block_size);
        if pos + padded > data_region.len() as u64 {
            return Err(Error::MalformedRecord(format!(
                "extent {i} of {len} bytes overruns data region"
            )));
        }
        extents.push(Bytes::copy_from_slice(
            &data_region[pos as usize..(pos + len) as usize],
        ));
        pos += padded;
    }
    if pos != header.dlength {
        return Err(Error::MalformedRecord(format!(
            "extent table covers {pos} bytes, data region is {}",
            header.dlength
        )));
    }

    Ok(Record { deltas, extents })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u64 = 4096;
    const NONCE: SegmentNonce = 0xfeed_beef_dead_cafe;

    fn sample_record() -> Record {
        Record::new(
            vec![
                DeltaInfo::new(Bytes::from_static(b"alloc extent 42")),
                DeltaInfo::new(Bytes::from_static(b"update onode 7")),
            ],
            vec![
                Bytes::from(vec![0xaa; 100]),
                Bytes::from(vec![0xbb; BLOCK as usize]),
            ],
        )
    }

    fn encode(record: &Record, committed_to: JournalSeq) -> (Bytes, RecordSize) {
        let rsize = RecordSize::for_record(record, BLOCK);
        let mut buf = BytesMut::new();
        encode_record(&mut buf, record, &rsize, BLOCK, committed_to, NONCE);
        (buf.freeze(), rsize)
    }

    // ---------------------------------------------------------------
    // Segment header
    // ---------------------------------------------------------------

    #[test]
    fn test_segment_header_roundtrip() {
        let header = SegmentHeader {
            segment_seq: 12,
            segment_nonce: NONCE,
            journal_tail: JournalSeq::new(11, Paddr::new(SegmentId(3), 8192)),
        };
        let encoded = header.encode(BLOCK);
        assert_eq!(encoded.len(), BLOCK as usize);
        let decoded = SegmentHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_segment_header_null_tail_roundtrip() {
        let header = SegmentHeader {
            segment_seq: 0,
            segment_nonce: 1,
            journal_tail: JournalSeq::NULL,
        };
        let decoded = SegmentHeader::decode(&header.encode(BLOCK)).unwrap();
        assert!(decoded.journal_tail.is_null());
    }

    #[test]
    fn test_segment_header_rejects_bad_magic() {
        let header = SegmentHeader {
            segment_seq: 0,
            segment_nonce: 1,
            journal_tail: JournalSeq::NULL,
        };
        let mut bytes = BytesMut::from(&header.encode(BLOCK)[..]);
        bytes[0] ^= 0xff;
        assert!(matches!(
            SegmentHeader::decode(&bytes),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_segment_header_rejects_bad_crc() {
        let header = SegmentHeader {
            segment_seq: 3,
            segment_nonce: 1,
            journal_tail: JournalSeq::NULL,
        };
        let mut bytes = BytesMut::from(&header.encode(BLOCK)[..]);
        bytes[10] ^= 0x01; // flip a bit inside the covered region
        assert!(matches!(
            SegmentHeader::decode(&bytes),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_segment_header_rejects_truncated() {
        let err = SegmentHeader::decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn test_segment_header_rejects_future_version() {
        let header = SegmentHeader {
            segment_seq: 0,
            segment_nonce: 1,
            journal_tail: JournalSeq::NULL,
        };
        let mut bytes = BytesMut::from(&header.encode(BLOCK)[..]);
        bytes[4] = 0x7f; // version high byte
        assert!(matches!(
            SegmentHeader::decode(&bytes),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    // ---------------------------------------------------------------
    // Record encode/decode roundtrip
    // ---------------------------------------------------------------

    #[test]
    fn test_record_roundtrip() {
        let record = sample_record();
        let committed = JournalSeq::new(0, Paddr::new(SegmentId(0), 4096));
        let (bytes, rsize) = encode(&record, committed);
        assert_eq!(bytes.len() as u64, rsize.encoded_length());

        let header = RecordHeader::decode(&bytes).unwrap();
        assert_eq!(header.mdlength, rsize.mdlength);
        assert_eq!(header.dlength, rsize.dlength);
        assert_eq!(header.deltas_count, 2);
        assert_eq!(header.extents_count, 2);
        assert_eq!(header.committed_to, committed);
        assert_eq!(header.segment_nonce, NONCE);

        let md = &bytes[..rsize.mdlength as usize];
        let data = &bytes[rsize.mdlength as usize..];
        header.verify(md, data, NONCE).unwrap();

        let decoded = decode_record(&header, md, data, BLOCK).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_roundtrip_metadata_only() {
        let record = Record::new(vec![DeltaInfo::new(Bytes::from_static(b"d"))], vec![]);
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        assert_eq!(rsize.dlength, 0);

        let header = RecordHeader::decode(&bytes).unwrap();
        let md = &bytes[..rsize.mdlength as usize];
        header.verify(md, &[], NONCE).unwrap();
        let decoded = decode_record(&header, md, &[], BLOCK).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_roundtrip_empty_record() {
        let record = Record::default();
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        assert_eq!(rsize.encoded_length(), BLOCK);

        let header = RecordHeader::decode(&bytes).unwrap();
        header.verify(&bytes, &[], NONCE).unwrap();
        let decoded = decode_record(&header, &bytes, &[], BLOCK).unwrap();
        assert!(decoded.deltas.is_empty());
        assert!(decoded.extents.is_empty());
    }

    #[test]
    fn test_record_null_committed_to_roundtrip() {
        let record = sample_record();
        let (bytes, _) = encode(&record, JournalSeq::NULL);
        let header = RecordHeader::decode(&bytes).unwrap();
        assert!(header.committed_to.is_null());
    }

    // ---------------------------------------------------------------
    // Validation failures
    // ---------------------------------------------------------------

    #[test]
    fn test_verify_detects_metadata_corruption() {
        let record = sample_record();
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        let mut corrupted = BytesMut::from(&bytes[..]);
        corrupted[RECORD_HEADER_SIZE + 2] ^= 0x01;

        let header = RecordHeader::decode(&corrupted).unwrap();
        let md = &corrupted[..rsize.mdlength as usize];
        let data = &corrupted[rsize.mdlength as usize..];
        assert!(matches!(
            header.verify(md, data, NONCE),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_verify_detects_data_corruption() {
        let record = sample_record();
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        let mut corrupted = BytesMut::from(&bytes[..]);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;

        let header = RecordHeader::decode(&corrupted).unwrap();
        let md = &corrupted[..rsize.mdlength as usize];
        let data = &corrupted[rsize.mdlength as usize..];
        // data corruption is invisible to the metadata checksum but not to
        // the full checksum
        assert!(matches!(
            header.verify(md, data, NONCE),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_verify_detects_stale_nonce() {
        let record = sample_record();
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        let header = RecordHeader::decode(&bytes).unwrap();
        let md = &bytes[..rsize.mdlength as usize];
        let data = &bytes[rsize.mdlength as usize..];
        assert!(matches!(
            header.verify(md, data, NONCE + 1),
            Err(Error::NonceMismatch { .. })
        ));
    }

    #[test]
    fn test_sanity_check_rejects_zeroed_block() {
        let header = RecordHeader::decode(&[0u8; RECORD_HEADER_SIZE]).unwrap();
        assert!(!header.sanity_check(BLOCK, 1 << 20));
    }

    #[test]
    fn test_sanity_check_rejects_oversize() {
        let record = sample_record();
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        let header = RecordHeader::decode(&bytes).unwrap();
        assert!(header.sanity_check(BLOCK, rsize.encoded_length()));
        assert!(!header.sanity_check(BLOCK, rsize.encoded_length() - 1));
    }

    #[test]
    fn test_decode_deltas_rejects_overrun() {
        let record = sample_record();
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        let mut header = RecordHeader::decode(&bytes).unwrap();
        // claim more deltas than the region holds
        header.deltas_count = 10_000;
        let md = &bytes[..rsize.mdlength as usize];
        assert!(matches!(
            decode_deltas(&header, md),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_decode_record_rejects_extent_overrun() {
        let record = sample_record();
        let (bytes, rsize) = encode(&record, JournalSeq::NULL);
        let header = RecordHeader::decode(&bytes).unwrap();
        let md = &bytes[..rsize.mdlength as usize];
        // hand it a data region one block short
        let data = &bytes[rsize.mdlength as usize..bytes.len() - BLOCK as usize];
        assert!(matches!(
            decode_record(&header, md, data, BLOCK),
            Err(Error::MalformedRecord(_))
        ));
    }
}
