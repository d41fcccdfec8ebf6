//! Record Batches
//!
//! A `RecordBatch` is a reusable slot that coalesces pending records into a
//! single device write. One batch is the unit of I/O.
//!
//! ## State machine
//!
//! ```text
//! EMPTY ──add_pending──> PENDING ──encode_records──> SUBMITTING
//!   ^                                                    │
//!   └────────────────── set_result ──────────────────────┘
//! ```
//!
//! - `EMPTY`: in the free pool; no records, no waiters
//! - `PENDING`: holds one or more records; the submitter may still append
//! - `SUBMITTING`: encoded and handed to the segment manager; appending is
//!   forbidden until the write resolves
//!
//! Each contributor gets a oneshot completion channel at `add_pending` time;
//! `set_result` fans the batch write's outcome out to all of them, resolving
//! contributor *i* with the batch's write start plus the cumulative encoded
//! lengths of contributors `[0..i)`. Batches are pre-allocated and reused;
//! the hot path allocates nothing but the encode buffer.

use bytes::{Bytes, BytesMut};
use seawall_core::format::encode_record;
use seawall_core::{JournalSeq, Record, RecordSize, SegmentNonce};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchState {
    Empty,
    Pending,
    Submitting,
}

pub(crate) struct RecordBatch {
    state: BatchState,
    batch_capacity: usize,
    batch_flush_size: u64,
    /// Write size the pending records will reach once encoded.
    encoded_length: u64,
    records: Vec<(Record, RecordSize)>,
    waiters: Vec<oneshot::Sender<Option<JournalSeq>>>,
}

impl RecordBatch {
    pub(crate) fn new(batch_capacity: usize, batch_flush_size: u64) -> Self {
        assert!(batch_capacity > 0);
        Self {
            state: BatchState::Empty,
            batch_capacity,
            batch_flush_size,
            encoded_length: 0,
            records: Vec::with_capacity(batch_capacity),
            waiters: Vec::with_capacity(batch_capacity),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state == BatchState::Empty
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state == BatchState::Pending
    }

    pub(crate) fn num_records(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn encoded_length(&self) -> u64 {
        self.encoded_length
    }

    /// The write size the batch would reach if `rsize` were added, or `None`
    /// if the batch cannot take another record: it is at capacity, or it has
    /// already grown past the soft flush size.
    pub(crate) fn can_batch(&self, rsize: &RecordSize) -> Option<u64> {
        debug_assert!(self.state != BatchState::Submitting);
        if self.records.len() >= self.batch_capacity || self.encoded_length > self.batch_flush_size
        {
            debug_assert!(self.state == BatchState::Pending);
            return None;
        }
        Some(self.encoded_length + rsize.encoded_length())
    }

    /// Append a record. The returned channel resolves once the batch's write
    /// does, with this contributor's own journal position.
    pub(crate) fn add_pending(
        &mut self,
        record: Record,
        rsize: RecordSize,
    ) -> oneshot::Receiver<Option<JournalSeq>> {
        debug_assert!(self.state != BatchState::Submitting);
        debug_assert!(self.records.len() < self.batch_capacity);
        let (tx, rx) = oneshot::channel();
        self.encoded_length += rsize.encoded_length();
        self.records.push((record, rsize));
        self.waiters.push(tx);
        self.state = BatchState::Pending;
        rx
    }

    /// Encode the batched records for one device write; freezes the batch.
    pub(crate) fn encode_records(
        &mut self,
        block_size: u64,
        committed_to: JournalSeq,
        segment_nonce: SegmentNonce,
    ) -> Bytes {
        debug_assert!(self.state == BatchState::Pending);
        self.state = BatchState::Submitting;
        let mut buf = BytesMut::with_capacity(self.encoded_length as usize);
        for (record, rsize) in &self.records {
            encode_record(&mut buf, record, rsize, block_size, committed_to, segment_nonce);
        }
        debug_assert_eq!(buf.len() as u64, self.encoded_length);
        buf.freeze()
    }

    /// Fan the write result out to every contributor and reset for reuse.
    /// `batch_write_start` is the position of the batch's first byte, or
    /// `None` if the write failed.
    pub(crate) fn set_result(&mut self, batch_write_start: Option<JournalSeq>) {
        debug_assert!(self.state == BatchState::Submitting);
        let mut offset = 0u64;
        for ((_, rsize), waiter) in self.records.drain(..).zip(self.waiters.drain(..)) {
            let seq = batch_write_start.map(|start| start.add_offset(offset));
            offset += rsize.encoded_length();
            // a contributor that gave up is not an error
            let _ = waiter.send(seq);
        }
        self.encoded_length = 0;
        self.state = BatchState::Empty;
    }

    /// The fast path: encode a single record as if it were a batch of one,
    /// without touching the shared completion machinery. Valid only on an
    /// empty batch, which stays empty and immediately reusable.
    pub(crate) fn submit_pending_fast(
        &mut self,
        record: Record,
        rsize: RecordSize,
        block_size: u64,
        committed_to: JournalSeq,
        segment_nonce: SegmentNonce,
    ) -> Bytes {
        debug_assert!(self.state == BatchState::Empty);
        let mut buf = BytesMut::with_capacity(rsize.encoded_length() as usize);
        encode_record(&mut buf, &record, &rsize, block_size, committed_to, segment_nonce);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use seawall_core::{DeltaInfo, Paddr, SegmentId};

    const BLOCK: u64 = 4096;
    const NONCE: SegmentNonce = 0x1234_5678_9abc_def0;

    fn record(tag: u8, data_blocks: usize) -> Record {
        Record::new(
            vec![DeltaInfo::new(Bytes::from(vec![tag; 24]))],
            vec![Bytes::from(vec![tag; data_blocks * BLOCK as usize])],
        )
    }

    fn sized(tag: u8, data_blocks: usize) -> (Record, RecordSize) {
        let r = record(tag, data_blocks);
        let s = RecordSize::for_record(&r, BLOCK);
        (r, s)
    }

    fn start_seq() -> JournalSeq {
        JournalSeq::new(0, Paddr::new(SegmentId(0), BLOCK))
    }

    // ---------------------------------------------------------------
    // can_batch
    // ---------------------------------------------------------------

    #[test]
    fn test_can_batch_projects_length() {
        let mut batch = RecordBatch::new(4, 1 << 20);
        let (r, s) = sized(1, 1);
        assert_eq!(batch.can_batch(&s), Some(s.encoded_length()));
        let _rx = batch.add_pending(r, s);
        assert_eq!(batch.can_batch(&s), Some(2 * s.encoded_length()));
    }

    #[test]
    fn test_can_batch_rejects_at_capacity() {
        let mut batch = RecordBatch::new(2, 1 << 20);
        let mut rxs = Vec::new();
        for tag in 0..2 {
            let (r, s) = sized(tag, 0);
            rxs.push(batch.add_pending(r, s));
        }
        let (_, s) = sized(9, 0);
        assert!(batch.can_batch(&s).is_none());
    }

    #[test]
    fn test_can_batch_rejects_past_flush_size() {
        // flush size of one block: after the first two-block record the
        // batch has grown past it and refuses more
        let mut batch = RecordBatch::new(16, BLOCK);
        let (r, s) = sized(1, 1);
        let _rx = batch.add_pending(r, s);
        assert!(batch.encoded_length() > BLOCK);
        let (_, s2) = sized(2, 0);
        assert!(batch.can_batch(&s2).is_none());
    }

    // ---------------------------------------------------------------
    // add_pending / set_result
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_contributors_resolve_with_cumulative_offsets() {
        let mut batch = RecordBatch::new(4, 1 << 20);
        let (r1, s1) = sized(1, 1);
        let (r2, s2) = sized(2, 2);
        let (r3, s3) = sized(3, 0);
        let rx1 = batch.add_pending(r1, s1);
        let rx2 = batch.add_pending(r2, s2);
        let rx3 = batch.add_pending(r3, s3);
        assert!(batch.is_pending());
        assert_eq!(batch.num_records(), 3);

        let _bytes = batch.encode_records(BLOCK, JournalSeq::NULL, NONCE);
        batch.set_result(Some(start_seq()));
        assert!(batch.is_empty());

        let a = rx1.await.unwrap().unwrap();
        let b = rx2.await.unwrap().unwrap();
        let c = rx3.await.unwrap().unwrap();
        assert_eq!(a, start_seq());
        assert_eq!(b, start_seq().add_offset(s1.encoded_length()));
        assert_eq!(
            c,
            start_seq().add_offset(s1.encoded_length() + s2.encoded_length())
        );
    }

    #[tokio::test]
    async fn test_set_result_failure_fans_out() {
        let mut batch = RecordBatch::new(4, 1 << 20);
        let (r1, s1) = sized(1, 0);
        let (r2, s2) = sized(2, 0);
        let rx1 = batch.add_pending(r1, s1);
        let rx2 = batch.add_pending(r2, s2);

        let _bytes = batch.encode_records(BLOCK, JournalSeq::NULL, NONCE);
        batch.set_result(None);

        assert!(rx1.await.unwrap().is_none());
        assert!(rx2.await.unwrap().is_none());
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_batch_reusable_after_set_result() {
        let mut batch = RecordBatch::new(4, 1 << 20);
        let (r, s) = sized(1, 0);
        let rx = batch.add_pending(r, s);
        let _ = batch.encode_records(BLOCK, JournalSeq::NULL, NONCE);
        batch.set_result(Some(start_seq()));
        assert!(rx.await.unwrap().is_some());

        // the same slot takes the next round
        let (r, s) = sized(2, 1);
        let rx = batch.add_pending(r, s);
        let _ = batch.encode_records(BLOCK, JournalSeq::NULL, NONCE);
        batch.set_result(Some(start_seq()));
        assert_eq!(rx.await.unwrap().unwrap(), start_seq());
    }

    // ---------------------------------------------------------------
    // encoding
    // ---------------------------------------------------------------

    #[test]
    fn test_encode_records_concatenates() {
        let mut batch = RecordBatch::new(4, 1 << 20);
        let (r1, s1) = sized(1, 1);
        let (r2, s2) = sized(2, 0);
        let _rx1 = batch.add_pending(r1, s1);
        let _rx2 = batch.add_pending(r2, s2);

        let bytes = batch.encode_records(BLOCK, JournalSeq::NULL, NONCE);
        assert_eq!(
            bytes.len() as u64,
            s1.encoded_length() + s2.encoded_length()
        );
    }

    #[test]
    fn test_fast_path_matches_batch_of_one() {
        let committed = start_seq();

        let mut fast = RecordBatch::new(4, 1 << 20);
        let (r, s) = sized(7, 2);
        let fast_bytes = fast.submit_pending_fast(r.clone(), s, BLOCK, committed, NONCE);
        assert!(fast.is_empty());

        let mut slow = RecordBatch::new(4, 1 << 20);
        let _rx = slow.add_pending(r, s);
        let slow_bytes = slow.encode_records(BLOCK, committed, NONCE);

        assert_eq!(fast_bytes, slow_bytes);
    }
}
