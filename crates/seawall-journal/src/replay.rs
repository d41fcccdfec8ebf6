//! Journal Replay
//!
//! On restart the embedding system collects the headers of every segment the
//! device attributes to the journal and hands them here. Replay orders the
//! segments by sequence, walks each one with the scanner, decodes the delta
//! payloads and feeds them to the caller's handler strictly in journal
//! order - the handler for a delta is awaited before the next one is
//! decoded.
//!
//! A scan ending early (stale nonce, torn tail, zeroed blocks) is the
//! normal end of a segment's records. A record that *passes* validation but
//! whose delta payload will not decode is mid-segment corruption and fails
//! the replay; so do two segments claiming the same sequence.

use async_trait::async_trait;
use seawall_core::format::decode_deltas;
use seawall_core::{DeltaInfo, JournalSeq, Paddr, SegmentHeader, SegmentId};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::scanner::SegmentScanner;

/// Applies replayed deltas. Invoked in strict journal order; the journal
/// awaits each application before decoding further.
#[async_trait]
pub trait DeltaHandler: Send {
    /// Apply one delta.
    ///
    /// `seq` is the record's journal position; `record_block_base` is the
    /// address of the record's first data block, against which the delta's
    /// extent references resolve.
    async fn apply(
        &mut self,
        seq: JournalSeq,
        record_block_base: Paddr,
        delta: DeltaInfo,
    ) -> Result<()>;
}

/// Order segment headers for replay: ascending by sequence, duplicates
/// rejected. Each entry is returned with the position of its first record.
pub(crate) fn prep_replay_segments(
    mut segments: Vec<(SegmentId, SegmentHeader)>,
    block_size: u64,
) -> Result<Vec<(JournalSeq, SegmentHeader)>> {
    segments.sort_by_key(|(_, header)| header.segment_seq);
    for pair in segments.windows(2) {
        if pair[0].1.segment_seq == pair[1].1.segment_seq {
            return Err(Error::Replay(format!(
                "segments {} and {} both claim sequence {}",
                pair[0].0, pair[1].0, pair[0].1.segment_seq
            )));
        }
    }
    Ok(segments
        .into_iter()
        .map(|(id, header)| {
            (
                JournalSeq::new(header.segment_seq, Paddr::new(id, block_size)),
                header,
            )
        })
        .collect())
}

/// Replay the records of one segment, starting at `start`. Returns the
/// position of the last record replayed, if any.
pub(crate) async fn replay_segment(
    scanner: &SegmentScanner,
    start: JournalSeq,
    header: SegmentHeader,
    handler: &mut dyn DeltaHandler,
) -> Result<Option<JournalSeq>> {
    let segment = start.addr.segment;
    let mut scan = scanner.scan(segment, header);
    let mut last = None;
    let mut records = 0u64;
    let mut applied = 0u64;

    while let Some(scanned) = scan.next().await? {
        let seq = JournalSeq::new(start.segment_seq, Paddr::new(segment, scanned.start));
        let (deltas, _extent_lens) =
            decode_deltas(&scanned.header, &scanned.mdata).map_err(|e| {
                Error::Replay(format!(
                    "undecodable deltas at {} in segment {}: {}",
                    seq, segment, e
                ))
            })?;
        let record_block_base = seq.addr.add_offset(scanned.header.mdlength);
        for delta in deltas {
            handler.apply(seq, record_block_base, delta).await?;
            applied += 1;
        }
        records += 1;
        last = Some(seq);
    }

    debug!(
        segment = %segment,
        segment_seq = start.segment_seq,
        records,
        deltas = applied,
        "Replayed segment"
    );
    Ok(last)
}

/// Log the overall result of a replay pass.
pub(crate) fn log_replay_done(last: &Option<JournalSeq>, segments: usize) {
    match last {
        Some(seq) => info!(segments, last = %seq, "Journal replay complete"),
        None => info!(segments, "Journal replay complete; no records found"),
    }
}
