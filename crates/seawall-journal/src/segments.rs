//! Journal Segment Lifecycle
//!
//! `JournalSegmentManager` owns the journal's view of the device: the
//! current segment, its nonce, the `written_to` cursor (bytes reserved in
//! the current segment) and the `committed_to` cursor (highest in-order
//! durable position).
//!
//! ## Reservation vs submission
//!
//! Appends are split in two:
//!
//! 1. [`JournalSegmentManager::reserve`] - synchronous. Allocates the next
//!    offset range and captures the resulting journal position. Reservations
//!    are strictly sequential.
//! 2. The device write against the returned [`Reservation`] - asynchronous.
//!    Many may be in flight; they may complete in any order.
//!
//! The position a write resolves with is the one captured at reservation
//! time. The submitter re-serializes completions through the write pipeline
//! before touching `committed_to`.
//!
//! ## Rolling
//!
//! [`JournalSegmentManager::roll`] closes the current segment, notifies the
//! segment provider, asks it for the next segment id, opens that segment,
//! draws a fresh nonce and writes the segment header. If any step fails the
//! journal has *no* open segment and every reservation fails until a roll
//! succeeds. Only the submitter rolls, and only from its scheduling lane, so
//! rolls never race each other.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use seawall_core::format::SEGMENT_HEADER_SIZE;
use seawall_core::types::block_align_up;
use seawall_core::{JournalSeq, Paddr, SegmentHeader, SegmentNonce, SegmentSeq};
use tracing::{debug, info};

use crate::device::{Segment, SegmentManager, SegmentProvider};
use crate::error::{Error, Result};

struct SegmentState {
    provider: Option<Arc<dyn SegmentProvider>>,
    /// Sequence the next rolled-into segment will carry.
    next_segment_seq: SegmentSeq,
    current_nonce: SegmentNonce,
    current: Option<Arc<dyn Segment>>,
    /// Bytes reserved in the current segment, header included.
    written_to: u64,
    /// Highest in-order durable position; may point into an earlier segment.
    committed_to: JournalSeq,
    /// Set until `open` and after `close`; rolls are refused while set.
    closed: bool,
}

/// Append-only writer to the current journal segment, manager of segment
/// transitions.
pub struct JournalSegmentManager {
    manager: Arc<dyn SegmentManager>,
    state: Mutex<SegmentState>,
}

/// A reserved offset range in the current segment. The device write happens
/// against `segment` at `seq.addr.offset`; `seq` is the position the write
/// resolves with.
pub(crate) struct Reservation {
    pub seq: JournalSeq,
    pub segment: Arc<dyn Segment>,
}

impl JournalSegmentManager {
    pub fn new(manager: Arc<dyn SegmentManager>) -> Self {
        Self {
            manager,
            state: Mutex::new(SegmentState {
                provider: None,
                next_segment_seq: 0,
                current_nonce: 0,
                current: None,
                written_to: 0,
                committed_to: JournalSeq::NULL,
                closed: true,
            }),
        }
    }

    pub fn set_segment_provider(&self, provider: Arc<dyn SegmentProvider>) {
        self.state.lock().unwrap().provider = Some(provider);
    }

    /// Usable bytes per segment: the segment size minus the block-aligned
    /// header reservation.
    pub fn get_max_write_length(&self) -> u64 {
        self.manager.get_segment_size() - self.header_reservation()
    }

    pub fn get_block_size(&self) -> u64 {
        self.manager.get_block_size()
    }

    pub fn get_nonce(&self) -> SegmentNonce {
        self.state.lock().unwrap().current_nonce
    }

    pub fn get_committed_to(&self) -> JournalSeq {
        self.state.lock().unwrap().committed_to
    }

    /// Sequence of the current segment.
    pub fn get_segment_seq(&self) -> SegmentSeq {
        self.state.lock().unwrap().next_segment_seq.saturating_sub(1)
    }

    /// Continue numbering after `current_seq`; called at the end of replay.
    pub fn set_segment_seq(&self, current_seq: SegmentSeq) {
        self.state.lock().unwrap().next_segment_seq = current_seq + 1;
    }

    fn header_reservation(&self) -> u64 {
        block_align_up(SEGMENT_HEADER_SIZE as u64, self.manager.get_block_size())
    }

    /// True iff the journal currently has an open segment.
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().current.is_some()
    }

    /// True iff appending `length` bytes would exceed the current segment's
    /// remaining capacity. With no open segment a roll is always needed.
    pub fn needs_roll(&self, length: u64) -> bool {
        let state = self.state.lock().unwrap();
        match &state.current {
            Some(segment) => length + state.written_to > segment.get_write_capacity(),
            None => true,
        }
    }

    /// The position the next reservation will receive.
    fn current_write_seq(state: &SegmentState) -> Result<JournalSeq> {
        let segment = state.current.as_ref().ok_or(Error::Closed)?;
        Ok(JournalSeq::new(
            state.next_segment_seq.saturating_sub(1),
            Paddr::new(segment.get_segment_id(), state.written_to),
        ))
    }

    /// Roll into the first segment and return the position of the first
    /// record-writable byte. Idempotent: reopening without closing returns
    /// the current write position.
    pub async fn open(&self) -> Result<JournalSeq> {
        if !self.is_open() {
            self.state.lock().unwrap().closed = false;
            self.roll().await?;
        }
        Self::current_write_seq(&self.state.lock().unwrap())
    }

    /// Close the current segment and initialize the next one.
    pub async fn roll(&self) -> Result<()> {
        // detach the current segment first: if anything below fails, the
        // journal is left with no open segment and reservations fail
        let (previous, last_seq, provider) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(Error::Closed);
            }
            let last = Self::current_write_seq(&state).ok();
            (state.current.take(), last, state.provider.clone())
        };
        let provider = provider.ok_or(Error::ProviderNotSet)?;

        if let Some(segment) = previous {
            let id = segment.get_segment_id();
            segment.close().await?;
            if let Some(last_seq) = last_seq {
                provider.close_segment(id, last_seq);
            }
            debug!(segment = %id, "Journal segment closed");
        }

        let id = provider.get_next_segment_id();
        let segment = self.manager.open(id).await?;
        let nonce: SegmentNonce = rand::random();
        let (segment_seq, journal_tail) = {
            let state = self.state.lock().unwrap();
            (state.next_segment_seq, state.committed_to)
        };

        let header = SegmentHeader {
            segment_seq,
            segment_nonce: nonce,
            journal_tail,
        };
        segment
            .write(0, header.encode(self.manager.get_block_size()))
            .await?;

        {
            let mut state = self.state.lock().unwrap();
            state.current = Some(segment);
            state.current_nonce = nonce;
            state.written_to = self.header_reservation();
            state.next_segment_seq = segment_seq + 1;
        }
        info!(
            segment = %id,
            segment_seq,
            nonce = %format_args!("{nonce:#018x}"),
            "Rolled into journal segment"
        );
        Ok(())
    }

    /// Reserve `length` bytes at the current write position. Synchronous;
    /// the caller issues the device write against the reservation.
    pub(crate) fn reserve(&self, length: u64) -> Result<Reservation> {
        let mut state = self.state.lock().unwrap();
        let seq = Self::current_write_seq(&state)?;
        let segment = state.current.as_ref().expect("open segment").clone();
        debug_assert!(state.written_to + length <= segment.get_write_capacity());
        debug_assert!(length % self.manager.get_block_size() == 0);
        state.written_to += length;
        Ok(Reservation { seq, segment })
    }

    /// Append `buf` at the current write position and resolve with the
    /// position of the write's first byte. Multiple writes may be in flight
    /// and may complete out of order; only the reservation is serialized.
    pub async fn write(&self, buf: Bytes) -> Result<JournalSeq> {
        let reservation = self.reserve(buf.len() as u64)?;
        reservation
            .segment
            .write(reservation.seq.addr.offset, buf)
            .await?;
        Ok(reservation.seq)
    }

    /// Advance `committed_to`. Called in strictly increasing order by the
    /// submitter's finalize stage.
    pub fn mark_committed(&self, seq: JournalSeq) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.committed_to.is_null() || state.committed_to <= seq);
        if state.committed_to.is_null() || state.committed_to < seq {
            state.committed_to = seq;
        }
    }

    /// Finalize the current segment; further reservations fail until the
    /// journal is reopened.
    pub async fn close(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.current.take()
        };
        if let Some(segment) = previous {
            segment.close().await?;
            info!(segment = %segment.get_segment_id(), "Journal closed");
        }
        Ok(())
    }
}
