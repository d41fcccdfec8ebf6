//! Record Submission Pipeline
//!
//! `RecordSubmitter` admits concurrent record submissions, groups them into
//! batches, enforces the outstanding-I/O bound, and produces ordered commit
//! notifications.
//!
//! ## Scheduling states
//!
//! Derived from `num_outstanding_io`:
//!
//! - `Idle`: no writes in flight - the uncontended case
//! - `Pending`: some writes in flight, capacity to start another
//! - `Full`: at `io_depth_limit`; no new write may start
//!
//! ## The decision table
//!
//! For each arriving record (after rolling the segment if the projected
//! write would not fit):
//!
//! | state        | batch can take it | action                                |
//! |--------------|-------------------|---------------------------------------|
//! | idle/pending | batch empty       | fast path: encode alone, write now    |
//! | idle/pending | yes               | join batch, flush it now              |
//! | idle/pending | no                | flush batch, retry                    |
//! | full         | yes               | join batch; a completion flushes it   |
//! | full         | no                | suspend until a write completes       |
//!
//! The `full`+join row is what makes batching effective: while the device
//! is saturated, arrivals coalesce into the pending batch and leave as one
//! write the moment a slot frees (`decrement_io_with_flush` in the write
//! driver). A stranded batch cannot linger - every completion flushes
//! whatever is pending.
//!
//! ## Recovering the single-threaded invariant
//!
//! All scheduling decisions, offset reservations and pipeline enqueues
//! happen behind one async mutex, the *submit lane*, and never across a
//! suspension point - on a cooperative runtime this is exactly one task
//! touching the state between yields. Device writes themselves run as
//! spawned tasks outside the lane, so the lane is held for microseconds
//! while writes overlap freely.
//!
//! ## Ordering
//!
//! A submission takes its `device_submission` pipeline position in the same
//! critical section as its offset reservation, holds it until its own write
//! resolves, and moves to `finalize` before releasing it. `finalize` order
//! therefore equals reservation order, and `mark_committed` runs strictly
//! monotonically even when device writes complete out of order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use seawall_core::{JournalSeq, Paddr, Record, RecordSize};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, trace, warn};

use crate::batch::RecordBatch;
use crate::config::JournalConfig;
use crate::error::{Error, Result};
use crate::pipeline::{OrderingHandle, WritePipeline};
use crate::segments::{JournalSegmentManager, Reservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitterState {
    Idle,
    Pending,
    Full,
}

struct SubmitterCore {
    num_outstanding_io: usize,
    current: RecordBatch,
    free: VecDeque<RecordBatch>,
}

impl SubmitterCore {
    fn state(&self, io_depth_limit: usize) -> SubmitterState {
        debug_assert!(self.num_outstanding_io <= io_depth_limit);
        match self.num_outstanding_io {
            0 => SubmitterState::Idle,
            n if n < io_depth_limit => SubmitterState::Pending,
            _ => SubmitterState::Full,
        }
    }
}

/// What a write driver settles when its device write resolves.
enum WriteCompletion {
    /// A fast-path single record: one direct completion channel.
    Single(oneshot::Sender<Option<JournalSeq>>),
    /// A flushed batch: fan out to its contributors, then recycle the slot.
    Batch(RecordBatch),
}

/// The journal's concurrency controller. See the module docs.
pub(crate) struct RecordSubmitter {
    jsm: Arc<JournalSegmentManager>,
    io_depth_limit: usize,
    /// Serializes scheduling decisions and offset reservations.
    lane: tokio::sync::Mutex<()>,
    core: Mutex<SubmitterCore>,
    /// Wakes submissions suspended in the `Full` state.
    submit_notify: Notify,
    /// Wakes `drain` when the journal quiesces.
    drain_notify: Notify,
    pipeline: Mutex<Arc<WritePipeline>>,
}

impl RecordSubmitter {
    pub(crate) fn new(jsm: Arc<JournalSegmentManager>, config: &JournalConfig) -> Self {
        assert!(config.io_depth_limit > 0);
        // one slot per possible in-flight batch, plus the current one
        let mut free = VecDeque::with_capacity(config.io_depth_limit);
        for _ in 0..config.io_depth_limit {
            free.push_back(RecordBatch::new(
                config.batch_capacity,
                config.batch_flush_size,
            ));
        }
        Self {
            jsm,
            io_depth_limit: config.io_depth_limit,
            lane: tokio::sync::Mutex::new(()),
            core: Mutex::new(SubmitterCore {
                num_outstanding_io: 0,
                current: RecordBatch::new(config.batch_capacity, config.batch_flush_size),
                free,
            }),
            submit_notify: Notify::new(),
            drain_notify: Notify::new(),
            pipeline: Mutex::new(Arc::new(WritePipeline::new())),
        }
    }

    pub(crate) fn set_write_pipeline(&self, pipeline: Arc<WritePipeline>) {
        *self.pipeline.lock().unwrap() = pipeline;
    }

    /// Submit one record. Resolves with the record's physical address and
    /// journal position once its bytes are durable and every earlier
    /// submission has acknowledged.
    pub(crate) async fn submit(
        self: &Arc<Self>,
        record: Record,
        handle: &mut OrderingHandle,
    ) -> Result<(Paddr, JournalSeq)> {
        let block_size = self.jsm.get_block_size();
        let max_write_length = self.jsm.get_max_write_length();
        let rsize = RecordSize::for_record(&record, block_size);
        if rsize.encoded_length() > max_write_length {
            return Err(Error::RecordTooLarge {
                len: rsize.encoded_length(),
                max: max_write_length,
            });
        }
        let pipeline = self.pipeline.lock().unwrap().clone();

        enum Plan {
            Wait,
            Flush,
            Roll { flush_first: bool },
            FastPath,
            Batch { flush: bool },
        }

        let mut record = Some(record);
        let rx = loop {
            let lane = self.lane.lock().await;

            let plan = {
                let core = self.core.lock().unwrap();
                let state = core.state(self.io_depth_limit);
                let full = state == SubmitterState::Full;
                match core.current.can_batch(&rsize) {
                    Some(projected) if projected <= max_write_length => {
                        if self.jsm.needs_roll(projected) {
                            if full {
                                Plan::Wait
                            } else {
                                Plan::Roll {
                                    flush_first: core.current.is_pending(),
                                }
                            }
                        } else if full {
                            Plan::Batch { flush: false }
                        } else if core.current.is_empty() {
                            Plan::FastPath
                        } else {
                            Plan::Batch { flush: true }
                        }
                    }
                    // batch at capacity, or the record cannot share a write
                    // with what is already pending
                    _ => {
                        if full {
                            Plan::Wait
                        } else {
                            Plan::Flush
                        }
                    }
                }
            };

            match plan {
                Plan::Wait => {
                    let notified = self.submit_notify.notified();
                    tokio::pin!(notified);
                    // register before releasing the lane so a completion
                    // between the decision and the await cannot be missed
                    notified.as_mut().enable();
                    drop(lane);
                    notified.await;
                }
                Plan::Flush => {
                    let mut core = self.core.lock().unwrap();
                    self.flush_current_batch(&mut core);
                }
                Plan::Roll { flush_first } => {
                    if flush_first {
                        let mut core = self.core.lock().unwrap();
                        self.flush_current_batch(&mut core);
                    }
                    self.jsm.roll().await?;
                }
                Plan::FastPath => {
                    let mut core = self.core.lock().unwrap();
                    core.num_outstanding_io += 1;
                    let bytes = core.current.submit_pending_fast(
                        record.take().expect("record not yet consumed"),
                        rsize,
                        block_size,
                        self.jsm.get_committed_to(),
                        self.jsm.get_nonce(),
                    );
                    match self.jsm.reserve(bytes.len() as u64) {
                        Ok(reservation) => {
                            let (tx, rx) = oneshot::channel();
                            handle.enqueue_device_submission(&pipeline);
                            self.spawn_write(reservation, bytes, WriteCompletion::Single(tx));
                            break rx;
                        }
                        Err(e) => {
                            core.num_outstanding_io -= 1;
                            return Err(e);
                        }
                    }
                }
                Plan::Batch { flush } => {
                    let mut core = self.core.lock().unwrap();
                    let rx = core
                        .current
                        .add_pending(record.take().expect("record not yet consumed"), rsize);
                    handle.enqueue_device_submission(&pipeline);
                    if flush {
                        self.flush_current_batch(&mut core);
                    }
                    break rx;
                }
            }
        };

        // Hold the device_submission stage while our own write is in
        // flight; later submissions queue behind us and cannot finalize
        // early no matter how fast their writes complete.
        handle.await_device_submission().await;
        let outcome = rx.await.unwrap_or(None);
        let Some(start) = outcome else {
            handle.exit();
            return Err(Error::WriteFailed);
        };

        handle.enter_finalize(&pipeline).await;
        self.jsm.mark_committed(start);
        handle.exit();
        Ok((start.addr, start))
    }

    /// Promote the current batch to submitting: encode it, reserve its
    /// offsets and hand it to a write driver. Requires an I/O slot.
    fn flush_current_batch(self: &Arc<Self>, core: &mut SubmitterCore) {
        debug_assert!(core.current.is_pending());
        debug_assert!(core.num_outstanding_io < self.io_depth_limit);

        let fresh = core.free.pop_front().expect("free batch available");
        let mut batch = std::mem::replace(&mut core.current, fresh);
        core.num_outstanding_io += 1;

        let bytes = batch.encode_records(
            self.jsm.get_block_size(),
            self.jsm.get_committed_to(),
            self.jsm.get_nonce(),
        );
        trace!(
            records = batch.num_records(),
            bytes = bytes.len(),
            "Flushing record batch"
        );
        match self.jsm.reserve(bytes.len() as u64) {
            Ok(reservation) => {
                self.spawn_write(reservation, bytes, WriteCompletion::Batch(batch));
            }
            Err(e) => {
                warn!(error = %e, "Batch flush could not reserve journal space");
                batch.set_result(None);
                core.free.push_back(batch);
                core.num_outstanding_io -= 1;
                self.submit_notify.notify_waiters();
            }
        }
    }

    /// Issue the device write for a reservation on its own task. The driver
    /// settles the completion and then releases the I/O slot.
    fn spawn_write(self: &Arc<Self>, reservation: Reservation, bytes: Bytes, completion: WriteCompletion) {
        let submitter = self.clone();
        let Reservation { seq, segment } = reservation;
        tokio::spawn(async move {
            let outcome = match segment.write(seq.addr.offset, bytes).await {
                Ok(()) => Some(seq),
                Err(e) => {
                    warn!(seq = %seq, error = %e, "Journal device write failed");
                    None
                }
            };
            submitter.decrement_io_with_flush(completion, outcome).await;
        });
    }

    /// Settle a finished write, release its I/O slot, wake any suspended
    /// submission, and flush whatever is pending so a stranded record is
    /// never held behind an idle device.
    async fn decrement_io_with_flush(
        self: &Arc<Self>,
        completion: WriteCompletion,
        start: Option<JournalSeq>,
    ) {
        let _lane = self.lane.lock().await;
        let mut core = self.core.lock().unwrap();
        match completion {
            WriteCompletion::Single(tx) => {
                // the submitter may have given up; not an error
                let _ = tx.send(start);
            }
            WriteCompletion::Batch(mut batch) => {
                batch.set_result(start);
                core.free.push_back(batch);
            }
        }
        debug_assert!(core.num_outstanding_io > 0);
        core.num_outstanding_io -= 1;
        self.submit_notify.notify_waiters();
        if core.current.is_pending() {
            self.flush_current_batch(&mut core);
        }
        if core.num_outstanding_io == 0 {
            debug_assert!(core.current.is_empty());
            self.drain_notify.notify_waiters();
        }
    }

    /// Wait until no writes are in flight and no records are pending.
    pub(crate) async fn drain(&self) {
        loop {
            let notified = self.drain_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let core = self.core.lock().unwrap();
                if core.num_outstanding_io == 0 && core.current.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

impl Drop for RecordSubmitter {
    fn drop(&mut self) {
        let core = self.core.lock().unwrap();
        if core.current.is_pending() {
            debug!(
                pending = core.current.num_records(),
                "Record submitter dropped with pending records"
            );
        }
    }
}
