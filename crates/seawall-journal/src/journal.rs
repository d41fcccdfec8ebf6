//! The Journal
//!
//! `Journal` is the surface the embedding system sees: a stream of
//! atomically written records over a segment device.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──> set_segment_provider ──> [replay] ──> open_for_write
//!                                                   │
//!                               submit_record ... ──┤
//!                                                   ▼
//!                                                 close
//! ```
//!
//! A record is durable exactly when its encoded bytes have been written to
//! the segment device, and its position in the replay stream matches the
//! order in which it was accepted. `submit_record` resolves with the
//! record's physical address and journal position; acknowledgements on one
//! ordering handle are totally ordered.
//!
//! ## Usage
//!
//! ```ignore
//! use seawall_journal::{Journal, OrderingHandle, SegmentScanner};
//!
//! let journal = Journal::new(device.clone(), SegmentScanner::new(device));
//! journal.set_segment_provider(provider);
//!
//! journal.replay(segment_headers, &mut applier).await?;
//! journal.open_for_write().await?;
//!
//! let mut handle = OrderingHandle::new();
//! let (paddr, seq) = journal.submit_record(record, &mut handle).await?;
//!
//! journal.close().await?;
//! ```

use std::sync::Arc;

use seawall_core::{JournalSeq, Paddr, Record, SegmentHeader, SegmentId, SegmentSeq};
use tracing::info;

use crate::config::JournalConfig;
use crate::device::{SegmentManager, SegmentProvider};
use crate::error::{Error, Result};
use crate::pipeline::{OrderingHandle, WritePipeline};
use crate::replay::{log_replay_done, prep_replay_segments, replay_segment, DeltaHandler};
use crate::scanner::SegmentScanner;
use crate::segments::JournalSegmentManager;
use crate::submitter::RecordSubmitter;

/// Manages a stream of atomically written records over a segment device.
pub struct Journal {
    jsm: Arc<JournalSegmentManager>,
    submitter: Arc<RecordSubmitter>,
    scanner: SegmentScanner,
}

impl Journal {
    pub fn new(segment_manager: Arc<dyn SegmentManager>, scanner: SegmentScanner) -> Self {
        Self::with_config(segment_manager, scanner, JournalConfig::default())
    }

    pub fn with_config(
        segment_manager: Arc<dyn SegmentManager>,
        scanner: SegmentScanner,
        config: JournalConfig,
    ) -> Self {
        let jsm = Arc::new(JournalSegmentManager::new(segment_manager));
        let submitter = Arc::new(RecordSubmitter::new(jsm.clone(), &config));
        Self {
            jsm,
            submitter,
            scanner,
        }
    }

    /// Sequence of the current journal segment.
    pub fn get_segment_seq(&self) -> SegmentSeq {
        self.jsm.get_segment_seq()
    }

    /// Highest in-order durable position.
    pub fn get_committed_to(&self) -> JournalSeq {
        self.jsm.get_committed_to()
    }

    /// Inject the segment provider. Not a constructor argument so that the
    /// provider's owner may own the journal too; the journal must not
    /// outlive the provider, which the shared handle guarantees.
    pub fn set_segment_provider(&self, provider: Arc<dyn SegmentProvider>) {
        self.jsm.set_segment_provider(provider);
    }

    /// Share the write pipeline with the embedding system's transaction
    /// machinery. Call before `open_for_write`; a journal constructed
    /// without one uses a private pipeline.
    pub fn set_write_pipeline(&self, pipeline: Arc<WritePipeline>) {
        self.submitter.set_write_pipeline(pipeline);
    }

    /// Initialize the journal for new writes; must run before
    /// `submit_record`, and after `replay` on an existing journal. Returns
    /// the position of the first record-writable byte. Idempotent.
    pub async fn open_for_write(&self) -> Result<JournalSeq> {
        self.jsm.open().await
    }

    /// Drain in-flight submissions, then finalize the current segment.
    /// Further writes fail until a reopen.
    pub async fn close(&self) -> Result<()> {
        self.submitter.drain().await;
        self.jsm.close().await
    }

    /// Append one record. Resolves with the address of the record's first
    /// block and its journal position once durable and acknowledged in
    /// order. See the crate errors for the failure contract.
    pub async fn submit_record(
        &self,
        record: Record,
        handle: &mut OrderingHandle,
    ) -> Result<(Paddr, JournalSeq)> {
        self.submitter.submit(record, handle).await
    }

    /// Replay the persisted deltas of `segment_headers` in journal order,
    /// awaiting `handler` for each. Returns the last replayed position.
    /// Must complete before `open_for_write`; afterwards the journal
    /// continues numbering from the last replayed segment.
    pub async fn replay(
        &self,
        segment_headers: Vec<(SegmentId, SegmentHeader)>,
        handler: &mut dyn DeltaHandler,
    ) -> Result<Option<JournalSeq>> {
        if self.jsm.is_open() {
            return Err(Error::Replay(
                "replay attempted on a journal open for write".to_string(),
            ));
        }

        let segments = prep_replay_segments(segment_headers, self.jsm.get_block_size())?;
        info!(segments = segments.len(), "Starting journal replay");

        let mut last = None;
        let mut highest_seq = None;
        for (start, header) in segments.iter() {
            highest_seq = Some(start.segment_seq);
            if let Some(seq) = replay_segment(&self.scanner, *start, *header, handler).await? {
                last = Some(seq);
            }
        }

        // continue numbering after every segment seen, records or not, so a
        // reopened journal never reissues a segment sequence
        if let Some(seq) = highest_seq {
            self.jsm.set_segment_seq(seq);
        }
        log_replay_done(&last, segments.len());
        Ok(last)
    }
}
