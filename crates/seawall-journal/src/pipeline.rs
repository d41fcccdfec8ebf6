//! Write Pipeline and Ordering Handles
//!
//! Device writes may complete in any order, but commit acknowledgements and
//! the `committed_to` cursor must advance in submission order. The pipeline
//! recovers that order with two exclusive FIFO stages:
//!
//! ```text
//! submit ──> [device_submission] ──> [finalize] ──> ack
//! ```
//!
//! A submission enqueues into `device_submission` at the moment its offset
//! is reserved, holds the stage while its own device write is in flight, and
//! then moves to `finalize` - enqueueing there *before* releasing
//! `device_submission`, so the finalize queue inherits reservation order.
//! A submission whose write finished early simply waits its turn behind
//! slower predecessors; that is exactly how later commits are held behind
//! earlier ones.
//!
//! An [`OrderingHandle`] is the caller's token for one transaction's trip
//! through the stages. Stage grants are RAII tickets: dropping a handle on
//! any exit path (including errors and cancelled futures) releases its
//! stage and wakes the next waiter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

struct StageState {
    busy: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// An exclusive stage granting entry in strict FIFO order.
///
/// `enter` is synchronous: the queue position is taken immediately, which is
/// what lets the submitter assign positions under its scheduling lock.
pub(crate) struct OrderedStage {
    state: Arc<Mutex<StageState>>,
}

impl OrderedStage {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StageState {
                busy: false,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Take a queue position. The returned ticket resolves when every
    /// earlier ticket has been dropped.
    pub(crate) fn enter(&self) -> StageTicket {
        let mut state = self.state.lock().unwrap();
        if !state.busy && state.waiters.is_empty() {
            state.busy = true;
            StageTicket {
                state: self.state.clone(),
                rx: None,
                granted: true,
            }
        } else {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            StageTicket {
                state: self.state.clone(),
                rx: Some(rx),
                granted: false,
            }
        }
    }
}

fn grant_next(state: &mut StageState) {
    loop {
        match state.waiters.pop_front() {
            // a dead waiter (dropped ticket) is skipped
            Some(tx) => {
                if tx.send(()).is_ok() {
                    return;
                }
            }
            None => {
                state.busy = false;
                return;
            }
        }
    }
}

/// A position in an [`OrderedStage`]; holds the stage once granted.
pub(crate) struct StageTicket {
    state: Arc<Mutex<StageState>>,
    rx: Option<oneshot::Receiver<()>>,
    granted: bool,
}

impl StageTicket {
    /// Wait until this ticket holds the stage.
    pub(crate) async fn ready(&mut self) {
        if self.granted {
            return;
        }
        if let Some(rx) = self.rx.take() {
            // the sender is never dropped before sending unless the stage
            // itself is gone, in which case exclusivity is moot
            let _ = rx.await;
        }
        self.granted = true;
    }
}

impl Drop for StageTicket {
    fn drop(&mut self) {
        if self.granted {
            grant_next(&mut self.state.lock().unwrap());
            return;
        }
        // Never polled to completion. The grant may still have raced in;
        // if it did, this ticket holds the stage and must pass it on.
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                grant_next(&mut self.state.lock().unwrap());
            }
        }
    }
}

/// The two ordering stages a submission passes through.
pub struct WritePipeline {
    pub(crate) device_submission: OrderedStage,
    pub(crate) finalize: OrderedStage,
}

impl WritePipeline {
    pub fn new() -> Self {
        Self {
            device_submission: OrderedStage::new(),
            finalize: OrderedStage::new(),
        }
    }
}

impl Default for WritePipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction's token for its trip through the write pipeline.
///
/// Reusable: after a submission resolves the handle is empty again and may
/// carry the caller's next record.
#[derive(Default)]
pub struct OrderingHandle {
    device_submission: Option<StageTicket>,
    finalize: Option<StageTicket>,
}

impl OrderingHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a `device_submission` queue position. Synchronous; called under
    /// the submitter's scheduling lock so positions match reservations.
    pub(crate) fn enqueue_device_submission(&mut self, pipeline: &WritePipeline) {
        debug_assert!(self.device_submission.is_none() && self.finalize.is_none());
        self.device_submission = Some(pipeline.device_submission.enter());
    }

    /// Wait until the handle holds `device_submission`.
    pub(crate) async fn await_device_submission(&mut self) {
        if let Some(ticket) = self.device_submission.as_mut() {
            ticket.ready().await;
        }
    }

    /// Move from `device_submission` to `finalize`: enqueue there first so
    /// finalize order inherits submission order, then release the previous
    /// stage, then wait for the grant.
    pub(crate) async fn enter_finalize(&mut self, pipeline: &WritePipeline) {
        let mut ticket = pipeline.finalize.enter();
        self.device_submission = None;
        ticket.ready().await;
        self.finalize = Some(ticket);
    }

    /// Release whatever stage the handle holds.
    pub(crate) fn exit(&mut self) {
        self.finalize = None;
        self.device_submission = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_uncontended_grant_is_immediate() {
        let stage = OrderedStage::new();
        let mut ticket = stage.enter();
        ticket.ready().await;
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let stage = Arc::new(OrderedStage::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // take positions synchronously, in order
        let tickets: Vec<StageTicket> = (0..4).map(|_| stage.enter()).collect();

        let mut tasks = Vec::new();
        for (i, mut ticket) in tickets.into_iter().enumerate() {
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                // stagger wakeups in reverse to prove order comes from the
                // queue, not from scheduling
                tokio::time::sleep(Duration::from_millis((4 - i as u64) * 5)).await;
                ticket.ready().await;
                order.lock().unwrap().push(i);
                drop(ticket);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let stage = OrderedStage::new();
        let holder = stage.enter();
        let skipped = stage.enter();
        let mut third = stage.enter();

        drop(skipped);
        drop(holder);
        // the dead second ticket must not block the third
        third.ready().await;
    }

    #[tokio::test]
    async fn test_drop_of_granted_but_unpolled_ticket_releases() {
        let stage = OrderedStage::new();
        let holder = stage.enter();
        let pending = stage.enter();
        drop(holder); // grants `pending`, which never polls
        drop(pending);
        let mut next = stage.enter();
        next.ready().await;
    }

    #[tokio::test]
    async fn test_two_stage_handoff_preserves_order() {
        let pipeline = Arc::new(WritePipeline::new());
        let finalize_order = Arc::new(Mutex::new(Vec::new()));
        let in_first = Arc::new(AtomicUsize::new(0));

        let mut handles: Vec<OrderingHandle> = (0..3)
            .map(|_| {
                let mut h = OrderingHandle::new();
                h.enqueue_device_submission(&pipeline);
                h
            })
            .collect();

        let mut tasks = Vec::new();
        for (i, mut handle) in handles.drain(..).enumerate() {
            let pipeline = pipeline.clone();
            let finalize_order = finalize_order.clone();
            let in_first = in_first.clone();
            tasks.push(tokio::spawn(async move {
                handle.await_device_submission().await;
                assert_eq!(in_first.fetch_add(1, Ordering::SeqCst), i);
                // simulate a write whose duration shrinks with position:
                // later submissions "complete" faster
                tokio::time::sleep(Duration::from_millis((3 - i as u64) * 5)).await;
                handle.enter_finalize(&pipeline).await;
                finalize_order.lock().unwrap().push(i);
                handle.exit();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*finalize_order.lock().unwrap(), vec![0, 1, 2]);
    }
}
