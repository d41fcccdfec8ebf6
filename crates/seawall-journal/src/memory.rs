//! In-Memory Segment Device
//!
//! `MemorySegmentManager` implements the device contracts over plain memory.
//! It exists for tests and for embedding systems that want a journal without
//! a backing device (ephemeral stores, simulations).
//!
//! Beyond the plain contract it offers fault injection:
//!
//! - `fail_writes(true)`: every subsequent write returns an error
//! - `set_write_latency(f)`: delay individual writes, keyed by segment and
//!   offset, to force out-of-order completions
//! - `corrupt(addr, len)`: flip stored bytes to simulate torn or rotted data
//! - `max_writes_in_flight()`: observed device concurrency, for asserting
//!   the submitter's I/O depth bound
//!
//! Reopening a segment id keeps whatever bytes were there - exactly like a
//! reused physical segment - so nonce fencing is exercised for real.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use seawall_core::{JournalSeq, Paddr, SegmentId};

use crate::device::{Segment, SegmentManager, SegmentProvider};
use crate::error::{Error, Result};

type LatencyFn = dyn Fn(SegmentId, u64) -> Option<Duration> + Send + Sync;

struct MemoryInner {
    segment_size: u64,
    block_size: u64,
    segments: Mutex<HashMap<SegmentId, Arc<Mutex<Vec<u8>>>>>,
    fail_writes: AtomicBool,
    write_latency: Mutex<Option<Arc<LatencyFn>>>,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
}

/// An in-memory implementation of [`SegmentManager`] with fault injection.
#[derive(Clone)]
pub struct MemorySegmentManager {
    inner: Arc<MemoryInner>,
}

impl MemorySegmentManager {
    pub fn new(segment_size: u64, block_size: u64) -> Self {
        assert!(block_size.is_power_of_two());
        assert!(segment_size % block_size == 0);
        Self {
            inner: Arc::new(MemoryInner {
                segment_size,
                block_size,
                segments: Mutex::new(HashMap::new()),
                fail_writes: AtomicBool::new(false),
                write_latency: Mutex::new(None),
                writes_in_flight: AtomicUsize::new(0),
                max_writes_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay writes: the hook receives `(segment, offset)` and returns how
    /// long the write should stall, if at all.
    pub fn set_write_latency<F>(&self, f: F)
    where
        F: Fn(SegmentId, u64) -> Option<Duration> + Send + Sync + 'static,
    {
        *self.inner.write_latency.lock().unwrap() = Some(Arc::new(f));
    }

    /// Overwrite `len` stored bytes at `addr` with garbage, simulating a
    /// torn write or bit rot.
    pub fn corrupt(&self, addr: Paddr, len: usize) {
        let segments = self.inner.segments.lock().unwrap();
        let segment = segments.get(&addr.segment).expect("segment exists");
        let mut buf = segment.lock().unwrap();
        for byte in &mut buf[addr.offset as usize..addr.offset as usize + len] {
            *byte = !*byte;
        }
    }

    /// Highest number of device writes observed in flight at once.
    pub fn max_writes_in_flight(&self) -> usize {
        self.inner.max_writes_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentManager for MemorySegmentManager {
    fn get_segment_size(&self) -> u64 {
        self.inner.segment_size
    }

    fn get_block_size(&self) -> u64 {
        self.inner.block_size
    }

    async fn open(&self, id: SegmentId) -> Result<Arc<dyn Segment>> {
        let buf = {
            let mut segments = self.inner.segments.lock().unwrap();
            segments
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(vec![0u8; self.inner.segment_size as usize])))
                .clone()
        };
        Ok(Arc::new(MemorySegment {
            id,
            buf,
            inner: self.inner.clone(),
        }))
    }

    async fn read(&self, addr: Paddr, len: u64) -> Result<Bytes> {
        let buf = {
            let segments = self.inner.segments.lock().unwrap();
            segments
                .get(&addr.segment)
                .ok_or_else(|| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no such segment: {}", addr.segment),
                    ))
                })?
                .clone()
        };
        let buf = buf.lock().unwrap();
        let start = addr.offset as usize;
        let end = start + len as usize;
        if end > buf.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read past end of segment: {}..{}", start, end),
            )));
        }
        Ok(Bytes::copy_from_slice(&buf[start..end]))
    }
}

struct MemorySegment {
    id: SegmentId,
    buf: Arc<Mutex<Vec<u8>>>,
    inner: Arc<MemoryInner>,
}

#[async_trait]
impl Segment for MemorySegment {
    fn get_segment_id(&self) -> SegmentId {
        self.id
    }

    fn get_write_capacity(&self) -> u64 {
        self.inner.segment_size
    }

    async fn write(&self, offset: u64, data: Bytes) -> Result<()> {
        let in_flight = self.inner.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_writes_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let result = self.write_inner(offset, data).await;
        self.inner.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl MemorySegment {
    async fn write_inner(&self, offset: u64, data: Bytes) -> Result<()> {
        let latency = self
            .inner
            .write_latency
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|f| f(self.id, offset));
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("injected write failure")));
        }

        let mut buf = self.buf.lock().unwrap();
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("write past end of segment: {}..{}", start, end),
            )));
        }
        buf[start..end].copy_from_slice(&data);
        Ok(())
    }
}

/// A segment provider that hands out fresh, sequential segment ids and
/// remembers closures. Suitable for tests and simple embeddings.
#[derive(Default)]
pub struct SequentialSegmentProvider {
    next: AtomicUsize,
    closed: Mutex<Vec<(SegmentId, JournalSeq)>>,
}

impl SequentialSegmentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments closed so far, in closure order.
    pub fn closed_segments(&self) -> Vec<(SegmentId, JournalSeq)> {
        self.closed.lock().unwrap().clone()
    }
}

impl SegmentProvider for SequentialSegmentProvider {
    fn get_next_segment_id(&self) -> SegmentId {
        SegmentId(self.next.fetch_add(1, Ordering::SeqCst) as u64)
    }

    fn close_segment(&self, id: SegmentId, last_seq: JournalSeq) {
        self.closed.lock().unwrap().push((id, last_seq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEGMENT: u64 = 64 * 1024;
    const BLOCK: u64 = 4096;

    #[tokio::test]
    async fn test_write_then_read() {
        let manager = MemorySegmentManager::new(SEGMENT, BLOCK);
        let segment = manager.open(SegmentId(0)).await.unwrap();
        segment
            .write(BLOCK, Bytes::from(vec![0x5a; BLOCK as usize]))
            .await
            .unwrap();

        let data = manager
            .read(Paddr::new(SegmentId(0), BLOCK), BLOCK)
            .await
            .unwrap();
        assert!(data.iter().all(|&b| b == 0x5a));
    }

    #[tokio::test]
    async fn test_reopen_keeps_contents() {
        let manager = MemorySegmentManager::new(SEGMENT, BLOCK);
        let segment = manager.open(SegmentId(7)).await.unwrap();
        segment
            .write(0, Bytes::from(vec![0x11; BLOCK as usize]))
            .await
            .unwrap();
        drop(segment);

        // a reincarnation of the same id sees the stale bytes
        let _again = manager.open(SegmentId(7)).await.unwrap();
        let data = manager
            .read(Paddr::new(SegmentId(7), 0), BLOCK)
            .await
            .unwrap();
        assert!(data.iter().all(|&b| b == 0x11));
    }

    #[tokio::test]
    async fn test_write_past_end_fails() {
        let manager = MemorySegmentManager::new(SEGMENT, BLOCK);
        let segment = manager.open(SegmentId(0)).await.unwrap();
        let result = segment
            .write(SEGMENT - BLOCK, Bytes::from(vec![0u8; 2 * BLOCK as usize]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let manager = MemorySegmentManager::new(SEGMENT, BLOCK);
        let segment = manager.open(SegmentId(0)).await.unwrap();
        manager.fail_writes(true);
        assert!(segment
            .write(0, Bytes::from(vec![0u8; BLOCK as usize]))
            .await
            .is_err());
        manager.fail_writes(false);
        assert!(segment
            .write(0, Bytes::from(vec![0u8; BLOCK as usize]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_flips_bytes() {
        let manager = MemorySegmentManager::new(SEGMENT, BLOCK);
        let segment = manager.open(SegmentId(0)).await.unwrap();
        segment
            .write(0, Bytes::from(vec![0xff; BLOCK as usize]))
            .await
            .unwrap();
        manager.corrupt(Paddr::new(SegmentId(0), 0), 16);
        let data = manager.read(Paddr::new(SegmentId(0), 0), BLOCK).await.unwrap();
        assert!(data[..16].iter().all(|&b| b == 0x00));
        assert!(data[16..].iter().all(|&b| b == 0xff));
    }

    #[tokio::test]
    async fn test_sequential_provider() {
        let provider = SequentialSegmentProvider::new();
        assert_eq!(provider.get_next_segment_id(), SegmentId(0));
        assert_eq!(provider.get_next_segment_id(), SegmentId(1));

        let seq = JournalSeq::new(0, Paddr::new(SegmentId(0), 8192));
        provider.close_segment(SegmentId(0), seq);
        assert_eq!(provider.closed_segments(), vec![(SegmentId(0), seq)]);
    }
}
