//! File-Backed Segment Device
//!
//! Implements the device contracts over fixed-size files in a directory, one
//! file per segment:
//!
//! ```text
//! {dir}/00000000.seg
//! {dir}/00000001.seg
//! ...
//! ```
//!
//! Every file is preallocated to the segment size on first open. Reopening
//! an existing file keeps its contents, like a reused physical segment;
//! stale records are fenced by the segment nonce at replay.
//!
//! Writes seek to the target offset, write, and `sync_data` before
//! resolving - the journal is the durability boundary, so a resolved write
//! must actually be on stable storage.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use seawall_core::{Paddr, SegmentId};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::device::{Segment, SegmentManager};
use crate::error::Result;

/// A [`SegmentManager`] over fixed-size files in a directory.
pub struct FileSegmentManager {
    dir: PathBuf,
    segment_size: u64,
    block_size: u64,
}

impl FileSegmentManager {
    /// Open (creating if needed) a segment directory.
    pub async fn open(dir: impl Into<PathBuf>, segment_size: u64, block_size: u64) -> Result<Self> {
        assert!(block_size.is_power_of_two());
        assert!(segment_size % block_size == 0);
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = ?dir, segment_size, block_size, "Segment directory opened");
        Ok(Self {
            dir,
            segment_size,
            block_size,
        })
    }

    fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.dir.join(format!("{:08}.seg", id.0))
    }
}

#[async_trait]
impl SegmentManager for FileSegmentManager {
    fn get_segment_size(&self) -> u64 {
        self.segment_size
    }

    fn get_block_size(&self) -> u64 {
        self.block_size
    }

    async fn open(&self, id: SegmentId) -> Result<Arc<dyn Segment>> {
        let path = self.segment_path(id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;

        // preallocate on first open; keep contents on reuse
        let len = file.metadata().await?.len();
        if len != self.segment_size {
            file.set_len(self.segment_size).await?;
        }

        debug!(segment = %id, path = ?path, "Segment file opened");
        Ok(Arc::new(FileSegment {
            id,
            capacity: self.segment_size,
            file: Mutex::new(file),
        }))
    }

    async fn read(&self, addr: Paddr, len: u64) -> Result<Bytes> {
        let mut file = File::open(self.segment_path(addr.segment)).await?;
        file.seek(SeekFrom::Start(addr.offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

struct FileSegment {
    id: SegmentId,
    capacity: u64,
    file: Mutex<File>,
}

#[async_trait]
impl Segment for FileSegment {
    fn get_segment_id(&self) -> SegmentId {
        self.id
    }

    fn get_write_capacity(&self) -> u64 {
        self.capacity
    }

    async fn write(&self, offset: u64, buf: Bytes) -> Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&buf).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let file = self.file.lock().await;
        file.sync_all().await?;
        debug!(segment = %self.id, "Segment file closed");
        Ok(())
    }
}
