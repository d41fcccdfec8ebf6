//! Journal Configuration
//!
//! Controls the submission pipeline's concurrency and batching behavior:
//!
//! - **io_depth_limit**: maximum device writes in flight (default: 4).
//!   Beyond it, submissions either join the pending batch or suspend.
//! - **batch_capacity**: maximum records coalesced into one device write
//!   (default: 16)
//! - **batch_flush_size**: soft byte cap on a batch (default: 64 KiB, one
//!   stripe of sixteen 4 KiB blocks). A batch that has grown past it stops
//!   accepting records; the record that found it full flushes it.
//!
//! Memory held by pending batches is implicitly bounded by
//! `io_depth_limit x batch_flush_size`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Maximum concurrent device writes (default: 4)
    #[serde(default = "default_io_depth_limit")]
    pub io_depth_limit: usize,

    /// Maximum records per batch (default: 16)
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,

    /// Soft byte cap per batch (default: 64 KiB)
    #[serde(default = "default_batch_flush_size")]
    pub batch_flush_size: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            io_depth_limit: default_io_depth_limit(),
            batch_capacity: default_batch_capacity(),
            batch_flush_size: default_batch_flush_size(),
        }
    }
}

fn default_io_depth_limit() -> usize {
    4
}

fn default_batch_capacity() -> usize {
    16
}

fn default_batch_flush_size() -> u64 {
    64 * 1024 // one device stripe
}
