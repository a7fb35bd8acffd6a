//! Buffer pool configuration.

use granite_common::constants::{
    DEFAULT_DIRECTORY_BUCKET_SIZE, DEFAULT_POOL_SIZE, DEFAULT_REPLACER_K,
};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of page frames in the buffer pool.
    pub num_frames: usize,
    /// K value for the LRU-K replacer.
    pub replacer_k: usize,
    /// Bucket capacity for the page directory's extendible hash table.
    pub directory_bucket_size: usize,
}

impl BufferPoolConfig {
    /// Creates a new configuration with the specified number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            replacer_k: DEFAULT_REPLACER_K,
            directory_bucket_size: DEFAULT_DIRECTORY_BUCKET_SIZE,
        }
    }

    /// Sets the replacer K value.
    pub fn with_replacer_k(mut self, k: usize) -> Self {
        self.replacer_k = k;
        self
    }

    /// Sets the directory bucket size.
    pub fn with_directory_bucket_size(mut self, bucket_size: usize) -> Self {
        self.directory_bucket_size = bucket_size;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_frames == 0 {
            return Err("num_frames must be > 0");
        }
        if self.replacer_k == 0 {
            return Err("replacer_k must be > 0");
        }
        if self.directory_bucket_size == 0 {
            return Err("directory_bucket_size must be > 0");
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}
