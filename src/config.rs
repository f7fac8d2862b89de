//! Configuration options for containers and buffers.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration options used when creating containers and buffers.
///
/// All thresholds are tuning constants: changing them affects memory use and
/// throughput, never the content of a table.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    /// Maximum number of rows a buffer keeps in memory. Adding one more row
    /// moves the buffer to its spill file for good.
    /// Default: 5000
    pub max_rows_in_memory: usize,

    /// Maximum number of distinct values tracked per column domain. Tracking
    /// is abandoned for a column once the cap is exceeded.
    /// Default: 60
    pub max_possible_values: usize,

    /// Number of blob files per bucket directory.
    /// Default: 1000
    pub blob_bucket_size: u64,

    /// Capacity of the queue between the producing thread and the
    /// background writer.
    /// Default: 10
    pub async_queue_capacity: usize,

    /// Serialize rows on the calling thread instead of a background worker.
    /// Default: false
    pub synchronous_write: bool,

    /// Copy every incoming blob into the new buffer, even when its owner is
    /// globally registered. Needed for tables that outlive their producer.
    /// Default: false
    pub force_copy_blobs: bool,

    /// Row keys kept in the in-memory duplicate set before sorted chunks are
    /// spilled to disk and checked at close.
    /// Default: 100_000
    pub max_keys_in_memory: usize,

    /// Capacity of the read-ahead queue of prefetching iterators.
    /// Default: 10
    pub prefetch_capacity: usize,

    /// How often a blocked prefetch producer checks whether its consumer
    /// is gone.
    /// Default: 100ms
    pub prefetch_poll_interval: Duration,

    /// Parent directory of spill files and blob directories.
    /// Default: the system temp directory
    pub temp_dir: PathBuf,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            max_rows_in_memory: 5000,
            max_possible_values: 60,
            blob_bucket_size: 1000,
            async_queue_capacity: 10,
            synchronous_write: false,
            force_copy_blobs: false,
            max_keys_in_memory: 100_000,
            prefetch_capacity: 10,
            prefetch_poll_interval: Duration::from_millis(100),
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl ContainerOptions {
    /// Creates a new ContainerOptions with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the in-memory row threshold.
    pub fn max_rows_in_memory(mut self, rows: usize) -> Self {
        self.max_rows_in_memory = rows;
        self
    }

    /// Sets the possible-values cap of column domains.
    pub fn max_possible_values(mut self, count: usize) -> Self {
        self.max_possible_values = count;
        self
    }

    /// Sets the blob bucket size.
    pub fn blob_bucket_size(mut self, size: u64) -> Self {
        self.blob_bucket_size = size;
        self
    }

    /// Sets the capacity of the background writer queue.
    pub fn async_queue_capacity(mut self, capacity: usize) -> Self {
        self.async_queue_capacity = capacity;
        self
    }

    /// Enables or disables synchronous writing.
    pub fn synchronous_write(mut self, value: bool) -> Self {
        self.synchronous_write = value;
        self
    }

    /// Enables or disables the force-copy blob policy.
    pub fn force_copy_blobs(mut self, value: bool) -> Self {
        self.force_copy_blobs = value;
        self
    }

    /// Sets how many row keys the duplicate checker keeps in memory.
    pub fn max_keys_in_memory(mut self, count: usize) -> Self {
        self.max_keys_in_memory = count;
        self
    }

    /// Sets the read-ahead queue capacity.
    pub fn prefetch_capacity(mut self, capacity: usize) -> Self {
        self.prefetch_capacity = capacity;
        self
    }

    /// Sets the poll interval of prefetch producers.
    pub fn prefetch_poll_interval(mut self, interval: Duration) -> Self {
        self.prefetch_poll_interval = interval;
        self
    }

    /// Sets the directory spill files are created in.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.blob_bucket_size == 0 {
            return Err(crate::Error::invalid_argument("blob_bucket_size must be > 0"));
        }
        if self.async_queue_capacity == 0 {
            return Err(crate::Error::invalid_argument("async_queue_capacity must be > 0"));
        }
        if self.prefetch_capacity == 0 {
            return Err(crate::Error::invalid_argument("prefetch_capacity must be > 0"));
        }
        if self.max_keys_in_memory == 0 {
            return Err(crate::Error::invalid_argument("max_keys_in_memory must be > 0"));
        }
        if self.prefetch_poll_interval.is_zero() {
            return Err(crate::Error::invalid_argument("prefetch_poll_interval must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ContainerOptions::default();
        assert_eq!(opts.max_rows_in_memory, 5000);
        assert_eq!(opts.max_possible_values, 60);
        assert_eq!(opts.blob_bucket_size, 1000);
        assert_eq!(opts.async_queue_capacity, 10);
        assert!(!opts.synchronous_write);
    }

    #[test]
    fn test_options_builder() {
        let opts = ContainerOptions::new()
            .max_rows_in_memory(3)
            .synchronous_write(true)
            .force_copy_blobs(true);

        assert_eq!(opts.max_rows_in_memory, 3);
        assert!(opts.synchronous_write);
        assert!(opts.force_copy_blobs);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = ContainerOptions::default();
        assert!(opts.validate().is_ok());

        opts.blob_bucket_size = 0;
        assert!(opts.validate().is_err());

        opts.blob_bucket_size = 10;
        opts.async_queue_capacity = 0;
        assert!(opts.validate().is_err());
    }
}
