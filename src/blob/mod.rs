//! Out-of-band blob storage of one buffer.
//!
//! Payloads live in individual files below the buffer directory:
//!
//! ```text
//! blobs/col_<column>/<bucket1>/<bucket2>/<index>.bin[.gz]
//! ```
//!
//! with `bucket1 = index / size²` and `bucket2 = (index / size) % size`, so
//! no directory holds more than `size` entries for the first `size³` blobs
//! of a column.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use crate::buffer::BufferDir;
use crate::cell::BlobAddress;
use crate::error::{Error, Result};

/// Directory below the buffer directory that holds blob files.
pub(crate) const BLOB_DIR: &str = "blobs";

/// Blob files of one buffer.
pub struct BlobStore {
    buffer_id: u64,
    dir: Arc<BufferDir>,
    bucket_size: u64,
    next_index: Mutex<HashMap<u32, u64>>,
    files_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl BlobStore {
    pub(crate) fn new(buffer_id: u64, dir: Arc<BufferDir>, bucket_size: u64) -> Self {
        Self {
            buffer_id,
            dir,
            bucket_size: bucket_size.max(1),
            next_index: Mutex::new(HashMap::new()),
            files_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Id of the owning buffer.
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }

    /// Bucket size used for the directory layout.
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// Hands out the next unused address of `column`. Indexes are never
    /// reused within the lifetime of the store.
    pub(crate) fn assign_address(&self, column: u32, compressed: bool) -> BlobAddress {
        let mut next = self.next_index.lock();
        let slot = next.entry(column).or_insert(0);
        let index = *slot;
        *slot += 1;
        BlobAddress { buffer_id: self.buffer_id, column, index, compressed }
    }

    /// Next index `assign_address` would hand out for `column`.
    pub(crate) fn next_index(&self, column: u32) -> u64 {
        self.next_index.lock().get(&column).copied().unwrap_or(0)
    }

    /// Writes the payload of a freshly assigned address.
    pub(crate) fn write(&self, address: &BlobAddress, payload: &[u8]) -> Result<()> {
        self.check_owner(address)?;
        let path = self.dir.path()?.join(relative_path(address, self.bucket_size));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_payload(File::create(&path)?, payload, address.compressed)?;
        self.files_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(payload.len() as u64, Ordering::Relaxed);
        log::debug!("Wrote blob {:?} ({} bytes) to {:?}", address, payload.len(), path);
        Ok(())
    }

    /// Reads and, if needed, decompresses a payload.
    ///
    /// # Errors
    ///
    /// [`Error::BlobOwnerNotFound`] once the owning buffer was cleared;
    /// [`Error::Corruption`] if the blob file is missing.
    pub fn read(&self, address: &BlobAddress) -> Result<Arc<[u8]>> {
        self.check_owner(address)?;
        if self.dir.is_cleared() {
            return Err(Error::BlobOwnerNotFound { buffer_id: self.buffer_id });
        }
        let path = self.dir.path()?.join(relative_path(address, self.bucket_size));
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::corruption(format!("blob file {:?} is missing", path))
            } else {
                Error::Io(e)
            }
        })?;
        let mut payload = Vec::new();
        if address.compressed {
            GzDecoder::new(BufReader::new(file)).read_to_end(&mut payload)?;
        } else {
            BufReader::new(file).read_to_end(&mut payload)?;
        }
        Ok(payload.into())
    }

    /// Directory holding the blob tree, if any blob was ever stored.
    pub(crate) fn root(&self) -> Result<Option<PathBuf>> {
        let root = self.dir.path()?.join(BLOB_DIR);
        Ok(root.is_dir().then_some(root))
    }

    /// Number of blob files this store has written.
    pub fn files_written(&self) -> u64 {
        self.files_written.load(Ordering::Relaxed)
    }

    /// Total uncompressed payload bytes this store has written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    fn check_owner(&self, address: &BlobAddress) -> Result<()> {
        if address.buffer_id != self.buffer_id {
            return Err(Error::internal(format!(
                "blob {:?} asked from the store of buffer {}",
                address, self.buffer_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("buffer_id", &self.buffer_id)
            .field("bucket_size", &self.bucket_size)
            .field("files_written", &self.files_written())
            .finish()
    }
}

/// Path of a blob file relative to the buffer directory.
pub(crate) fn relative_path(address: &BlobAddress, bucket_size: u64) -> PathBuf {
    let bucket_size = bucket_size.max(1);
    let outer = address.index / bucket_size.saturating_mul(bucket_size);
    let inner = (address.index / bucket_size) % bucket_size;
    let file = if address.compressed {
        format!("{}.bin.gz", address.index)
    } else {
        format!("{}.bin", address.index)
    };
    PathBuf::from(BLOB_DIR)
        .join(format!("col_{}", address.column))
        .join(outer.to_string())
        .join(inner.to_string())
        .join(file)
}

/// Writes a payload to `out`, gzip-compressed if requested.
pub(crate) fn write_payload<W: Write>(out: W, payload: &[u8], compressed: bool) -> Result<()> {
    if compressed {
        let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
        encoder.write_all(payload)?;
        encoder.finish()?.flush()?;
    } else {
        let mut out = BufWriter::new(out);
        out.write_all(payload)?;
        out.flush()?;
    }
    Ok(())
}
