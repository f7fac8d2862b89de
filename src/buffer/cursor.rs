//! Row sources behind [`RowIterator`](crate::RowIterator)s of a buffer.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use parking_lot::Mutex;

use crate::cell::CellTypeRegistry;
use crate::codec::{BlobContext, CellDecoder, TypeShortcutTable};
use crate::error::Result;
use crate::format::FormatVersion;
use crate::row::DataRow;

/// Rows of a memory-resident buffer.
pub(crate) struct MemoryRows {
    rows: Arc<Vec<DataRow>>,
    pos: usize,
    cleared: Arc<AtomicBool>,
}

impl MemoryRows {
    pub(crate) fn new(rows: Arc<Vec<DataRow>>, cleared: Arc<AtomicBool>) -> Self {
        Self { rows, pos: 0, cleared }
    }
}

impl Iterator for MemoryRows {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cleared.load(Ordering::Acquire) {
            return None;
        }
        let row = self.rows.get(self.pos)?.clone();
        self.pos += 1;
        Some(Ok(row))
    }
}

/// Everything needed to decode a spill file.
pub(crate) struct StreamLayout {
    pub version: FormatVersion,
    pub types: Arc<TypeShortcutTable>,
    pub registry: Arc<CellTypeRegistry>,
    pub blobs: BlobContext,
    pub num_columns: usize,
    pub row_count: u64,
}

/// Open read handle on a spill file.
pub(crate) struct FileCursor {
    path: PathBuf,
    reader: Box<dyn Read + Send>,
    layout: StreamLayout,
    row: u64,
}

impl FileCursor {
    pub(crate) fn open(path: PathBuf, layout: StreamLayout) -> Result<Self> {
        let file = BufReader::new(File::open(&path)?);
        let reader: Box<dyn Read + Send> = if layout.version.is_gzipped() {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(file)
        };
        Ok(Self { path, reader, layout, row: 0 })
    }

    fn next_row(&mut self) -> Option<Result<DataRow>> {
        if self.row >= self.layout.row_count {
            return None;
        }
        let layout = &self.layout;
        let decoder = CellDecoder::new(
            &layout.types,
            &layout.registry,
            layout.version,
            &layout.blobs,
            layout.num_columns,
        );
        let result = decoder.read_row(&mut self.reader).map_err(|e| e.in_file(&self.path, self.row));
        self.row += 1;
        Some(result)
    }
}

/// A file cursor shared with its buffer, which may close it at any time.
pub(crate) type CursorSlot = Arc<Mutex<Option<FileCursor>>>;

/// Rows of a file-backed buffer. Reports the end once the slot is emptied.
pub(crate) struct FileRows {
    slot: CursorSlot,
}

impl FileRows {
    pub(crate) fn new(slot: CursorSlot) -> Self {
        Self { slot }
    }
}

impl Iterator for FileRows {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut guard = self.slot.lock();
        let item = guard.as_mut()?.next_row();
        if !matches!(item, Some(Ok(_))) {
            // release the file handle as soon as the cursor is done
            *guard = None;
        }
        item
    }
}
