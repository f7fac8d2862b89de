//! Row buffers.
//!
//! A buffer goes through three states:
//!
//! * open: a [`BufferWriter`] accepting rows, in memory or spilled to disk;
//! * closed: a read-only [`Buffer`] shared behind an `Arc`, iterable by any
//!   number of concurrent cursors;
//! * cleared: backing files deleted, every further read fails.
//!
//! Iteration order always equals insertion order.

mod cursor;
mod dir;
mod writer;

pub(crate) use dir::BufferDir;
pub use dir::shutdown_cleanup;
pub use writer::BufferWriter;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use self::cursor::{CursorSlot, FileCursor, FileRows, MemoryRows, StreamLayout};
use crate::archive;
use crate::blob::BlobStore;
use crate::cell::CellTypeRegistry;
use crate::codec::{BlobContext, TypeShortcutTable};
use crate::error::{Error, Result};
use crate::format::FormatVersion;
use crate::iter::RowIterator;
use crate::repository::{allocate_id, claim_id, ReservedId, TableRepository};
use crate::row::DataRow;
use crate::schema::TableSchema;

/// File name of the row stream, in the buffer directory and in archives.
pub(crate) const DATA_FILE: &str = "data.bin";

pub(crate) enum Storage {
    Memory(Arc<Vec<DataRow>>),
    File,
    Cleared,
}

pub(crate) struct Parts {
    pub id: ReservedId,
    pub stream_owner_id: u64,
    pub schema: TableSchema,
    pub row_count: u64,
    pub version: FormatVersion,
    pub types: Arc<TypeShortcutTable>,
    pub registry: Arc<CellTypeRegistry>,
    pub dir: Arc<BufferDir>,
    pub blobs: Arc<BlobStore>,
    pub local: Weak<TableRepository>,
    pub contains_blobs: bool,
    pub foreign_blobs: bool,
    pub storage: Storage,
}

/// A closed, read-only buffer.
pub struct Buffer {
    id: ReservedId,
    stream_owner_id: u64,
    schema: TableSchema,
    row_count: u64,
    version: FormatVersion,
    types: Arc<TypeShortcutTable>,
    registry: Arc<CellTypeRegistry>,
    dir: Arc<BufferDir>,
    blobs: Arc<BlobStore>,
    local: Weak<TableRepository>,
    contains_blobs: bool,
    foreign_blobs: bool,
    storage: RwLock<Storage>,
    cursors: Mutex<Vec<Weak<Mutex<Option<FileCursor>>>>>,
    cleared: Arc<AtomicBool>,
}

impl Buffer {
    pub(crate) fn assemble(parts: Parts) -> Self {
        Self {
            id: parts.id,
            stream_owner_id: parts.stream_owner_id,
            schema: parts.schema,
            row_count: parts.row_count,
            version: parts.version,
            types: parts.types,
            registry: parts.registry,
            dir: parts.dir,
            blobs: parts.blobs,
            local: parts.local,
            contains_blobs: parts.contains_blobs,
            foreign_blobs: parts.foreign_blobs,
            storage: RwLock::new(parts.storage),
            cursors: Mutex::new(Vec::new()),
            cleared: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Restores a buffer saved with [`save`](Self::save).
    ///
    /// Only meta.xml is read here. The row stream and blob files are
    /// extracted into a fresh temporary directory on first access, so the
    /// archive must stay in place until then.
    ///
    /// The persisted buffer id is reused if no other buffer of this process
    /// holds it; otherwise the buffer gets a fresh id and blob addresses in
    /// the stream are remapped while reading.
    pub fn load(path: &Path, registry: Arc<CellTypeRegistry>, temp_dir: &Path) -> Result<Arc<Buffer>> {
        Self::load_in(path, registry, temp_dir, Weak::new())
    }

    /// Like [`load`](Self::load), resolving blobs of other buffers through
    /// `local` before the global repository.
    pub(crate) fn load_in(
        path: &Path,
        registry: Arc<CellTypeRegistry>,
        temp_dir: &Path,
        local: Weak<TableRepository>,
    ) -> Result<Arc<Buffer>> {
        let meta = archive::read_meta(path)?;
        let id = match claim_id(meta.buffer_id) {
            Some(id) => id,
            None => {
                let id = allocate_id();
                log::info!(
                    "Buffer id {} of {:?} is already in use, restoring as buffer {}",
                    meta.buffer_id,
                    path,
                    id.get()
                );
                id
            }
        };
        let dir = BufferDir::deferred(temp_dir, path.to_path_buf());
        let blobs = Arc::new(BlobStore::new(id.get(), Arc::clone(&dir), meta.blob_bucket_size));
        log::info!(
            "Loaded buffer {} from {:?} ({} rows, {})",
            id.get(),
            path,
            meta.row_count,
            meta.version.version_string().unwrap_or("unknown version")
        );
        Ok(Arc::new(Buffer::assemble(Parts {
            id,
            stream_owner_id: meta.buffer_id,
            schema: meta.schema,
            row_count: meta.row_count,
            version: meta.version,
            types: Arc::new(TypeShortcutTable::from_entries(meta.types)?),
            registry,
            dir,
            blobs,
            local,
            contains_blobs: meta.contains_blobs,
            foreign_blobs: false,
            storage: Storage::File,
        })))
    }

    /// Buffer id, the owner id of its blobs.
    pub fn id(&self) -> u64 {
        self.id.get()
    }

    /// Owner id the row stream uses for this buffer's blobs.
    pub(crate) fn stream_owner_id(&self) -> u64 {
        self.stream_owner_id
    }

    /// Schema the buffer was closed with.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Final row count.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Format version of the row stream.
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Whether rows carry keys.
    pub fn is_keyed(&self) -> bool {
        self.version.with_keys
    }

    pub(crate) fn types(&self) -> &TypeShortcutTable {
        &self.types
    }

    pub(crate) fn registry(&self) -> &Arc<CellTypeRegistry> {
        &self.registry
    }

    /// Blob store of this buffer.
    pub fn blob_store(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// Whether any row holds a blob cell.
    pub fn contains_blobs(&self) -> bool {
        self.contains_blobs
    }

    /// Whether rows reference blobs stored by other buffers.
    pub(crate) fn has_foreign_blobs(&self) -> bool {
        self.foreign_blobs
    }

    /// Whether the rows are held in memory.
    pub fn is_in_memory(&self) -> bool {
        matches!(*self.storage.read(), Storage::Memory(_))
    }

    /// Whether [`clear`](Self::clear) has been called.
    pub fn is_cleared(&self) -> bool {
        matches!(*self.storage.read(), Storage::Cleared)
    }

    /// Whether the buffer was restored from an archive that has not been
    /// extracted yet.
    pub fn is_deferred(&self) -> bool {
        self.dir.is_deferred()
    }

    /// Path of the spill file, if the buffer is file-backed and its
    /// directory exists.
    pub fn spill_path(&self) -> Option<PathBuf> {
        match *self.storage.read() {
            Storage::File if !self.dir.is_deferred() => {
                self.dir.existing_path().map(|dir| dir.join(DATA_FILE))
            }
            _ => None,
        }
    }

    /// Spill file of a file-backed buffer, extracting a deferred archive
    /// first.
    pub(crate) fn data_file(&self) -> Result<Option<PathBuf>> {
        match *self.storage.read() {
            Storage::File => Ok(Some(self.dir.path()?.join(DATA_FILE))),
            Storage::Memory(_) => Ok(None),
            Storage::Cleared => Err(self.cleared_error()),
        }
    }

    /// Returns a new cursor positioned before the first row.
    pub fn iter(&self) -> Result<RowIterator> {
        let storage = self.storage.read();
        match &*storage {
            Storage::Memory(rows) => {
                Ok(RowIterator::new(MemoryRows::new(Arc::clone(rows), Arc::clone(&self.cleared))))
            }
            Storage::File => {
                let path = self.dir.path()?.join(DATA_FILE);
                let layout = StreamLayout {
                    version: self.version,
                    types: Arc::clone(&self.types),
                    registry: Arc::clone(&self.registry),
                    blobs: BlobContext {
                        own_id: self.id(),
                        stream_owner_id: self.stream_owner_id,
                        store: Arc::downgrade(&self.blobs),
                        local: self.local.clone(),
                    },
                    num_columns: self.schema.num_columns(),
                    row_count: self.row_count,
                };
                let slot: CursorSlot = Arc::new(Mutex::new(Some(FileCursor::open(path, layout)?)));
                let mut cursors = self.cursors.lock();
                cursors.retain(|c| c.strong_count() > 0);
                cursors.push(Arc::downgrade(&slot));
                Ok(RowIterator::new(FileRows::new(slot)))
            }
            Storage::Cleared => Err(self.cleared_error()),
        }
    }

    /// Deletes the spill file and blob directory. Open cursors report the
    /// end on their next call. Idempotent.
    pub fn clear(&self) {
        let mut storage = self.storage.write();
        if matches!(*storage, Storage::Cleared) {
            return;
        }
        self.cleared.store(true, Ordering::Release);
        for slot in self.cursors.lock().drain(..) {
            if let Some(slot) = slot.upgrade() {
                *slot.lock() = None;
            }
        }
        *storage = Storage::Cleared;
        self.dir.clear();
        log::debug!("Cleared buffer {}", self.id());
    }

    /// Writes the buffer to a zip archive in the current format.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.save_as(path, FormatVersion::current(self.is_keyed()), &mut |_| Ok(()))
    }

    /// Writes the buffer to a zip archive in the given format version.
    /// `on_row` is called before each re-encoded row and may abort the
    /// export by returning an error.
    pub fn save_as(
        &self,
        path: &Path,
        version: FormatVersion,
        on_row: &mut dyn FnMut(u64) -> Result<()>,
    ) -> Result<()> {
        if self.is_cleared() {
            return Err(self.cleared_error());
        }
        archive::write_buffer(self, path, version, on_row)
    }

    fn cleared_error(&self) -> Error {
        Error::invalid_state(format!("buffer {} has been cleared", self.id()))
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id())
            .field("row_count", &self.row_count)
            .field("in_memory", &self.is_in_memory())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{BlobCell, DataCell};
    use crate::config::ContainerOptions;
    use crate::schema::DataType;
    use tempfile::TempDir;

    fn options(dir: &TempDir, max_rows: usize) -> ContainerOptions {
        ContainerOptions::default().max_rows_in_memory(max_rows).temp_dir(dir.path())
    }

    fn schema() -> TableSchema {
        TableSchema::from_pairs(&[("n", DataType::Int), ("s", DataType::String)]).unwrap()
    }

    fn row(i: i32) -> DataRow {
        DataRow::new(format!("r{}", i), vec![DataCell::Int(i), DataCell::string(format!("v{}", i))])
    }

    fn collect(buffer: &Buffer) -> Vec<DataRow> {
        buffer.iter().unwrap().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_memory_buffer() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BufferWriter::new(&options(&tmp, 10), Arc::new(CellTypeRegistry::new()), true);
        for i in 0..10 {
            writer.add_row(row(i)).unwrap();
        }
        assert!(!writer.is_spilled());
        let buffer = writer.close(schema()).unwrap();
        assert!(buffer.is_in_memory());
        assert_eq!(buffer.row_count(), 10);
        assert!(buffer.spill_path().is_none());
        assert_eq!(collect(&buffer), (0..10).map(row).collect::<Vec<_>>());
    }

    #[test]
    fn test_spill_on_threshold() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BufferWriter::new(&options(&tmp, 10), Arc::new(CellTypeRegistry::new()), true);
        for i in 0..25 {
            writer.add_row(row(i)).unwrap();
            assert_eq!(writer.is_spilled(), i >= 10);
        }
        let buffer = writer.close(schema()).unwrap();
        assert!(!buffer.is_in_memory());
        assert!(buffer.spill_path().unwrap().exists());
        assert_eq!(collect(&buffer), (0..25).map(row).collect::<Vec<_>>());
        // independent cursors
        let mut a = buffer.iter().unwrap();
        let mut b = buffer.iter().unwrap();
        assert_eq!(a.next().unwrap().unwrap(), row(0));
        assert_eq!(a.next().unwrap().unwrap(), row(1));
        assert_eq!(b.next().unwrap().unwrap(), row(0));
    }

    #[test]
    fn test_clear_invalidates_cursors() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BufferWriter::new(&options(&tmp, 2), Arc::new(CellTypeRegistry::new()), true);
        for i in 0..5 {
            writer.add_row(row(i)).unwrap();
        }
        let buffer = writer.close(schema()).unwrap();
        let spill = buffer.spill_path().unwrap();
        let mut cursor = buffer.iter().unwrap();
        assert!(cursor.next().is_some());

        buffer.clear();
        assert!(!spill.exists());
        assert!(cursor.next().is_none());
        assert!(buffer.iter().is_err());
        buffer.clear();
    }

    #[test]
    fn test_clear_memory_buffer() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BufferWriter::new(&options(&tmp, 10), Arc::new(CellTypeRegistry::new()), true);
        writer.add_row(row(1)).unwrap();
        writer.add_row(row(2)).unwrap();
        let buffer = writer.close(schema()).unwrap();
        let mut cursor = buffer.iter().unwrap();
        assert!(cursor.next().is_some());
        buffer.clear();
        assert!(cursor.next().is_none());
        assert!(buffer.is_cleared());
    }

    #[test]
    fn test_same_blob_written_once() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BufferWriter::new(&options(&tmp, 1), Arc::new(CellTypeRegistry::new()), true);
        let blob = BlobCell::new("image", vec![7u8; 1000]);
        writer.add_row(DataRow::new("a", vec![DataCell::Blob(blob.clone())])).unwrap();
        writer.add_row(DataRow::new("b", vec![DataCell::Blob(blob.clone())])).unwrap();
        writer.add_row(DataRow::new("c", vec![DataCell::Missing])).unwrap();
        assert_eq!(writer.blob_store().files_written(), 1);
        assert_eq!(writer.blob_store().bytes_written(), 1000);

        let schema = TableSchema::from_pairs(&[("img", DataType::Blob("image".into()))]).unwrap();
        let buffer = writer.close(schema).unwrap();
        let rows = collect(&buffer);
        let addresses: Vec<_> = rows[..2]
            .iter()
            .map(|r| match r.cell(0) {
                Some(DataCell::Blob(b)) => b.address().unwrap(),
                other => panic!("expected blob, got {:?}", other),
            })
            .collect();
        assert_eq!(addresses[0], addresses[1]);
        assert_eq!(addresses[0].buffer_id, buffer.id());
        match rows[1].cell(0) {
            Some(DataCell::Blob(b)) => assert_eq!(&*b.payload().unwrap(), &[7u8; 1000][..]),
            other => panic!("expected blob, got {:?}", other),
        }
    }

    #[test]
    fn test_blob_from_unregistered_buffer_is_copied() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(CellTypeRegistry::new());
        let schema = TableSchema::from_pairs(&[("img", DataType::Blob("image".into()))]).unwrap();

        let mut first = BufferWriter::new(&options(&tmp, 10), Arc::clone(&registry), true);
        first.add_row(DataRow::new("a", vec![DataCell::Blob(BlobCell::new("image", vec![1u8, 2]))])).unwrap();
        let first = first.close(schema.clone()).unwrap();

        let mut second = BufferWriter::new(&options(&tmp, 10), Arc::clone(&registry), true);
        for row in first.iter().unwrap() {
            second.add_row(row.unwrap()).unwrap();
        }
        assert_eq!(second.blob_store().files_written(), 1);
        let second = second.close(schema).unwrap();
        first.clear();

        let rows = collect(&second);
        match rows[0].cell(0) {
            Some(DataCell::Blob(b)) => {
                assert_eq!(b.address().unwrap().buffer_id, second.id());
                assert_eq!(&*b.payload().unwrap(), &[1u8, 2]);
            }
            other => panic!("expected blob, got {:?}", other),
        }
    }
}
