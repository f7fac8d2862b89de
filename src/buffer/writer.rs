//! Write side of a buffer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;

use super::{Buffer, BufferDir, Storage, DATA_FILE};
use crate::blob::BlobStore;
use crate::cell::{BlobCell, CellTypeRegistry, CollectionCell, DataCell};
use crate::codec::{CellEncoder, TypeShortcutTable};
use crate::config::ContainerOptions;
use crate::error::{Error, Result};
use crate::format::FormatVersion;
use crate::repository::{allocate_id, ReservedId, TableRepository};
use crate::row::{DataRow, RowKey};
use crate::schema::TableSchema;

/// Gzip-compressed spill file being appended to.
struct SpillFile {
    path: PathBuf,
    sink: BufWriter<GzEncoder<File>>,
}

impl SpillFile {
    fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)?;
        let sink = BufWriter::new(GzEncoder::new(file, Compression::default()));
        Ok(Self { path, sink })
    }

    fn finish(self) -> Result<()> {
        let encoder = self.sink.into_inner().map_err(|e| e.into_error())?;
        let mut file = encoder.finish()?;
        file.flush()?;
        log::debug!("Finished spill file {:?}", self.path);
        Ok(())
    }
}

/// An open buffer accepting rows.
///
/// Rows are kept in memory until their number exceeds
/// [`ContainerOptions::max_rows_in_memory`]. At that point every buffered
/// row is written to a gzip-compressed spill file and all further rows go
/// straight to the file. The switch happens at most once.
///
/// [`close`](Self::close) freezes the buffer into a read-only [`Buffer`].
pub struct BufferWriter {
    id: ReservedId,
    max_rows_in_memory: usize,
    force_copy_blobs: bool,
    version: FormatVersion,
    registry: Arc<CellTypeRegistry>,
    local: Option<Arc<TableRepository>>,
    dir: Arc<BufferDir>,
    blobs: Arc<BlobStore>,
    types: TypeShortcutTable,
    rows: Vec<DataRow>,
    spill: Option<SpillFile>,
    row_count: u64,
    contains_blobs: bool,
    foreign_blobs: bool,
}

impl BufferWriter {
    /// Creates an empty buffer. Key-less buffers drop row keys on write.
    pub fn new(options: &ContainerOptions, registry: Arc<CellTypeRegistry>, with_keys: bool) -> Self {
        let id = allocate_id();
        let dir = BufferDir::new(&options.temp_dir);
        let blobs = Arc::new(BlobStore::new(id.get(), Arc::clone(&dir), options.blob_bucket_size));
        Self {
            id,
            max_rows_in_memory: options.max_rows_in_memory,
            force_copy_blobs: options.force_copy_blobs,
            version: FormatVersion::current(with_keys),
            registry,
            local: None,
            dir,
            blobs,
            types: TypeShortcutTable::new(),
            rows: Vec::new(),
            spill: None,
            row_count: 0,
            contains_blobs: false,
            foreign_blobs: false,
        }
    }

    /// Uses `local` to resolve blobs of unregistered buffers from the same
    /// context.
    pub fn with_local_repository(mut self, local: Arc<TableRepository>) -> Self {
        self.local = Some(local);
        self
    }

    /// Id of the buffer, used as owner id of its blobs.
    pub fn id(&self) -> u64 {
        self.id.get()
    }

    /// Rows added so far.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Whether the buffer has switched to its spill file.
    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// Blob store of this buffer.
    pub fn blob_store(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// Appends a row.
    ///
    /// Blob cells are taken over first: fresh blobs are written to this
    /// buffer's blob directory, blobs of other buffers are referenced or
    /// copied.
    pub fn add_row(&mut self, row: DataRow) -> Result<()> {
        let row = if self.version.with_keys || row.key().as_str().is_empty() {
            row
        } else {
            row.with_key(RowKey::empty())
        };
        let row = if row.contains_blobs() {
            self.contains_blobs = true;
            self.adopt_blobs(&row)?
        } else {
            row
        };

        match &mut self.spill {
            Some(spill) => {
                let mut encoder = CellEncoder::new(&mut self.types, &self.registry, self.version);
                encoder.write_row(&mut spill.sink, &row)?;
            }
            None => {
                self.rows.push(row);
                if self.rows.len() > self.max_rows_in_memory {
                    self.spill_rows()?;
                }
            }
        }
        self.row_count += 1;
        Ok(())
    }

    fn spill_rows(&mut self) -> Result<()> {
        let path = self.dir.path()?.join(DATA_FILE);
        log::info!(
            "Buffer {} exceeded {} rows in memory, moving to {:?}",
            self.id.get(),
            self.max_rows_in_memory,
            path
        );
        let mut spill = SpillFile::create(path)?;
        let mut encoder = CellEncoder::new(&mut self.types, &self.registry, self.version);
        for row in self.rows.drain(..) {
            encoder.write_row(&mut spill.sink, &row)?;
        }
        self.rows.shrink_to_fit();
        self.spill = Some(spill);
        Ok(())
    }

    fn adopt_blobs(&mut self, row: &DataRow) -> Result<DataRow> {
        let mut cells = Vec::with_capacity(row.num_cells());
        for (column, cell) in row.cells().iter().enumerate() {
            cells.push(self.adopt_cell(column as u32, cell)?);
        }
        Ok(DataRow::new(row.key().clone(), cells))
    }

    fn adopt_cell(&mut self, column: u32, cell: &DataCell) -> Result<DataCell> {
        match cell {
            DataCell::Blob(blob) => Ok(DataCell::Blob(self.adopt_blob(column, blob)?)),
            DataCell::Collection(collection) if cell.contains_blobs() => {
                let mut cells = Vec::with_capacity(collection.cells().len());
                for element in collection.cells() {
                    cells.push(self.adopt_cell(column, element)?);
                }
                Ok(DataCell::Collection(CollectionCell::new(collection.element_type().clone(), cells)))
            }
            other => Ok(other.clone()),
        }
    }

    fn adopt_blob(&mut self, column: u32, blob: &BlobCell) -> Result<BlobCell> {
        let address = match blob.address() {
            None => {
                let payload = blob.payload()?;
                let compressed = self.registry.compress_blob(blob.type_name());
                let address = self.blobs.assign_address(column, compressed);
                self.blobs.write(&address, &payload)?;
                if blob.commit(address, &self.blobs) {
                    return Ok(blob.clone());
                }
                // another buffer committed the handle first; keep our copy
                return Ok(BlobCell::committed(blob.type_name_arc(), address, &self.blobs, Some(&payload)));
            }
            Some(address) => address,
        };

        if address.buffer_id == self.id() {
            return Ok(blob.clone());
        }
        if !self.force_copy_blobs && TableRepository::global().contains(address.buffer_id) {
            self.foreign_blobs = true;
            return Ok(blob.clone());
        }

        let payload = match blob.payload() {
            Err(Error::BlobOwnerNotFound { buffer_id }) => self
                .local
                .as_ref()
                .and_then(|local| local.blob_store(buffer_id))
                .ok_or(Error::BlobOwnerNotFound { buffer_id })?
                .read(&address)?,
            other => other?,
        };
        let compressed = self.registry.compress_blob(blob.type_name());
        let copy = self.blobs.assign_address(column, compressed);
        self.blobs.write(&copy, &payload)?;
        log::debug!("Copied blob {:?} into buffer {} as {:?}", address, self.id(), copy);
        Ok(BlobCell::committed(blob.type_name_arc(), copy, &self.blobs, Some(&payload)))
    }

    /// Freezes the buffer.
    pub fn close(self, schema: TableSchema) -> Result<Arc<Buffer>> {
        let storage = match self.spill {
            Some(spill) => {
                spill.finish()?;
                Storage::File
            }
            None => Storage::Memory(Arc::new(self.rows)),
        };
        log::info!(
            "Closed buffer {} with {} rows ({})",
            self.id.get(),
            self.row_count,
            if matches!(storage, Storage::File) { "file" } else { "memory" }
        );
        Ok(Arc::new(Buffer::assemble(super::Parts {
            stream_owner_id: self.id.get(),
            id: self.id,
            schema,
            row_count: self.row_count,
            version: self.version,
            types: Arc::new(self.types),
            registry: self.registry,
            dir: self.dir,
            blobs: self.blobs,
            local: self.local.as_ref().map(Arc::downgrade).unwrap_or_default(),
            contains_blobs: self.contains_blobs,
            foreign_blobs: self.foreign_blobs,
            storage,
        })))
    }

    /// Location of the spill file once the buffer has spilled.
    pub fn spill_path(&self) -> Option<&Path> {
        self.spill.as_ref().map(|s| s.path.as_path())
    }
}

impl std::fmt::Debug for BufferWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferWriter")
            .field("id", &self.id())
            .field("row_count", &self.row_count)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}
