//! Execution context.
//!
//! An [`ExecutionContext`] bundles what table operations need from their
//! caller: options, the cell type registry, a repository of the tables
//! created in this context, a cancellation token and a progress sink.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::cell::CellTypeRegistry;
use crate::config::ContainerOptions;
use crate::container::DataContainer;
use crate::error::{Error, Result};
use crate::format::FormatVersion;
use crate::repository::TableRepository;
use crate::schema::{ColumnSchema, TableSchema};
use crate::table::Table;

/// Receives progress as a fraction in `[0, 1]` plus a message.
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options, registry, local tables, cancellation and progress of one
/// unit of work.
pub struct ExecutionContext {
    options: ContainerOptions,
    registry: Arc<CellTypeRegistry>,
    local: Arc<TableRepository>,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl ExecutionContext {
    /// Creates a context with the built-in cell types.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the temp directory
    /// cannot be created.
    pub fn new(options: ContainerOptions) -> Result<Self> {
        options.validate()?;
        fs::create_dir_all(&options.temp_dir)?;
        Ok(Self {
            options,
            registry: Arc::new(CellTypeRegistry::new()),
            local: Arc::new(TableRepository::new()),
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    /// Replaces the cell type registry.
    pub fn with_registry(mut self, registry: Arc<CellTypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the progress callback.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Uses an existing cancellation token, e.g. one shared with a UI.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Options for containers created in this context.
    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    /// Cell type registry.
    pub fn registry(&self) -> &Arc<CellTypeRegistry> {
        &self.registry
    }

    /// Tables created or loaded in this context.
    pub fn local_repository(&self) -> &Arc<TableRepository> {
        &self.local
    }

    /// Token to cancel operations running in this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Opens a container for a keyed table.
    pub fn create_container(&self, schema: TableSchema) -> Result<DataContainer> {
        self.open_container(schema, true)
    }

    /// Opens a container whose rows carry no key.
    pub fn create_keyless_container(&self, schema: TableSchema) -> Result<DataContainer> {
        self.open_container(schema, false)
    }

    fn open_container(&self, schema: TableSchema, keyed: bool) -> Result<DataContainer> {
        DataContainer::new(
            schema,
            &self.options,
            Arc::clone(&self.registry),
            Arc::clone(&self.local),
            keyed,
        )
    }

    /// Returns [`Error::Canceled`] if cancellation was requested.
    pub fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }

    /// Reports progress to the callback, if any.
    pub fn set_progress(&self, fraction: f64, message: &str) {
        if let Some(progress) = self.progress.as_deref() {
            progress(fraction.clamp(0.0, 1.0), message);
        }
    }

    /// Copies all rows of `table` into a new container table.
    pub fn copy_table(&self, table: &Table) -> Result<Table> {
        let columns = table
            .schema()
            .columns()
            .iter()
            .map(|c| ColumnSchema::new(c.name(), c.data_type().clone()))
            .collect();
        let mut container = self.open_container(TableSchema::new(columns)?, table.is_keyed())?;
        let total = table.row_count().max(1) as f64;
        for (i, row) in table.iter()?.enumerate() {
            self.check_canceled()?;
            container.add_row(row?)?;
            self.set_progress((i + 1) as f64 / total, "Copying rows");
        }
        container.close()
    }

    /// Writes `table` to a zip archive in the current format.
    ///
    /// Views are copied into a temporary container first. Cancellation is
    /// checked once per row.
    pub fn export_table(&self, table: &Table, path: &Path) -> Result<()> {
        let (buffer, temporary) = match table.buffer() {
            Some(buffer) => (Arc::clone(buffer), None),
            None => {
                let copy = self.copy_table(table)?;
                let buffer = copy
                    .buffer()
                    .cloned()
                    .ok_or_else(|| Error::internal("copied table has no buffer"))?;
                (buffer, Some(copy))
            }
        };
        let total = buffer.row_count().max(1) as f64;
        let result = buffer.save_as(path, FormatVersion::current(buffer.is_keyed()), &mut |row| {
            self.check_canceled()?;
            self.set_progress(row as f64 / total, "Writing archive");
            Ok(())
        });
        if let Some(copy) = temporary {
            self.clear_table(&copy);
        }
        result?;
        log::info!("Exported table {} to {:?}", table.id(), path);
        Ok(())
    }

    /// Opens a zip archive written by [`export_table`](Self::export_table)
    /// or [`Buffer::save`]. Rows are extracted lazily; the archive must
    /// stay in place until the table is first read.
    pub fn import_table(&self, path: &Path) -> Result<Table> {
        let buffer = Buffer::load_in(
            path,
            Arc::clone(&self.registry),
            &self.options.temp_dir,
            Arc::downgrade(&self.local),
        )?;
        let table = Table::from(buffer);
        self.local.register(&table);
        Ok(table)
    }

    /// Loads a table directory written by [`Table::save`].
    pub fn load_table(&self, dir: &Path) -> Result<Table> {
        Table::load(dir, self)
    }

    /// Registers `table` globally so blobs referencing it resolve from any
    /// context.
    pub fn publish(&self, table: &Table) {
        TableRepository::global().register(table);
    }

    /// Unregisters and clears `table`.
    pub fn clear_table(&self, table: &Table) {
        self.local.remove(table);
        table.clear();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("options", &self.options)
            .field("local_tables", &self.local.len())
            .field("canceled", &self.cancel.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{BlobCell, DataCell};
    use crate::row::DataRow;
    use crate::schema::DataType;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> ExecutionContext {
        ExecutionContext::new(ContainerOptions::default().max_rows_in_memory(3).temp_dir(tmp.path())).unwrap()
    }

    fn table(ctx: &ExecutionContext, rows: usize) -> Table {
        let schema = TableSchema::from_pairs(&[("n", DataType::Int)]).unwrap();
        let mut container = ctx.create_container(schema).unwrap();
        for i in 0..rows {
            container.add_row(DataRow::new(format!("r{}", i), vec![DataCell::Int(i as i32)])).unwrap();
        }
        container.close().unwrap()
    }

    #[test]
    fn test_rejects_invalid_options() {
        assert!(ExecutionContext::new(ContainerOptions::default().async_queue_capacity(0)).is_err());
    }

    #[test]
    fn test_copy_reports_progress() {
        let tmp = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = context(&tmp).with_progress(Arc::new(move |fraction, _| sink.lock().push(fraction)));
        let source = table(&ctx, 4);

        let copy = ctx.copy_table(&source).unwrap();
        assert_ne!(copy.id(), source.id());
        assert_eq!(copy.row_count(), 4);
        assert_eq!(seen.lock().last().copied(), Some(1.0));
        assert!(ctx.local_repository().contains(copy.id()));
    }

    #[test]
    fn test_canceled_copy_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let source = table(&ctx, 10);
        let before = ctx.local_repository().len();
        ctx.cancellation_token().cancel();
        assert!(matches!(ctx.copy_table(&source), Err(Error::Canceled)));
        assert_eq!(ctx.local_repository().len(), before);
    }

    #[test]
    fn test_export_and_import() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let source = table(&ctx, 7);
        let path = tmp.path().join("export.zip");
        ctx.export_table(&source, &path).unwrap();

        let imported = ctx.import_table(&path).unwrap();
        assert_eq!(imported.row_count(), 7);
        let a: Vec<DataRow> = source.iter().unwrap().map(|r| r.unwrap()).collect();
        let b: Vec<DataRow> = imported.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(a, b);

        ctx.clear_table(&imported);
        assert!(!ctx.local_repository().contains(imported.id()));
    }

    #[test]
    fn test_export_of_view_uses_temporary_copy() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let view = table(&ctx, 5)
            .replace_schema(TableSchema::from_pairs(&[("m", DataType::Int)]).unwrap())
            .unwrap();
        let before = ctx.local_repository().len();
        let path = tmp.path().join("view.zip");
        ctx.export_table(&view, &path).unwrap();
        assert_eq!(ctx.local_repository().len(), before);
        assert_eq!(ctx.import_table(&path).unwrap().schema().names(), vec!["m"]);
    }

    #[test]
    fn test_blob_owner_resolved_in_local_repository() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let schema = TableSchema::from_pairs(&[("img", DataType::Blob("png".into()))]).unwrap();
        let mut owner = ctx.create_container(schema.clone()).unwrap();
        for i in 0..5u8 {
            let blob = DataCell::Blob(BlobCell::new("png", vec![i; 64]));
            owner.add_row(DataRow::new(format!("b{}", i), vec![blob])).unwrap();
        }
        let owner = owner.close().unwrap();
        ctx.publish(&owner);

        // Spilled, so its cells are decoded from the stream on every read
        let mut referencing = ctx.create_container(schema).unwrap();
        for row in owner.iter().unwrap() {
            referencing.add_row(row.unwrap()).unwrap();
        }
        let referencing = referencing.close().unwrap();
        assert!(!referencing.buffer().unwrap().is_in_memory());
        assert_eq!(referencing.buffer().unwrap().blob_store().files_written(), 0);

        TableRepository::global().remove(&owner);
        assert!(ctx.local_repository().contains(owner.id()));
        for (i, row) in referencing.iter().unwrap().enumerate() {
            let row = row.unwrap();
            match row.cell(0) {
                Some(DataCell::Blob(blob)) => {
                    assert!(!blob.is_loaded());
                    assert_eq!(&*blob.payload().unwrap(), &vec![i as u8; 64][..]);
                }
                other => panic!("expected blob, got {:?}", other),
            }
        }

        ctx.local_repository().remove(&owner);
        let row = referencing.iter().unwrap().next().unwrap().unwrap();
        match row.cell(0) {
            Some(DataCell::Blob(blob)) => {
                assert!(matches!(blob.payload(), Err(Error::BlobOwnerNotFound { .. })))
            }
            other => panic!("expected blob, got {:?}", other),
        }
    }
}
