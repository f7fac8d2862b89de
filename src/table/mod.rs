//! Read-only tables.
//!
//! [`Table`] is a closed set of variants sharing one interface. A
//! container table is backed by a [`Buffer`]; every other variant is a view
//! composed over other tables that re-serializes nothing it does not have
//! to:
//!
//! * [`RearrangedTable`]: filters, permutes and appends columns. Only
//!   computed columns are materialized, in a key-less buffer.
//! * [`ConcatenatedTable`]: the rows of several tables one after another.
//! * [`JoinedTable`]: the cells of two row-aligned tables side by side.
//! * [`SchemaReplacedTable`]: the same rows under a different schema.
//!
//! Cloning a table is cheap and shares the underlying data.

mod concat;
mod descriptor;
mod join;
mod rearrange;

pub use concat::ConcatenatedTable;
pub use join::JoinedTable;
pub use rearrange::{CellFactory, ColumnRearranger, RearrangedTable};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::blob::BlobStore;
use crate::buffer::Buffer;
use crate::config::ContainerOptions;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::iter::RowIterator;
use crate::pipeline::PrefetchIterator;
use crate::repository::{allocate_id, ReservedId, TableRepository};
use crate::schema::TableSchema;

/// A finalized, read-only table.
#[derive(Clone)]
pub enum Table {
    /// Rows stored in a buffer.
    Container(ContainerTable),
    /// Column filter, permutation or extension of another table.
    Rearranged(Arc<RearrangedTable>),
    /// Rows of several tables in sequence.
    Concatenated(Arc<ConcatenatedTable>),
    /// Cells of two row-aligned tables side by side.
    Joined(Arc<JoinedTable>),
    /// Another table under a new schema.
    SchemaReplaced(Arc<SchemaReplacedTable>),
}

impl Table {
    /// Table id. For container tables this is the buffer id.
    pub fn id(&self) -> u64 {
        match self {
            Table::Container(t) => t.buffer.id(),
            Table::Rearranged(t) => t.id(),
            Table::Concatenated(t) => t.id(),
            Table::Joined(t) => t.id(),
            Table::SchemaReplaced(t) => t.id.get(),
        }
    }

    /// Number of rows.
    pub fn row_count(&self) -> u64 {
        match self {
            Table::Container(t) => t.buffer.row_count(),
            Table::Rearranged(t) => t.reference().row_count(),
            Table::Concatenated(t) => t.row_count(),
            Table::Joined(t) => t.left().row_count(),
            Table::SchemaReplaced(t) => t.reference.row_count(),
        }
    }

    /// Schema of the table.
    pub fn schema(&self) -> &TableSchema {
        match self {
            Table::Container(t) => t.buffer.schema(),
            Table::Rearranged(t) => t.schema(),
            Table::Concatenated(t) => t.schema(),
            Table::Joined(t) => t.schema(),
            Table::SchemaReplaced(t) => &t.schema,
        }
    }

    /// Whether rows carry keys. Only the internal column stores of
    /// rearranged tables are key-less.
    pub fn is_keyed(&self) -> bool {
        match self {
            Table::Container(t) => t.buffer.is_keyed(),
            _ => true,
        }
    }

    /// Returns a forward-only cursor over all rows, in order.
    pub fn iter(&self) -> Result<RowIterator> {
        match self {
            Table::Container(t) => t.buffer.iter(),
            Table::Rearranged(t) => t.iter(),
            Table::Concatenated(t) => t.iter(),
            Table::Joined(t) => t.iter(),
            Table::SchemaReplaced(t) => t.reference.iter(),
        }
    }

    /// Like [`iter`](Self::iter), but rows are read ahead on a background
    /// thread.
    pub fn iter_prefetched(&self, options: &ContainerOptions) -> Result<RowIterator> {
        let source = self.iter()?;
        let prefetch = PrefetchIterator::spawn(
            source,
            options.prefetch_capacity,
            options.prefetch_poll_interval,
        )?;
        Ok(RowIterator::new(prefetch))
    }

    /// Tables this view reads from. Empty for container tables.
    pub fn reference_tables(&self) -> Vec<Table> {
        match self {
            Table::Container(_) => Vec::new(),
            Table::Rearranged(t) => vec![t.reference().clone()],
            Table::Concatenated(t) => t.tables().to_vec(),
            Table::Joined(t) => vec![t.left().clone(), t.right().clone()],
            Table::SchemaReplaced(t) => vec![t.reference.clone()],
        }
    }

    /// Container tables created by and private to this view.
    pub(crate) fn owned_tables(&self) -> Vec<Table> {
        match self {
            Table::Rearranged(t) => t.appended().cloned().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// The underlying buffer of a container table.
    pub fn buffer(&self) -> Option<&Arc<Buffer>> {
        match self {
            Table::Container(t) => Some(&t.buffer),
            _ => None,
        }
    }

    pub(crate) fn blob_store(&self) -> Option<Arc<BlobStore>> {
        self.buffer().map(|b| Arc::clone(b.blob_store()))
    }

    /// Releases the resources this table owns and unregisters it from the
    /// global repository. Reference tables are left alone. Idempotent.
    pub fn clear(&self) {
        TableRepository::global().remove(self);
        match self {
            Table::Container(t) => t.buffer.clear(),
            Table::Rearranged(t) => {
                if let Some(appended) = t.appended() {
                    appended.clear();
                }
            }
            _ => {}
        }
    }

    /// Concatenates tables with identical column names and types.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateKey`] naming the key and the index of the input
    /// table in which it occurred a second time.
    pub fn concatenate(tables: &[Table]) -> Result<Table> {
        ConcatenatedTable::new(tables.to_vec()).map(|t| Table::Concatenated(Arc::new(t)))
    }

    /// Joins two tables with identical key sequences column-wise.
    ///
    /// # Errors
    ///
    /// [`Error::KeyMismatch`] at the first differing key, or an invalid
    /// argument error on differing row counts or clashing column names.
    pub fn join(left: &Table, right: &Table) -> Result<Table> {
        JoinedTable::new(left.clone(), right.clone()).map(|t| Table::Joined(Arc::new(t)))
    }

    /// The same rows under `schema`, which must have as many columns.
    pub fn replace_schema(&self, schema: TableSchema) -> Result<Table> {
        SchemaReplacedTable::new(self.clone(), schema).map(|t| Table::SchemaReplaced(Arc::new(t)))
    }

    /// Writes the table and everything it depends on to `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        descriptor::save(self, dir, false)
    }

    /// Writes only what this view adds on top of its reference tables.
    /// Reference tables are recorded by id and must be registered in the
    /// loading context or globally when the table is loaded again.
    pub fn save_delta(&self, dir: &Path) -> Result<()> {
        descriptor::save(self, dir, true)
    }

    /// Loads a table written by [`save`](Self::save) or
    /// [`save_delta`](Self::save_delta). Restored containers are registered
    /// in the local repository of `ctx`.
    pub fn load(dir: &Path, ctx: &ExecutionContext) -> Result<Table> {
        descriptor::load(dir, ctx)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Table::Container(_) => "Container",
            Table::Rearranged(_) => "Rearranged",
            Table::Concatenated(_) => "Concatenated",
            Table::Joined(_) => "Joined",
            Table::SchemaReplaced(_) => "SchemaReplaced",
        };
        f.debug_struct("Table")
            .field("kind", &kind)
            .field("id", &self.id())
            .field("row_count", &self.row_count())
            .finish()
    }
}

/// A table backed by one buffer.
#[derive(Debug, Clone)]
pub struct ContainerTable {
    buffer: Arc<Buffer>,
}

impl ContainerTable {
    /// Wraps a closed buffer.
    pub fn new(buffer: Arc<Buffer>) -> Self {
        Self { buffer }
    }

    /// The buffer.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }
}

impl From<Arc<Buffer>> for Table {
    fn from(buffer: Arc<Buffer>) -> Self {
        Table::Container(ContainerTable::new(buffer))
    }
}

/// Another table's rows under a different schema.
#[derive(Debug)]
pub struct SchemaReplacedTable {
    id: ReservedId,
    schema: TableSchema,
    reference: Table,
}

impl SchemaReplacedTable {
    fn new(reference: Table, schema: TableSchema) -> Result<Self> {
        let expected = reference.schema().num_columns();
        if schema.num_columns() != expected {
            return Err(Error::invalid_argument(format!(
                "replacement schema has {} columns, the table has {}",
                schema.num_columns(),
                expected
            )));
        }
        Ok(Self { id: allocate_id(), schema, reference })
    }

    /// The table whose rows are shown.
    pub fn reference(&self) -> &Table {
        &self.reference
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::cell::DataCell;
    use crate::row::DataRow;
    use crate::schema::DataType;

    pub(crate) fn context(dir: &tempfile::TempDir) -> ExecutionContext {
        ExecutionContext::new(ContainerOptions::default().max_rows_in_memory(4).temp_dir(dir.path()))
            .unwrap()
    }

    pub(crate) fn int_table(ctx: &ExecutionContext, column: &str, keys: &[&str]) -> Table {
        let schema = TableSchema::from_pairs(&[(column, DataType::Int)]).unwrap();
        let mut container = ctx.create_container(schema).unwrap();
        for (i, key) in keys.iter().enumerate() {
            container.add_row(DataRow::new(*key, vec![DataCell::Int(i as i32)])).unwrap();
        }
        container.close().unwrap()
    }

    pub(crate) fn rows(table: &Table) -> Vec<DataRow> {
        table.iter().unwrap().collect::<Result<Vec<_>>>().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use crate::schema::DataType;
    use tempfile::TempDir;

    #[test]
    fn test_replace_schema() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let table = int_table(&ctx, "a", &["r1", "r2"]);
        let renamed = TableSchema::from_pairs(&[("b", DataType::Long)]).unwrap();
        let view = table.replace_schema(renamed.clone()).unwrap();
        assert_eq!(view.schema(), &renamed);
        assert_eq!(rows(&view), rows(&table));
        assert_eq!(view.reference_tables().len(), 1);

        let two = TableSchema::from_pairs(&[("x", DataType::Int), ("y", DataType::Int)]).unwrap();
        assert!(table.replace_schema(two).is_err());
    }

    #[test]
    fn test_prefetched_iteration_matches() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let keys: Vec<String> = (0..50).map(|i| format!("k{}", i)).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let table = int_table(&ctx, "a", &keys);
        let prefetched = table
            .iter_prefetched(ctx.options())
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(prefetched, rows(&table));
    }

    #[test]
    fn test_clear_container_table() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let table = int_table(&ctx, "a", &["r1", "r2", "r3", "r4", "r5", "r6"]);
        table.clear();
        assert!(table.iter().is_err());
        table.clear();
    }
}
