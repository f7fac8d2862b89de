//! Row-by-row construction of container tables.
//!
//! A [`DataContainer`] validates each row against its schema, collects
//! column domains, checks key uniqueness and hands the row to a buffer
//! writer, either inline or on a writer thread. The first failing row puts
//! the container into a failed state; it must then be dropped.

mod domain;
mod duplicates;

use std::sync::Arc;

use crate::buffer::{Buffer, BufferWriter};
use crate::cell::CellTypeRegistry;
use crate::config::ContainerOptions;
use crate::error::{Error, Result};
use crate::pipeline::AsyncWriter;
use crate::repository::TableRepository;
use crate::row::DataRow;
use crate::schema::TableSchema;
use crate::table::Table;

use domain::DomainCreator;
use duplicates::DuplicateChecker;

enum RowSink {
    Sync(BufferWriter),
    Async(AsyncWriter),
}

impl RowSink {
    fn add_row(&mut self, row: DataRow) -> Result<()> {
        match self {
            RowSink::Sync(writer) => writer.add_row(row),
            RowSink::Async(writer) => writer.add_row(row),
        }
    }

    fn close(self, schema: TableSchema) -> Result<Arc<Buffer>> {
        match self {
            RowSink::Sync(writer) => writer.close(schema),
            RowSink::Async(writer) => writer.close(schema),
        }
    }

    fn id(&self) -> u64 {
        match self {
            RowSink::Sync(writer) => writer.id(),
            RowSink::Async(writer) => writer.id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Failed,
    Closed,
}

/// Open table accepting rows.
pub struct DataContainer {
    id: u64,
    schema: TableSchema,
    keyed: bool,
    domains: Option<DomainCreator>,
    duplicates: Option<DuplicateChecker>,
    sink: Option<RowSink>,
    state: State,
    local: Arc<TableRepository>,
    size: u64,
}

impl DataContainer {
    pub(crate) fn new(
        schema: TableSchema,
        options: &ContainerOptions,
        registry: Arc<CellTypeRegistry>,
        local: Arc<TableRepository>,
        keyed: bool,
    ) -> Result<Self> {
        let writer = BufferWriter::new(options, registry, keyed).with_local_repository(Arc::clone(&local));
        let sink = if options.synchronous_write {
            RowSink::Sync(writer)
        } else {
            RowSink::Async(AsyncWriter::spawn(writer, options.async_queue_capacity)?)
        };
        let duplicates = keyed.then(|| DuplicateChecker::new(options.max_keys_in_memory, options.temp_dir.clone()));
        Ok(Self {
            id: sink.id(),
            domains: Some(DomainCreator::new(&schema, options.max_possible_values)),
            schema,
            keyed,
            duplicates,
            sink: Some(sink),
            state: State::Open,
            local,
            size: 0,
        })
    }

    /// Id the closed table will have.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Declared schema, without domains.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Whether row keys are stored.
    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    /// Number of rows accepted so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true once a row or the close has failed.
    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    /// Adds a row.
    ///
    /// # Errors
    ///
    /// * [`Error::CellCountMismatch`] if the row does not have one cell per
    ///   column.
    /// * [`Error::SchemaViolation`] if a cell does not fit its column type.
    /// * [`Error::DuplicateKey`] if the key was added before.
    ///
    /// After any error the container is failed and every further call
    /// returns [`Error::InvalidState`].
    pub fn add_row(&mut self, row: DataRow) -> Result<()> {
        self.ensure_open()?;
        let result = self.push(row);
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Failed => Err(Error::invalid_state(format!("container {} has failed", self.id))),
            State::Closed => Err(Error::invalid_state(format!("container {} is closed", self.id))),
        }
    }

    fn push(&mut self, row: DataRow) -> Result<()> {
        if row.num_cells() != self.schema.num_columns() {
            return Err(Error::CellCountMismatch {
                row_key: row.key().to_string(),
                expected: self.schema.num_columns(),
                actual: row.num_cells(),
            });
        }
        for (column, cell) in self.schema.columns().iter().zip(row.cells()) {
            if !column.data_type().is_compatible(cell) {
                return Err(Error::SchemaViolation {
                    row_key: row.key().to_string(),
                    column: column.name().to_string(),
                    expected: column.data_type().to_string(),
                    actual: cell.type_name().to_string(),
                });
            }
        }
        if let Some(duplicates) = self.duplicates.as_mut() {
            duplicates.add(row.key())?;
        }
        if let Some(domains) = self.domains.as_mut() {
            domains.update(row.cells());
        }
        self.sink
            .as_mut()
            .ok_or_else(|| Error::internal("open container without a writer"))?
            .add_row(row)?;
        self.size += 1;
        Ok(())
    }

    fn fail(&mut self) {
        log::debug!("Container {} failed after {} rows, discarding its buffer", self.id, self.size);
        self.state = State::Failed;
        self.sink = None;
        self.duplicates = None;
    }

    /// Finishes the table: runs the deferred duplicate check, attaches the
    /// collected domains to the schema and closes the buffer.
    ///
    /// The table is registered in the local repository of the context that
    /// created the container.
    pub fn close(&mut self) -> Result<Table> {
        self.ensure_open()?;
        match self.finish() {
            Ok(table) => {
                self.state = State::Closed;
                Ok(table)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn finish(&mut self) -> Result<Table> {
        if let Some(duplicates) = self.duplicates.take() {
            duplicates.finish()?;
        }
        let domains = self
            .domains
            .take()
            .ok_or_else(|| Error::internal("container domains already taken"))?;
        let schema = self.schema.with_domains(domains.finish());
        let sink = self
            .sink
            .take()
            .ok_or_else(|| Error::internal("open container without a writer"))?;
        let table = Table::from(sink.close(schema)?);
        self.local.register(&table);
        log::debug!("Closed container {} with {} rows", self.id, self.size);
        Ok(table)
    }
}

impl std::fmt::Debug for DataContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContainer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::DataCell;
    use crate::schema::DataType;
    use tempfile::TempDir;

    fn container(tmp: &TempDir, synchronous: bool) -> DataContainer {
        let options = ContainerOptions::default()
            .max_rows_in_memory(2)
            .max_keys_in_memory(3)
            .synchronous_write(synchronous)
            .temp_dir(tmp.path());
        let schema = TableSchema::from_pairs(&[("n", DataType::Long), ("s", DataType::String)]).unwrap();
        DataContainer::new(
            schema,
            &options,
            Arc::new(CellTypeRegistry::new()),
            Arc::new(TableRepository::new()),
            true,
        )
        .unwrap()
    }

    fn row(key: &str, n: i64) -> DataRow {
        DataRow::new(key, vec![DataCell::Long(n), DataCell::string(format!("s{}", n % 2))])
    }

    #[test]
    fn test_close_attaches_domains() {
        let tmp = TempDir::new().unwrap();
        for synchronous in [true, false] {
            let mut c = container(&tmp, synchronous);
            for i in 0..6 {
                c.add_row(row(&format!("r{}", i), i)).unwrap();
            }
            c.add_row(DataRow::new("int", vec![DataCell::Int(-3), DataCell::Missing])).unwrap();
            assert_eq!(c.size(), 7);
            let table = c.close().unwrap();
            assert_eq!(table.row_count(), 7);
            let n = table.schema().column(0).unwrap().domain();
            assert_eq!(n.lower, Some(crate::schema::DomainValue::Int(-3)));
            assert_eq!(n.upper, Some(crate::schema::DomainValue::Long(5)));
            let s = table.schema().column(1).unwrap().domain();
            assert_eq!(s.possible_values.as_ref().map(Vec::len), Some(2));
            assert!(c.add_row(row("late", 0)).is_err());
            table.clear();
        }
    }

    #[test]
    fn test_invalid_rows_fail_container() {
        let tmp = TempDir::new().unwrap();
        let mut c = container(&tmp, true);
        match c.add_row(DataRow::new("r1", vec![DataCell::Long(1)])) {
            Err(Error::CellCountMismatch { row_key, expected, actual }) => {
                assert_eq!((row_key.as_str(), expected, actual), ("r1", 2, 1));
            }
            other => panic!("expected cell count mismatch, got {:?}", other),
        }
        assert!(c.is_failed());
        assert!(matches!(c.add_row(row("r2", 2)), Err(Error::InvalidState(_))));
        assert!(matches!(c.close(), Err(Error::InvalidState(_))));

        let mut c = container(&tmp, false);
        let bad = DataRow::new("r1", vec![DataCell::string("x"), DataCell::string("y")]);
        match c.add_row(bad) {
            Err(Error::SchemaViolation { column, .. }) => assert_eq!(column, "n"),
            other => panic!("expected schema violation, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_found_at_close_after_key_spill() {
        let tmp = TempDir::new().unwrap();
        let mut c = container(&tmp, true);
        for key in ["a", "b", "c", "d", "a"] {
            c.add_row(row(key, 1)).unwrap();
        }
        match c.close() {
            Err(Error::DuplicateKey { key, .. }) => assert_eq!(key, "a"),
            other => panic!("expected duplicate key, got {:?}", other),
        }
        assert!(c.is_failed());
        drop(c);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
