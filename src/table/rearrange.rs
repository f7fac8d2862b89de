//! Column filtering, permutation and extension.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Table;
use crate::cell::DataCell;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::iter::RowIterator;
use crate::repository::{allocate_id, ReservedId};
use crate::row::{DataRow, RowKey};
use crate::schema::{ColumnSchema, TableSchema};

/// Computes new cells from a row of the reference table.
pub trait CellFactory: Send + Sync {
    /// The columns this factory produces.
    fn column_schemas(&self) -> Vec<ColumnSchema>;

    /// One cell per produced column.
    fn cells(&self, row: &DataRow) -> Result<Vec<DataCell>>;
}

/// Where a column of a rearranged table comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Slot {
    /// Column of the reference table.
    Reference(usize),
    /// Column of the table holding the computed columns.
    Appended(usize),
}

/// A column filter, permutation or extension of another table.
#[derive(Debug)]
pub struct RearrangedTable {
    id: ReservedId,
    schema: TableSchema,
    reference: Table,
    slots: Vec<Slot>,
    appended: Option<Table>,
}

impl RearrangedTable {
    pub(crate) fn from_parts(
        schema: TableSchema,
        reference: Table,
        slots: Vec<Slot>,
        appended: Option<Table>,
    ) -> Result<Self> {
        if slots.len() != schema.num_columns() {
            return Err(Error::invalid_argument("slot count differs from column count"));
        }
        let appended_width = appended.as_ref().map_or(0, |t| t.schema().num_columns());
        for slot in &slots {
            let in_range = match *slot {
                Slot::Reference(i) => i < reference.schema().num_columns(),
                Slot::Appended(i) => i < appended_width,
            };
            if !in_range {
                return Err(Error::invalid_argument(format!("column slot {:?} out of range", slot)));
            }
        }
        if let Some(appended) = &appended {
            if appended.row_count() != reference.row_count() {
                return Err(Error::invalid_argument(format!(
                    "computed columns have {} rows, the reference table {}",
                    appended.row_count(),
                    reference.row_count()
                )));
            }
        }
        Ok(Self { id: allocate_id(), schema, reference, slots, appended })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id.get()
    }

    /// Resulting schema.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The table whose columns are rearranged.
    pub fn reference(&self) -> &Table {
        &self.reference
    }

    /// Key-less table holding the computed columns, if any.
    pub fn appended(&self) -> Option<&Table> {
        self.appended.as_ref()
    }

    /// Returns true if no column was computed.
    pub fn is_metadata_only(&self) -> bool {
        self.appended.is_none()
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn iter(&self) -> Result<RowIterator> {
        let appended = match &self.appended {
            Some(table) => Some(table.iter()?),
            None => None,
        };
        Ok(RowIterator::new(RearrangedRows {
            reference: self.reference.iter()?,
            appended,
            slots: self.slots.clone().into(),
        }))
    }
}

struct RearrangedRows {
    reference: RowIterator,
    appended: Option<RowIterator>,
    slots: Arc<[Slot]>,
}

impl RearrangedRows {
    fn assemble(&self, row: &DataRow, extra: Option<&DataRow>) -> Result<DataRow> {
        let mut cells = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter() {
            let cell = match (*slot, extra) {
                (Slot::Reference(i), _) => row.cell(i),
                (Slot::Appended(i), Some(extra)) => extra.cell(i),
                (Slot::Appended(_), None) => None,
            };
            let cell = cell.ok_or_else(|| Error::corruption(format!("row \"{}\" lacks column {:?}", row.key(), slot)))?;
            cells.push(cell.clone());
        }
        Ok(DataRow::new(row.key().clone(), cells))
    }
}

impl Iterator for RearrangedRows {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.reference.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        let extra = match self.appended.as_mut().map(Iterator::next) {
            None => None,
            Some(Some(Ok(extra))) => Some(extra),
            Some(Some(Err(e))) => return Some(Err(e)),
            Some(None) => {
                return Some(Err(Error::corruption("computed columns end before their reference table")))
            }
        };
        Some(self.assemble(&row, extra.as_ref()))
    }
}

enum PendingSlot {
    Reference(usize),
    Computed { factory: usize, column: usize },
}

/// Builds a [`RearrangedTable`].
///
/// Starts with all columns of the reference table. Columns can be removed,
/// reordered, replaced or appended. Columns produced by a [`CellFactory`]
/// are materialized by [`build`](Self::build); if no factory remains in
/// use, the result is a pure metadata view.
pub struct ColumnRearranger {
    reference: Table,
    slots: Vec<(ColumnSchema, PendingSlot)>,
    factories: Vec<Arc<dyn CellFactory>>,
}

impl ColumnRearranger {
    /// Starts from all columns of `table`.
    pub fn new(table: &Table) -> Self {
        let slots = table
            .schema()
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), PendingSlot::Reference(i)))
            .collect();
        Self { reference: table.clone(), slots, factories: Vec::new() }
    }

    /// Current column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.slots.iter().map(|(c, _)| c.name()).collect()
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.slots
            .iter()
            .position(|(c, _)| c.name() == name)
            .ok_or_else(|| Error::not_found(format!("column \"{}\"", name)))
    }

    /// Keeps only the named columns, in the given order.
    pub fn keep_only(&mut self, names: &[&str]) -> Result<&mut Self> {
        let mut positions = Vec::with_capacity(names.len());
        for name in names {
            positions.push(self.position(name)?);
        }
        let mut seen = vec![false; self.slots.len()];
        for &position in &positions {
            if std::mem::replace(&mut seen[position], true) {
                return Err(Error::invalid_argument("column named twice"));
            }
        }
        let mut old: Vec<Option<(ColumnSchema, PendingSlot)>> = self.slots.drain(..).map(Some).collect();
        self.slots = positions.into_iter().filter_map(|p| old[p].take()).collect();
        Ok(self)
    }

    /// Removes a column.
    pub fn remove(&mut self, name: &str) -> Result<&mut Self> {
        let position = self.position(name)?;
        self.slots.remove(position);
        Ok(self)
    }

    /// Moves a column to `index`.
    pub fn move_to(&mut self, name: &str, index: usize) -> Result<&mut Self> {
        let position = self.position(name)?;
        if index >= self.slots.len() {
            return Err(Error::invalid_argument(format!("column index {} out of range", index)));
        }
        let slot = self.slots.remove(position);
        self.slots.insert(index, slot);
        Ok(self)
    }

    /// Appends the columns produced by `factory`.
    pub fn append(&mut self, factory: Arc<dyn CellFactory>) -> &mut Self {
        let index = self.slots.len();
        self.insert_factory(index, factory);
        self
    }

    /// Inserts the columns produced by `factory` at `index`.
    pub fn insert_at(&mut self, index: usize, factory: Arc<dyn CellFactory>) -> Result<&mut Self> {
        if index > self.slots.len() {
            return Err(Error::invalid_argument(format!("column index {} out of range", index)));
        }
        self.insert_factory(index, factory);
        Ok(self)
    }

    /// Replaces a column by the single column `factory` produces.
    pub fn replace(&mut self, name: &str, factory: Arc<dyn CellFactory>) -> Result<&mut Self> {
        let produced = factory.column_schemas().len();
        if produced != 1 {
            return Err(Error::invalid_argument(format!(
                "a replacing factory must produce one column, this one produces {}",
                produced
            )));
        }
        let position = self.position(name)?;
        self.slots.remove(position);
        self.insert_factory(position, factory);
        Ok(self)
    }

    fn insert_factory(&mut self, index: usize, factory: Arc<dyn CellFactory>) {
        let id = self.factories.len();
        let columns = factory.column_schemas();
        self.factories.push(factory);
        for (offset, column) in columns.into_iter().enumerate().rev() {
            self.slots.insert(index, (column, PendingSlot::Computed { factory: id, column: offset }));
        }
    }

    /// Materializes computed columns and returns the view.
    ///
    /// Cancellation is checked once per row while computing.
    pub fn build(self, ctx: &ExecutionContext) -> Result<Table> {
        let columns: Vec<ColumnSchema> = self.slots.iter().map(|(c, _)| c.clone()).collect();
        TableSchema::new(columns.clone())?;

        // offset of each factory in use within the appended table
        let mut offsets: BTreeMap<usize, usize> = BTreeMap::new();
        for (_, slot) in &self.slots {
            if let PendingSlot::Computed { factory, .. } = slot {
                offsets.insert(*factory, 0);
            }
        }
        let mut appended_columns = Vec::new();
        for (factory, offset) in offsets.iter_mut() {
            *offset = appended_columns.len();
            appended_columns.extend(self.factories[*factory].column_schemas());
        }

        let appended = if offsets.is_empty() {
            None
        } else {
            let width = appended_columns.len();
            let mut container = ctx.create_keyless_container(TableSchema::new(appended_columns)?)?;
            let total = self.reference.row_count().max(1) as f64;
            for (i, row) in self.reference.iter()?.enumerate() {
                ctx.check_canceled()?;
                let row = row?;
                let mut cells = Vec::with_capacity(width);
                for factory in offsets.keys() {
                    let factory = &self.factories[*factory];
                    let produced = factory.cells(&row)?;
                    let expected = factory.column_schemas().len();
                    if produced.len() != expected {
                        return Err(Error::CellCountMismatch {
                            row_key: row.key().to_string(),
                            expected,
                            actual: produced.len(),
                        });
                    }
                    cells.extend(produced);
                }
                container.add_row(DataRow::new(RowKey::empty(), cells))?;
                ctx.set_progress((i + 1) as f64 / total, "Computing new columns");
            }
            Some(container.close()?)
        };

        let mut schema_columns = Vec::with_capacity(self.slots.len());
        let mut slots = Vec::with_capacity(self.slots.len());
        for ((column, pending), declared) in self.slots.iter().zip(columns) {
            match *pending {
                PendingSlot::Reference(i) => {
                    schema_columns.push(declared);
                    slots.push(Slot::Reference(i));
                }
                PendingSlot::Computed { factory, column: offset } => {
                    let index = offsets[&factory] + offset;
                    let with_domain = appended
                        .as_ref()
                        .and_then(|t| t.schema().column(index))
                        .map(|c| column.clone().with_domain(c.domain().clone()))
                        .unwrap_or(declared);
                    schema_columns.push(with_domain);
                    slots.push(Slot::Appended(index));
                }
            }
        }

        let table = RearrangedTable::from_parts(
            TableSchema::new(schema_columns)?,
            self.reference,
            slots,
            appended,
        )?;
        Ok(Table::Rearranged(Arc::new(table)))
    }
}
