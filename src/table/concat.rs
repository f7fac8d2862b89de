//! Tables stacked row-wise.

use std::collections::HashMap;

use super::Table;
use crate::error::{Error, Result};
use crate::iter::RowIterator;
use crate::repository::{allocate_id, ReservedId};
use crate::row::{DataRow, RowKey};
use crate::schema::TableSchema;

/// Rows of several tables, one table after another.
#[derive(Debug)]
pub struct ConcatenatedTable {
    id: ReservedId,
    schema: TableSchema,
    tables: Vec<Table>,
    row_count: u64,
}

impl ConcatenatedTable {
    /// Checks schemas and key uniqueness with one pass over all inputs.
    pub(crate) fn new(tables: Vec<Table>) -> Result<Self> {
        let first = tables
            .first()
            .ok_or_else(|| Error::invalid_argument("nothing to concatenate"))?;
        let mut schema = first.schema().clone();
        for (index, table) in tables.iter().enumerate().skip(1) {
            if !schema.is_structurally_equal(table.schema()) {
                return Err(Error::invalid_argument(format!(
                    "table {} has columns {:?}, expected {:?}",
                    index,
                    table.schema().names(),
                    schema.names()
                )));
            }
            schema = schema.with_merged_domains(table.schema());
        }

        let mut seen: HashMap<RowKey, usize> = HashMap::new();
        for (index, table) in tables.iter().enumerate() {
            for row in table.iter()? {
                let row = row?;
                if seen.insert(row.key().clone(), index).is_some() {
                    return Err(Error::DuplicateKey {
                        key: row.key().to_string(),
                        table_index: Some(index),
                    });
                }
            }
        }

        let row_count = tables.iter().map(Table::row_count).sum();
        Ok(Self { id: allocate_id(), schema, tables, row_count })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id.get()
    }

    /// Schema of the first input, with domains widened to cover all inputs.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Input tables in order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Sum of the input row counts.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub(crate) fn iter(&self) -> Result<RowIterator> {
        Ok(RowIterator::new(ConcatRows { tables: self.tables.clone(), next: 0, current: None }))
    }
}

/// Opens each input's cursor only when the previous one is exhausted.
struct ConcatRows {
    tables: Vec<Table>,
    next: usize,
    current: Option<RowIterator>,
}

impl Iterator for ConcatRows {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.current.as_mut().and_then(Iterator::next) {
                return Some(row);
            }
            let table = self.tables.get(self.next)?;
            self.next += 1;
            match table.iter() {
                Ok(iter) => self.current = Some(iter),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
