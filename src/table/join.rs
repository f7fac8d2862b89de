//! Row-aligned tables side by side.

use super::Table;
use crate::error::{Error, Result};
use crate::iter::RowIterator;
use crate::repository::{allocate_id, ReservedId};
use crate::row::DataRow;
use crate::schema::TableSchema;

/// Two tables with identical key sequences, side by side.
#[derive(Debug)]
pub struct JoinedTable {
    id: ReservedId,
    schema: TableSchema,
    left: Table,
    right: Table,
}

impl JoinedTable {
    /// Merges the schemas and checks key alignment with a full parallel
    /// scan.
    pub(crate) fn new(left: Table, right: Table) -> Result<Self> {
        let schema = left.schema().merge(right.schema())?;
        if left.row_count() != right.row_count() {
            return Err(Error::invalid_argument(format!(
                "cannot join tables with {} and {} rows",
                left.row_count(),
                right.row_count()
            )));
        }

        for (position, pair) in left.iter()?.zip(right.iter()?).enumerate() {
            let (l, r) = (pair.0?, pair.1?);
            if l.key() != r.key() {
                return Err(Error::KeyMismatch {
                    position: position as u64,
                    left: l.key().to_string(),
                    right: r.key().to_string(),
                });
            }
        }

        Ok(Self { id: allocate_id(), schema, left, right })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id.get()
    }

    /// Left columns followed by right columns.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Table contributing the leading columns and the keys.
    pub fn left(&self) -> &Table {
        &self.left
    }

    /// Table contributing the trailing columns.
    pub fn right(&self) -> &Table {
        &self.right
    }

    pub(crate) fn iter(&self) -> Result<RowIterator> {
        let rows = JoinedRows { left: self.left.iter()?, right: self.right.iter()?, position: 0 };
        Ok(RowIterator::new(rows))
    }
}

struct JoinedRows {
    left: RowIterator,
    right: RowIterator,
    position: u64,
}

impl Iterator for JoinedRows {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let left = match self.left.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        let right = match self.right.next() {
            Some(Ok(row)) => row,
            Some(Err(e)) => return Some(Err(e)),
            None => return Some(Err(Error::corruption("right table of a join ended early"))),
        };
        let position = self.position;
        self.position += 1;
        if left.key() != right.key() {
            return Some(Err(Error::KeyMismatch {
                position,
                left: left.key().to_string(),
                right: right.key().to_string(),
            }));
        }
        let mut cells = Vec::with_capacity(left.num_cells() + right.num_cells());
        cells.extend_from_slice(left.cells());
        cells.extend_from_slice(right.cells());
        Some(Ok(DataRow::new(left.key().clone(), cells)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_join_aligned_tables() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let keys = ["r1", "r2", "r3", "r4", "r5", "r6"];
        let left = int_table(&ctx, "a", &keys);
        let right = int_table(&ctx, "b", &keys);

        let joined = Table::join(&left, &right).unwrap();
        assert_eq!(joined.schema().names(), vec!["a", "b"]);
        assert_eq!(joined.row_count(), 6);
        for (i, row) in rows(&joined).iter().enumerate() {
            assert_eq!(row.key().as_str(), keys[i]);
            assert_eq!(row.num_cells(), 2);
        }
    }

    #[test]
    fn test_join_reports_first_mismatch() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let left = int_table(&ctx, "a", &["r1", "r2", "r3"]);
        let right = int_table(&ctx, "b", &["r1", "x2", "x3"]);
        match Table::join(&left, &right) {
            Err(Error::KeyMismatch { position, left, right }) => {
                assert_eq!(position, 1);
                assert_eq!(left, "r2");
                assert_eq!(right, "x2");
            }
            other => panic!("expected key mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_join_rejects_bad_inputs() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let left = int_table(&ctx, "a", &["r1", "r2"]);
        let short = int_table(&ctx, "b", &["r1"]);
        let clash = int_table(&ctx, "a", &["r1", "r2"]);
        assert!(Table::join(&left, &short).is_err());
        assert!(Table::join(&left, &clash).is_err());
    }
}
