//! Rows and row keys.

use std::fmt;
use std::sync::Arc;

use crate::cell::DataCell;

/// Immutable, string-like identifier of a row.
///
/// Cloning is cheap; the text is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Arc<str>);

impl RowKey {
    /// Creates a new row key.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// The empty key used by key-less tables.
    pub fn empty() -> Self {
        Self(Arc::from(""))
    }

    /// Returns the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(key: &str) -> Self {
        Self(Arc::from(key))
    }
}

impl From<String> for RowKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

/// A row: a key plus a fixed number of cells.
///
/// Rows are immutable; cloning shares the cell slice.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    key: RowKey,
    cells: Arc<[DataCell]>,
}

impl DataRow {
    /// Creates a new row.
    pub fn new(key: impl Into<RowKey>, cells: Vec<DataCell>) -> Self {
        Self { key: key.into(), cells: cells.into() }
    }

    /// Returns the row key.
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// Returns all cells in column order.
    pub fn cells(&self) -> &[DataCell] {
        &self.cells
    }

    /// Returns the cell at `index`, if any.
    pub fn cell(&self, index: usize) -> Option<&DataCell> {
        self.cells.get(index)
    }

    /// Number of cells.
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the same cells under another key.
    pub fn with_key(&self, key: RowKey) -> Self {
        Self { key, cells: Arc::clone(&self.cells) }
    }

    pub(crate) fn contains_blobs(&self) -> bool {
        self.cells.iter().any(DataCell::contains_blobs)
    }
}
