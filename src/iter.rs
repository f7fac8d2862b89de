//! Forward-only row cursors.

use crate::error::Result;
use crate::row::DataRow;

/// Forward-only cursor over the rows of a table.
///
/// Yields rows in insertion order. The first error ends the iteration:
/// after an `Err` item the iterator only returns `None`.
pub struct RowIterator {
    inner: Box<dyn Iterator<Item = Result<DataRow>> + Send>,
    done: bool,
}

impl RowIterator {
    pub(crate) fn new<I>(inner: I) -> Self
    where
        I: Iterator<Item = Result<DataRow>> + Send + 'static,
    {
        Self { inner: Box::new(inner), done: false }
    }

    /// An iterator without rows.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }
}

impl Iterator for RowIterator {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.inner.next();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

impl std::fmt::Debug for RowIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowIterator").field("done", &self.done).finish()
    }
}
