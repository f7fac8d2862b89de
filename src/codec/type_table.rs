//! Per-buffer table of one-byte type-shortcut codes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Raw code of a missing cell.
pub const MISSING: u8 = 0;
/// Raw code ending a row.
pub const ROW_SEPARATOR: u8 = 1;
/// Raw code announcing a generically serialized cell.
pub const GENERIC: u8 = 2;
/// First code handed out to a concrete type.
pub const FIRST_TYPE_CODE: u8 = 3;
/// Last usable code: the signed byte range ends here.
pub const LAST_TYPE_CODE: u8 = i8::MAX as u8;

/// Concrete type behind a shortcut code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeEntry {
    /// Cell type name.
    pub name: Arc<str>,
    /// Whether cells of this code are blob addresses.
    pub blob: bool,
}

impl TypeEntry {
    /// Creates an entry.
    pub fn new(name: impl Into<Arc<str>>, blob: bool) -> Self {
        Self { name: name.into(), blob }
    }
}

/// Dense mapping from concrete cell types to one-byte codes.
///
/// Codes are assigned in first-seen order starting at
/// [`FIRST_TYPE_CODE`]. The table is frozen when its buffer is closed and
/// persisted in meta.xml.
#[derive(Debug, Clone, Default)]
pub struct TypeShortcutTable {
    entries: Vec<TypeEntry>,
    codes: HashMap<TypeEntry, u8>,
}

impl TypeShortcutTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of distinct types.
    pub const fn capacity() -> usize {
        (LAST_TYPE_CODE - FIRST_TYPE_CODE + 1) as usize
    }

    /// Rebuilds a table from persisted entries, in code order.
    pub fn from_entries(entries: Vec<TypeEntry>) -> Result<Self> {
        let mut table = Self::new();
        for entry in entries {
            if table.codes.contains_key(&entry) {
                return Err(Error::corruption(format!(
                    "type \"{}\" listed twice in type table",
                    entry.name
                )));
            }
            table.code_for(&entry.name, entry.blob).map_err(|_| {
                Error::corruption(format!(
                    "type table lists more than {} types",
                    Self::capacity()
                ))
            })?;
        }
        Ok(table)
    }

    /// Returns the code of a type, assigning the next free code on first use.
    ///
    /// # Errors
    ///
    /// [`Error::TooManyCellTypes`] when the code space is exhausted.
    pub fn code_for(&mut self, name: &str, blob: bool) -> Result<u8> {
        let entry = TypeEntry::new(name, blob);
        if let Some(code) = self.codes.get(&entry) {
            return Ok(*code);
        }
        if self.entries.len() >= Self::capacity() {
            return Err(Error::TooManyCellTypes { limit: Self::capacity() });
        }
        let code = FIRST_TYPE_CODE + self.entries.len() as u8;
        self.codes.insert(entry.clone(), code);
        self.entries.push(entry);
        Ok(code)
    }

    /// Looks up the type behind a code.
    ///
    /// # Errors
    ///
    /// An unknown code means the stream is corrupt.
    pub fn entry(&self, code: u8) -> Result<&TypeEntry> {
        code.checked_sub(FIRST_TYPE_CODE)
            .and_then(|i| self.entries.get(i as usize))
            .ok_or_else(|| Error::corruption(format!("unknown type-shortcut code {}", code)))
    }

    /// Entries in code order.
    pub fn entries(&self) -> &[TypeEntry] {
        &self.entries
    }

    /// Number of assigned codes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no code has been assigned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
