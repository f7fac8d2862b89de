//! Table repository and buffer id allocation.
//!
//! A repository maps buffer ids to tables. It is consulted to resolve blob
//! addresses owned by other buffers and to find the tables a saved view
//! refers to. There is one process-wide repository plus one local repository
//! per [`ExecutionContext`](crate::ExecutionContext).
//!
//! Entries are bookkeeping only: a table stays alive as long as anybody
//! holds it, and removing an entry does not clear the table.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::blob::BlobStore;
use crate::table::Table;

/// Thread-safe map from table id to table.
#[derive(Debug, Default)]
pub struct TableRepository {
    tables: RwLock<HashMap<u64, Table>>,
}

impl TableRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide repository.
    pub fn global() -> &'static TableRepository {
        static GLOBAL: OnceLock<TableRepository> = OnceLock::new();
        GLOBAL.get_or_init(TableRepository::new)
    }

    /// Registers a table under its id, together with every buffer-backed
    /// table it materialized internally.
    pub fn register(&self, table: &Table) {
        let mut tables = self.tables.write();
        for owned in table.owned_tables() {
            tables.insert(owned.id(), owned);
        }
        tables.insert(table.id(), table.clone());
    }

    /// Removes a table and the tables it owns. Returns true if the table
    /// was registered.
    pub fn remove(&self, table: &Table) -> bool {
        let mut tables = self.tables.write();
        for owned in table.owned_tables() {
            tables.remove(&owned.id());
        }
        tables.remove(&table.id()).is_some()
    }

    /// Looks up a table by id.
    pub fn get(&self, id: u64) -> Option<Table> {
        self.tables.read().get(&id).cloned()
    }

    /// Returns true if a table with this id is registered.
    pub fn contains(&self, id: u64) -> bool {
        self.tables.read().contains_key(&id)
    }

    /// Blob store of the registered buffer-backed table with this id.
    pub fn blob_store(&self, id: u64) -> Option<Arc<BlobStore>> {
        self.tables.read().get(&id).and_then(Table::blob_store)
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn used_ids() -> &'static Mutex<HashSet<u64>> {
    static USED: OnceLock<Mutex<HashSet<u64>>> = OnceLock::new();
    USED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// An id reserved for one buffer or view. Dropping it hands the id back,
/// so a restored archive may claim it again.
#[derive(Debug)]
pub(crate) struct ReservedId(u64);

impl ReservedId {
    pub(crate) fn get(&self) -> u64 {
        self.0
    }
}

impl Drop for ReservedId {
    fn drop(&mut self) {
        used_ids().lock().remove(&self.0);
    }
}

/// Allocates an id that no other buffer or view of this process uses.
pub(crate) fn allocate_id() -> ReservedId {
    loop {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        if used_ids().lock().insert(id) {
            return ReservedId(id);
        }
    }
}

/// Claims a persisted id for a restored buffer. Returns `None` if the id is
/// already taken in this process; the caller then allocates a fresh id.
pub(crate) fn claim_id(id: u64) -> Option<ReservedId> {
    if id == 0 {
        return None;
    }
    let claimed = used_ids().lock().insert(id);
    if !claimed {
        return None;
    }
    NEXT_ID.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    Some(ReservedId(id))
}
