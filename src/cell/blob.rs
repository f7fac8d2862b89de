//! Blob cell handles and addresses.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::repository::TableRepository;

/// Location of a blob payload: owning buffer, column, sequence number within
/// the column, and whether the stored bytes are gzip-compressed.
///
/// Assigned exactly once, when the blob is first committed to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobAddress {
    /// Id of the buffer that physically stores the payload.
    pub buffer_id: u64,
    /// Column the blob was first written to.
    pub column: u32,
    /// Sequence number within that column.
    pub index: u64,
    /// Whether the payload file is gzip-compressed.
    pub compressed: bool,
}

/// Handle to a blob payload.
///
/// Clones share the handle, so committing a blob to a buffer through one
/// clone is visible through all of them: the same logical blob added to two
/// rows is written once and referenced twice.
///
/// A freshly created blob holds its payload until it is committed. After
/// that the payload is only cached weakly and is re-read from the owning
/// buffer's blob directory when the cache has been reclaimed. If the handle
/// no longer reaches that buffer, the owner is looked up in the local
/// repository of the reading context first and in the global one second.
#[derive(Clone)]
pub struct BlobCell {
    inner: Arc<BlobInner>,
}

struct BlobInner {
    type_name: Arc<str>,
    address: OnceLock<BlobAddress>,
    state: Mutex<PayloadState>,
}

struct PayloadState {
    strong: Option<Arc<[u8]>>,
    cached: Option<Weak<[u8]>>,
    store: Weak<BlobStore>,
    local: Weak<TableRepository>,
}

impl BlobCell {
    /// Creates a new, not yet committed blob.
    pub fn new(type_name: impl Into<Arc<str>>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self::build(
            type_name.into(),
            None,
            PayloadState {
                strong: Some(payload.into()),
                cached: None,
                store: Weak::new(),
                local: Weak::new(),
            },
        )
    }

    /// A handle for a blob that already lives in `store`.
    pub(crate) fn committed(
        type_name: Arc<str>,
        address: BlobAddress,
        store: &Arc<BlobStore>,
        payload: Option<&Arc<[u8]>>,
    ) -> Self {
        Self::build(
            type_name,
            Some(address),
            PayloadState {
                strong: None,
                cached: payload.map(Arc::downgrade),
                store: Arc::downgrade(store),
                local: Weak::new(),
            },
        )
    }

    /// A lazily resolved handle decoded from a row stream. `local` is the
    /// repository of the context that reads the stream.
    pub(crate) fn from_address(
        type_name: Arc<str>,
        address: BlobAddress,
        store: Weak<BlobStore>,
        local: Weak<TableRepository>,
    ) -> Self {
        Self::build(type_name, Some(address), PayloadState { strong: None, cached: None, store, local })
    }

    fn build(type_name: Arc<str>, address: Option<BlobAddress>, state: PayloadState) -> Self {
        let cell = OnceLock::new();
        if let Some(address) = address {
            let _ = cell.set(address);
        }
        Self { inner: Arc::new(BlobInner { type_name, address: cell, state: Mutex::new(state) }) }
    }

    /// Type tag of the blob.
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub(crate) fn type_name_arc(&self) -> Arc<str> {
        Arc::clone(&self.inner.type_name)
    }

    /// The address, once the blob has been committed to a buffer.
    pub fn address(&self) -> Option<BlobAddress> {
        self.inner.address.get().copied()
    }

    /// Whether the payload is currently held in memory.
    pub fn is_loaded(&self) -> bool {
        let state = self.inner.state.lock();
        state.strong.is_some() || state.cached.as_ref().is_some_and(|w| w.strong_count() > 0)
    }

    /// Returns true if both handles are the same logical blob.
    pub fn ptr_eq(&self, other: &BlobCell) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the payload, reading it from the owning buffer if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlobOwnerNotFound`] if the owning buffer has been
    /// dropped or cleared and neither the local nor the global repository
    /// holds a table for it.
    pub fn payload(&self) -> Result<Arc<[u8]>> {
        let mut state = self.inner.state.lock();
        if let Some(payload) = &state.strong {
            return Ok(Arc::clone(payload));
        }
        if let Some(payload) = state.cached.as_ref().and_then(Weak::upgrade) {
            return Ok(payload);
        }

        let address = self
            .address()
            .ok_or_else(|| Error::internal("blob has neither a payload nor an address"))?;
        let store = match state.store.upgrade() {
            Some(store) if store.buffer_id() == address.buffer_id => store,
            _ => state
                .local
                .upgrade()
                .and_then(|local| local.blob_store(address.buffer_id))
                .or_else(|| TableRepository::global().blob_store(address.buffer_id))
                .ok_or(Error::BlobOwnerNotFound { buffer_id: address.buffer_id })?,
        };

        let payload = store.read(&address)?;
        state.cached = Some(Arc::downgrade(&payload));
        Ok(payload)
    }

    /// Assigns the address. The payload is kept only weakly afterwards.
    ///
    /// Returns false if the blob was already committed.
    pub(crate) fn commit(&self, address: BlobAddress, store: &Arc<BlobStore>) -> bool {
        if self.inner.address.set(address).is_err() {
            return false;
        }
        let mut state = self.inner.state.lock();
        if let Some(payload) = state.strong.take() {
            state.cached = Some(Arc::downgrade(&payload));
        }
        state.store = Arc::downgrade(store);
        true
    }
}

impl PartialEq for BlobCell {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.type_name() != other.type_name() {
            return false;
        }
        match (self.payload(), other.payload()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for BlobCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobCell")
            .field("type_name", &self.type_name())
            .field("address", &self.address())
            .finish()
    }
}
