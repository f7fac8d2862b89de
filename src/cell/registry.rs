//! Capability table for cell types.
//!
//! The registry maps a concrete cell type name to what the codec may do with
//! it: whether a specialized serializer exists, and whether blob payloads of
//! the type are gzip-compressed. Built-in types are always specialized.
//! Capabilities are declared at registration time, never discovered.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{
    GenericValue, BOOLEAN_TYPE, COLLECTION_TYPE, DOUBLE_TYPE, INT_TYPE, LONG_TYPE, STRING_TYPE,
};
use crate::error::Result;

/// Specialized binary serializer for an [`ObjectCell`](super::ObjectCell) type.
///
/// The codec hands the serializer a framed sub-stream. Reading fewer bytes
/// than were written is harmless: the rest of the frame is skipped.
pub trait CellSerializer: Send + Sync {
    /// Writes `value` to `out`.
    fn serialize(&self, value: &GenericValue, out: &mut dyn Write) -> Result<()>;

    /// Reads a value from `input`.
    fn deserialize(&self, input: &mut dyn Read) -> Result<GenericValue>;
}

/// What the codec may do with one cell type.
#[derive(Clone, Default)]
pub struct TypeCapabilities {
    /// Specialized serializer, if any. Object types without one take the
    /// generic path.
    pub serializer: Option<Arc<dyn CellSerializer>>,
    /// Whether blob payloads of this type are gzip-compressed.
    pub compress_blob: bool,
}

impl fmt::Debug for TypeCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCapabilities")
            .field("serializer", &self.serializer.is_some())
            .field("compress_blob", &self.compress_blob)
            .finish()
    }
}

/// Thread-safe registry of cell type capabilities.
#[derive(Debug)]
pub struct CellTypeRegistry {
    types: RwLock<HashMap<String, TypeCapabilities>>,
    compress_unknown_blobs: bool,
}

const BUILTIN_TYPES: [&str; 6] =
    [INT_TYPE, LONG_TYPE, DOUBLE_TYPE, BOOLEAN_TYPE, STRING_TYPE, COLLECTION_TYPE];

impl Default for CellTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CellTypeRegistry {
    /// Creates a registry knowing only the built-in types. Blob types that
    /// were never registered are compressed.
    pub fn new() -> Self {
        Self { types: RwLock::new(HashMap::new()), compress_unknown_blobs: true }
    }

    /// Returns true for types with a built-in codec.
    pub fn is_builtin(type_name: &str) -> bool {
        BUILTIN_TYPES.contains(&type_name)
    }

    /// Registers a specialized serializer for an object type.
    pub fn register_serializer(
        &self,
        type_name: impl Into<String>,
        serializer: Arc<dyn CellSerializer>,
    ) {
        let mut types = self.types.write();
        types.entry(type_name.into()).or_default().serializer = Some(serializer);
    }

    /// Declares the compression policy of a blob type.
    pub fn register_blob_type(&self, type_name: impl Into<String>, compress: bool) {
        let mut types = self.types.write();
        types.entry(type_name.into()).or_default().compress_blob = compress;
    }

    /// Capabilities of `type_name`, if it was registered.
    pub fn capabilities(&self, type_name: &str) -> Option<TypeCapabilities> {
        self.types.read().get(type_name).cloned()
    }

    /// The specialized serializer of an object type.
    pub fn serializer(&self, type_name: &str) -> Option<Arc<dyn CellSerializer>> {
        self.types.read().get(type_name).and_then(|caps| caps.serializer.clone())
    }

    /// Whether the type has any specialized encoding.
    pub fn has_specialized_serializer(&self, type_name: &str) -> bool {
        Self::is_builtin(type_name) || self.serializer(type_name).is_some()
    }

    /// Whether blob payloads of the type are compressed.
    pub fn compress_blob(&self, type_name: &str) -> bool {
        match self.types.read().get(type_name) {
            Some(caps) => caps.compress_blob,
            None => self.compress_unknown_blobs,
        }
    }
}
