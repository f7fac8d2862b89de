//! Cell values.
//!
//! A [`DataCell`] is one value of a row. Built-in scalar and collection types
//! carry their own fast binary encoding. [`ObjectCell`]s are open types: they
//! are encoded by a serializer registered in the [`CellTypeRegistry`] or, if
//! none is registered, by the generic bincode fallback. [`BlobCell`]s are
//! handles to large payloads that live out of band in a buffer's blob
//! directory.

mod blob;
mod registry;

pub use blob::{BlobAddress, BlobCell};
pub use registry::{CellSerializer, CellTypeRegistry, TypeCapabilities};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::DataType;

/// Type name of [`DataCell::Int`].
pub const INT_TYPE: &str = "int";
/// Type name of [`DataCell::Long`].
pub const LONG_TYPE: &str = "long";
/// Type name of [`DataCell::Double`].
pub const DOUBLE_TYPE: &str = "double";
/// Type name of [`DataCell::Boolean`].
pub const BOOLEAN_TYPE: &str = "boolean";
/// Type name of [`DataCell::String`].
pub const STRING_TYPE: &str = "string";
/// Type name of [`DataCell::Collection`].
pub const COLLECTION_TYPE: &str = "collection";
/// Type name reported for [`DataCell::Missing`].
pub const MISSING_TYPE: &str = "missing";

/// One value within a row.
#[derive(Debug, Clone, PartialEq)]
pub enum DataCell {
    /// The missing-value sentinel; carries no payload.
    Missing,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 string.
    String(Arc<str>),
    /// A list of cells sharing one element type.
    Collection(CollectionCell),
    /// A value of an open, named type.
    Object(ObjectCell),
    /// A handle to an out-of-band blob payload.
    Blob(BlobCell),
}

impl DataCell {
    /// Creates a string cell.
    pub fn string(value: impl Into<Arc<str>>) -> Self {
        DataCell::String(value.into())
    }

    /// Returns true for the missing-value sentinel.
    pub fn is_missing(&self) -> bool {
        matches!(self, DataCell::Missing)
    }

    /// Concrete runtime type name of the cell.
    pub fn type_name(&self) -> &str {
        match self {
            DataCell::Missing => MISSING_TYPE,
            DataCell::Int(_) => INT_TYPE,
            DataCell::Long(_) => LONG_TYPE,
            DataCell::Double(_) => DOUBLE_TYPE,
            DataCell::Boolean(_) => BOOLEAN_TYPE,
            DataCell::String(_) => STRING_TYPE,
            DataCell::Collection(_) => COLLECTION_TYPE,
            DataCell::Object(object) => object.type_name(),
            DataCell::Blob(blob) => blob.type_name(),
        }
    }

    /// Runtime data type of the cell, as used in schema messages.
    pub fn data_type(&self) -> DataType {
        match self {
            DataCell::Missing => DataType::Any,
            DataCell::Int(_) => DataType::Int,
            DataCell::Long(_) => DataType::Long,
            DataCell::Double(_) => DataType::Double,
            DataCell::Boolean(_) => DataType::Boolean,
            DataCell::String(_) => DataType::String,
            DataCell::Collection(c) => DataType::Collection(Box::new(c.element_type().clone())),
            DataCell::Object(o) => DataType::Object(o.type_name().to_string()),
            DataCell::Blob(b) => DataType::Blob(b.type_name().to_string()),
        }
    }

    pub(crate) fn contains_blobs(&self) -> bool {
        match self {
            DataCell::Blob(_) => true,
            DataCell::Collection(c) => c.cells().iter().any(DataCell::contains_blobs),
            _ => false,
        }
    }
}

impl fmt::Display for DataCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataCell::Missing => f.write_str("?"),
            DataCell::Int(v) => write!(f, "{}", v),
            DataCell::Long(v) => write!(f, "{}", v),
            DataCell::Double(v) => write!(f, "{}", v),
            DataCell::Boolean(v) => write!(f, "{}", v),
            DataCell::String(v) => f.write_str(v),
            DataCell::Collection(c) => {
                f.write_str("[")?;
                for (i, cell) in c.cells().iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", cell)?;
                }
                f.write_str("]")
            }
            DataCell::Object(o) => write!(f, "{}:{:?}", o.type_name(), o.value()),
            DataCell::Blob(b) => write!(f, "<blob {}>", b.type_name()),
        }
    }
}

impl From<i32> for DataCell {
    fn from(v: i32) -> Self {
        DataCell::Int(v)
    }
}

impl From<i64> for DataCell {
    fn from(v: i64) -> Self {
        DataCell::Long(v)
    }
}

impl From<f64> for DataCell {
    fn from(v: f64) -> Self {
        DataCell::Double(v)
    }
}

impl From<bool> for DataCell {
    fn from(v: bool) -> Self {
        DataCell::Boolean(v)
    }
}

impl From<&str> for DataCell {
    fn from(v: &str) -> Self {
        DataCell::string(v)
    }
}

/// A list of cells with a declared element type.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionCell {
    element_type: DataType,
    cells: Arc<[DataCell]>,
}

impl CollectionCell {
    /// Creates a collection. Elements are not checked against the type.
    pub fn new(element_type: DataType, cells: Vec<DataCell>) -> Self {
        Self { element_type, cells: cells.into() }
    }

    /// Declared element type.
    pub fn element_type(&self) -> &DataType {
        &self.element_type
    }

    /// Elements in order.
    pub fn cells(&self) -> &[DataCell] {
        &self.cells
    }
}

/// Self-describing value carried by an [`ObjectCell`].
///
/// This is what the generic serialization fallback writes, so every variant
/// must be serializable with bincode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenericValue {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list.
    List(Vec<GenericValue>),
    /// Ordered map with string keys.
    Map(Vec<(String, GenericValue)>),
}

/// A cell of an open, named type.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCell {
    type_name: Arc<str>,
    value: GenericValue,
}

impl ObjectCell {
    /// Creates an object cell.
    pub fn new(type_name: impl Into<Arc<str>>, value: GenericValue) -> Self {
        Self { type_name: type_name.into(), value }
    }

    /// Type name used for serializer lookup.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The carried value.
    pub fn value(&self) -> &GenericValue {
        &self.value
    }
}
