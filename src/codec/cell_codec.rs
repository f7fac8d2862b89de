//! Binary row and cell encoding.
//!
//! Row layout:
//!
//! ```text
//! [key block]?            // omitted by key-less tables
//! [cell]*                 // one per column
//! ROW_SEPARATOR
//! ```
//!
//! Cell layout:
//!
//! ```text
//! MISSING                               // missing value
//! [type code] [framed payload]          // built-in or registered serializer
//! [blob type code] [framed address]     // blob handle, payload stored out of band
//! GENERIC [type code] [framed bincode]  // object type without serializer
//! ```

use std::io::{Read, Write};
use std::sync::{Arc, Weak};

use bytes::{Buf, BufMut, BytesMut};

use super::framing::{read_byte, BlockReader, BlockWriter};
use super::type_table::{TypeEntry, TypeShortcutTable, GENERIC, MISSING, ROW_SEPARATOR};
use crate::blob::BlobStore;
use crate::cell::{
    BlobAddress, BlobCell, CellTypeRegistry, CollectionCell, DataCell, GenericValue, ObjectCell,
    BOOLEAN_TYPE, COLLECTION_TYPE, DOUBLE_TYPE, INT_TYPE, LONG_TYPE, STRING_TYPE,
};
use crate::error::{Error, Result};
use crate::format::FormatVersion;
use crate::repository::TableRepository;
use crate::row::{DataRow, RowKey};

/// How decoded blob addresses are bound to a store.
#[derive(Debug, Clone)]
pub(crate) struct BlobContext {
    /// Id of the buffer doing the reading.
    pub own_id: u64,
    /// Owner id the stream uses for blobs of the reading buffer. Differs
    /// from `own_id` when a saved table was restored under a fresh id.
    pub stream_owner_id: u64,
    /// Store of the reading buffer.
    pub store: Weak<BlobStore>,
    /// Local repository of the context the reading buffer belongs to.
    pub local: Weak<TableRepository>,
}

impl BlobContext {
    pub(crate) fn detached() -> Self {
        Self { own_id: 0, stream_owner_id: 0, store: Weak::new(), local: Weak::new() }
    }
}

/// Writes rows, assigning type-shortcut codes as new types appear.
pub(crate) struct CellEncoder<'a> {
    types: &'a mut TypeShortcutTable,
    registry: &'a CellTypeRegistry,
    version: FormatVersion,
}

impl<'a> CellEncoder<'a> {
    pub(crate) fn new(
        types: &'a mut TypeShortcutTable,
        registry: &'a CellTypeRegistry,
        version: FormatVersion,
    ) -> Self {
        Self { types, registry, version }
    }

    /// Writes one row including its separator.
    pub(crate) fn write_row(&mut self, out: &mut dyn Write, row: &DataRow) -> Result<()> {
        if self.version.with_keys {
            let mut block = BlockWriter::new(&mut *out);
            block.write_all(row.key().as_str().as_bytes())?;
            block.finish()?;
        }
        for cell in row.cells() {
            self.write_cell(out, cell)?;
        }
        out.write_all(&[ROW_SEPARATOR])?;
        Ok(())
    }

    /// Writes one cell.
    pub(crate) fn write_cell(&mut self, out: &mut dyn Write, cell: &DataCell) -> Result<()> {
        match cell {
            DataCell::Missing => out.write_all(&[MISSING])?,
            DataCell::Blob(blob) => {
                if !self.version.supports_blobs() {
                    return Err(Error::invalid_argument(format!(
                        "format version {} cannot store blob cells",
                        self.version.number
                    )));
                }
                let address = blob.address().ok_or_else(|| {
                    Error::internal("blob cell was not committed to a buffer before encoding")
                })?;
                let code = self.types.code_for(blob.type_name(), true)?;
                out.write_all(&[code])?;
                let mut block = BlockWriter::new(&mut *out);
                write_address(&mut block, &address, self.version)?;
                block.finish()?;
            }
            DataCell::Object(object) if !self.registry.has_specialized_serializer(object.type_name()) => {
                let code = self.types.code_for(object.type_name(), false)?;
                out.write_all(&[GENERIC, code])?;
                let mut block = BlockWriter::new(&mut *out);
                bincode::serialize_into(&mut block, object.value())?;
                block.finish()?;
            }
            _ => {
                let code = self.types.code_for(cell.type_name(), false)?;
                out.write_all(&[code])?;
                let mut block = BlockWriter::new(&mut *out);
                self.write_payload(&mut block, cell)?;
                block.finish()?;
            }
        }
        Ok(())
    }

    fn write_payload(&mut self, out: &mut dyn Write, cell: &DataCell) -> Result<()> {
        match cell {
            DataCell::Int(v) => out.write_all(&v.to_le_bytes())?,
            DataCell::Long(v) => out.write_all(&v.to_le_bytes())?,
            DataCell::Double(v) => out.write_all(&v.to_bits().to_le_bytes())?,
            DataCell::Boolean(v) => out.write_all(&[u8::from(*v)])?,
            DataCell::String(v) => out.write_all(v.as_bytes())?,
            DataCell::Collection(collection) => {
                let element_type = collection.element_type().to_string();
                let len = u16::try_from(element_type.len()).map_err(|_| {
                    Error::invalid_argument("collection element type name too long")
                })?;
                let count = u32::try_from(collection.cells().len())
                    .map_err(|_| Error::invalid_argument("collection has too many elements"))?;
                out.write_all(&len.to_le_bytes())?;
                out.write_all(element_type.as_bytes())?;
                out.write_all(&count.to_le_bytes())?;
                for element in collection.cells() {
                    self.write_cell(out, element)?;
                }
            }
            DataCell::Object(object) => {
                let serializer = self.registry.serializer(object.type_name()).ok_or_else(|| {
                    Error::internal(format!("no serializer for type \"{}\"", object.type_name()))
                })?;
                serializer.serialize(object.value(), out)?;
            }
            DataCell::Missing | DataCell::Blob(_) => {
                return Err(Error::internal("cell kind has no inline payload"))
            }
        }
        Ok(())
    }
}

fn write_address(out: &mut dyn Write, address: &BlobAddress, version: FormatVersion) -> Result<()> {
    let mut buf = BytesMut::with_capacity(21);
    buf.put_u64_le(address.buffer_id);
    buf.put_u32_le(address.column);
    buf.put_u64_le(address.index);
    if version.has_blob_compression_flag() {
        buf.put_u8(u8::from(address.compressed));
    }
    out.write_all(&buf)?;
    Ok(())
}

/// Reads rows written by [`CellEncoder`].
pub(crate) struct CellDecoder<'a> {
    types: &'a TypeShortcutTable,
    registry: &'a CellTypeRegistry,
    version: FormatVersion,
    blobs: &'a BlobContext,
    num_columns: usize,
}

impl<'a> CellDecoder<'a> {
    pub(crate) fn new(
        types: &'a TypeShortcutTable,
        registry: &'a CellTypeRegistry,
        version: FormatVersion,
        blobs: &'a BlobContext,
        num_columns: usize,
    ) -> Self {
        Self { types, registry, version, blobs, num_columns }
    }

    /// Reads one row including its separator.
    pub(crate) fn read_row(&self, input: &mut dyn Read) -> Result<DataRow> {
        let key = if self.version.with_keys {
            let mut block = BlockReader::new(&mut *input);
            let mut bytes = Vec::new();
            block.read_to_end(&mut bytes)?;
            let key = String::from_utf8(bytes)
                .map_err(|_| Error::corruption("row key is not valid UTF-8"))?;
            RowKey::from(key)
        } else {
            RowKey::empty()
        };

        let mut cells = Vec::with_capacity(self.num_columns);
        for _ in 0..self.num_columns {
            cells.push(self.read_cell(input)?);
        }

        match read_byte(input)? {
            ROW_SEPARATOR => Ok(DataRow::new(key, cells)),
            other => Err(Error::corruption(format!(
                "expected row separator after row \"{}\", found byte {}",
                key, other
            ))),
        }
    }

    /// Reads one cell. A cell whose payload cannot be decoded becomes
    /// missing; a broken stream is an error.
    pub(crate) fn read_cell(&self, input: &mut dyn Read) -> Result<DataCell> {
        match read_byte(input)? {
            MISSING => Ok(DataCell::Missing),
            ROW_SEPARATOR => Err(Error::corruption("row separator where a cell was expected")),
            GENERIC => {
                let entry = self.types.entry(read_byte(input)?)?;
                let mut block = BlockReader::new(&mut *input);
                let result = bincode::deserialize_from::<_, GenericValue>(&mut block)
                    .map(|value| DataCell::Object(ObjectCell::new(Arc::clone(&entry.name), value)))
                    .map_err(Error::from);
                finish_cell(&mut block, result, entry)
            }
            code => {
                let entry = self.types.entry(code)?;
                let mut block = BlockReader::new(&mut *input);
                let result = if entry.blob {
                    self.read_blob(&mut block, entry)
                } else {
                    self.read_payload(&mut block, entry)
                };
                finish_cell(&mut block, result, entry)
            }
        }
    }

    fn read_payload(&self, input: &mut dyn Read, entry: &TypeEntry) -> Result<DataCell> {
        let cell = match entry.name.as_ref() {
            INT_TYPE => {
                let mut b = [0u8; 4];
                input.read_exact(&mut b)?;
                DataCell::Int(i32::from_le_bytes(b))
            }
            LONG_TYPE => {
                let mut b = [0u8; 8];
                input.read_exact(&mut b)?;
                DataCell::Long(i64::from_le_bytes(b))
            }
            DOUBLE_TYPE => {
                let mut b = [0u8; 8];
                input.read_exact(&mut b)?;
                DataCell::Double(f64::from_bits(u64::from_le_bytes(b)))
            }
            BOOLEAN_TYPE => DataCell::Boolean(read_byte(input)? != 0),
            STRING_TYPE => {
                let mut s = String::new();
                input.read_to_string(&mut s)?;
                DataCell::string(s)
            }
            COLLECTION_TYPE => self.read_collection(input)?,
            name => match self.registry.serializer(name) {
                Some(serializer) => DataCell::Object(ObjectCell::new(
                    Arc::clone(&entry.name),
                    serializer.deserialize(input)?,
                )),
                None => {
                    return Err(Error::Serialization(format!(
                        "no serializer registered for type \"{}\"",
                        name
                    )))
                }
            },
        };
        Ok(cell)
    }

    fn read_collection(&self, input: &mut dyn Read) -> Result<DataCell> {
        let mut len = [0u8; 2];
        input.read_exact(&mut len)?;
        let mut name = vec![0u8; u16::from_le_bytes(len) as usize];
        input.read_exact(&mut name)?;
        let element_type = String::from_utf8(name)
            .map_err(|_| Error::corruption("collection element type is not valid UTF-8"))?
            .parse()?;

        let mut count = [0u8; 4];
        input.read_exact(&mut count)?;
        let count = u32::from_le_bytes(count) as usize;
        let mut cells = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            cells.push(self.read_cell(input)?);
        }
        Ok(DataCell::Collection(CollectionCell::new(element_type, cells)))
    }

    fn read_blob(&self, input: &mut dyn Read, entry: &TypeEntry) -> Result<DataCell> {
        if !self.version.supports_blobs() {
            return Err(Error::corruption(format!(
                "blob cell in a version {} stream",
                self.version.number
            )));
        }
        let len = if self.version.has_blob_compression_flag() { 21 } else { 20 };
        let mut raw = [0u8; 21];
        input.read_exact(&mut raw[..len])?;
        let mut buf = &raw[..len];
        let mut address = BlobAddress {
            buffer_id: buf.get_u64_le(),
            column: buf.get_u32_le(),
            index: buf.get_u64_le(),
            compressed: buf.has_remaining() && buf.get_u8() != 0,
        };

        let store = if address.buffer_id == self.blobs.stream_owner_id {
            address.buffer_id = self.blobs.own_id;
            self.blobs.store.clone()
        } else {
            Weak::new()
        };
        Ok(DataCell::Blob(BlobCell::from_address(
            Arc::clone(&entry.name),
            address,
            store,
            self.blobs.local.clone(),
        )))
    }
}

fn finish_cell<R: Read>(
    block: &mut BlockReader<R>,
    result: Result<DataCell>,
    entry: &TypeEntry,
) -> Result<DataCell> {
    match result {
        Ok(cell) => {
            block.skip_to_end()?;
            Ok(cell)
        }
        Err(err) => {
            // The frame must still be intact, otherwise the stream is broken.
            block.skip_to_end()?;
            log::warn!(
                "Failed to read cell of type \"{}\", substituting a missing value: {}",
                entry.name,
                err
            );
            Ok(DataCell::Missing)
        }
    }
}
