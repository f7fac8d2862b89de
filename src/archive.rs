//! Zip archives of buffers.
//!
//! An archive holds three kinds of entries:
//!
//! * `data.bin`: the framed row stream, gzip-wrapped from version 3 on;
//! * `blobs/...`: one file per blob, laid out as in the buffer directory;
//! * `meta.xml`: version, row count, blob flag, owning buffer id, the
//!   type-shortcut table and the schema.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path};
use std::sync::{Arc, Weak};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::blob::{relative_path, write_payload, BLOB_DIR};
use crate::buffer::{Buffer, DATA_FILE};
use crate::cell::{BlobAddress, BlobCell, CollectionCell, DataCell};
use crate::codec::{CellEncoder, TypeEntry, TypeShortcutTable};
use crate::error::{Error, Result};
use crate::format::FormatVersion;
use crate::row::DataRow;
use crate::schema::{ColumnDomain, ColumnSchema, TableSchema};

pub(crate) const META_FILE: &str = "meta.xml";

/// Everything meta.xml records.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveMeta {
    pub version: FormatVersion,
    pub row_count: u64,
    pub contains_blobs: bool,
    pub buffer_id: u64,
    pub blob_bucket_size: u64,
    pub types: Vec<TypeEntry>,
    pub schema: TableSchema,
}

fn xml_error(e: impl std::fmt::Display) -> Error {
    Error::corruption(format!("invalid meta.xml: {}", e))
}

fn entry_options(method: CompressionMethod) -> FileOptions {
    FileOptions::default().compression_method(method)
}

/// Zip entry name of a relative path, with forward slashes.
fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Writes `buffer` to a zip archive at `path`.
///
/// If the buffer is already file-backed in the requested version, its
/// spill file is copied unchanged. Otherwise the rows are re-encoded, and
/// blobs that live in other buffers are copied into the archive so that it
/// is self-contained.
pub(crate) fn write_buffer(
    buffer: &Buffer,
    path: &Path,
    version: FormatVersion,
    on_row: &mut dyn FnMut(u64) -> Result<()>,
) -> Result<()> {
    if version.with_keys != buffer.is_keyed() {
        return Err(Error::invalid_argument(
            "keyed and key-less buffers cannot be written in each other's format",
        ));
    }
    version.version_string()?;
    if buffer.contains_blobs() && !version.supports_blobs() {
        return Err(Error::invalid_argument(format!(
            "format version {} cannot store blob cells",
            version.number
        )));
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&parent)?;
    let mut staging = tempfile::NamedTempFile::new_in(&parent)?;
    {
        let mut zip = ZipWriter::new(BufWriter::new(staging.as_file_mut()));
        let data_method =
            if version.is_gzipped() { CompressionMethod::Stored } else { CompressionMethod::Deflated };

        let data_file = buffer.data_file()?;
        let copy_stream = buffer.version() == version && !buffer.has_foreign_blobs();
        let (types, stream_owner_id) = match data_file {
            Some(data_file) if copy_stream => {
                on_row(0)?;
                zip.start_file(DATA_FILE, entry_options(data_method))?;
                io::copy(&mut BufReader::new(File::open(&data_file)?), &mut zip)?;
                (buffer.types().entries().to_vec(), buffer.stream_owner_id())
            }
            _ => {
                let mut spool = tempfile::tempfile_in(&parent)?;
                let types = encode_rows(buffer, version, &mut spool, &mut zip, on_row)?;
                spool.seek(SeekFrom::Start(0))?;
                zip.start_file(DATA_FILE, entry_options(data_method))?;
                io::copy(&mut BufReader::new(spool), &mut zip)?;
                (types, buffer.id())
            }
        };

        if buffer.contains_blobs() {
            if let Some(root) = buffer.blob_store().root()? {
                // Without the flag in the address a reader expects every blob
                // file uncompressed.
                let decompress = !version.has_blob_compression_flag();
                copy_tree(&root, Path::new(BLOB_DIR), &mut zip, decompress)?;
            }
        }

        let meta = ArchiveMeta {
            version,
            row_count: buffer.row_count(),
            contains_blobs: buffer.contains_blobs(),
            buffer_id: stream_owner_id,
            blob_bucket_size: buffer.blob_store().bucket_size(),
            types,
            schema: buffer.schema().clone(),
        };
        zip.start_file(META_FILE, entry_options(CompressionMethod::Deflated))?;
        zip.write_all(&meta_to_xml(&meta)?)?;
        zip.finish()?.flush()?;
    }
    staging.persist(path).map_err(|e| Error::Io(e.error))?;
    log::info!(
        "Wrote buffer {} ({} rows) to {:?} as {}",
        buffer.id(),
        buffer.row_count(),
        path,
        version.version_string()?
    );
    Ok(())
}

/// Re-encodes all rows of `buffer` into `out`, copying foreign blobs into
/// `zip`. Returns the type table of the new stream.
fn encode_rows<W: Write + Seek>(
    buffer: &Buffer,
    version: FormatVersion,
    out: &mut File,
    zip: &mut ZipWriter<W>,
    on_row: &mut dyn FnMut(u64) -> Result<()>,
) -> Result<Vec<TypeEntry>> {
    let mut types = TypeShortcutTable::new();
    let mut relocator = BlobRelocator::new(buffer, version);
    let mut sink = StreamSink::new(BufWriter::new(out), version.is_gzipped());
    {
        let mut encoder = CellEncoder::new(&mut types, buffer.registry(), version);
        for (index, row) in buffer.iter()?.enumerate() {
            on_row(index as u64)?;
            let row = row?;
            let row = if row.contains_blobs() { relocator.relocate(&row, zip)? } else { row };
            encoder.write_row(sink.writer(), &row)?;
        }
    }
    sink.finish()?;
    Ok(types.entries().to_vec())
}

enum StreamSink<W: Write> {
    Plain(W),
    Gzip(BufWriter<GzEncoder<W>>),
}

impl<W: Write> StreamSink<W> {
    fn new(inner: W, gzip: bool) -> Self {
        if gzip {
            StreamSink::Gzip(BufWriter::new(GzEncoder::new(inner, Compression::default())))
        } else {
            StreamSink::Plain(inner)
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            StreamSink::Plain(w) => w,
            StreamSink::Gzip(w) => w,
        }
    }

    fn finish(self) -> Result<()> {
        let mut inner = match self {
            StreamSink::Plain(w) => w,
            StreamSink::Gzip(w) => w.into_inner().map_err(|e| e.into_error())?.finish()?,
        };
        inner.flush()?;
        Ok(())
    }
}

/// Gives blobs of other buffers fresh addresses under the archived buffer.
struct BlobRelocator<'a> {
    buffer: &'a Buffer,
    version: FormatVersion,
    next_index: HashMap<u32, u64>,
    moved: HashMap<BlobAddress, BlobAddress>,
}

impl<'a> BlobRelocator<'a> {
    fn new(buffer: &'a Buffer, version: FormatVersion) -> Self {
        Self { buffer, version, next_index: HashMap::new(), moved: HashMap::new() }
    }

    fn relocate<W: Write + Seek>(&mut self, row: &DataRow, zip: &mut ZipWriter<W>) -> Result<DataRow> {
        let mut cells = Vec::with_capacity(row.num_cells());
        for cell in row.cells() {
            cells.push(self.relocate_cell(cell, zip)?);
        }
        Ok(DataRow::new(row.key().clone(), cells))
    }

    fn relocate_cell<W: Write + Seek>(&mut self, cell: &DataCell, zip: &mut ZipWriter<W>) -> Result<DataCell> {
        match cell {
            DataCell::Blob(blob) => match blob.address() {
                Some(address) if address.buffer_id != self.buffer.id() => {
                    let moved = self.relocate_blob(blob, address, zip)?;
                    Ok(DataCell::Blob(BlobCell::from_address(blob.type_name_arc(), moved, Weak::new(), Weak::new())))
                }
                _ => Ok(cell.clone()),
            },
            DataCell::Collection(collection) if cell.contains_blobs() => {
                let mut cells = Vec::with_capacity(collection.cells().len());
                for element in collection.cells() {
                    cells.push(self.relocate_cell(element, zip)?);
                }
                Ok(DataCell::Collection(CollectionCell::new(collection.element_type().clone(), cells)))
            }
            other => Ok(other.clone()),
        }
    }

    fn relocate_blob<W: Write + Seek>(
        &mut self,
        blob: &BlobCell,
        address: BlobAddress,
        zip: &mut ZipWriter<W>,
    ) -> Result<BlobAddress> {
        if let Some(moved) = self.moved.get(&address) {
            return Ok(*moved);
        }
        let buffer = self.buffer;
        let store = buffer.blob_store();
        let slot = self
            .next_index
            .entry(address.column)
            .or_insert_with(|| store.next_index(address.column));
        let moved = BlobAddress {
            buffer_id: buffer.id(),
            column: address.column,
            index: *slot,
            compressed: self.version.has_blob_compression_flag()
                && buffer.registry().compress_blob(blob.type_name()),
        };
        *slot += 1;

        let payload: Arc<[u8]> = blob.payload()?;
        zip.start_file(
            entry_name(&relative_path(&moved, store.bucket_size())),
            entry_options(CompressionMethod::Stored),
        )?;
        write_payload(&mut *zip, &payload, moved.compressed)?;
        self.moved.insert(address, moved);
        Ok(moved)
    }
}

/// Copies a blob tree into `zip`. With `decompress`, gzip files are stored
/// inflated under their name without the `.gz` suffix.
fn copy_tree<W: Write + Seek>(dir: &Path, prefix: &Path, zip: &mut ZipWriter<W>, decompress: bool) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let file_name = entry.file_name();
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &prefix.join(&file_name), zip, decompress)?;
            continue;
        }
        let mut file = BufReader::new(File::open(entry.path())?);
        match file_name.to_str().and_then(|n| n.strip_suffix(".gz")) {
            Some(plain) if decompress => {
                zip.start_file(entry_name(&prefix.join(plain)), entry_options(CompressionMethod::Deflated))?;
                io::copy(&mut GzDecoder::new(file), zip)?;
            }
            _ => {
                zip.start_file(entry_name(&prefix.join(&file_name)), entry_options(CompressionMethod::Stored))?;
                io::copy(&mut file, zip)?;
            }
        }
    }
    Ok(())
}

fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|e| if e.kind() == io::ErrorKind::NotFound {
            Error::not_found(format!("archive {:?}", path))
        } else {
            Error::Io(e)
        })?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

/// Reads meta.xml of an archive.
pub(crate) fn read_meta(path: &Path) -> Result<ArchiveMeta> {
    let mut archive = open_archive(path)?;
    let mut entry = archive
        .by_name(META_FILE)
        .map_err(|_| Error::corruption(format!("{:?} has no {}", path, META_FILE)))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    meta_from_xml(&xml)
}

/// Extracts the row stream and blob files of an archive into `dir`.
pub(crate) fn extract_into(path: &Path, dir: &Path) -> Result<()> {
    let mut archive = open_archive(path)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name != DATA_FILE && !name.starts_with(&format!("{}/", BLOB_DIR)) {
            continue;
        }
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| Error::corruption(format!("unsafe entry name \"{}\" in {:?}", name, path)))?
            .to_path_buf();
        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&target)?);
        io::copy(&mut entry, &mut out)?;
        out.flush()?;
    }
    Ok(())
}

fn meta_to_xml(meta: &ArchiveMeta) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    writer.write_event(Event::Start(BytesStart::new("container"))).map_err(xml_error)?;

    let entries = [
        ("version", meta.version.version_string()?.to_string()),
        ("row_count", meta.row_count.to_string()),
        ("contains_blobs", meta.contains_blobs.to_string()),
        ("buffer_id", meta.buffer_id.to_string()),
        ("blob_bucket_size", meta.blob_bucket_size.to_string()),
    ];
    for (key, value) in &entries {
        let mut element = BytesStart::new("entry");
        element.push_attribute(("key", *key));
        element.push_attribute(("value", value.as_str()));
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }

    writer.write_event(Event::Start(BytesStart::new("cell_types"))).map_err(xml_error)?;
    for (i, entry) in meta.types.iter().enumerate() {
        let code = (usize::from(crate::codec::type_table::FIRST_TYPE_CODE) + i).to_string();
        let mut element = BytesStart::new("cell_type");
        element.push_attribute(("code", code.as_str()));
        element.push_attribute(("name", entry.name.as_ref()));
        element.push_attribute(("blob", if entry.blob { "true" } else { "false" }));
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }
    writer.write_event(Event::End(BytesEnd::new("cell_types"))).map_err(xml_error)?;

    writer.write_event(Event::Start(BytesStart::new("columns"))).map_err(xml_error)?;
    for column in meta.schema.columns() {
        let data_type = column.data_type().to_string();
        let domain = serde_json::to_string(column.domain())?;
        let mut element = BytesStart::new("column");
        element.push_attribute(("name", column.name()));
        element.push_attribute(("type", data_type.as_str()));
        element.push_attribute(("domain", domain.as_str()));
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }
    writer.write_event(Event::End(BytesEnd::new("columns"))).map_err(xml_error)?;

    writer.write_event(Event::End(BytesEnd::new("container"))).map_err(xml_error)?;
    Ok(writer.into_inner())
}

fn meta_from_xml(xml: &str) -> Result<ArchiveMeta> {
    let mut reader = Reader::from_str(xml);
    let mut entries: HashMap<String, String> = HashMap::new();
    let mut types: Vec<(u32, TypeEntry)> = Vec::new();
    let mut columns = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Empty(element) | Event::Start(element) => {
                let mut attrs: HashMap<String, String> = HashMap::new();
                for attr in element.attributes() {
                    let attr = attr.map_err(xml_error)?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().map_err(xml_error)?.into_owned();
                    attrs.insert(key, value);
                }
                match element.name().as_ref() {
                    b"entry" => {
                        entries.insert(required(&attrs, "key")?.to_string(), required(&attrs, "value")?.to_string());
                    }
                    b"cell_type" => {
                        let code = parse_number(required(&attrs, "code")?, "code")?;
                        let blob = required(&attrs, "blob")? == "true";
                        types.push((code as u32, TypeEntry::new(required(&attrs, "name")?, blob)));
                    }
                    b"column" => {
                        let data_type = required(&attrs, "type")?.parse()?;
                        let domain: ColumnDomain = match attrs.get("domain") {
                            Some(json) => serde_json::from_str(json)?,
                            None => ColumnDomain::default(),
                        };
                        columns.push(ColumnSchema::new(required(&attrs, "name")?, data_type).with_domain(domain));
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let entry = |key: &str| {
        entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::corruption(format!("meta.xml lacks entry \"{}\"", key)))
    };
    types.sort_by_key(|(code, _)| *code);
    let first = u32::from(crate::codec::type_table::FIRST_TYPE_CODE);
    if types.iter().enumerate().any(|(i, (code, _))| *code != first + i as u32) {
        return Err(Error::corruption("meta.xml type codes are not dense"));
    }

    Ok(ArchiveMeta {
        version: FormatVersion::parse(entry("version")?)?,
        row_count: parse_number(entry("row_count")?, "row_count")?,
        contains_blobs: entries.get("contains_blobs").is_some_and(|v| v == "true"),
        buffer_id: parse_number(entry("buffer_id")?, "buffer_id")?,
        blob_bucket_size: match entries.get("blob_bucket_size") {
            Some(v) => parse_number(v, "blob_bucket_size")?,
            None => 1000,
        },
        types: types.into_iter().map(|(_, entry)| entry).collect(),
        schema: TableSchema::new(columns)?,
    })
}

fn required<'a>(attrs: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::corruption(format!("meta.xml element lacks attribute \"{}\"", name)))
}

fn parse_number(value: &str, what: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::corruption(format!("meta.xml: invalid {} \"{}\"", what, value)))
}
