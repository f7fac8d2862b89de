//! Persisted table structure.
//!
//! A saved table is a directory holding `table.json`, which describes the
//! view tree, and one zip archive per container table in it. Views are
//! rebuilt on load and get fresh ids.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::rearrange::{RearrangedTable, Slot};
use super::{ConcatenatedTable, JoinedTable, SchemaReplacedTable, Table};
use crate::buffer::Buffer;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::repository::TableRepository;
use crate::schema::TableSchema;

pub(crate) const DESCRIPTOR_FILE: &str = "table.json";
const DESCRIPTOR_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SavedTable {
    format: u32,
    table: TableDescriptor,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TableDescriptor {
    Container {
        id: u64,
        file: String,
    },
    /// A table that was not written and must be registered when loading.
    Reference {
        id: u64,
    },
    Rearranged {
        schema: TableSchema,
        reference: Box<TableDescriptor>,
        slots: Vec<Slot>,
        appended: Option<Box<TableDescriptor>>,
    },
    Concatenated {
        tables: Vec<TableDescriptor>,
    },
    Joined {
        left: Box<TableDescriptor>,
        right: Box<TableDescriptor>,
    },
    SchemaReplaced {
        schema: TableSchema,
        reference: Box<TableDescriptor>,
    },
}

fn container_file(id: u64) -> String {
    format!("table_{}.zip", id)
}

struct Saver<'a> {
    dir: &'a Path,
    delta: bool,
    written: HashSet<u64>,
}

impl Saver<'_> {
    fn describe(&mut self, table: &Table, depth: usize) -> Result<TableDescriptor> {
        if self.delta && depth > 0 {
            return Ok(TableDescriptor::Reference { id: table.id() });
        }
        self.describe_full(table, depth)
    }

    fn describe_full(&mut self, table: &Table, depth: usize) -> Result<TableDescriptor> {
        Ok(match table {
            Table::Container(t) => self.write_container(t.buffer())?,
            Table::Rearranged(t) => {
                let appended = match t.appended() {
                    // computed columns belong to the view and are always written
                    Some(appended) => Some(Box::new(self.describe_full(appended, depth + 1)?)),
                    None => None,
                };
                TableDescriptor::Rearranged {
                    schema: t.schema().clone(),
                    reference: Box::new(self.describe(t.reference(), depth + 1)?),
                    slots: t.slots().to_vec(),
                    appended,
                }
            }
            Table::Concatenated(t) => TableDescriptor::Concatenated {
                tables: t
                    .tables()
                    .iter()
                    .map(|table| self.describe(table, depth + 1))
                    .collect::<Result<_>>()?,
            },
            Table::Joined(t) => TableDescriptor::Joined {
                left: Box::new(self.describe(t.left(), depth + 1)?),
                right: Box::new(self.describe(t.right(), depth + 1)?),
            },
            Table::SchemaReplaced(t) => TableDescriptor::SchemaReplaced {
                schema: table.schema().clone(),
                reference: Box::new(self.describe(t.reference(), depth + 1)?),
            },
        })
    }

    fn write_container(&mut self, buffer: &Arc<Buffer>) -> Result<TableDescriptor> {
        let file = container_file(buffer.id());
        if self.written.insert(buffer.id()) {
            buffer.save(&self.dir.join(&file))?;
        }
        Ok(TableDescriptor::Container { id: buffer.id(), file })
    }
}

pub(crate) fn save(table: &Table, dir: &Path, delta: bool) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut saver = Saver { dir, delta, written: HashSet::new() };
    let saved = SavedTable { format: DESCRIPTOR_FORMAT, table: saver.describe(table, 0)? };

    let mut staging = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(staging.as_file_mut());
        serde_json::to_writer_pretty(&mut out, &saved)?;
        out.flush()?;
    }
    staging.persist(dir.join(DESCRIPTOR_FILE)).map_err(|e| Error::Io(e.error))?;
    log::info!(
        "Saved table {} to {:?} ({} container file(s){})",
        table.id(),
        dir,
        saver.written.len(),
        if delta { ", delta" } else { "" }
    );
    Ok(())
}

struct Loader<'a> {
    dir: &'a Path,
    ctx: &'a ExecutionContext,
    loaded: HashMap<u64, Table>,
}

impl Loader<'_> {
    fn build(&mut self, descriptor: TableDescriptor) -> Result<Table> {
        Ok(match descriptor {
            TableDescriptor::Container { id, file } => {
                if let Some(table) = self.loaded.get(&id) {
                    return Ok(table.clone());
                }
                if Path::new(&file).file_name() != Some(std::ffi::OsStr::new(&file)) {
                    return Err(Error::corruption(format!("invalid container file name {:?}", file)));
                }
                let buffer = Buffer::load_in(
                    &self.dir.join(&file),
                    Arc::clone(self.ctx.registry()),
                    &self.ctx.options().temp_dir,
                    Arc::downgrade(self.ctx.local_repository()),
                )?;
                let table = Table::from(buffer);
                self.ctx.local_repository().register(&table);
                self.loaded.insert(id, table.clone());
                table
            }
            TableDescriptor::Reference { id } => self
                .ctx
                .local_repository()
                .get(id)
                .or_else(|| TableRepository::global().get(id))
                .ok_or_else(|| Error::not_found(format!("referenced table {}", id)))?,
            TableDescriptor::Rearranged { schema, reference, slots, appended } => {
                let reference = self.build(*reference)?;
                let appended = match appended {
                    Some(appended) => Some(self.build(*appended)?),
                    None => None,
                };
                Table::Rearranged(Arc::new(RearrangedTable::from_parts(schema, reference, slots, appended)?))
            }
            TableDescriptor::Concatenated { tables } => {
                let tables = tables.into_iter().map(|t| self.build(t)).collect::<Result<Vec<_>>>()?;
                Table::Concatenated(Arc::new(ConcatenatedTable::new(tables)?))
            }
            TableDescriptor::Joined { left, right } => {
                let left = self.build(*left)?;
                let right = self.build(*right)?;
                Table::Joined(Arc::new(JoinedTable::new(left, right)?))
            }
            TableDescriptor::SchemaReplaced { schema, reference } => {
                let reference = self.build(*reference)?;
                Table::SchemaReplaced(Arc::new(SchemaReplacedTable::new(reference, schema)?))
            }
        })
    }
}

pub(crate) fn load(dir: &Path, ctx: &ExecutionContext) -> Result<Table> {
    let path = dir.join(DESCRIPTOR_FILE);
    let file = File::open(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::not_found(format!("{:?}", path)),
        _ => Error::Io(e),
    })?;
    let saved: SavedTable = serde_json::from_reader(BufReader::new(file))?;
    if saved.format != DESCRIPTOR_FORMAT {
        return Err(Error::corruption(format!("unsupported table descriptor format {}", saved.format)));
    }
    let mut loader = Loader { dir, ctx, loaded: HashMap::new() };
    let table = loader.build(saved.table)?;
    log::info!("Loaded table {} from {:?}", table.id(), dir);
    Ok(table)
}
