//! # tablebuf - Spillable Table Buffers
//!
//! tablebuf stores keyed, typed rows in buffers that live in memory while
//! small and move to a compressed file on disk once they grow. Finished
//! buffers are read-only tables that can be rearranged, concatenated and
//! joined without copying rows, and written to portable zip archives.
//!
//! ## Architecture
//!
//! - **Cells and rows**: [`DataCell`] values keyed by [`RowKey`], typed by a
//!   [`TableSchema`]
//! - **Codec**: a byte-stuffed block framing and a per-buffer type shortcut
//!   table that turn rows into a self-delimiting stream
//! - **Buffer**: memory rows up to a threshold, then a gzip spill file;
//!   large binary cells live in a per-buffer blob directory
//! - **Container**: validates rows, gathers column domains, checks key
//!   uniqueness and writes on a background thread
//! - **Tables**: the closed buffer plus views composed over other tables
//! - **Archive**: zip export and lazy import with format versioning
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tablebuf::{ContainerOptions, DataCell, DataRow, DataType, ExecutionContext, TableSchema};
//!
//! # fn main() -> Result<(), tablebuf::Error> {
//! let ctx = ExecutionContext::new(ContainerOptions::default())?;
//! let schema = TableSchema::from_pairs(&[("name", DataType::String), ("age", DataType::Int)])?;
//!
//! let mut container = ctx.create_container(schema)?;
//! container.add_row(DataRow::new("r1", vec![DataCell::string("ada"), DataCell::Int(36)]))?;
//! container.add_row(DataRow::new("r2", vec![DataCell::string("alan"), DataCell::Int(41)]))?;
//! let table = container.close()?;
//!
//! for row in table.iter()? {
//!     let row = row?;
//!     println!("{}: {:?}", row.key(), row.cells());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod archive;
pub mod blob;
pub mod buffer;
pub mod cell;
pub mod codec;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod format;
pub mod iter;
pub mod pipeline;
pub mod repository;
pub mod row;
pub mod schema;
pub mod table;

// Re-exports
pub use blob::BlobStore;
pub use buffer::{shutdown_cleanup, Buffer, BufferWriter};
pub use cell::{
    BlobAddress, BlobCell, CellSerializer, CellTypeRegistry, CollectionCell, DataCell, GenericValue,
    ObjectCell,
};
pub use config::ContainerOptions;
pub use container::DataContainer;
pub use context::{CancellationToken, ExecutionContext, ProgressCallback};
pub use error::{Error, Result};
pub use format::FormatVersion;
pub use iter::RowIterator;
pub use repository::TableRepository;
pub use row::{DataRow, RowKey};
pub use schema::{ColumnDomain, ColumnSchema, DataType, DomainValue, TableSchema};
pub use table::{CellFactory, ColumnRearranger, Table};
