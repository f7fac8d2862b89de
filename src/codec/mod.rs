//! Binary encoding of rows and cells.
//!
//! The row stream is a sequence of framed blocks (see [`framing`]) tied
//! together by single-byte codes from a per-buffer [`TypeShortcutTable`].

mod cell_codec;
pub mod framing;
pub mod type_table;

pub(crate) use cell_codec::{BlobContext, CellDecoder, CellEncoder};
pub use type_table::{TypeEntry, TypeShortcutTable};
