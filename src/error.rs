//! Error types for the tablebuf engine.

use std::io;

use thiserror::Error;

/// The result type used throughout tablebuf.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for tablebuf operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A spill file, archive or blob file is corrupt or truncated.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A file, table or entry was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The object is in a lifecycle state that does not permit the call.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A row does not have as many cells as the schema has columns.
    #[error("Row \"{row_key}\" has {actual} cells, but the table has {expected} columns")]
    CellCountMismatch {
        /// Key of the offending row.
        row_key: String,
        /// Column count of the schema.
        expected: usize,
        /// Cell count of the row.
        actual: usize,
    },

    /// A cell's runtime type is not compatible with its column.
    #[error(
        "Row \"{row_key}\", column \"{column}\": cell of type {actual} is not compatible with declared type {expected}"
    )]
    SchemaViolation {
        /// Key of the offending row.
        row_key: String,
        /// Name of the offending column.
        column: String,
        /// Declared column type.
        expected: String,
        /// Runtime type of the cell.
        actual: String,
    },

    /// The same row key was added twice.
    #[error("{}", describe_duplicate(key, *table_index))]
    DuplicateKey {
        /// The duplicated key.
        key: String,
        /// Index of the input table that contributed the duplicate, if known.
        table_index: Option<usize>,
    },

    /// Two tables that must be row-aligned disagree on a key.
    #[error("Row keys differ at position {position}: \"{left}\" vs. \"{right}\"")]
    KeyMismatch {
        /// Zero-based row position of the first mismatch.
        position: u64,
        /// Key in the left table.
        left: String,
        /// Key in the right table.
        right: String,
    },

    /// More distinct cell types than fit into the type-shortcut code space.
    #[error("Too many distinct cell types in one table (limit is {limit})")]
    TooManyCellTypes {
        /// Maximum number of distinct types.
        limit: usize,
    },

    /// A blob references a buffer that is not registered anywhere.
    #[error("Blob owner not found: no table registered for buffer {buffer_id}")]
    BlobOwnerNotFound {
        /// Id of the missing owner buffer.
        buffer_id: u64,
    },

    /// A long-running operation was canceled by the caller.
    #[error("Operation canceled")]
    Canceled,

    /// A background writer or reader thread died.
    #[error("Background worker failed: {0}")]
    WorkerFailed(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_duplicate(key: &str, table_index: Option<usize>) -> String {
    match table_index {
        Some(index) => format!("Duplicate row key \"{}\" in input table {}", key, index),
        None => format!("Duplicate row key \"{}\"", key),
    }
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true if this error is a cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Prefixes corruption and I/O errors with the file they were read from.
    pub(crate) fn in_file(self, file: &std::path::Path, row: u64) -> Self {
        match self {
            Error::Corruption(msg) => {
                Error::Corruption(format!("{} (file {:?}, row {})", msg, file, row))
            }
            Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => Error::Corruption(
                format!("unexpected end of file {:?} while reading row {}", file, row),
            ),
            other => other,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Error::Io(e),
            zip::result::ZipError::FileNotFound => Error::not_found("archive entry"),
            other => Error::Corruption(format!("invalid archive: {}", other)),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Corruption(format!("invalid meta.xml: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("unknown type code 99");
        assert_eq!(err.to_string(), "Data corruption: unknown type code 99");

        let err = Error::DuplicateKey { key: "r1".into(), table_index: None };
        assert_eq!(err.to_string(), "Duplicate row key \"r1\"");

        let err = Error::DuplicateKey { key: "r1".into(), table_index: Some(1) };
        assert!(err.to_string().contains("input table 1"));
    }

    #[test]
    fn test_key_mismatch_display() {
        let err = Error::KeyMismatch { position: 4, left: "a".into(), right: "b".into() };
        let msg = err.to_string();
        assert!(msg.contains("position 4"));
        assert!(msg.contains("\"a\""));
        assert!(msg.contains("\"b\""));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_in_file_wraps_eof() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err = Error::from(io_err).in_file(std::path::Path::new("data.bin"), 7);
        assert!(matches!(err, Error::Corruption(_)));
        assert!(err.to_string().contains("row 7"));
    }
}
