//! Persisted format versions.
//!
//! Every version string ever written maps to an internal version number.
//! Entries are never removed; readers accept all of them and gate
//! behavior on the number.

use crate::error::{Error, Result};

/// Version number of the stream written by this crate.
pub const CURRENT_VERSION: u32 = 5;

/// First version whose data stream is gzip-wrapped.
pub const GZIP_VERSION: u32 = 3;

/// First version that may contain blob cells.
pub const BLOB_VERSION: u32 = 4;

/// First version whose blob addresses carry a compression flag.
pub const BLOB_COMPRESSION_FLAG_VERSION: u32 = 5;

const KEYED_VERSIONS: &[(&str, u32)] = &[
    ("container_1.0.0", 1),
    ("container_1.1.0", 2),
    ("container_1.2.0", 3),
    ("container_1.3.0", 4),
    ("container_1.4.0", 5),
];

const KEYLESS_VERSIONS: &[(&str, u32)] = &[("container_nokey_1.0.0", 5)];

/// A parsed version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion {
    /// Internal version number.
    pub number: u32,
    /// Whether rows carry their keys.
    pub with_keys: bool,
}

impl FormatVersion {
    /// The current version for keyed or key-less tables.
    pub fn current(with_keys: bool) -> Self {
        Self { number: CURRENT_VERSION, with_keys }
    }

    /// A historical keyed version.
    pub fn keyed(number: u32) -> Result<Self> {
        let version = Self { number, with_keys: true };
        version.version_string()?;
        Ok(version)
    }

    /// Parses a version string from meta.xml.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some((_, number)) = KEYED_VERSIONS.iter().find(|(name, _)| *name == s) {
            return Ok(Self { number: *number, with_keys: true });
        }
        if let Some((_, number)) = KEYLESS_VERSIONS.iter().find(|(name, _)| *name == s) {
            return Ok(Self { number: *number, with_keys: false });
        }
        Err(Error::corruption(format!("unknown container version \"{}\"", s)))
    }

    /// The version string written to meta.xml. The newest string of a
    /// number wins.
    pub fn version_string(&self) -> Result<&'static str> {
        let table = if self.with_keys { KEYED_VERSIONS } else { KEYLESS_VERSIONS };
        table
            .iter()
            .rev()
            .find(|(_, number)| *number == self.number)
            .map(|(name, _)| *name)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "no {} version string for version {}",
                    if self.with_keys { "keyed" } else { "key-less" },
                    self.number
                ))
            })
    }

    /// Whether the data stream is gzip-wrapped.
    pub fn is_gzipped(&self) -> bool {
        self.number >= GZIP_VERSION
    }

    /// Whether blob cells are supported.
    pub fn supports_blobs(&self) -> bool {
        self.number >= BLOB_VERSION
    }

    /// Whether blob addresses carry a compression byte.
    pub fn has_blob_compression_flag(&self) -> bool {
        self.number >= BLOB_COMPRESSION_FLAG_VERSION
    }
}
