//! Error taxonomy for container scanning.
//!
//! Three layers, from most to least severe:
//!
//! - [`FormatError`]: the container as a whole cannot be parsed. Fatal to a run.
//! - [`EntryError`]: one entry is unusable. Recorded, the run continues.
//! - [`ExtractionError`]: one entry's payload could not be materialized safely.
//!   Always reported wrapped in [`EntryError::Extraction`].

use std::io;

use thiserror::Error;

/// Structural failure of a whole container.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unrecognized container format")]
    UnknownFormat,

    #[error("end of central directory record not found")]
    NoCentralDirectory,

    #[error("invalid ZIP structure: {0}")]
    InvalidZip(String),

    #[error("not an OLE compound file")]
    BadMagic,

    #[error("unsupported sector size exponent {0}")]
    SectorSize(u16),

    #[error("cyclic {chain} at {at}")]
    CyclicChain { chain: &'static str, at: u32 },

    #[error("invalid compound file: {0}")]
    InvalidOle(String),

    #[error("container truncated: {len} bytes at offset {offset} lie past the end")]
    Truncated { offset: u64, len: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Why an entry name was refused as an output path.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathViolation {
    #[error("name is empty")]
    Empty,
    #[error("absolute path")]
    Absolute,
    #[error("parent directory segment")]
    ParentSegment,
    #[error("drive prefix")]
    DrivePrefix,
    #[error("device or stream name")]
    DeviceName,
    #[error("embedded NUL byte")]
    NulByte,
}

/// Failure to materialize a single entry's payload.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("unsafe entry path ({0})")]
    UnsafePath(PathViolation),

    #[error("declared size {declared} exceeds the per-entry limit of {limit} bytes")]
    EntryTooLarge { declared: u64, limit: u64 },

    #[error("payload grew past {limit} bytes although {declared} were declared")]
    SizeLimitExceeded { declared: u64, limit: u64 },

    #[error("payload is {actual} bytes but {declared} were declared")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("CRC-32 mismatch: expected {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unsupported compression method {0}")]
    UnsupportedCompression(u16),

    #[error("entry is encrypted")]
    Encrypted,

    #[error("corrupt deflate stream: {0}")]
    Decompression(String),

    #[error(transparent)]
    Structure(#[from] FormatError),

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Failure confined to one entry of a container.
#[derive(Error, Debug)]
pub enum EntryError {
    #[error("entry #{index}: name is not valid Unicode ({lossy})")]
    NameEncoding { index: usize, lossy: String },

    #[error("{name}: unsupported compression method {method}")]
    UnsupportedCompression { name: String, method: u16 },

    #[error("{name}: entry is encrypted")]
    Encrypted { name: String },

    #[error("{name}: {source}")]
    Extraction {
        name: String,
        #[source]
        source: ExtractionError,
    },

    #[error("{name}: nested container: {source}")]
    NestedContainer {
        name: String,
        #[source]
        source: FormatError,
    },
}

impl EntryError {
    /// Name of the entry the error refers to, as shown in listings.
    pub fn entry_name(&self) -> &str {
        match self {
            EntryError::NameEncoding { lossy, .. } => lossy,
            EntryError::UnsupportedCompression { name, .. }
            | EntryError::Encrypted { name }
            | EntryError::Extraction { name, .. }
            | EntryError::NestedContainer { name, .. } => name,
        }
    }

    /// The same error with its entry name passed through `rename`.
    pub(crate) fn renamed(self, rename: impl Fn(&str) -> String) -> Self {
        match self {
            EntryError::NameEncoding { index, lossy } => EntryError::NameEncoding {
                index,
                lossy: rename(&lossy),
            },
            EntryError::UnsupportedCompression { name, method } => {
                EntryError::UnsupportedCompression {
                    name: rename(&name),
                    method,
                }
            }
            EntryError::Encrypted { name } => EntryError::Encrypted { name: rename(&name) },
            EntryError::Extraction { name, source } => EntryError::Extraction {
                name: rename(&name),
                source,
            },
            EntryError::NestedContainer { name, source } => EntryError::NestedContainer {
                name: rename(&name),
                source,
            },
        }
    }
}
