//! ZIP archive parsing (ZIP, JAR, and everything else built on the format).
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - `parser`: Parsing of those structures into [`ContainerEntry`](crate::container::ContainerEntry) values
//! - `cp437`: the legacy charset of entry names without the UTF-8 flag
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! This implementation reads the EOCD first (from the end of the file),
//! then the Central Directory, so listing never touches entry data.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED (no compression) method
//! - DEFLATE compression method
//!
//! ## Limitations
//!
//! - No encryption support (encrypted entries are reported, not extracted)
//! - Multi-disk (spanned) archives are rejected
//! - No BZIP2, LZMA, or other compression methods

mod cp437;
mod parser;
pub mod structures;

pub use parser::{ZipParser, data_offset};
