//! # embedscan
//!
//! Finds the files embedded in container formats and gets them out safely.
//!
//! Given any byte source, the scanner identifies ZIP-family archives (ZIP,
//! JAR, OOXML, ...) and OLE compound files (legacy Office documents, MSI),
//! parses their directory structures, and lists or extracts every entry
//! with its name, size and signature-detected content type.
//!
//! All input is treated as hostile. Sizes and links read from headers are
//! bounded before they drive allocation or loops, entry names are
//! sanitized before they become paths, and Deflate output is capped while
//! it streams.
//!
//! ## Features
//!
//! - ZIP with ZIP64, CP437 and UTF-8 names, STORED and DEFLATE entries
//! - OLE/CFB versions 3 and 4, DIFAT, mini stream
//! - CRC-32 verification and size checks on every payload
//! - Per-entry, cumulative and wall-clock limits
//! - Optional scanning of containers nested inside extracted payloads
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use embedscan::{ExtractionLimits, LocalFileReader, ScanMode, scan};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new(Path::new("report.doc"))?);
//!
//!     let result = scan::run(reader, ScanMode::List, ExtractionLimits::default()).await;
//!     for file in &result.files {
//!         println!("{} ({} bytes)", file.entry_name, file.size);
//!     }
//!     println!("{}", result.summary());
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod container;
pub mod error;
pub mod extract;
pub mod io;
pub mod limits;
pub mod ole;
pub mod scan;
pub mod signature;
pub mod zip;

pub use cli::Cli;
pub use container::{
    CompressionMethod, ContainerEntry, ContainerFormat, ContainerHandle, EntryName,
};
pub use error::{EntryError, ExtractionError, FormatError, PathViolation};
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use limits::ExtractionLimits;
pub use scan::{
    CancelToken, ExtractedFile, ScanMode, ScanOptions, ScanResult, ScanWarning, Scanner,
};
pub use signature::{FileType, identify};
