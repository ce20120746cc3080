//! Format-neutral model of a container and its entries.
//!
//! Every parser produces the same [`ParsedContainer`]: an ordered list of
//! [`ContainerEntry`] values plus the per-entry problems it met on the way
//! and whatever format-specific [`Layout`] the extractor needs to find
//! payload bytes later.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EntryError, FormatError};
use crate::io::{ReadAt, read_exact_at};
use crate::ole::{OleLayout, OleParser};
use crate::signature::{self, FileType, HEAD_WINDOW, TAIL_WINDOW};
use crate::zip::ZipParser;

/// Container formats this crate can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Zip,
    Ole,
    Unknown,
}

impl ContainerFormat {
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type == signature::ZIP {
            ContainerFormat::Zip
        } else if file_type == signature::OLE {
            ContainerFormat::Ole
        } else {
            ContainerFormat::Unknown
        }
    }

    /// Structural parser for this format, if there is one.
    pub fn parser<R: ReadAt + 'static>(self, reader: Arc<R>) -> Option<Box<dyn ContainerParser>> {
        match self {
            ContainerFormat::Zip => Some(Box::new(ZipParser::new(reader))),
            ContainerFormat::Ole => Some(Box::new(OleParser::new(reader))),
            ContainerFormat::Unknown => None,
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerFormat::Zip => "zip",
            ContainerFormat::Ole => "ole",
            ContainerFormat::Unknown => "unknown",
        })
    }
}

/// Immutable byte source of one container plus its detected format.
pub struct ContainerHandle<R: ReadAt> {
    reader: Arc<R>,
    format: ContainerFormat,
}

impl<R: ReadAt + 'static> ContainerHandle<R> {
    /// Classify the source from its leading and trailing bytes.
    pub async fn open(reader: Arc<R>) -> Result<Self, FormatError> {
        let size = reader.size();

        let head_len = size.min(HEAD_WINDOW as u64) as usize;
        let mut head = vec![0u8; head_len];
        read_exact_at(reader.as_ref(), 0, &mut head).await?;

        let tail_len = size.min(TAIL_WINDOW as u64) as usize;
        let mut tail = vec![0u8; tail_len];
        read_exact_at(reader.as_ref(), size - tail_len as u64, &mut tail).await?;

        let file_type = signature::identify_split(&head, &tail);
        let format = ContainerFormat::from_file_type(file_type);
        tracing::debug!(%file_type, %format, size, "classified container");

        Ok(Self { reader, format })
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Run the structural parser matching the detected format.
    pub async fn parse(&self) -> Result<ParsedContainer, FormatError> {
        let parser = self
            .format
            .parser(self.reader.clone())
            .ok_or(FormatError::UnknownFormat)?;
        parser.parse().await
    }
}

/// Common contract of the structural parsers.
#[async_trait]
pub trait ContainerParser: Send + Sync {
    async fn parse(&self) -> Result<ParsedContainer, FormatError>;
}

/// Output of a structural parse.
#[derive(Debug)]
pub struct ParsedContainer {
    pub entries: Vec<ContainerEntry>,
    /// Entries the parser had to drop, in the order it met them.
    pub errors: Vec<EntryError>,
    pub layout: Layout,
}

/// Format-specific state the extractor needs to locate payloads.
#[derive(Debug)]
pub enum Layout {
    Zip,
    Ole(OleLayout),
}

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Other(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Other(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Other(v) => *v,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, CompressionMethod::Other(_))
    }
}

/// Entry name as a sequence of path segments.
///
/// Segments are kept exactly as the container stores them, including empty
/// ones (a leading empty segment means the raw name was absolute, a trailing
/// one that it ended with a separator). Turning this into a path that is safe
/// to write is [`crate::extract::sanitize_entry_name`]'s job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryName {
    segments: Vec<String>,
}

impl EntryName {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Split a raw archive path on both `/` and `\`.
    pub fn from_path(raw: &str) -> Self {
        Self {
            segments: raw.split(['/', '\\']).map(str::to_owned).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Child name one level below this one.
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Where an entry's payload lives. Only the extractor looks inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLocation(pub(crate) Location);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    Zip { local_header_offset: u64 },
    Ole { start_sector: u32, mini: bool },
    /// Directories and other entries without a payload.
    None,
}

/// One logical item inside a container.
///
/// Both sizes are claims read from the container and stay untrusted until
/// the payload has actually been materialized.
#[derive(Debug, Clone)]
pub struct ContainerEntry {
    pub name: EntryName,
    pub is_directory: bool,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub compression_method: CompressionMethod,
    pub encrypted: bool,
    /// CRC-32 of the uncompressed payload, where the format records one.
    pub checksum: Option<u32>,
    pub location: PayloadLocation,
}

impl ContainerEntry {
    /// Name as shown in listings; directories end with `/`.
    pub fn display_name(&self) -> String {
        let mut name = self.name.to_string();
        if self.is_directory && !name.ends_with('/') {
            name.push('/');
        }
        name
    }
}
