//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header to find its data
//!
//! The Central Directory is authoritative: sizes and checksums come from it,
//! and the Local File Header is only consulted for the length of its
//! variable fields.

use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::sync::Arc;

use crate::container::{
    CompressionMethod, ContainerEntry, ContainerParser, EntryName, Layout, Location,
    ParsedContainer, PayloadLocation,
};
use crate::error::{EntryError, FormatError};
use crate::io::{ReadAt, read_region};

use super::cp437;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// Generic over the reader so the same code serves files on disk and
/// buffers already in memory.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let (entries, errors) = parser.list_entries().await?;
/// for entry in entries {
///     println!("{} ({} bytes)", entry.name, entry.uncompressed_size);
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file, possibly followed by
    /// a comment of up to 64 KiB, so only that window is searched.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// [`FormatError::NoCentralDirectory`] when no record sits in the window.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64), FormatError> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(FormatError::NoCentralDirectory);
        }

        // First try the simple case where there's no comment.
        let offset = self.size - eocd_size;
        let buf = read_region(self.reader.as_ref(), offset, eocd_size).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // Search backwards for the signature (PK\x05\x06). The comment must
        // fit between the record and the end; bytes after it are tolerated.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let buf = read_region(self.reader.as_ref(), search_start, search_size).await?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
            if i + EndOfCentralDirectory::SIZE + eocd.comment_len as usize <= buf.len() {
                return Ok((eocd, search_start + i as u64));
            }
        }

        Err(FormatError::NoCentralDirectory)
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF). The locator sits immediately
    /// before the regular EOCD and points at the ZIP64 record.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD, FormatError> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| FormatError::InvalidZip("missing ZIP64 locator".into()))?;
        let locator_buf = read_region(
            self.reader.as_ref(),
            locator_offset,
            Zip64EOCDLocator::SIZE as u64,
        )
        .await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
        if locator.disk_with_eocd64 != 0 || locator.total_disks > 1 {
            return Err(FormatError::InvalidZip(format!(
                "archive spans {} disks",
                locator.total_disks
            )));
        }

        if locator.eocd64_offset >= locator_offset {
            return Err(FormatError::InvalidZip(
                "ZIP64 record does not precede its locator".into(),
            ));
        }
        let eocd64_buf = read_region(
            self.reader.as_ref(),
            locator.eocd64_offset,
            Zip64EOCD::MIN_SIZE as u64,
        )
        .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List all entries in the archive, in central directory order.
    ///
    /// Entries whose names cannot be decoded are left out and reported in
    /// the second vector; everything else about the directory must be sound.
    pub async fn list_entries(
        &self,
    ) -> Result<(Vec<ContainerEntry>, Vec<EntryError>), FormatError> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        // Get Central Directory info, using ZIP64 if needed
        let (cd_offset, cd_size, total_entries, disks) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                (eocd64.disk_number, eocd64.disk_with_cd),
            )
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                (eocd.disk_number as u32, eocd.disk_with_cd as u32),
            )
        };
        // Offsets of a spanned archive are relative to other files.
        if disks != (0, 0) {
            return Err(FormatError::InvalidZip(format!(
                "spanned archive: this is disk {}, central directory on disk {}",
                disks.0, disks.1
            )));
        }
        tracing::debug!(eocd_offset, cd_offset, cd_size, total_entries, "found central directory");

        match cd_offset.checked_add(cd_size) {
            Some(cd_end) if cd_end <= eocd_offset => {}
            _ => {
                return Err(FormatError::InvalidZip(
                    "central directory overlaps its end record".into(),
                ));
            }
        }
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            return Err(FormatError::InvalidZip(format!(
                "{total_entries} entries cannot fit in a {cd_size}-byte central directory"
            )));
        }

        // Bounded by the check above: the directory lies inside the file.
        let cd_data = read_region(self.reader.as_ref(), cd_offset, cd_size).await?;
        let mut cursor = Cursor::new(cd_data.as_slice());

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut errors = Vec::new();
        for index in 0..total_entries as usize {
            let header = match CentralDirectoryHeader::read(&mut cursor) {
                Ok(Some(header)) => header,
                Ok(None) => {
                    return Err(FormatError::InvalidZip(format!(
                        "central directory record {index} has a bad signature"
                    )));
                }
                Err(_) => {
                    return Err(FormatError::InvalidZip(format!(
                        "central directory record {index} is truncated"
                    )));
                }
            };

            match Self::to_entry(index, header) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(%err, "skipping entry");
                    errors.push(err);
                }
            }
        }

        Ok((entries, errors))
    }

    /// Turn a raw header into an entry, resolving the name and ZIP64 sizes.
    fn to_entry(index: usize, header: CentralDirectoryHeader) -> Result<ContainerEntry, EntryError> {
        let name = if header.flags & FLAG_UTF8 != 0 {
            String::from_utf8(header.file_name).map_err(|e| EntryError::NameEncoding {
                index,
                lossy: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            })?
        } else {
            cp437::decode(&header.file_name)
        };

        let mut uncompressed_size = header.uncompressed_size as u64;
        let mut compressed_size = header.compressed_size as u64;
        let mut lfh_offset = header.lfh_offset as u64;
        apply_zip64_extra(
            &header.extra_field,
            &mut uncompressed_size,
            &mut compressed_size,
            &mut lfh_offset,
        );

        // Directory entries end with a separator and carry no data
        let is_directory = (name.ends_with('/') || name.ends_with('\\')) && uncompressed_size == 0;

        Ok(ContainerEntry {
            name: EntryName::from_path(&name),
            is_directory,
            uncompressed_size,
            compressed_size,
            compression_method: CompressionMethod::from_u16(header.compression_method),
            encrypted: header.flags & FLAG_ENCRYPTED != 0,
            checksum: Some(header.crc32),
            location: PayloadLocation(Location::Zip {
                local_header_offset: lfh_offset,
            }),
        })
    }
}

/// Replace saturated 32-bit fields with their ZIP64 extra field values.
///
/// Fields are present only if the corresponding header field is 0xFFFFFFFF,
/// in the order uncompressed size, compressed size, header offset.
fn apply_zip64_extra(
    extra: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    lfh_offset: &mut u64,
) {
    let mut cursor = Cursor::new(extra);
    let end = extra.len() as u64;

    while cursor.position() + 4 <= end {
        let (Ok(header_id), Ok(field_size)) = (
            cursor.read_u16::<LittleEndian>(),
            cursor.read_u16::<LittleEndian>(),
        ) else {
            return;
        };
        let field_end = (cursor.position() + field_size as u64).min(end);

        if header_id == ZIP64_EXTRA_ID {
            for field in [
                &mut *uncompressed_size,
                &mut *compressed_size,
                &mut *lfh_offset,
            ] {
                if *field != ZIP64_SENTINEL as u64 || cursor.position() + 8 > field_end {
                    continue;
                }
                if let Ok(value) = cursor.read_u64::<LittleEndian>() {
                    *field = value;
                }
            }
            return;
        }

        // Skip unknown extra fields
        cursor.set_position(field_end);
    }
}

#[async_trait]
impl<R: ReadAt + 'static> ContainerParser for ZipParser<R> {
    async fn parse(&self) -> Result<ParsedContainer, FormatError> {
        let (entries, errors) = self.list_entries().await?;
        Ok(ParsedContainer {
            entries,
            errors,
            layout: Layout::Zip,
        })
    }
}

/// Offset where an entry's data begins.
///
/// The Local File Header has variable-length fields (filename, extra field)
/// that may differ from the Central Directory entry, so it has to be read
/// to find the start of the data. Its size fields are ignored.
pub async fn data_offset<R: ReadAt + ?Sized>(
    reader: &R,
    local_header_offset: u64,
) -> Result<u64, FormatError> {
    let lfh_buf = read_region(reader, local_header_offset, LFH_SIZE as u64).await?;

    // Verify LFH signature (PK\x03\x04)
    if &lfh_buf[0..4] != LFH_SIGNATURE {
        return Err(FormatError::InvalidZip(format!(
            "no local file header at offset {local_header_offset}"
        )));
    }

    // Read the variable field lengths from fixed positions in LFH
    let file_name_length = u16::from_le_bytes([lfh_buf[26], lfh_buf[27]]) as u64;
    let extra_field_length = u16::from_le_bytes([lfh_buf[28], lfh_buf[29]]) as u64;

    // Data starts after: LFH (30 bytes) + filename + extra field
    Ok(local_header_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
}
