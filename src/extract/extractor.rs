use crate::container::{CompressionMethod, ContainerEntry, Layout, Location};
use crate::error::{ExtractionError, FormatError};
use crate::io::{ReadAt, read_region};
use crate::limits::ExtractionLimits;
use crate::zip;

use super::inflate::inflate_bounded;
use super::sanitize::sanitize_entry_name;

/// Bytes of one entry, materialized.
#[derive(Debug)]
pub struct ExtractedPayload {
    /// Sanitized relative output path.
    pub path: String,
    pub data: Vec<u8>,
    /// Integrity problem found after the bytes were produced. The bytes are
    /// kept; whether to use them is the caller's call.
    pub defect: Option<ExtractionError>,
}

impl ExtractedPayload {
    pub fn is_corrupt(&self) -> bool {
        self.defect.is_some()
    }
}

/// Reproduces entry payloads from a parsed container under fixed limits.
pub struct EntryExtractor<'a, R: ReadAt + ?Sized> {
    reader: &'a R,
    layout: &'a Layout,
    limits: ExtractionLimits,
}

impl<'a, R: ReadAt + ?Sized> EntryExtractor<'a, R> {
    pub fn new(reader: &'a R, layout: &'a Layout, limits: ExtractionLimits) -> Self {
        Self {
            reader,
            layout,
            limits,
        }
    }

    /// Materialize one entry.
    ///
    /// The name is sanitized and the declared size checked before any
    /// payload byte is read.
    pub async fn extract(&self, entry: &ContainerEntry) -> Result<ExtractedPayload, ExtractionError> {
        let path = sanitize_entry_name(&entry.name).map_err(ExtractionError::UnsafePath)?;
        if entry.is_directory {
            return Ok(ExtractedPayload {
                path,
                data: Vec::new(),
                defect: None,
            });
        }
        if entry.encrypted {
            return Err(ExtractionError::Encrypted);
        }

        let declared = entry.uncompressed_size;
        if declared > self.limits.max_entry_size {
            return Err(ExtractionError::EntryTooLarge {
                declared,
                limit: self.limits.max_entry_size,
            });
        }

        let data = match (entry.location.0, self.layout) {
            (Location::Zip { local_header_offset }, Layout::Zip) => {
                self.zip_payload(entry, local_header_offset).await?
            }
            (Location::Ole { start_sector, mini }, Layout::Ole(layout)) => {
                layout
                    .read_stream(self.reader, start_sector, mini, declared)
                    .await?
            }
            (Location::None, _) => Vec::new(),
            _ => {
                return Err(FormatError::InvalidOle(
                    "entry location does not belong to this container".into(),
                )
                .into());
            }
        };

        let defect = verify(entry, &data);
        if let Some(defect) = &defect {
            tracing::warn!(%path, %defect, "payload failed verification");
        }
        Ok(ExtractedPayload { path, data, defect })
    }

    async fn zip_payload(
        &self,
        entry: &ContainerEntry,
        local_header_offset: u64,
    ) -> Result<Vec<u8>, ExtractionError> {
        let declared = entry.uncompressed_size;
        let ceiling = self.limits.stream_ceiling(declared);
        let method = entry.compression_method;
        if !method.is_supported() {
            return Err(ExtractionError::UnsupportedCompression(method.as_u16()));
        }

        let start = zip::data_offset(self.reader, local_header_offset).await?;
        match method {
            CompressionMethod::Stored => {
                if entry.compressed_size > ceiling {
                    return Err(ExtractionError::SizeLimitExceeded {
                        declared,
                        limit: ceiling,
                    });
                }
                Ok(read_region(self.reader, start, entry.compressed_size).await?)
            }
            _ => inflate_bounded(self.reader, start, entry.compressed_size, declared, ceiling).await,
        }
    }
}

/// Compare materialized bytes with what the container claims.
fn verify(entry: &ContainerEntry, data: &[u8]) -> Option<ExtractionError> {
    let actual = data.len() as u64;
    if actual != entry.uncompressed_size {
        return Some(ExtractionError::SizeMismatch {
            declared: entry.uncompressed_size,
            actual,
        });
    }
    let expected = entry.checksum?;
    let computed = crc32fast::hash(data);
    (computed != expected).then_some(ExtractionError::ChecksumMismatch {
        expected,
        actual: computed,
    })
}
