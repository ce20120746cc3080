//! Bounded streaming Deflate.
//!
//! Compressed input is pulled from the byte source a chunk at a time and
//! output is checked against a ceiling as it is produced, so a stream that
//! expands far past its declared size is cut off after at most one output
//! chunk beyond the ceiling has been decoded, never materialized.

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{ExtractionError, FormatError};
use crate::io::{ReadAt, read_region};

const INPUT_CHUNK: u64 = 64 * 1024;
const OUTPUT_CHUNK: usize = 64 * 1024;
/// Largest up-front reservation, whatever the entry claims.
const MAX_RESERVE: u64 = 1024 * 1024;

/// Inflate the raw Deflate stream stored in `[offset, offset + compressed_len)`.
///
/// `declared` is the size the container claims; `ceiling` is the most output
/// accepted before failing with [`ExtractionError::SizeLimitExceeded`].
pub async fn inflate_bounded<R: ReadAt + ?Sized>(
    reader: &R,
    offset: u64,
    compressed_len: u64,
    declared: u64,
    ceiling: u64,
) -> Result<Vec<u8>, ExtractionError> {
    let end = offset
        .checked_add(compressed_len)
        .filter(|&end| end <= reader.size())
        .ok_or(FormatError::Truncated {
            offset,
            len: compressed_len,
        })?;

    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity(declared.min(ceiling).min(MAX_RESERVE) as usize);
    let mut buf = vec![0u8; OUTPUT_CHUNK];
    let mut input = Vec::new();
    let mut in_pos = 0usize;
    let mut read_pos = offset;

    loop {
        if in_pos == input.len() && read_pos < end {
            let len = INPUT_CHUNK.min(end - read_pos);
            input = read_region(reader, read_pos, len).await?;
            in_pos = 0;
            read_pos += len;
        }

        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let status = inflater
            .decompress(&input[in_pos..], &mut buf, FlushDecompress::None)
            .map_err(|e| ExtractionError::Decompression(e.to_string()))?;
        let consumed = (inflater.total_in() - before_in) as usize;
        let produced = (inflater.total_out() - before_out) as usize;
        in_pos += consumed;

        if produced != 0 {
            if out.len() as u64 + produced as u64 > ceiling {
                return Err(ExtractionError::SizeLimitExceeded {
                    declared,
                    limit: ceiling,
                });
            }
            out.extend_from_slice(&buf[..produced]);
        }

        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                if consumed == 0 && produced == 0 {
                    if in_pos < input.len() {
                        return Err(ExtractionError::Decompression("inflater stalled".into()));
                    }
                    if read_pos >= end {
                        return Err(ExtractionError::Decompression(
                            "stream ends before its final block".into(),
                        ));
                    }
                }
            }
        }
    }
}
