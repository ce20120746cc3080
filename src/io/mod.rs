mod local;
mod memory;

pub use local::LocalFileReader;
pub use memory::MemoryReader;

use async_trait::async_trait;
use std::io;

use crate::error::FormatError;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Fill `buf` completely from `offset`, looping over short reads.
///
/// Fails with [`io::ErrorKind::UnexpectedEof`] when the source ends first.
pub async fn read_exact_at<R: ReadAt + ?Sized>(
    reader: &R,
    offset: u64,
    buf: &mut [u8],
) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let at = offset.saturating_add(filled as u64);
        let n = reader.read_at(at, &mut buf[filled..]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended at offset {at}"),
            ));
        }
        filled += n;
    }
    Ok(())
}

/// Read `len` bytes at `offset` after checking the region lies inside the
/// source, so a size claimed by a header never drives an allocation past
/// what the source actually holds.
pub async fn read_region<R: ReadAt + ?Sized>(
    reader: &R,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>, FormatError> {
    let truncated = FormatError::Truncated { offset, len };
    match offset.checked_add(len) {
        Some(end) if end <= reader.size() => {}
        _ => return Err(truncated),
    }
    let mut buf = vec![0u8; usize::try_from(len).map_err(|_| truncated)?];
    read_exact_at(reader, offset, &mut buf).await?;
    Ok(buf)
}
