//! Sector chains and stream reads.

use std::collections::HashSet;

use crate::error::FormatError;
use crate::io::{ReadAt, read_region};

use super::structures::{ENDOFCHAIN, MAXREGSECT};

/// Allocation tables and geometry of a parsed compound file.
#[derive(Debug, Clone)]
pub struct OleLayout {
    pub(crate) sector_shift: u16,
    pub(crate) mini_sector_shift: u16,
    pub(crate) mini_stream_cutoff: u64,
    pub(crate) fat: Vec<u32>,
    pub(crate) minifat: Vec<u32>,
    /// Regular sectors holding the mini stream, in order.
    pub(crate) mini_stream_sectors: Vec<u32>,
}

impl OleLayout {
    pub fn sector_size(&self) -> u64 {
        1u64 << self.sector_shift
    }

    pub fn mini_sector_size(&self) -> u64 {
        1u64 << self.mini_sector_shift
    }

    /// Streams below the cutoff live in the mini stream.
    pub fn is_mini(&self, size: u64) -> bool {
        size < self.mini_stream_cutoff
    }

    /// Read up to `len` bytes of the stream starting at `start`.
    ///
    /// Stops early when the chain ends, so the result is shorter than `len`
    /// for streams whose chain does not cover their declared size. The
    /// caller bounds `len`.
    pub async fn read_stream<R: ReadAt + ?Sized>(
        &self,
        reader: &R,
        start: u32,
        mini: bool,
        len: u64,
    ) -> Result<Vec<u8>, FormatError> {
        let (table, unit, chain) = if mini {
            (&self.minifat, self.mini_sector_size(), "mini FAT chain")
        } else {
            (&self.fat, self.sector_size(), "FAT chain")
        };

        let mut data = Vec::new();
        let mut walker = ChainWalker::new(table, start, chain);
        while (data.len() as u64) < len {
            let Some(sector) = walker.next_sector()? else {
                break;
            };
            let want = unit.min(len - data.len() as u64);
            let chunk = if mini {
                self.read_mini_sector(reader, sector, want).await?
            } else {
                read_region(reader, sector_offset(self.sector_shift, sector)?, want).await?
            };
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    async fn read_mini_sector<R: ReadAt + ?Sized>(
        &self,
        reader: &R,
        mini_sector: u32,
        want: u64,
    ) -> Result<Vec<u8>, FormatError> {
        let position = (mini_sector as u64) << self.mini_sector_shift;
        let index = position >> self.sector_shift;
        let within = position & (self.sector_size() - 1);
        let sector = usize::try_from(index)
            .ok()
            .and_then(|i| self.mini_stream_sectors.get(i))
            .copied()
            .ok_or_else(|| {
                FormatError::InvalidOle(format!("mini sector {mini_sector} outside the mini stream"))
            })?;
        let offset = sector_offset(self.sector_shift, sector)? + within;
        read_region(reader, offset, want).await
    }
}

/// File offset of a regular sector; the header occupies sector "-1".
pub(crate) fn sector_offset(sector_shift: u16, sector: u32) -> Result<u64, FormatError> {
    if sector > MAXREGSECT {
        return Err(FormatError::InvalidOle(format!(
            "special value {sector:#x} used as a sector"
        )));
    }
    Ok((sector as u64 + 1) << sector_shift)
}

/// Read one whole regular sector.
pub(crate) async fn read_sector<R: ReadAt + ?Sized>(
    reader: &R,
    sector_shift: u16,
    sector: u32,
) -> Result<Vec<u8>, FormatError> {
    let offset = sector_offset(sector_shift, sector)?;
    read_region(reader, offset, 1u64 << sector_shift).await
}

/// Follows `next` links through an allocation table.
///
/// Every sector may appear once per chain; meeting one again means the
/// links loop, even when the loop closes before the stream's declared end.
pub(crate) struct ChainWalker<'a> {
    table: &'a [u32],
    next: u32,
    start: u32,
    seen: HashSet<u32>,
    chain: &'static str,
}

impl<'a> ChainWalker<'a> {
    pub(crate) fn new(table: &'a [u32], start: u32, chain: &'static str) -> Self {
        Self {
            table,
            next: start,
            start,
            seen: HashSet::new(),
            chain,
        }
    }

    pub(crate) fn next_sector(&mut self) -> Result<Option<u32>, FormatError> {
        let current = self.next;
        if current == ENDOFCHAIN {
            return Ok(None);
        }
        if current > MAXREGSECT {
            return Err(FormatError::InvalidOle(format!(
                "{} hits special value {current:#x}",
                self.chain
            )));
        }
        let next = *self.table.get(current as usize).ok_or_else(|| {
            FormatError::InvalidOle(format!(
                "{} leaves the table at sector {current}",
                self.chain
            ))
        })?;
        if !self.seen.insert(current) {
            return Err(FormatError::CyclicChain {
                chain: self.chain,
                at: self.start,
            });
        }
        self.next = next;
        Ok(Some(current))
    }

    /// Collect the whole chain.
    pub(crate) fn collect(mut self) -> Result<Vec<u32>, FormatError> {
        let mut sectors = Vec::new();
        while let Some(sector) = self.next_sector()? {
            sectors.push(sector);
        }
        Ok(sectors)
    }
}
