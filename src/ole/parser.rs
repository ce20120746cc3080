use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;
use std::sync::Arc;

use crate::container::{ContainerParser, Layout, ParsedContainer};
use crate::error::{EntryError, FormatError};
use crate::io::{ReadAt, read_region};

use super::stream::{ChainWalker, OleLayout, read_sector};
use super::structures::{
    DIR_ENTRY_SIZE, ENDOFCHAIN, FREESECT, HEADER_SIZE, MAXREGSECT, OleHeader, RawDirEntry,
};
use super::tree::DirectoryTree;

/// Structural parser for OLE compound files.
pub struct OleParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> OleParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Parse header, allocation tables and directory into a tree.
    pub async fn parse_tree(
        &self,
    ) -> Result<(DirectoryTree, OleLayout, Vec<EntryError>), FormatError> {
        let raw_header = read_region(self.reader.as_ref(), 0, HEADER_SIZE as u64).await?;
        let header = OleHeader::from_bytes(&raw_header)?;
        let sector_size = header.sector_size();
        if self.size < sector_size {
            return Err(FormatError::Truncated {
                offset: 0,
                len: sector_size,
            });
        }
        let sector_count = (self.size - sector_size).div_ceil(sector_size);
        tracing::debug!(
            version = header.major_version,
            sector_size,
            sector_count,
            fat_sectors = header.num_fat_sectors,
            "compound file header"
        );

        if header.num_fat_sectors as u64 > sector_count {
            return Err(FormatError::InvalidOle(format!(
                "{} FAT sectors declared in a file of {sector_count} sectors",
                header.num_fat_sectors
            )));
        }

        let fat_sectors = self.fat_sector_ids(&header, sector_count).await?;
        let fat = self.read_table(header.sector_shift, &fat_sectors).await?;

        let dir_sectors = ChainWalker::new(&fat, header.first_dir_sector, "directory chain").collect()?;
        let mut entries = Vec::new();
        for &sector in &dir_sectors {
            let data = read_sector(self.reader.as_ref(), header.sector_shift, sector).await?;
            for chunk in data.chunks_exact(DIR_ENTRY_SIZE) {
                entries.push(RawDirEntry::from_bytes(chunk, header.major_version)?);
            }
        }

        let minifat = if header.num_minifat_sectors == 0 {
            Vec::new()
        } else {
            let ids = ChainWalker::new(&fat, header.first_minifat_sector, "mini FAT chain").collect()?;
            self.read_table(header.sector_shift, &ids).await?
        };

        let (tree, errors) = DirectoryTree::build(&entries)?;
        let mini_stream_sectors = if tree.root.start_sector == ENDOFCHAIN {
            Vec::new()
        } else {
            ChainWalker::new(&fat, tree.root.start_sector, "mini stream chain").collect()?
        };

        let layout = OleLayout {
            sector_shift: header.sector_shift,
            mini_sector_shift: header.mini_sector_shift,
            mini_stream_cutoff: header.mini_stream_cutoff as u64,
            fat,
            minifat,
            mini_stream_sectors,
        };
        tracing::debug!(
            directory_entries = entries.len(),
            mini_sectors = layout.minifat.len(),
            "compound file directory"
        );
        Ok((tree, layout, errors))
    }

    /// Locations of the FAT sectors: the 109 in the header, then the DIFAT
    /// chain. Each DIFAT sector ends with the id of the next one.
    async fn fat_sector_ids(
        &self,
        header: &OleHeader,
        sector_count: u64,
    ) -> Result<Vec<u32>, FormatError> {
        let wanted = header.num_fat_sectors as usize;
        let mut ids: Vec<u32> = header
            .difat
            .iter()
            .copied()
            .take_while(|&id| id != FREESECT)
            .take(wanted)
            .collect();

        let mut next = header.first_difat_sector;
        let mut seen = HashSet::new();
        let difat_limit = u64::from(header.num_difat_sectors).min(sector_count);
        for _ in 0..difat_limit {
            if ids.len() >= wanted || next == ENDOFCHAIN || next == FREESECT {
                break;
            }
            if !seen.insert(next) {
                return Err(FormatError::CyclicChain {
                    chain: "DIFAT chain",
                    at: header.first_difat_sector,
                });
            }
            let data = read_sector(self.reader.as_ref(), header.sector_shift, next).await?;
            let (body, link) = data.split_at(data.len() - 4);
            ids.extend(
                body.chunks_exact(4)
                    .map(LittleEndian::read_u32)
                    .take_while(|&id| id != FREESECT)
                    .take(wanted - ids.len()),
            );
            next = LittleEndian::read_u32(link);
        }

        if ids.len() < wanted {
            tracing::warn!(found = ids.len(), wanted, "DIFAT lists fewer FAT sectors than declared");
        }
        if let Some(&bad) = ids.iter().find(|&&id| id > MAXREGSECT || u64::from(id) >= sector_count) {
            return Err(FormatError::InvalidOle(format!("FAT sector {bad:#x} out of range")));
        }
        Ok(ids)
    }

    /// Concatenate the little-endian u32 entries of the given sectors.
    async fn read_table(&self, sector_shift: u16, sectors: &[u32]) -> Result<Vec<u32>, FormatError> {
        let mut table = Vec::with_capacity(sectors.len() << (sector_shift - 2));
        for &sector in sectors {
            let data = read_sector(self.reader.as_ref(), sector_shift, sector).await?;
            table.extend(data.chunks_exact(4).map(LittleEndian::read_u32));
        }
        Ok(table)
    }
}

#[async_trait]
impl<R: ReadAt + 'static> ContainerParser for OleParser<R> {
    async fn parse(&self) -> Result<ParsedContainer, FormatError> {
        let (tree, layout, errors) = self.parse_tree().await?;
        let entries = tree.entries(&layout);
        Ok(ParsedContainer {
            entries,
            errors,
            layout: Layout::Ole(layout),
        })
    }
}
