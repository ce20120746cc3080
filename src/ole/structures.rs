use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::FormatError;

/// Compound file signature.
pub const MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Header fields occupy the first 512 bytes even when sectors are larger.
pub const HEADER_SIZE: usize = 512;
pub const DIR_ENTRY_SIZE: usize = 128;
pub const DIFAT_IN_HEADER: usize = 109;

/// Highest regular sector number; everything above is a marker.
pub const MAXREGSECT: u32 = 0xFFFFFFFA;
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE;
pub const FREESECT: u32 = 0xFFFFFFFF;
pub const NOSTREAM: u32 = 0xFFFFFFFF;

/// Smallest sector that holds a directory entry.
pub const MIN_SECTOR_SHIFT: u16 = 7;
pub const MAX_SECTOR_SHIFT: u16 = 20;

const BYTE_ORDER_MARK: u16 = 0xFFFE;
/// Longest name in UTF-16 code units, terminator included.
const MAX_NAME_UNITS: usize = 32;

/// Compound File Header
#[derive(Debug, Clone)]
pub struct OleHeader {
    pub major_version: u16,
    pub sector_shift: u16,
    pub mini_sector_shift: u16,
    pub num_fat_sectors: u32,
    pub first_dir_sector: u32,
    pub mini_stream_cutoff: u32,
    pub first_minifat_sector: u32,
    pub num_minifat_sectors: u32,
    pub first_difat_sector: u32,
    pub num_difat_sectors: u32,
    /// First 109 FAT sector locations.
    pub difat: Vec<u32>,
}

impl OleHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                offset: 0,
                len: HEADER_SIZE as u64,
            });
        }
        if data[0..8] != MAGIC {
            return Err(FormatError::BadMagic);
        }

        // Skip magic and the (unused) header CLSID
        let mut cursor = Cursor::new(&data[24..HEADER_SIZE]);
        let _minor_version = cursor.read_u16::<LittleEndian>()?;
        let major_version = cursor.read_u16::<LittleEndian>()?;
        let byte_order = cursor.read_u16::<LittleEndian>()?;
        if byte_order != BYTE_ORDER_MARK {
            return Err(FormatError::InvalidOle(format!(
                "byte order mark is {byte_order:#06x}"
            )));
        }

        let sector_shift = cursor.read_u16::<LittleEndian>()?;
        if !(MIN_SECTOR_SHIFT..=MAX_SECTOR_SHIFT).contains(&sector_shift) {
            return Err(FormatError::SectorSize(sector_shift));
        }
        let mini_sector_shift = cursor.read_u16::<LittleEndian>()?;
        if mini_sector_shift == 0 || mini_sector_shift >= sector_shift {
            return Err(FormatError::InvalidOle(format!(
                "mini sector exponent {mini_sector_shift} with sector exponent {sector_shift}"
            )));
        }
        cursor.set_position(cursor.position() + 6); // reserved

        let _num_dir_sectors = cursor.read_u32::<LittleEndian>()?;
        let num_fat_sectors = cursor.read_u32::<LittleEndian>()?;
        let first_dir_sector = cursor.read_u32::<LittleEndian>()?;
        let _transaction_signature = cursor.read_u32::<LittleEndian>()?;
        let mini_stream_cutoff = cursor.read_u32::<LittleEndian>()?;
        let first_minifat_sector = cursor.read_u32::<LittleEndian>()?;
        let num_minifat_sectors = cursor.read_u32::<LittleEndian>()?;
        let first_difat_sector = cursor.read_u32::<LittleEndian>()?;
        let num_difat_sectors = cursor.read_u32::<LittleEndian>()?;

        let mut difat = Vec::with_capacity(DIFAT_IN_HEADER);
        for _ in 0..DIFAT_IN_HEADER {
            difat.push(cursor.read_u32::<LittleEndian>()?);
        }

        Ok(Self {
            major_version,
            sector_shift,
            mini_sector_shift,
            num_fat_sectors,
            first_dir_sector,
            mini_stream_cutoff,
            first_minifat_sector,
            num_minifat_sectors,
            first_difat_sector,
            num_difat_sectors,
            difat,
        })
    }

    pub fn sector_size(&self) -> u64 {
        1u64 << self.sector_shift
    }
}

/// Directory entry object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Unallocated,
    Storage,
    Stream,
    Root,
    Other(u8),
}

impl ObjectType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ObjectType::Unallocated,
            1 => ObjectType::Storage,
            2 => ObjectType::Stream,
            5 => ObjectType::Root,
            other => ObjectType::Other(other),
        }
    }
}

/// One 128-byte directory entry, links still as raw stream ids.
#[derive(Debug, Clone)]
pub struct RawDirEntry {
    pub name_units: Vec<u16>,
    pub object_type: ObjectType,
    pub left: u32,
    pub right: u32,
    pub child: u32,
    pub start_sector: u32,
    pub size: u64,
}

impl RawDirEntry {
    /// Decode an entry. Version 3 files only define the low 32 bits of the
    /// stream size.
    pub fn from_bytes(data: &[u8], major_version: u16) -> Result<Self, FormatError> {
        if data.len() < DIR_ENTRY_SIZE {
            return Err(FormatError::InvalidOle("short directory entry".into()));
        }

        let mut cursor = Cursor::new(&data[64..DIR_ENTRY_SIZE]);
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let object_type = ObjectType::from_u8(cursor.read_u8()?);
        let _color = cursor.read_u8()?;
        let left = cursor.read_u32::<LittleEndian>()?;
        let right = cursor.read_u32::<LittleEndian>()?;
        let child = cursor.read_u32::<LittleEndian>()?;
        cursor.set_position(cursor.position() + 16 + 4 + 8 + 8); // clsid, state, ctime, mtime
        let start_sector = cursor.read_u32::<LittleEndian>()?;
        let mut size = cursor.read_u64::<LittleEndian>()?;
        if major_version == 3 {
            size &= 0xFFFF_FFFF;
        }

        let units = (name_len / 2).min(MAX_NAME_UNITS);
        let name_units = data[..units * 2]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();

        Ok(Self {
            name_units,
            object_type,
            left,
            right,
            child,
            start_sector,
            size,
        })
    }

    /// Decoded name, or the lossy rendering when it is not valid UTF-16.
    pub fn name(&self) -> Result<String, String> {
        String::from_utf16(&self.name_units)
            .map_err(|_| String::from_utf16_lossy(&self.name_units))
    }
}

/// Whether a sibling/child field refers to another entry.
pub fn is_link(id: u32) -> bool {
    id <= MAXREGSECT
}
