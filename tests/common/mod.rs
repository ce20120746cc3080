//! Hand-assembled container fixtures.
#![allow(dead_code)]

use std::io::Write;

use flate2::Compression;
use flate2::write::DeflateEncoder;

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

// ---------------------------------------------------------------------------
// ZIP
// ---------------------------------------------------------------------------

pub const FLAG_ENCRYPTED: u16 = 1;
pub const FLAG_UTF8: u16 = 1 << 11;

pub struct RawEntry {
    pub name: Vec<u8>,
    pub flags: u16,
    pub method: u16,
    pub crc: u32,
    pub uncompressed_size: u32,
    /// Bytes stored after the local header.
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<RawEntry>,
    comment: Vec<u8>,
    trailing: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.raw(RawEntry {
            name: name.as_bytes().to_vec(),
            flags: 0,
            method: 0,
            crc: crc32fast::hash(data),
            uncompressed_size: data.len() as u32,
            payload: data.to_vec(),
        })
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.raw(RawEntry {
            name: name.as_bytes().to_vec(),
            flags: 0,
            method: 8,
            crc: crc32fast::hash(data),
            uncompressed_size: data.len() as u32,
            payload: deflate(data),
        })
    }

    pub fn directory(self, name: &str) -> Self {
        self.raw(RawEntry {
            name: name.as_bytes().to_vec(),
            flags: 0,
            method: 0,
            crc: 0,
            uncompressed_size: 0,
            payload: Vec::new(),
        })
    }

    pub fn raw(mut self, entry: RawEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Garbage after the end record.
    pub fn trailing(mut self, bytes: &[u8]) -> Self {
        self.trailing = bytes.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.assemble(false)
    }

    /// Same archive with every size, offset and count moved into ZIP64
    /// records.
    pub fn build_zip64(&self) -> Vec<u8> {
        self.assemble(true)
    }

    fn assemble(&self, zip64: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let mut offsets = Vec::new();
        for entry in &self.entries {
            offsets.push(out.len() as u64);
            out.extend_from_slice(b"PK\x03\x04");
            put16(&mut out, 20);
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, 0);
            put16(&mut out, 0);
            put32(&mut out, entry.crc);
            put32(&mut out, entry.payload.len() as u32);
            put32(&mut out, entry.uncompressed_size);
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, 0);
            out.extend_from_slice(&entry.name);
            out.extend_from_slice(&entry.payload);
        }

        let cd_offset = out.len() as u64;
        for (entry, offset) in self.entries.iter().zip(&offsets) {
            let mut extra = Vec::new();
            if zip64 {
                put16(&mut extra, 0x0001);
                put16(&mut extra, 24);
                put64(&mut extra, entry.uncompressed_size as u64);
                put64(&mut extra, entry.payload.len() as u64);
                put64(&mut extra, *offset);
            }
            let sat = |v: u32| if zip64 { 0xFFFF_FFFF } else { v };

            out.extend_from_slice(b"PK\x01\x02");
            put16(&mut out, 20);
            put16(&mut out, 20);
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, 0);
            put16(&mut out, 0);
            put32(&mut out, entry.crc);
            put32(&mut out, sat(entry.payload.len() as u32));
            put32(&mut out, sat(entry.uncompressed_size));
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, extra.len() as u16);
            put16(&mut out, 0);
            put16(&mut out, 0);
            put16(&mut out, 0);
            put32(&mut out, 0);
            put32(&mut out, sat(*offset as u32));
            out.extend_from_slice(&entry.name);
            out.extend_from_slice(&extra);
        }
        let cd_size = out.len() as u64 - cd_offset;
        let count = self.entries.len() as u64;

        if zip64 {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put64(&mut out, 44);
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            put64(&mut out, count);
            put64(&mut out, count);
            put64(&mut out, cd_size);
            put64(&mut out, cd_offset);

            out.extend_from_slice(b"PK\x06\x07");
            put32(&mut out, 0);
            put64(&mut out, eocd64_offset);
            put32(&mut out, 1);
        }

        out.extend_from_slice(b"PK\x05\x06");
        put16(&mut out, 0);
        put16(&mut out, 0);
        if zip64 {
            put16(&mut out, 0xFFFF);
            put16(&mut out, 0xFFFF);
            put32(&mut out, 0xFFFF_FFFF);
            put32(&mut out, 0xFFFF_FFFF);
        } else {
            put16(&mut out, count as u16);
            put16(&mut out, count as u16);
            put32(&mut out, cd_size as u32);
            put32(&mut out, cd_offset as u32);
        }
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out.extend_from_slice(&self.trailing);
        out
    }
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

// ---------------------------------------------------------------------------
// OLE / CFB (version 3 with 512-byte sectors, or version 4 with 4096)
// ---------------------------------------------------------------------------

pub const MINI_SECTOR: usize = 64;
pub const MINI_CUTOFF: usize = 4096;
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
pub const FREESECT: u32 = 0xFFFF_FFFF;
pub const FATSECT: u32 = 0xFFFF_FFFD;
pub const DIFSECT: u32 = 0xFFFF_FFFC;
pub const NOSTREAM: u32 = 0xFFFF_FFFF;
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const HEADER_DIFAT: usize = 109;

pub enum OleNode {
    Stream(String, Vec<u8>),
    Storage(String, Vec<OleNode>),
}

pub fn stream(name: &str, data: &[u8]) -> OleNode {
    OleNode::Stream(name.to_string(), data.to_vec())
}

pub fn storage(name: &str, children: Vec<OleNode>) -> OleNode {
    OleNode::Storage(name.to_string(), children)
}

/// Builds a compound file whose directory ids follow pre-order: the root
/// is 0, then each node, storages immediately followed by their children.
/// Siblings are chained through `right` links in the order given.
///
/// Sectors are laid out as: FAT sectors, DIFAT sectors, mini FAT, mini
/// stream, regular streams, directory.
#[derive(Default)]
pub struct OleBuilder {
    children: Vec<OleNode>,
    version4: bool,
}

struct FlatEntry {
    name: String,
    kind: u8,
    left: u32,
    right: u32,
    child: u32,
    start: u32,
    size: u64,
    data: Vec<u8>,
}

impl FlatEntry {
    fn new(name: &str, kind: u8, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            start: ENDOFCHAIN,
            size: data.len() as u64,
            data,
        }
    }
}

/// A built compound file plus the offsets needed to corrupt it.
pub struct OleFile {
    pub bytes: Vec<u8>,
    pub sector_size: usize,
    pub fat_sectors: usize,
    pub difat_sectors: usize,
    dir_offset: usize,
    fat_offset: usize,
}

#[derive(Clone, Copy)]
pub enum Link {
    Left,
    Right,
    Child,
}

impl OleFile {
    pub fn set_link(&mut self, id: u32, link: Link, target: u32) {
        let field = match link {
            Link::Left => 68,
            Link::Right => 72,
            Link::Child => 76,
        };
        let at = self.dir_offset + id as usize * 128 + field;
        self.bytes[at..at + 4].copy_from_slice(&target.to_le_bytes());
    }

    pub fn set_fat(&mut self, sector: u32, next: u32) {
        let at = self.fat_offset + sector as usize * 4;
        self.bytes[at..at + 4].copy_from_slice(&next.to_le_bytes());
    }

    pub fn set_header_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_name_units(&mut self, id: u32, units: &[u16]) {
        let at = self.dir_offset + id as usize * 128;
        self.bytes[at..at + 64].fill(0);
        for (i, unit) in units.iter().enumerate() {
            self.bytes[at + i * 2..at + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        let len = ((units.len() + 1) * 2) as u16;
        self.bytes[at + 64..at + 66].copy_from_slice(&len.to_le_bytes());
    }

    /// First sector of the directory stream.
    pub fn dir_sector(&self) -> u32 {
        (self.dir_offset / self.sector_size - 1) as u32
    }

    /// Start sector recorded in a directory entry.
    pub fn start_sector(&self, id: u32) -> u32 {
        let at = self.dir_offset + id as usize * 128 + 116;
        u32::from_le_bytes(self.bytes[at..at + 4].try_into().unwrap())
    }

    /// File offset of a sector.
    pub fn sector_offset(&self, sector: u32) -> usize {
        (sector as usize + 1) * self.sector_size
    }
}

/// Payload sectors, numbered from zero until the FAT size is known.
struct Regions {
    sector: usize,
    data: Vec<(usize, Vec<u8>)>,
    next: usize,
}

impl Regions {
    /// Append `data` (padded) as a fresh chain, returning its relative start.
    fn alloc(&mut self, data: &[u8]) -> usize {
        let start = self.next;
        let count = data.len().div_ceil(self.sector).max(1);
        let mut padded = data.to_vec();
        padded.resize(count * self.sector, 0);
        self.data.push((start, padded));
        self.next += count;
        start
    }
}

impl OleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, node: OleNode) -> Self {
        self.children.push(node);
        self
    }

    /// Major version 4 with 4096-byte sectors.
    pub fn version4(mut self) -> Self {
        self.version4 = true;
        self
    }

    pub fn build(self) -> OleFile {
        let sector = if self.version4 { 4096 } else { 512 };
        let per_sector = sector / 4;

        let mut flat = vec![FlatEntry::new("Root Entry", 5, Vec::new())];
        let first = flatten(&self.children, &mut flat);
        flat[0].child = first;

        // Small streams go to the mini stream.
        let mut mini = Vec::new();
        let mut minifat: Vec<u32> = Vec::new();
        for entry in flat.iter_mut().skip(1) {
            if entry.kind != 2 || entry.data.is_empty() || entry.data.len() >= MINI_CUTOFF {
                continue;
            }
            let start = minifat.len() as u32;
            let count = entry.data.len().div_ceil(MINI_SECTOR) as u32;
            for i in 0..count {
                minifat.push(if i + 1 < count { start + i + 1 } else { ENDOFCHAIN });
            }
            entry.start = start;
            mini.extend_from_slice(&entry.data);
            mini.resize(mini.len().next_multiple_of(MINI_SECTOR), 0);
        }

        let mut regions = Regions {
            sector,
            data: Vec::new(),
            next: 0,
        };

        let minifat_region = (!minifat.is_empty()).then(|| {
            let mut table = Vec::new();
            for id in &minifat {
                put32(&mut table, *id);
            }
            let sectors = table.len().div_ceil(sector);
            table.resize(sectors * sector, 0xFF);
            (regions.alloc(&table), sectors as u32)
        });
        let mini_region = (!mini.is_empty()).then(|| regions.alloc(&mini));

        let mut large = Vec::new();
        for (id, entry) in flat.iter().enumerate().skip(1) {
            if entry.kind == 2 && entry.data.len() >= MINI_CUTOFF {
                large.push((id, regions.alloc(&entry.data)));
            }
        }

        let dir_sectors = (flat.len() * 128).div_ceil(sector);
        let dir_rel = regions.next;
        regions.next += dir_sectors;

        // Grow the FAT until it maps itself, the DIFAT and every payload.
        // Past 109 FAT sectors the extra ids live in DIFAT sectors.
        let mut fat_count: usize = 1;
        let difat_count = loop {
            let difat = fat_count.saturating_sub(HEADER_DIFAT).div_ceil(per_sector - 1);
            let needed = (fat_count + difat + regions.next).div_ceil(per_sector);
            if needed <= fat_count {
                break difat;
            }
            fat_count = needed;
        };
        let base = fat_count + difat_count;
        let abs = |rel: usize| (base + rel) as u32;

        let (first_minifat, num_minifat) = match minifat_region {
            Some((rel, sectors)) => (abs(rel), sectors),
            None => (ENDOFCHAIN, 0),
        };
        if let Some(rel) = mini_region {
            flat[0].start = abs(rel);
            flat[0].size = mini.len() as u64;
        }
        for (id, rel) in large {
            flat[id].start = abs(rel);
        }
        let first_dir = abs(dir_rel);

        let mut directory = Vec::new();
        for entry in &flat {
            directory.extend_from_slice(&dir_entry(entry));
        }
        directory.resize(dir_sectors * sector, 0);
        regions.data.push((dir_rel, directory));

        let mut fat = vec![FREESECT; fat_count * per_sector];
        fat[..fat_count].fill(FATSECT);
        fat[fat_count..base].fill(DIFSECT);
        for (rel, bytes) in &regions.data {
            let start = base + rel;
            let count = bytes.len() / sector;
            for i in 0..count {
                fat[start + i] = if i + 1 < count {
                    (start + i + 1) as u32
                } else {
                    ENDOFCHAIN
                };
            }
        }

        let mut bytes = header(HeaderFields {
            version4: self.version4,
            num_dir_sectors: dir_sectors as u32,
            num_fat: fat_count as u32,
            first_dir,
            first_minifat,
            num_minifat,
            first_difat: if difat_count > 0 { fat_count as u32 } else { ENDOFCHAIN },
            num_difat: difat_count as u32,
        });
        bytes.resize(sector, 0);

        let fat_offset = bytes.len();
        for id in &fat {
            put32(&mut bytes, *id);
        }

        // Remaining FAT sector ids, chained through DIFAT sectors.
        let spilled: Vec<u32> = (HEADER_DIFAT.min(fat_count)..fat_count)
            .map(|id| id as u32)
            .collect();
        for (i, ids) in spilled.chunks(per_sector - 1).enumerate() {
            let mut block = Vec::with_capacity(sector);
            for id in ids {
                put32(&mut block, *id);
            }
            block.resize(sector - 4, 0xFF);
            let next = if i + 1 < difat_count {
                (fat_count + i + 1) as u32
            } else {
                ENDOFCHAIN
            };
            put32(&mut block, next);
            bytes.extend_from_slice(&block);
        }

        regions.data.sort_by_key(|(rel, _)| *rel);
        for (_, region) in &regions.data {
            bytes.extend_from_slice(region);
        }

        OleFile {
            bytes,
            sector_size: sector,
            fat_sectors: fat_count,
            difat_sectors: difat_count,
            dir_offset: (first_dir as usize + 1) * sector,
            fat_offset,
        }
    }
}

fn flatten(nodes: &[OleNode], flat: &mut Vec<FlatEntry>) -> u32 {
    let mut ids = Vec::new();
    for node in nodes {
        let id = flat.len();
        ids.push(id as u32);
        match node {
            OleNode::Stream(name, data) => flat.push(FlatEntry::new(name, 2, data.clone())),
            OleNode::Storage(name, children) => {
                let mut entry = FlatEntry::new(name, 1, Vec::new());
                entry.size = 0;
                flat.push(entry);
                let first = flatten(children, flat);
                flat[id].child = first;
            }
        }
    }
    for pair in ids.windows(2) {
        flat[pair[0] as usize].right = pair[1];
    }
    ids.first().copied().unwrap_or(NOSTREAM)
}

fn dir_entry(entry: &FlatEntry) -> [u8; 128] {
    let mut raw = [0u8; 128];
    let units: Vec<u16> = entry.name.encode_utf16().take(31).collect();
    for (i, unit) in units.iter().enumerate() {
        raw[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    raw[64..66].copy_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
    raw[66] = entry.kind;
    raw[67] = 1;
    raw[68..72].copy_from_slice(&entry.left.to_le_bytes());
    raw[72..76].copy_from_slice(&entry.right.to_le_bytes());
    raw[76..80].copy_from_slice(&entry.child.to_le_bytes());
    raw[116..120].copy_from_slice(&entry.start.to_le_bytes());
    raw[120..128].copy_from_slice(&entry.size.to_le_bytes());
    raw
}

struct HeaderFields {
    version4: bool,
    num_dir_sectors: u32,
    num_fat: u32,
    first_dir: u32,
    first_minifat: u32,
    num_minifat: u32,
    first_difat: u32,
    num_difat: u32,
}

fn header(fields: HeaderFields) -> Vec<u8> {
    let mut h = Vec::with_capacity(512);
    h.extend_from_slice(&OLE_MAGIC);
    h.extend_from_slice(&[0u8; 16]);
    put16(&mut h, 0x3E);
    put16(&mut h, if fields.version4 { 4 } else { 3 });
    put16(&mut h, 0xFFFE);
    put16(&mut h, if fields.version4 { 12 } else { 9 });
    put16(&mut h, 6);
    h.extend_from_slice(&[0u8; 6]);
    // Version 3 files must leave the directory sector count at zero.
    put32(&mut h, if fields.version4 { fields.num_dir_sectors } else { 0 });
    put32(&mut h, fields.num_fat);
    put32(&mut h, fields.first_dir);
    put32(&mut h, 0);
    put32(&mut h, MINI_CUTOFF as u32);
    put32(&mut h, fields.first_minifat);
    put32(&mut h, fields.num_minifat);
    put32(&mut h, fields.first_difat);
    put32(&mut h, fields.num_difat);
    // The FAT occupies the first sectors, so its ids are 0, 1, ...
    for id in 0..HEADER_DIFAT as u32 {
        put32(&mut h, if id < fields.num_fat { id } else { FREESECT });
    }
    h
}
