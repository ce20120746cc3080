//! Rebuilding the storage hierarchy from the flat directory array.
//!
//! Siblings form a red-black tree linked through `left`/`right`; a storage
//! points at its children through `child`. The colour bits are ignored and
//! siblings are visited in order, which is the order a well-formed file
//! stores them in.

use std::collections::HashSet;

use crate::container::{CompressionMethod, ContainerEntry, EntryName, Location, PayloadLocation};
use crate::error::{EntryError, FormatError};

use super::stream::OleLayout;
use super::structures::{ObjectType, RawDirEntry, is_link};

/// Deepest storage nesting accepted.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Storage,
    Stream,
}

#[derive(Debug, Clone)]
pub struct DirNode {
    /// Index into the directory array.
    pub id: u32,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub start_sector: u32,
    pub children: Vec<DirNode>,
}

#[derive(Debug, Clone)]
pub struct DirectoryTree {
    pub root: DirNode,
}

impl DirectoryTree {
    /// Build the tree rooted at entry 0.
    ///
    /// Every entry may be reached at most once; a second visit means the
    /// links form a cycle and the whole directory is rejected. Entries with
    /// undecodable names are reported and skipped with their subtree.
    pub fn build(entries: &[RawDirEntry]) -> Result<(Self, Vec<EntryError>), FormatError> {
        let root = entries
            .first()
            .ok_or_else(|| FormatError::InvalidOle("empty directory".into()))?;
        if root.object_type != ObjectType::Root {
            return Err(FormatError::InvalidOle(format!(
                "first directory entry is {:?}, not the root",
                root.object_type
            )));
        }

        let mut builder = Builder {
            entries,
            visited: HashSet::from([0]),
            errors: Vec::new(),
        };
        let children = builder.siblings(root.child, 1)?;

        let root = DirNode {
            id: 0,
            name: root.name().unwrap_or_else(|lossy| lossy),
            kind: NodeKind::Root,
            size: root.size,
            start_sector: root.start_sector,
            children,
        };
        Ok((Self { root }, builder.errors))
    }

    /// Flatten into container entries, depth first, parents before children.
    /// The root itself is not an entry.
    pub fn entries(&self, layout: &OleLayout) -> Vec<ContainerEntry> {
        let mut out = Vec::new();
        let top = EntryName::new(Vec::new());
        for child in &self.root.children {
            flatten(child, &top, layout, &mut out);
        }
        out
    }
}

fn flatten(node: &DirNode, parent: &EntryName, layout: &OleLayout, out: &mut Vec<ContainerEntry>) {
    let name = parent.join(node.name.clone());
    match node.kind {
        NodeKind::Stream => out.push(ContainerEntry {
            name,
            is_directory: false,
            uncompressed_size: node.size,
            compressed_size: node.size,
            compression_method: CompressionMethod::Stored,
            encrypted: false,
            checksum: None,
            location: PayloadLocation(Location::Ole {
                start_sector: node.start_sector,
                mini: layout.is_mini(node.size),
            }),
        }),
        NodeKind::Storage | NodeKind::Root => {
            out.push(ContainerEntry {
                name: name.clone(),
                is_directory: true,
                uncompressed_size: 0,
                compressed_size: 0,
                compression_method: CompressionMethod::Stored,
                encrypted: false,
                checksum: None,
                location: PayloadLocation(Location::None),
            });
            for child in &node.children {
                flatten(child, &name, layout, out);
            }
        }
    }
}

struct Builder<'a> {
    entries: &'a [RawDirEntry],
    visited: HashSet<u32>,
    errors: Vec<EntryError>,
}

impl<'a> Builder<'a> {
    /// In-order walk of one sibling tree, with an explicit stack so a
    /// degenerate (list-shaped) tree cannot exhaust the call stack.
    fn siblings(&mut self, first: u32, depth: usize) -> Result<Vec<DirNode>, FormatError> {
        if depth > MAX_DEPTH {
            return Err(FormatError::InvalidOle(format!(
                "storages nested deeper than {MAX_DEPTH}"
            )));
        }

        let mut nodes = Vec::new();
        let mut stack = Vec::new();
        let mut current = first;
        loop {
            while is_link(current) {
                let entry = self.visit(current)?;
                stack.push(current);
                current = entry.left;
            }
            let Some(id) = stack.pop() else {
                break;
            };
            let entries = self.entries;
            let entry = &entries[id as usize];
            if let Some(node) = self.node(id, entry, depth)? {
                nodes.push(node);
            }
            current = entry.right;
        }
        Ok(nodes)
    }

    fn visit(&mut self, id: u32) -> Result<&'a RawDirEntry, FormatError> {
        let entries = self.entries;
        let entry = entries.get(id as usize).ok_or_else(|| {
            FormatError::InvalidOle(format!("directory link to missing entry {id}"))
        })?;
        if !self.visited.insert(id) {
            return Err(FormatError::CyclicChain {
                chain: "directory tree",
                at: id,
            });
        }
        if entry.object_type == ObjectType::Unallocated {
            return Err(FormatError::InvalidOle(format!(
                "directory link to unallocated entry {id}"
            )));
        }
        Ok(entry)
    }

    fn node(
        &mut self,
        id: u32,
        entry: &'a RawDirEntry,
        depth: usize,
    ) -> Result<Option<DirNode>, FormatError> {
        let kind = match entry.object_type {
            ObjectType::Storage => NodeKind::Storage,
            ObjectType::Stream => NodeKind::Stream,
            other => {
                tracing::warn!(id, ?other, "skipping directory entry of unexpected type");
                return Ok(None);
            }
        };

        let name = match entry.name() {
            Ok(name) => name,
            Err(lossy) => {
                tracing::warn!(id, name = %lossy, "directory entry name is not valid UTF-16");
                self.errors.push(EntryError::NameEncoding {
                    index: id as usize,
                    lossy,
                });
                return Ok(None);
            }
        };

        let children = if kind == NodeKind::Storage {
            self.siblings(entry.child, depth + 1)?
        } else {
            Vec::new()
        };

        Ok(Some(DirNode {
            id,
            name: name.chars().map(|c| if c.is_control() { '_' } else { c }).collect(),
            kind,
            size: if kind == NodeKind::Stream { entry.size } else { 0 },
            start_sector: entry.start_sector,
            children,
        }))
    }
}
