//! OLE2 / Compound File Binary parsing (legacy Office documents, MSI, and
//! the embedded objects inside them).
//!
//! A compound file is a small FAT filesystem: fixed-size sectors, a file
//! allocation table chaining them together, and a directory of storages
//! (folders) and streams (files). Streams below a cutoff size are packed
//! into 64-byte mini sectors inside the root entry's stream.
//!
//! Every chain and every directory link comes from untrusted input, so
//! walks are bounded by the size of the table they index and revisits are
//! reported as [`FormatError::CyclicChain`](crate::error::FormatError::CyclicChain).

mod parser;
mod stream;
pub mod structures;
mod tree;

pub use parser::OleParser;
pub use stream::OleLayout;
pub use tree::{DirNode, DirectoryTree, MAX_DEPTH, NodeKind};
