//! Magic-byte identification.
//!
//! A fixed table of byte patterns maps a buffer to a [`FileType`]. The same
//! matcher decides which parser handles a container and labels every payload
//! pulled out of one, so file name extensions never influence either decision.
//!
//! Patterns are anchored either at an offset from the start of the buffer or
//! at a distance from its end. The table is ordered once, on first use, from
//! most to least specific (total pattern length); the first match wins.

use std::cmp::Reverse;
use std::fmt;
use std::sync::LazyLock;

/// Bytes from the start of a source that cover every head-anchored pattern.
pub const HEAD_WINDOW: usize = 512;

/// Bytes from the end of a source that cover every tail-anchored pattern.
pub const TAIL_WINDOW: usize = 22;

/// Result of identification: a short label plus a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileType {
    pub label: &'static str,
    pub mime: &'static str,
}

impl FileType {
    pub const UNKNOWN: FileType = FileType::new("unknown", "application/octet-stream");

    const fn new(label: &'static str, mime: &'static str) -> Self {
        Self { label, mime }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    /// Pattern starts this many bytes into the buffer.
    Head(usize),
    /// Pattern starts this many bytes before the end of the buffer.
    Tail(usize),
}

#[derive(Debug)]
struct Part {
    anchor: Anchor,
    bytes: &'static [u8],
}

const fn head(offset: usize, bytes: &'static [u8]) -> Part {
    Part {
        anchor: Anchor::Head(offset),
        bytes,
    }
}

const fn tail(distance: usize, bytes: &'static [u8]) -> Part {
    Part {
        anchor: Anchor::Tail(distance),
        bytes,
    }
}

/// All parts must match for the signature to match.
#[derive(Debug)]
struct Signature {
    parts: &'static [Part],
    file_type: FileType,
}

impl Signature {
    fn specificity(&self) -> usize {
        self.parts.iter().map(|p| p.bytes.len()).sum()
    }

    fn matches(&self, head: &[u8], tail: &[u8]) -> bool {
        self.parts.iter().all(|part| {
            let window = match part.anchor {
                Anchor::Head(offset) => offset
                    .checked_add(part.bytes.len())
                    .and_then(|end| head.get(offset..end)),
                Anchor::Tail(distance) if distance >= part.bytes.len() => tail
                    .len()
                    .checked_sub(distance)
                    .and_then(|start| tail.get(start..start + part.bytes.len())),
                Anchor::Tail(_) => None,
            };
            window == Some(part.bytes)
        })
    }
}

pub const ZIP: FileType = FileType::new("zip", "application/zip");
pub const OLE: FileType = FileType::new("ole-cfb", "application/x-ole-storage");

static TABLE: &[Signature] = &[
    Signature {
        parts: &[head(0, b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1")],
        file_type: OLE,
    },
    Signature {
        parts: &[head(0, b"PK\x03\x04")],
        file_type: ZIP,
    },
    // Empty archive: nothing but an end of central directory record.
    Signature {
        parts: &[head(0, b"PK\x05\x06")],
        file_type: ZIP,
    },
    // Spanned archive marker.
    Signature {
        parts: &[head(0, b"PK\x07\x08")],
        file_type: ZIP,
    },
    Signature {
        parts: &[head(0, b"%PDF-")],
        file_type: FileType::new("pdf", "application/pdf"),
    },
    Signature {
        parts: &[head(0, b"\x89PNG\r\n\x1A\n")],
        file_type: FileType::new("png", "image/png"),
    },
    Signature {
        parts: &[head(0, b"\xFF\xD8\xFF")],
        file_type: FileType::new("jpeg", "image/jpeg"),
    },
    Signature {
        parts: &[head(0, b"GIF87a")],
        file_type: FileType::new("gif", "image/gif"),
    },
    Signature {
        parts: &[head(0, b"GIF89a")],
        file_type: FileType::new("gif", "image/gif"),
    },
    Signature {
        parts: &[head(0, b"BM")],
        file_type: FileType::new("bmp", "image/bmp"),
    },
    Signature {
        parts: &[head(0, b"II*\x00")],
        file_type: FileType::new("tiff", "image/tiff"),
    },
    Signature {
        parts: &[head(0, b"MM\x00*")],
        file_type: FileType::new("tiff", "image/tiff"),
    },
    Signature {
        parts: &[head(0, b"RIFF"), head(8, b"WEBP")],
        file_type: FileType::new("webp", "image/webp"),
    },
    Signature {
        parts: &[head(0, b"RIFF"), head(8, b"WAVE")],
        file_type: FileType::new("wav", "audio/wav"),
    },
    Signature {
        parts: &[head(0, b"RIFF"), head(8, b"AVI ")],
        file_type: FileType::new("avi", "video/x-msvideo"),
    },
    Signature {
        parts: &[head(4, b"ftyp")],
        file_type: FileType::new("mp4", "video/mp4"),
    },
    Signature {
        parts: &[head(0, b"ID3")],
        file_type: FileType::new("mp3", "audio/mpeg"),
    },
    Signature {
        parts: &[head(0, b"OggS")],
        file_type: FileType::new("ogg", "audio/ogg"),
    },
    Signature {
        parts: &[head(0, b"fLaC")],
        file_type: FileType::new("flac", "audio/flac"),
    },
    Signature {
        parts: &[head(0, b"\x1F\x8B\x08")],
        file_type: FileType::new("gzip", "application/gzip"),
    },
    Signature {
        parts: &[head(0, b"BZh")],
        file_type: FileType::new("bzip2", "application/x-bzip2"),
    },
    Signature {
        parts: &[head(0, b"\xFD7zXZ\x00")],
        file_type: FileType::new("xz", "application/x-xz"),
    },
    Signature {
        parts: &[head(0, b"\x28\xB5\x2F\xFD")],
        file_type: FileType::new("zstd", "application/zstd"),
    },
    Signature {
        parts: &[head(0, b"7z\xBC\xAF\x27\x1C")],
        file_type: FileType::new("7z", "application/x-7z-compressed"),
    },
    Signature {
        parts: &[head(0, b"Rar!\x1A\x07\x01\x00")],
        file_type: FileType::new("rar", "application/vnd.rar"),
    },
    Signature {
        parts: &[head(0, b"Rar!\x1A\x07\x00")],
        file_type: FileType::new("rar", "application/vnd.rar"),
    },
    Signature {
        parts: &[head(257, b"ustar")],
        file_type: FileType::new("tar", "application/x-tar"),
    },
    Signature {
        parts: &[head(0, b"\x7FELF")],
        file_type: FileType::new("elf", "application/x-elf"),
    },
    Signature {
        parts: &[head(0, b"MZ")],
        file_type: FileType::new("pe", "application/vnd.microsoft.portable-executable"),
    },
    Signature {
        parts: &[head(0, b"\xCF\xFA\xED\xFE")],
        file_type: FileType::new("mach-o", "application/x-mach-binary"),
    },
    Signature {
        parts: &[head(0, b"\xCE\xFA\xED\xFE")],
        file_type: FileType::new("mach-o", "application/x-mach-binary"),
    },
    Signature {
        parts: &[head(0, b"\xCA\xFE\xBA\xBE")],
        file_type: FileType::new("java-class", "application/java-vm"),
    },
    Signature {
        parts: &[head(0, b"SQLite format 3\x00")],
        file_type: FileType::new("sqlite", "application/vnd.sqlite3"),
    },
    Signature {
        parts: &[head(0, b"{\\rtf")],
        file_type: FileType::new("rtf", "application/rtf"),
    },
    Signature {
        parts: &[head(0, b"<?xml")],
        file_type: FileType::new("xml", "application/xml"),
    },
    Signature {
        parts: &[head(0, b"\xEF\xBB\xBF<?xml")],
        file_type: FileType::new("xml", "application/xml"),
    },
    // Archive with a prepended stub (self-extractors): EOCD without a comment
    // sitting right at the end.
    Signature {
        parts: &[tail(22, b"PK\x05\x06")],
        file_type: ZIP,
    },
];

static ORDERED: LazyLock<Vec<&'static Signature>> = LazyLock::new(|| {
    let mut ordered: Vec<&'static Signature> = TABLE.iter().collect();
    // Stable: equally specific patterns keep table order.
    ordered.sort_by_key(|sig| Reverse(sig.specificity()));
    ordered
});

/// Identify a complete buffer.
///
/// Buffers shorter than a pattern simply do not match it.
pub fn identify(bytes: &[u8]) -> FileType {
    identify_split(bytes, bytes)
}

/// Identify a source from a window on its start and a window on its end.
///
/// Lets callers classify large sources after reading [`HEAD_WINDOW`] and
/// [`TAIL_WINDOW`] bytes rather than the whole thing.
pub fn identify_split(head: &[u8], tail: &[u8]) -> FileType {
    ORDERED
        .iter()
        .find(|sig| sig.matches(head, tail))
        .map(|sig| sig.file_type)
        .unwrap_or(FileType::UNKNOWN)
}
