use crate::container::EntryName;
use crate::error::PathViolation;

/// Names Windows resolves to devices regardless of directory or extension.
const RESERVED_DEVICES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turn an entry name into a relative, `/`-separated path that stays below
/// whatever directory it is joined onto.
///
/// Empty and `.` segments are dropped. Anything that could address a
/// location outside the output root is refused rather than rewritten:
/// roots, parent segments, drive prefixes, device names, NUL bytes.
/// Control characters are replaced with `_`.
pub fn sanitize_entry_name(name: &EntryName) -> Result<String, PathViolation> {
    let segments = name.segments();
    if segments.iter().any(|s| s.contains('\0')) {
        return Err(PathViolation::NulByte);
    }
    // A leading empty segment means the raw name started with a separator.
    if segments.len() > 1 && segments[0].is_empty() {
        return Err(PathViolation::Absolute);
    }
    if let Some(first) = segments.first()
        && has_drive_prefix(first)
    {
        return Err(PathViolation::DrivePrefix);
    }

    let mut out = Vec::with_capacity(segments.len());
    for segment in segments {
        if segment.is_empty() || segment == "." {
            continue;
        }
        // Windows drops trailing dots and spaces, so ".. " is ".." there.
        if segment.trim_end_matches(['.', ' ']).is_empty() {
            return Err(PathViolation::ParentSegment);
        }
        if segment.contains(':') || is_reserved_device(segment) {
            return Err(PathViolation::DeviceName);
        }
        out.push(
            segment
                .chars()
                .map(|c| if c.is_control() { '_' } else { c })
                .collect::<String>(),
        );
    }

    if out.is_empty() {
        return Err(PathViolation::Empty);
    }
    Ok(out.join("/"))
}

fn has_drive_prefix(segment: &str) -> bool {
    let b = segment.as_bytes();
    b.len() >= 2 && b[1] == b':' && b[0].is_ascii_alphabetic()
}

fn is_reserved_device(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or(segment).trim_end();
    RESERVED_DEVICES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
}
