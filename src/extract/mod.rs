//! Safe materialization of entry payloads.
//!
//! Nothing here writes to disk. The extractor hands back bytes plus a
//! sanitized relative path; where those bytes go is up to the caller.

mod extractor;
mod inflate;
mod sanitize;

pub use extractor::{EntryExtractor, ExtractedPayload};
pub use inflate::inflate_bounded;
pub use sanitize::sanitize_entry_name;
