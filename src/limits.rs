use std::time::Duration;

/// How far a Deflate stream may run past its declared size before the
/// streaming guard aborts it.
pub const STREAM_SLACK: u64 = 64 * 1024;

const GIB: u64 = 1024 * 1024 * 1024;

/// Resource ceilings for one scan.
///
/// Sizes read from container headers are claims; these bounds are what
/// actually caps allocation and work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    /// Largest payload a single entry may declare or produce.
    pub max_entry_size: u64,
    /// Bytes materialized across all entries of a run, nested containers included.
    pub max_total_size: u64,
    /// Soft deadline, checked between entries.
    pub max_wall_clock: Duration,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_entry_size: GIB,
            max_total_size: 4 * GIB,
            max_wall_clock: Duration::from_secs(30),
        }
    }
}

impl ExtractionLimits {
    pub fn with_max_entry_size(mut self, bytes: u64) -> Self {
        self.max_entry_size = bytes;
        self
    }

    pub fn with_max_total_size(mut self, bytes: u64) -> Self {
        self.max_total_size = bytes;
        self
    }

    pub fn with_max_wall_clock(mut self, deadline: Duration) -> Self {
        self.max_wall_clock = deadline;
        self
    }

    /// Output ceiling for the streaming guard: declared size plus slack,
    /// never more than the per-entry limit plus slack.
    pub fn stream_ceiling(&self, declared: u64) -> u64 {
        declared
            .min(self.max_entry_size)
            .saturating_add(STREAM_SLACK)
    }
}
