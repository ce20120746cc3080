use std::time::Duration;

use clap::Parser;

use crate::limits::ExtractionLimits;
use crate::scan::{ScanMode, ScanOptions};

#[derive(Parser, Debug)]
#[command(name = "embedscan")]
#[command(version)]
#[command(about = "List and extract files embedded in ZIP and OLE containers", long_about = None)]
#[command(after_help = "Examples:\n  \
  embedscan -l report.doc            list the streams inside an Office document\n  \
  embedscan -o out bundle.jar        extract every entry into ./out\n  \
  embedscan --depth 2 -o out a.zip   also open archives found inside the archive")]
pub struct Cli {
    /// Container file to inspect
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Extract entries into DIR
    #[arg(short = 'o', long = "output", value_name = "DIR", default_value = ".")]
    pub output_dir: String,

    /// List entries instead of extracting them
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// Verbose listing and debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Largest payload a single entry may produce, in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_entry_size: Option<u64>,

    /// Largest total of extracted bytes, in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_total_size: Option<u64>,

    /// Stop starting new entries after this many seconds
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Levels of nested containers to open
    #[arg(long = "depth", value_name = "N", default_value_t = 0)]
    pub depth: u32,
}

impl Cli {
    pub fn mode(&self) -> ScanMode {
        if self.list {
            ScanMode::List
        } else {
            ScanMode::Extract
        }
    }

    pub fn limits(&self) -> ExtractionLimits {
        let mut limits = ExtractionLimits::default();
        if let Some(bytes) = self.max_entry_size {
            limits = limits.with_max_entry_size(bytes);
        }
        if let Some(bytes) = self.max_total_size {
            limits = limits.with_max_total_size(bytes);
        }
        if let Some(secs) = self.timeout {
            limits = limits.with_max_wall_clock(Duration::from_secs(secs));
        }
        limits
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            mode: self.mode(),
            limits: self.limits(),
            nested_depth: self.depth,
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
