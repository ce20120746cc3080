//! Top-level driver: detect, parse, then list or extract every entry.
//!
//! One bad entry never ends a run. Only a container-level [`FormatError`]
//! does, and even then the caller gets a [`ScanResult`] back rather than an
//! `Err`, so partial results and failures are reported the same way.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use thiserror::Error;

use crate::container::{ContainerEntry, ContainerFormat, ContainerHandle, ParsedContainer};
use crate::error::{EntryError, FormatError};
use crate::extract::EntryExtractor;
use crate::io::{MemoryReader, ReadAt};
use crate::limits::ExtractionLimits;
use crate::signature::{self, FileType};

/// Whether payloads are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Metadata only. No payload byte is read.
    #[default]
    List,
    Extract,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub mode: ScanMode,
    pub limits: ExtractionLimits,
    /// How many levels of containers inside extracted payloads to open.
    /// Zero disables nested scanning.
    pub nested_depth: u32,
}

/// Shared flag for aborting a run between entries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One emitted entry record.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Display name in list mode, sanitized relative path in extract mode.
    /// Entries of nested containers are prefixed with `"{parent}!/"`.
    pub entry_name: String,
    pub is_directory: bool,
    /// Declared size in list mode, materialized size in extract mode.
    pub size: u64,
    pub compressed_size: u64,
    pub detected_type: FileType,
    /// Present only in extract mode.
    pub data: Option<Vec<u8>>,
    /// Bytes were produced but failed a size or checksum check.
    pub corrupt: bool,
}

/// Run-level conditions that stopped processing early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanWarning {
    #[error("total extraction limit of {limit} bytes reached, {skipped} entries skipped")]
    TotalSizeExceeded { limit: u64, skipped: usize },

    #[error("deadline passed, {skipped} entries skipped")]
    DeadlineExceeded { skipped: usize },

    #[error("cancelled, {skipped} entries skipped")]
    Cancelled { skipped: usize },
}

/// Everything one run produced.
#[derive(Debug)]
pub struct ScanResult {
    pub format: ContainerFormat,
    pub files: Vec<ExtractedFile>,
    pub errors: Vec<EntryError>,
    pub warnings: Vec<ScanWarning>,
    /// Container-level failure. When set, `files` is empty.
    pub fatal: Option<FormatError>,
    entry_count: usize,
}

impl ScanResult {
    fn new() -> Self {
        Self {
            format: ContainerFormat::Unknown,
            files: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            fatal: None,
            entry_count: 0,
        }
    }

    fn failed(format: ContainerFormat, error: FormatError) -> Self {
        tracing::warn!(%format, %error, "container rejected");
        Self {
            format,
            fatal: Some(error),
            ..Self::new()
        }
    }

    /// Non-directory entries the parsers met, dropped ones and nested ones
    /// included. Directories are listed but never counted.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Non-directory records carrying data.
    pub fn extracted_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| !f.is_directory && f.data.is_some())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.errors.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} entries extracted, {} failed",
            self.extracted_count(),
            self.entry_count,
            self.failed_count()
        )
    }
}

/// Mutable bookkeeping shared by a run and its nested scans.
struct RunState {
    result: ScanResult,
    total: u64,
    deadline: Option<Instant>,
    halted: bool,
}

type ScanFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

pub struct Scanner {
    options: ScanOptions,
    cancel: CancelToken,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::default(),
        }
    }

    /// Token that aborts this scanner's runs at the next entry boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn run<R: ReadAt + 'static>(&self, reader: Arc<R>) -> ScanResult {
        let handle = match ContainerHandle::open(reader).await {
            Ok(handle) => handle,
            Err(e) => return ScanResult::failed(ContainerFormat::Unknown, e),
        };
        let format = handle.format();
        let parsed = match handle.parse().await {
            Ok(parsed) => parsed,
            Err(e) => return ScanResult::failed(format, e),
        };
        tracing::debug!(%format, entries = parsed.entries.len(), "container parsed");

        let mut state = RunState {
            result: ScanResult {
                format,
                ..ScanResult::new()
            },
            total: 0,
            deadline: Instant::now().checked_add(self.options.limits.max_wall_clock),
            halted: false,
        };
        self.scan_entries(handle.reader().as_ref(), parsed, None, 0, &mut state)
            .await;
        state.result
    }

    fn scan_entries<'a>(
        &'a self,
        reader: &'a dyn ReadAt,
        parsed: ParsedContainer,
        prefix: Option<&'a str>,
        depth: u32,
        state: &'a mut RunState,
    ) -> ScanFuture<'a> {
        Box::pin(async move {
            let ParsedContainer {
                entries,
                errors,
                layout,
            } = parsed;
            let files = entries.iter().filter(|e| !e.is_directory).count();
            state.result.entry_count += files + errors.len();
            state
                .result
                .errors
                .extend(errors.into_iter().map(|e| e.renamed(|name| qualify(prefix, name))));

            let extractor = EntryExtractor::new(reader, &layout, self.options.limits);
            for (position, entry) in entries.iter().enumerate() {
                if state.halted {
                    return;
                }
                let skipped = entries.len() - position;
                if self.cancel.is_cancelled() {
                    halt(state, ScanWarning::Cancelled { skipped });
                    return;
                }
                if state.deadline.is_some_and(|d| Instant::now() >= d) {
                    halt(state, ScanWarning::DeadlineExceeded { skipped });
                    return;
                }

                let shown = qualify(prefix, &entry.display_name());
                tracing::info!(
                    name = %shown,
                    size = entry.uncompressed_size,
                    directory = entry.is_directory,
                    "found embedded entry"
                );

                if let Some(error) = unusable(entry, &shown) {
                    tracing::warn!(%error, "entry cannot be extracted");
                    state.result.errors.push(error);
                    if self.options.mode == ScanMode::List {
                        state.result.files.push(listing(entry, shown));
                    }
                    continue;
                }

                match self.options.mode {
                    ScanMode::List => state.result.files.push(listing(entry, shown)),
                    ScanMode::Extract => {
                        self.extract_one(&extractor, entry, shown, prefix, depth, skipped, state)
                            .await
                    }
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn extract_one(
        &self,
        extractor: &EntryExtractor<'_, dyn ReadAt + '_>,
        entry: &ContainerEntry,
        shown: String,
        prefix: Option<&str>,
        depth: u32,
        skipped: usize,
        state: &mut RunState,
    ) {
        let limits = &self.options.limits;
        let budget = limits.max_total_size.saturating_sub(state.total);
        if entry.uncompressed_size <= limits.max_entry_size && entry.uncompressed_size > budget {
            halt(
                state,
                ScanWarning::TotalSizeExceeded {
                    limit: limits.max_total_size,
                    skipped,
                },
            );
            return;
        }

        let payload = match extractor.extract(entry).await {
            Ok(payload) => payload,
            Err(source) => {
                tracing::warn!(name = %shown, error = %source, "extraction failed");
                state.result.errors.push(EntryError::Extraction {
                    name: shown,
                    source,
                });
                return;
            }
        };

        let size = payload.data.len() as u64;
        if size > budget {
            halt(
                state,
                ScanWarning::TotalSizeExceeded {
                    limit: limits.max_total_size,
                    skipped,
                },
            );
            return;
        }
        state.total += size;

        let entry_name = qualify(prefix, &payload.path);
        let corrupt = payload.is_corrupt();
        if let Some(source) = payload.defect {
            state.result.errors.push(EntryError::Extraction {
                name: entry_name.clone(),
                source,
            });
        }

        if entry.is_directory {
            state.result.files.push(ExtractedFile {
                entry_name,
                is_directory: true,
                size: 0,
                compressed_size: 0,
                detected_type: FileType::UNKNOWN,
                data: None,
                corrupt: false,
            });
            return;
        }

        let detected_type = signature::identify(&payload.data);
        tracing::info!(name = %entry_name, size, file_type = %detected_type, "extracted entry");

        let nested = depth < self.options.nested_depth
            && ContainerFormat::from_file_type(detected_type) != ContainerFormat::Unknown;
        let data = payload.data;
        let nested_bytes = nested.then(|| data.clone());
        state.result.files.push(ExtractedFile {
            entry_name: entry_name.clone(),
            is_directory: false,
            size,
            compressed_size: entry.compressed_size,
            detected_type,
            data: Some(data),
            corrupt,
        });

        if let Some(bytes) = nested_bytes {
            self.scan_nested(entry_name, bytes, depth + 1, state).await;
        }
    }

    /// Open an extracted payload as a container of its own.
    async fn scan_nested(&self, name: String, bytes: Vec<u8>, depth: u32, state: &mut RunState) {
        tracing::debug!(%name, depth, "scanning nested container");
        let reader = Arc::new(MemoryReader::new(bytes));
        let parsed = match ContainerHandle::open(reader.clone()).await {
            Ok(handle) => handle.parse().await,
            Err(e) => Err(e),
        };
        match parsed {
            Ok(parsed) => {
                self.scan_entries(reader.as_ref(), parsed, Some(&name), depth, state)
                    .await
            }
            Err(source) => {
                tracing::warn!(%name, error = %source, "nested container rejected");
                state.result.errors.push(EntryError::NestedContainer { name, source });
            }
        }
    }
}

/// Scan with a fresh [`Scanner`] and no nested scanning.
pub async fn run<R: ReadAt + 'static>(
    reader: Arc<R>,
    mode: ScanMode,
    limits: ExtractionLimits,
) -> ScanResult {
    Scanner::new(ScanOptions {
        mode,
        limits,
        nested_depth: 0,
    })
    .run(reader)
    .await
}

fn halt(state: &mut RunState, warning: ScanWarning) {
    tracing::warn!(%warning, "scan stopped early");
    state.result.warnings.push(warning);
    state.halted = true;
}

fn qualify(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(parent) => format!("{parent}!/{name}"),
        None => name.to_owned(),
    }
}

/// Entries reported without touching their payload.
fn unusable(entry: &ContainerEntry, shown: &str) -> Option<EntryError> {
    if entry.is_directory {
        return None;
    }
    if entry.encrypted {
        return Some(EntryError::Encrypted {
            name: shown.to_owned(),
        });
    }
    let method = entry.compression_method;
    (!method.is_supported()).then(|| EntryError::UnsupportedCompression {
        name: shown.to_owned(),
        method: method.as_u16(),
    })
}

fn listing(entry: &ContainerEntry, shown: String) -> ExtractedFile {
    ExtractedFile {
        entry_name: shown,
        is_directory: entry.is_directory,
        size: entry.uncompressed_size,
        compressed_size: entry.compressed_size,
        detected_type: FileType::UNKNOWN,
        data: None,
        corrupt: false,
    }
}
