mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FLAG_UTF8, OleBuilder, RawEntry, ZipBuilder, stream};
use embedscan::signature;
use embedscan::{
    EntryError, ExtractionError, ExtractionLimits, FormatError, MemoryReader, ScanMode,
    ScanOptions, ScanWarning, Scanner, identify,
};

fn extract_options(limits: ExtractionLimits, nested_depth: u32) -> ScanOptions {
    ScanOptions {
        mode: ScanMode::Extract,
        limits,
        nested_depth,
    }
}

fn three_files() -> Vec<u8> {
    ZipBuilder::new()
        .stored("1.bin", &[1; 100])
        .stored("2.bin", &[2; 100])
        .stored("3.bin", &[3; 100])
        .build()
}

#[test]
fn short_inputs_are_unknown() {
    let ole_magic = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    for len in 0..ole_magic.len() {
        assert!(identify(&ole_magic[..len]).is_unknown());
    }
    for prefix in [&b""[..], b"P", b"PK", b"PK\x03", b"%PD", b"\x89PN"] {
        assert!(identify(prefix).is_unknown(), "{prefix:?}");
    }
    assert_eq!(identify(&ole_magic), signature::OLE);
}

#[tokio::test]
async fn cumulative_limit_stops_the_run_but_keeps_results() {
    let limits = ExtractionLimits::default().with_max_total_size(250);
    let scanner = Scanner::new(extract_options(limits, 0));

    let result = scanner.run(Arc::new(MemoryReader::new(three_files()))).await;
    assert_eq!(result.files.len(), 2);
    assert_eq!(
        result.warnings,
        [ScanWarning::TotalSizeExceeded {
            limit: 250,
            skipped: 1
        }]
    );
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn per_entry_limit_fails_single_entries() {
    let zip = ZipBuilder::new()
        .stored("small.bin", &[0; 10])
        .stored("large.bin", &[0; 100])
        .stored("small2.bin", &[0; 10])
        .build();
    let limits = ExtractionLimits::default().with_max_entry_size(50);
    let scanner = Scanner::new(extract_options(limits, 0));

    let result = scanner.run(Arc::new(MemoryReader::new(zip))).await;
    assert_eq!(result.files.len(), 2);
    assert!(result.warnings.is_empty());
    assert!(matches!(
        &result.errors[0],
        EntryError::Extraction {
            name,
            source: ExtractionError::EntryTooLarge { declared: 100, limit: 50 },
        } if name == "large.bin"
    ));
}

#[tokio::test]
async fn expired_deadline_skips_remaining_entries() {
    let limits = ExtractionLimits::default().with_max_wall_clock(Duration::ZERO);
    let scanner = Scanner::new(extract_options(limits, 0));

    let result = scanner.run(Arc::new(MemoryReader::new(three_files()))).await;
    assert!(result.files.is_empty());
    assert_eq!(
        result.warnings,
        [ScanWarning::DeadlineExceeded { skipped: 3 }]
    );
}

#[tokio::test]
async fn cancellation_is_checked_between_entries() {
    let scanner = Scanner::new(extract_options(ExtractionLimits::default(), 0));
    let token = scanner.cancel_token();
    token.cancel();
    assert!(token.is_cancelled());

    let result = scanner.run(Arc::new(MemoryReader::new(three_files()))).await;
    assert!(result.files.is_empty());
    assert_eq!(result.warnings, [ScanWarning::Cancelled { skipped: 3 }]);
}

#[tokio::test]
async fn nested_containers_are_opt_in() {
    let inner = ZipBuilder::new().stored("a.txt", b"hi").build();
    let document = OleBuilder::new()
        .add(stream("WordDocument", b"body"))
        .build()
        .bytes;
    let outer = ZipBuilder::new()
        .stored("inner.zip", &inner)
        .stored("report.doc", &document)
        .build();

    let flat = Scanner::new(extract_options(ExtractionLimits::default(), 0))
        .run(Arc::new(MemoryReader::new(outer.clone())))
        .await;
    assert_eq!(flat.files.len(), 2);
    assert_eq!(flat.files[0].detected_type, signature::ZIP);
    assert_eq!(flat.files[1].detected_type, signature::OLE);

    let nested = Scanner::new(extract_options(ExtractionLimits::default(), 1))
        .run(Arc::new(MemoryReader::new(outer)))
        .await;
    assert!(nested.errors.is_empty(), "{:?}", nested.errors);
    let names: Vec<_> = nested.files.iter().map(|f| f.entry_name.as_str()).collect();
    assert_eq!(
        names,
        [
            "inner.zip",
            "inner.zip!/a.txt",
            "report.doc",
            "report.doc!/WordDocument"
        ]
    );
    assert_eq!(nested.files[1].data.as_deref(), Some(&b"hi"[..]));
    assert_eq!(nested.entry_count(), 4);
}

#[tokio::test]
async fn nesting_stops_at_the_requested_depth() {
    let innermost = ZipBuilder::new().stored("deep.txt", b"x").build();
    let middle = ZipBuilder::new().stored("m.zip", &innermost).build();
    let outer = ZipBuilder::new().stored("o.zip", &middle).build();

    let result = Scanner::new(extract_options(ExtractionLimits::default(), 1))
        .run(Arc::new(MemoryReader::new(outer)))
        .await;
    let names: Vec<_> = result.files.iter().map(|f| f.entry_name.as_str()).collect();
    assert_eq!(names, ["o.zip", "o.zip!/m.zip"]);
}

#[tokio::test]
async fn broken_nested_container_is_an_entry_error() {
    let outer = ZipBuilder::new()
        .stored("broken.zip", b"PK\x03\x04 and nothing else")
        .build();

    let result = Scanner::new(extract_options(ExtractionLimits::default(), 2))
        .run(Arc::new(MemoryReader::new(outer)))
        .await;
    assert!(result.fatal.is_none());
    assert_eq!(result.files.len(), 1);
    assert!(matches!(
        &result.errors[0],
        EntryError::NestedContainer {
            name,
            source: FormatError::NoCentralDirectory,
        } if name == "broken.zip"
    ));
}

#[tokio::test]
async fn nested_bytes_count_against_the_total_budget() {
    let inner = ZipBuilder::new().stored("a.bin", &[7; 400]).build();
    let outer = ZipBuilder::new()
        .stored("inner.zip", &inner)
        .stored("after.bin", &[1; 10])
        .build();
    let limits = ExtractionLimits::default().with_max_total_size(inner.len() as u64 + 100);

    let result = Scanner::new(extract_options(limits, 1))
        .run(Arc::new(MemoryReader::new(outer)))
        .await;
    assert_eq!(result.files.len(), 1);
    assert!(matches!(
        result.warnings[..],
        [ScanWarning::TotalSizeExceeded { skipped: 1, .. }]
    ));
}

#[tokio::test]
async fn nested_parse_errors_carry_the_parent_name() {
    let inner = ZipBuilder::new()
        .raw(RawEntry {
            name: vec![b'a', 0xFF],
            flags: FLAG_UTF8,
            method: 0,
            crc: 0,
            uncompressed_size: 0,
            payload: Vec::new(),
        })
        .stored("ok.txt", b"ok")
        .build();
    let outer = ZipBuilder::new().stored("inner.zip", &inner).build();

    let result = Scanner::new(extract_options(ExtractionLimits::default(), 1))
        .run(Arc::new(MemoryReader::new(outer)))
        .await;
    assert_eq!(result.errors.len(), 1);
    assert!(matches!(
        &result.errors[0],
        EntryError::NameEncoding { index: 0, .. }
    ));
    assert_eq!(result.errors[0].entry_name(), "inner.zip!/a\u{FFFD}");
    assert_eq!(result.summary(), "2 of 3 entries extracted, 1 failed");
}
