//! Main entry point for the embedscan CLI application.
//!
//! The library does the parsing and extraction; this binary only maps
//! flags onto [`ScanOptions`](embedscan::ScanOptions), prints listings and
//! writes extracted payloads under the output directory.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use embedscan::{Cli, LocalFileReader, ScanMode, ScanResult, Scanner};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let reader = LocalFileReader::new(Path::new(&cli.file))
        .with_context(|| format!("cannot open {}", cli.file))?;
    let reader = Arc::new(reader);

    let scanner = Scanner::new(cli.scan_options());
    let cancel = scanner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current entry");
            cancel.cancel();
        }
    });

    let result = scanner.run(reader).await;
    if let Some(error) = &result.fatal {
        bail!("{}: {error}", cli.file);
    }

    match cli.mode() {
        ScanMode::List => print_listing(&result, cli.verbose),
        ScanMode::Extract => write_files(&result, &cli).await?,
    }

    tracing::info!(format = %result.format, "{}", result.summary());
    Ok(())
}

/// Print one line per entry, or a table with `-v`.
fn print_listing(result: &ScanResult, verbose: bool) {
    if !verbose {
        for file in &result.files {
            println!("{}", file.entry_name);
        }
        return;
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:<12}  Name",
        "Length", "Size", "Cmpr", "Type"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;
    for file in &result.files {
        println!(
            "{:>10}  {:>10}  {}  {:<12}  {}",
            file.size,
            file.compressed_size,
            ratio(file.size, file.compressed_size),
            file.detected_type.label,
            file.entry_name
        );
        if !file.is_directory {
            total_uncompressed = total_uncompressed.saturating_add(file.size);
            total_compressed = total_compressed.saturating_add(file.compressed_size);
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:<12}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_uncompressed, total_compressed),
        "",
        file_count
    );
}

/// Percentage saved by compression.
fn ratio(uncompressed: u64, compressed: u64) -> String {
    if uncompressed == 0 {
        return "   0%".to_string();
    }
    let kept = compressed.saturating_mul(100) / uncompressed;
    format!("{:>4}%", 100u64.saturating_sub(kept))
}

/// Write every record that carries data below the output directory.
async fn write_files(result: &ScanResult, cli: &Cli) -> Result<()> {
    let root = PathBuf::from(&cli.output_dir);
    fs::create_dir_all(&root)
        .await
        .with_context(|| format!("cannot create {}", root.display()))?;

    for file in &result.files {
        let path = root.join(output_path(&file.entry_name, cli.junk_paths));

        if file.is_directory {
            if !cli.junk_paths {
                fs::create_dir_all(&path).await?;
            }
            continue;
        }
        let Some(data) = &file.data else {
            continue;
        };

        if cli.never_overwrite && fs::try_exists(&path).await.unwrap_or(false) {
            if !cli.quiet {
                eprintln!("Skipping: {} (file exists)", file.entry_name);
            }
            continue;
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        if !cli.quiet {
            println!("  extracting: {}", file.entry_name);
        }
        fs::write(&path, data)
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;
    }

    Ok(())
}

/// Relative output path of an entry. Names are already sanitized; `-j`
/// keeps only the last segment.
fn output_path(entry_name: &str, junk_paths: bool) -> PathBuf {
    let mut segments = entry_name.split('/').filter(|s| !s.is_empty());
    if junk_paths {
        PathBuf::from(segments.next_back().unwrap_or_default())
    } else {
        segments.collect()
    }
}
