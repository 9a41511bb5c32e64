//! Convert Chrome trace files to the processed Gecko profile format.
//!
//! Supported input formats:
//! - Chrome Performance traces (`.json`) in object or array form
//! - Standalone cpuprofile files (`.cpuprofile`)
//! - Processed profiles, which are validated and rewritten
//!
//! Inputs ending in `.gz` or `.zst` are decompressed on the fly.
//!
//! # Usage
//!
//! ```bash
//! chrome_to_gecko trace.json -o trace.gecko.json
//! chrome_to_gecko trace.json.gz --pretty
//! RUST_LOG=debug chrome_to_gecko profile.cpuprofile
//! ```

use clap::Parser;
use gecko_convert::ConverterConfig;
use gecko_convert::loader::load_file;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chrome_to_gecko")]
#[command(about = "Convert Chrome trace files to the processed Gecko profile format")]
#[command(version)]
struct Args {
    /// Input file (trace, cpuprofile, or processed profile; optionally .gz or .zst)
    input: PathBuf,

    /// Output file (defaults to the input name with a .gecko.json extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Indent the output JSON
    #[arg(long)]
    pretty: bool,

    /// Sampling interval to record, in milliseconds
    #[arg(long, default_value_t = 0.5)]
    interval: f64,

    /// Product name to record
    #[arg(long, default_value = "Chrome")]
    product: String,
}

fn default_output_path(input: &Path) -> PathBuf {
    let mut path = input.to_path_buf();
    if matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("gz" | "zst")
    ) {
        path.set_extension("");
    }
    path.set_extension("gecko.json");
    path
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));

    let config = ConverterConfig {
        interval_ms: args.interval,
        product: args.product.clone(),
        ..ConverterConfig::default()
    };

    let profile = load_file(&args.input, &config)
        .map_err(|e| format!("Failed to load '{}': {}", args.input.display(), e))?;
    info!(threads = profile.threads.len(), "profile ready");

    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    let mut writer = BufWriter::new(output_file);

    if args.pretty {
        profile.write_pretty(&mut writer)?;
    } else {
        profile.write(&mut writer)?;
    }
    writer.flush()?;

    let samples: usize = profile.threads.iter().map(|t| t.sample_count()).sum();
    let markers: usize = profile.threads.iter().map(|t| t.marker_count()).sum();
    eprintln!(
        "Converted '{}' -> '{}' ({} threads, {} samples, {} markers, {:.3} ms)",
        args.input.display(),
        output_path.display(),
        profile.threads.len(),
        samples,
        markers,
        profile.duration()
    );

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
