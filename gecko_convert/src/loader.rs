//! Input loading with format detection.
//!
//! A loaded file is either already a processed profile, which is validated
//! and returned as is, or a Chrome trace or cpuprofile, which is converted.
//! Files ending in `.gz` or `.zst` are decompressed first.

use crate::convert::{ChromeConverter, ConvertError, ConverterConfig};
use flate2::read::GzDecoder;
use gecko_parse::{ParseError, Profile};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while loading an input file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid processed profile: {0}")]
    Processed(#[from] ParseError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// Detected layout of a JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Already a processed profile.
    Processed,
    /// A Chrome trace in object or array form, or a standalone cpuprofile.
    ChromeTrace,
    Unknown,
}

/// Classify a decoded document by its top-level shape.
pub fn classify(value: &Value) -> InputFormat {
    if value.get("meta").is_some() && value.get("threads").is_some() {
        return InputFormat::Processed;
    }
    if value.get("traceEvents").is_some() {
        return InputFormat::ChromeTrace;
    }
    if let Some(events) = value.as_array() {
        let looks_like_events = events
            .first()
            .is_none_or(|first| first.get("ph").is_some());
        if looks_like_events {
            return InputFormat::ChromeTrace;
        }
    }
    if value.get("nodes").is_some() && value.get("samples").is_some() {
        return InputFormat::ChromeTrace;
    }
    InputFormat::Unknown
}

/// Compression applied to an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Pick the compression from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("zst") => Compression::Zstd,
            _ => Compression::None,
        }
    }
}

/// Wrap a reader in the matching decompressor.
pub fn decompress<'a, R: Read + 'a>(
    reader: R,
    compression: Compression,
) -> std::io::Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(GzDecoder::new(reader)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
    })
}

/// Open a file for reading, decompressing it based on its extension.
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let compression = Compression::from_path(path);
    debug!(path = %path.display(), ?compression, "opening input");
    Ok(decompress(BufReader::new(file), compression)?)
}

/// Load a processed profile from any supported input document.
pub fn load_profile<R: Read>(reader: R, config: &ConverterConfig) -> Result<Profile> {
    let value: Value = serde_json::from_reader(BufReader::new(reader))?;
    let format = classify(&value);
    debug!(?format, "classified input");

    match format {
        InputFormat::Processed => Ok(Profile::from_value(value)?),
        InputFormat::ChromeTrace => convert_value(value, config),
        InputFormat::Unknown => {
            if let Ok(profile) = Profile::from_value(value.clone()) {
                return Ok(profile);
            }
            convert_value(value, config)
        }
    }
}

/// Load and convert a file from disk.
pub fn load_file(path: &Path, config: &ConverterConfig) -> Result<Profile> {
    load_profile(open_input(path)?, config)
}

fn convert_value(value: Value, config: &ConverterConfig) -> Result<Profile> {
    let mut converter = ChromeConverter::with_config(config.clone());
    converter.parse_value(value)?;
    Ok(converter.convert()?)
}
