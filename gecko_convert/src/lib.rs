//! Chrome trace to processed Gecko profile conversion.
//!
//! This crate turns Chrome trace event files (and standalone V8 cpuprofiles)
//! into the columnar processed profile layout read by [`gecko_parse`].
//!
//! # Modules
//!
//! - [`chrome`] - Trace event and sampling payload input types
//! - [`convert`] - The conversion pipeline
//! - [`category`] - Category and extension mapping
//! - [`loader`] - Format detection and decompression
//!
//! # Example
//!
//! ```no_run
//! use gecko_convert::ConverterConfig;
//! use gecko_convert::loader::load_file;
//! use std::path::Path;
//!
//! let profile = load_file(Path::new("trace.json.gz"), &ConverterConfig::default()).unwrap();
//! println!("Threads: {}", profile.threads.len());
//! ```

pub mod category;
pub mod chrome;
pub mod convert;
pub mod loader;
pub mod samples;
pub mod session;
pub mod tables;
pub mod time;

pub use convert::{ChromeConverter, ConvertError, ConverterConfig, convert_events};

// Re-export gecko_parse for convenience
pub use gecko_parse;
