//! Chrome trace to processed profile conversion.
//!
//! The conversion runs in five passes over the event list:
//!
//! 1. thread and process names are read from metadata events,
//! 2. duration and instant events become markers on their thread,
//! 3. sampling session start events are correlated by id,
//! 4. sampled call trees are rebuilt into stack tables and samples,
//! 5. threads are finished and the profile meta is filled in.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use gecko_convert::ChromeConverter;
//!
//! let input = File::open("trace.json").unwrap();
//! let output = File::create("trace.gecko.json").unwrap();
//!
//! let mut converter = ChromeConverter::new();
//! converter.parse(input).unwrap();
//! converter.write_gecko(output).unwrap();
//! ```

use crate::category::{ExtensionSet, categorize_event, gecko_categories};
use crate::chrome::{
    CPU_PROFILE_EVENT, PROFILE_CHUNK_EVENT, Phase, SamplingData, TraceEvent, TraceFile,
    wrap_cpu_profile,
};
use crate::samples::SessionState;
use crate::session::SessionTable;
use crate::tables::ThreadBuilder;
use crate::time::{TimeRange, resolve_time_origin, us_to_ms};
use chrono::{DateTime, NaiveDateTime};
use gecko_parse::{GECKO_PROFILE_VERSION, Meta, PROCESSED_PROFILE_VERSION, Profile, WriteError};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{Read, Write};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("write error: {0}")]
    Write(#[from] WriteError),

    #[error("invalid trace: {0}")]
    InvalidTrace(String),
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Conversion settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterConfig {
    /// Nominal sampling interval written into the profile, in milliseconds.
    pub interval_ms: f64,
    /// Product name written into the profile.
    pub product: String,
    /// Thread names flagged as main threads.
    pub main_thread_names: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            interval_ms: 0.5,
            product: "Chrome".to_string(),
            main_thread_names: vec!["CrBrowserMain".to_string(), "CrRendererMain".to_string()],
        }
    }
}

// ============================================================================
// Converter
// ============================================================================

/// Converts Chrome traces and cpuprofiles into processed profiles.
#[derive(Debug, Default)]
pub struct ChromeConverter {
    config: ConverterConfig,
    events: Option<Vec<TraceEvent>>,
    metadata: Option<Value>,
}

impl ChromeConverter {
    /// Create a converter with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        Self {
            config,
            events: None,
            metadata: None,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Parse a trace file or standalone cpuprofile from a reader.
    pub fn parse<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut contents = String::new();
        let mut buf_reader = std::io::BufReader::new(reader);
        buf_reader.read_to_string(&mut contents)?;

        let value: Value = serde_json::from_str(&contents)?;
        self.parse_value(value)
    }

    /// Parse an already decoded JSON document.
    ///
    /// Trace files have `traceEvents` or are a bare event array, standalone
    /// cpuprofiles have `nodes` at the top level.
    pub fn parse_value(&mut self, value: Value) -> Result<()> {
        if value.is_array() || value.get("traceEvents").is_some() {
            let trace: TraceFile = serde_json::from_value(value)?;
            let (events, metadata) = trace.into_parts();
            self.events = Some(events);
            self.metadata = metadata;
        } else if value.get("nodes").is_some() {
            self.events = Some(wrap_cpu_profile(value));
            self.metadata = None;
        } else {
            return Err(ConvertError::InvalidTrace(
                "unrecognized format: expected 'traceEvents' or 'nodes' field".into(),
            ));
        }
        Ok(())
    }

    /// Number of events parsed so far.
    pub fn event_count(&self) -> usize {
        self.events.as_ref().map_or(0, Vec::len)
    }

    /// Build the processed profile from the parsed trace.
    pub fn convert(&self) -> Result<Profile> {
        let events = self
            .events
            .as_deref()
            .ok_or_else(|| ConvertError::InvalidTrace("no trace parsed".into()))?;
        Ok(convert_events(events, self.metadata.as_ref(), &self.config))
    }

    /// Write the converted profile as compact JSON.
    pub fn write_gecko<W: Write>(&self, writer: W) -> Result<()> {
        self.convert()?.write(writer)?;
        Ok(())
    }

    /// Write the converted profile as indented JSON.
    pub fn write_gecko_pretty<W: Write>(&self, writer: W) -> Result<()> {
        self.convert()?.write_pretty(writer)?;
        Ok(())
    }
}

/// Convert a list of trace events into a processed profile.
pub fn convert_events(
    events: &[TraceEvent],
    metadata: Option<&Value>,
    config: &ConverterConfig,
) -> Profile {
    let origin = resolve_time_origin(events).unwrap_or_else(|| {
        debug!("no positive timestamps, using zero time origin");
        0.0
    });
    debug!(events = events.len(), origin, "converting trace");

    let mut conversion = Conversion::new(config, origin);
    conversion.extract_metadata(events);
    conversion.route_events(events);
    let sessions = SessionTable::build(events);
    conversion.reconstruct_samples(events, &sessions);
    conversion.assemble(metadata)
}

// ============================================================================
// Conversion passes
// ============================================================================

struct Conversion<'a> {
    config: &'a ConverterConfig,
    /// Time origin in microseconds.
    origin: f64,
    range: TimeRange,
    threads: HashMap<(u64, u64), ThreadBuilder>,
    process_names: HashMap<u64, String>,
    extensions: ExtensionSet,
    /// Keyed by the resolved thread and the chunk id, so uncorrelated chunks
    /// that reuse an id on different threads never share a node map.
    session_states: HashMap<(u64, u64, Option<String>), SessionState>,
}

impl<'a> Conversion<'a> {
    fn new(config: &'a ConverterConfig, origin: f64) -> Self {
        Self {
            config,
            origin,
            range: TimeRange::default(),
            threads: HashMap::new(),
            process_names: HashMap::new(),
            extensions: ExtensionSet::new(),
            session_states: HashMap::new(),
        }
    }

    fn thread(&mut self, pid: u64, tid: u64) -> &mut ThreadBuilder {
        self.threads
            .entry((pid, tid))
            .or_insert_with(|| ThreadBuilder::new(pid, tid))
    }

    fn extract_metadata(&mut self, events: &[TraceEvent]) {
        for event in events.iter().filter(|event| event.phase() == Phase::Metadata) {
            let name = event.args.get("name").and_then(Value::as_str);
            match (event.name.as_str(), name) {
                ("thread_name", Some(name)) => {
                    self.thread(event.pid, event.tid).name = Some(name.to_string());
                }
                ("process_name", Some(name)) => {
                    self.process_names.insert(event.pid, name.to_string());
                }
                ("thread_name" | "process_name", None) => {
                    debug!(pid = event.pid, tid = event.tid, "name record without a name");
                }
                _ => {}
            }
        }
    }

    fn route_events(&mut self, events: &[TraceEvent]) {
        for event in events {
            self.range.widen(event);

            let phase = event.phase();
            if phase == Phase::Metadata {
                continue;
            }

            let start = us_to_ms(event.ts - self.origin);
            let thread = self.thread(event.pid, event.tid);
            match phase {
                Phase::Complete => {
                    let duration = us_to_ms(event.dur.unwrap_or(0.0).max(0.0));
                    thread.add_marker(
                        &event.name,
                        categorize_event(&event.cat),
                        start,
                        Some(start + duration),
                        event.payload(),
                    );
                }
                Phase::Instant | Phase::Mark => {
                    thread.add_marker(
                        &event.name,
                        categorize_event(&event.cat),
                        start,
                        None,
                        event.payload(),
                    );
                }
                _ => {}
            }
        }
    }

    fn reconstruct_samples(&mut self, events: &[TraceEvent], sessions: &SessionTable) {
        for event in events {
            let standalone = match event.name.as_str() {
                CPU_PROFILE_EVENT => true,
                PROFILE_CHUNK_EVENT => false,
                _ => continue,
            };
            let Some(data) = event.data() else {
                continue;
            };
            let sampling: SamplingData = match serde_json::from_value(data.clone()) {
                Ok(sampling) => sampling,
                Err(e) => {
                    warn!(name = %event.name, ts = event.ts, error = %e, "skipping unreadable sampling payload");
                    continue;
                }
            };
            let Some(cpu_profile) = &sampling.cpu_profile else {
                continue;
            };

            let target = event.id.as_deref().and_then(|id| sessions.get(id)).copied();
            let (pid, tid) = target.map_or((event.pid, event.tid), |target| (target.pid, target.tid));

            let thread = self
                .threads
                .entry((pid, tid))
                .or_insert_with(|| ThreadBuilder::new(pid, tid));

            let mut fresh = SessionState::new();
            let state = if standalone {
                &mut fresh
            } else {
                self.session_states
                    .entry((pid, tid, event.id.clone()))
                    .or_default()
            };

            state.add_nodes(thread, &cpu_profile.nodes, &mut self.extensions);

            let start = cpu_profile
                .start_time
                .or(state.clock())
                .or(target.map(|target| target.start_time))
                .unwrap_or(event.ts);
            state.add_samples(
                thread,
                &cpu_profile.samples,
                sampling.deltas(),
                start,
                self.origin,
            );
        }
    }

    fn assemble(self, metadata: Option<&Value>) -> Profile {
        let mut builders: Vec<ThreadBuilder> = self.threads.into_values().collect();
        builders.sort_by_key(|builder| (builder.pid, builder.tid));

        let threads: Vec<_> = builders
            .into_iter()
            .map(|builder| {
                let process_name = self.process_names.get(&builder.pid).map(String::as_str);
                builder.finish(process_name, self.config)
            })
            .collect();

        let profiling_start = self
            .range
            .min()
            .map_or(0.0, |min| us_to_ms(min - self.origin));
        let duration = us_to_ms(self.range.duration());

        debug!(
            threads = threads.len(),
            extensions = self.extensions.len(),
            duration_ms = duration,
            "assembled profile"
        );

        Profile {
            meta: Meta {
                interval: self.config.interval_ms,
                start_time: metadata_start_time(metadata),
                profiling_start_time: Some(profiling_start),
                profiling_end_time: Some(profiling_start + duration),
                version: GECKO_PROFILE_VERSION,
                preprocessed_profile_version: PROCESSED_PROFILE_VERSION,
                product: self.config.product.clone(),
                platform: metadata
                    .and_then(|metadata| metadata.get("os-name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                imported_from: Some("chrome".to_string()),
                categories: gecko_categories(),
                extensions: self.extensions.into_table(),
            },
            threads,
        }
    }
}

/// Wall clock start of the recording in milliseconds since the epoch.
///
/// Reads `startTime` (RFC 3339, as written by DevTools) or
/// `trace-capture-datetime` (as written by `chrome://tracing`). Zero when
/// neither is present or readable.
fn metadata_start_time(metadata: Option<&Value>) -> f64 {
    let Some(metadata) = metadata else {
        return 0.0;
    };

    if let Some(start) = metadata.get("startTime") {
        if let Some(ms) = start.as_f64() {
            return ms;
        }
        if let Some(time) = start
            .as_str()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        {
            return time.timestamp_millis() as f64;
        }
    }

    metadata
        .get("trace-capture-datetime")
        .and_then(Value::as_str)
        .and_then(|text| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok())
        .map_or(0.0, |time| time.and_utc().timestamp_millis() as f64)
}
