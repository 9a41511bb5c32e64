//! Chrome trace event input model.
//!
//! # Supported Formats
//!
//! 1. **Trace event object** (`.json`): `{"traceEvents": [...], "metadata": {...}}`,
//!    the format written by the DevTools Performance panel and `chrome://tracing`.
//!
//! 2. **Trace event array**: a bare top-level array of events.
//!
//! 3. **Standalone cpuprofile** (`.cpuprofile`): the V8 JSON format with
//!    `nodes`, `samples`, and `timeDeltas` at the top level. It is wrapped in
//!    a synthetic `CpuProfile` event so it flows through the same pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

/// Event name of the sampling session start record.
pub const PROFILE_EVENT: &str = "Profile";
/// Event name of an incremental sampling chunk.
pub const PROFILE_CHUNK_EVENT: &str = "ProfileChunk";
/// Event name of a complete, self-contained CPU profile.
pub const CPU_PROFILE_EVENT: &str = "CpuProfile";

/// Process id given to the synthetic thread of a standalone cpuprofile.
pub const CPU_PROFILE_PID: u64 = 0;
/// Thread id given to the synthetic thread of a standalone cpuprofile.
pub const CPU_PROFILE_TID: u64 = 0;

// ============================================================================
// Trace file types
// ============================================================================

/// A Chrome trace file in object or array form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TraceFile {
    Object {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<TraceEvent>,
        #[serde(default)]
        metadata: Option<Value>,
    },
    Array(Vec<TraceEvent>),
}

impl TraceFile {
    /// Split into the event list and the optional metadata object.
    pub fn into_parts(self) -> (Vec<TraceEvent>, Option<Value>) {
        match self {
            TraceFile::Object {
                trace_events,
                metadata,
            } => (trace_events, metadata),
            TraceFile::Array(events) => (events, None),
        }
    }
}

/// Trace event phase, from the single character `ph` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Complete,
    Begin,
    End,
    Instant,
    Mark,
    Metadata,
    Sample,
    Counter,
    ObjectCreated,
    ObjectSnapshot,
    ObjectDestroyed,
    Flow,
    Async,
    Other,
}

impl Phase {
    pub fn from_ph(ph: &str) -> Self {
        match ph {
            "X" => Phase::Complete,
            "B" => Phase::Begin,
            "E" => Phase::End,
            "I" | "i" => Phase::Instant,
            "R" => Phase::Mark,
            "M" => Phase::Metadata,
            "P" => Phase::Sample,
            "C" => Phase::Counter,
            "N" => Phase::ObjectCreated,
            "O" => Phase::ObjectSnapshot,
            "D" => Phase::ObjectDestroyed,
            "s" | "t" | "f" => Phase::Flow,
            "b" | "e" | "n" | "S" | "T" | "p" | "F" => Phase::Async,
            _ => Phase::Other,
        }
    }
}

/// A single trace event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceEvent {
    /// Event name.
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub name: String,
    /// Comma separated category tags.
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub cat: String,
    /// Phase character.
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub ph: String,
    /// Timestamp in microseconds.
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub ts: f64,
    /// Duration in microseconds, for complete events.
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub dur: Option<f64>,
    /// Process ID.
    #[serde(default, deserialize_with = "deserialize_id_number")]
    pub pid: u64,
    /// Thread ID.
    #[serde(default, deserialize_with = "deserialize_id_number")]
    pub tid: u64,
    /// Thread clock timestamp in microseconds.
    #[serde(default, deserialize_with = "deserialize_optional_f64")]
    pub tts: Option<f64>,
    /// Event arguments.
    #[serde(default)]
    pub args: Value,
    /// Event ID - can be string or number.
    #[serde(default, deserialize_with = "deserialize_optional_string_or_number")]
    pub id: Option<String>,
}

impl TraceEvent {
    pub fn phase(&self) -> Phase {
        Phase::from_ph(&self.ph)
    }

    /// The `args.data` payload, if any.
    pub fn data(&self) -> Option<&Value> {
        self.args.get("data")
    }

    /// Arguments worth keeping as marker payload: not null, not `{}`.
    pub fn payload(&self) -> Option<Value> {
        match &self.args {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(other.clone()),
        }
    }
}

/// Deserialize a string, keeping numbers as text and dropping anything else.
fn deserialize_lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Deserialize a number, treating anything else as zero.
fn deserialize_lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(0.0))
}

/// Deserialize an optional number, treating anything else as absent.
fn deserialize_optional_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(value.as_f64())
}

/// Deserialize a process or thread id that may be a number or numeric string.
fn deserialize_id_number<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Deserialize an optional field that can be either a string or number.
fn deserialize_optional_string_or_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Deserialize::deserialize(deserializer)?;
    match value {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Ok(None),
    }
}

// ============================================================================
// Sampling payload types
// ============================================================================

/// Data from a `Profile` session start event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEventData {
    /// Session start time in microseconds.
    #[serde(default)]
    pub start_time: Option<f64>,
}

/// Data from a `ProfileChunk` or `CpuProfile` event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingData {
    /// CPU profile data carried by the event.
    #[serde(default)]
    pub cpu_profile: Option<CpuProfileData>,
    /// Time deltas for samples in this chunk.
    #[serde(default)]
    pub time_deltas: Vec<f64>,
}

impl SamplingData {
    /// Per-sample time deltas, wherever the producer placed them.
    pub fn deltas(&self) -> &[f64] {
        match &self.cpu_profile {
            Some(profile) if self.time_deltas.is_empty() => &profile.time_deltas,
            _ => &self.time_deltas,
        }
    }
}

/// The node and sample lists of a sampling payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuProfileData {
    /// Nodes added by this payload.
    #[serde(default)]
    pub nodes: Vec<ProfileNode>,
    /// Node IDs of the top of the stack at each sample.
    #[serde(default)]
    pub samples: Vec<u64>,
    /// Time deltas between samples (standalone and `CpuProfile` layout).
    #[serde(default)]
    pub time_deltas: Vec<f64>,
    /// Start time in microseconds (standalone and `CpuProfile` layout).
    #[serde(default)]
    pub start_time: Option<f64>,
    /// End time in microseconds (standalone and `CpuProfile` layout).
    #[serde(default)]
    pub end_time: Option<f64>,
}

/// A node in the sampled call tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileNode {
    /// Unique node ID.
    pub id: u64,
    /// Call frame information for this node.
    pub call_frame: CallFrame,
    /// Parent node ID (trace layout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    /// Child node IDs (standalone layout).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<u64>,
}

/// Information about a call frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Function name.
    #[serde(default)]
    pub function_name: String,
    /// Script ID (internal V8 identifier) - can be string or number.
    #[serde(default, deserialize_with = "deserialize_script_id")]
    pub script_id: String,
    /// Script URL (file path or URL).
    #[serde(default)]
    pub url: String,
    /// Line number (0-based, -1 if unknown).
    #[serde(default = "default_line")]
    pub line_number: i64,
    /// Column number (0-based, -1 if unknown).
    #[serde(default = "default_line")]
    pub column_number: i64,
    /// Code type reported by V8 (`JS`, `other`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_type: Option<String>,
}

fn default_line() -> i64 {
    -1
}

/// Deserialize script_id which can be either a string or number.
fn deserialize_script_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Wrap a standalone cpuprofile document into trace events.
///
/// Produces a thread name record and one `CpuProfile` event spanning the
/// profile's start and end times on a synthetic thread.
pub fn wrap_cpu_profile(profile: Value) -> Vec<TraceEvent> {
    let start = profile
        .get("startTime")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let end = profile
        .get("endTime")
        .and_then(Value::as_f64)
        .unwrap_or(start);

    vec![
        TraceEvent {
            name: "thread_name".to_string(),
            cat: "__metadata".to_string(),
            ph: "M".to_string(),
            pid: CPU_PROFILE_PID,
            tid: CPU_PROFILE_TID,
            args: json!({ "name": "CpuProfile" }),
            ..Default::default()
        },
        TraceEvent {
            name: CPU_PROFILE_EVENT.to_string(),
            cat: "disabled-by-default-v8.cpu_profiler".to_string(),
            ph: "P".to_string(),
            ts: start,
            dur: Some((end - start).max(0.0)),
            pid: CPU_PROFILE_PID,
            tid: CPU_PROFILE_TID,
            args: json!({ "data": { "cpuProfile": profile } }),
            ..Default::default()
        },
    ]
}
