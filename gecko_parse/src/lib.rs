//! Processed Gecko profile parser library.
//!
//! This library reads, validates and writes profiles in the processed Gecko
//! profile layout: a `meta` object plus a list of threads, where every thread
//! owns its own string array and a set of column tables (samples, markers,
//! stacks, frames, functions, resources, native symbols). Each table is a
//! struct of parallel arrays with an explicit `length`.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use gecko_parse::Profile;
//!
//! let file = File::open("profile.json").unwrap();
//! let profile = Profile::parse(file).unwrap();
//!
//! println!("Product: {}", profile.meta.product);
//! println!("Threads: {}", profile.threads.len());
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::io::{Read, Write};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while reading a processed profile.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("thread {thread}: {table}.{column} has {found} entries, expected {expected}")]
    LengthMismatch {
        thread: usize,
        table: &'static str,
        column: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("thread {thread}: stack {stack} references non-existent frame {frame}")]
    InvalidFrameReference {
        thread: usize,
        stack: usize,
        frame: usize,
    },

    #[error("thread {thread}: stack {stack} has prefix {prefix} which was not created before it")]
    InvalidPrefix {
        thread: usize,
        stack: usize,
        prefix: usize,
    },

    #[error("thread {thread}: sample {sample} references non-existent stack {stack}")]
    InvalidStackReference {
        thread: usize,
        sample: usize,
        stack: usize,
    },

    #[error("thread {thread}: frame {frame} references non-existent function {func}")]
    InvalidFuncReference {
        thread: usize,
        frame: usize,
        func: usize,
    },

    #[error("thread {thread}: function {func} references non-existent resource {resource}")]
    InvalidResourceReference {
        thread: usize,
        func: usize,
        resource: usize,
    },

    #[error("thread {thread}: {table} row {row} references non-existent string {string}")]
    InvalidStringReference {
        thread: usize,
        table: &'static str,
        row: usize,
        string: usize,
    },

    #[error("thread {thread}: {table} row {row} references non-existent category {category}")]
    InvalidCategory {
        thread: usize,
        table: &'static str,
        row: usize,
        category: usize,
    },
}

/// Result type for profile parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that can occur while writing a processed profile.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for profile writing operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

/// Version of the Gecko profile layout written into `meta.version`.
pub const GECKO_PROFILE_VERSION: u32 = 27;

/// Version of the processed layout written into `meta.preprocessedProfileVersion`.
pub const PROCESSED_PROFILE_VERSION: u32 = 48;

pub type IndexIntoStringArray = usize;
pub type IndexIntoCategoryList = usize;
pub type IndexIntoSubcategoryList = usize;
pub type IndexIntoStackTable = usize;
pub type IndexIntoFrameTable = usize;
pub type IndexIntoFuncTable = usize;
pub type IndexIntoResourceTable = usize;
pub type IndexIntoNativeSymbolTable = usize;
pub type IndexIntoLibs = usize;

// ============================================================================
// Column tables
// ============================================================================

/// Declares a row struct and its columnar table.
///
/// The table serializes as one array per column plus `length`. `push`
/// appends a row and returns its index.
macro_rules! table {
    (
        $(#[$row_meta:meta])*
        $row:ident,
        $(#[$table_meta:meta])*
        $table:ident {
            $(
                $(#[$attr:meta])*
                $name:ident : $ty:ty,
            )*
        }
        $(extra {
            $(
                $(#[$extra_attr:meta])*
                $extra_name:ident : $extra_ty:ty,
            )*
        })?
    ) => {
        $(#[$row_meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $row {
            $(pub $name: $ty,)*
        }

        $(#[$table_meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $table {
            $(
                $(#[$attr])*
                #[serde(default)]
                pub $name: Vec<$ty>,
            )*
            $($(
                $(#[$extra_attr])*
                #[serde(default)]
                pub $extra_name: $extra_ty,
            )*)?
            #[serde(default)]
            pub length: usize,
        }

        impl $table {
            /// Append a row and return its index.
            pub fn push(&mut self, row: $row) -> usize {
                let index = self.length;
                $(self.$name.push(row.$name);)*
                self.length += 1;
                index
            }

            pub fn len(&self) -> usize {
                self.length
            }

            pub fn is_empty(&self) -> bool {
                self.length == 0
            }

            fn check_lengths(&self, thread: usize, table: &'static str) -> Result<()> {
                $(
                    if self.$name.len() != self.length {
                        return Err(ParseError::LengthMismatch {
                            thread,
                            table,
                            column: stringify!($name),
                            expected: self.length,
                            found: self.$name.len(),
                        });
                    }
                )*
                Ok(())
            }
        }
    };
}

/// How sample weights are to be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightType {
    #[default]
    #[serde(rename = "samples")]
    Samples,
    #[serde(rename = "tracing-ms")]
    TracingMs,
    #[serde(rename = "bytes")]
    Bytes,
}

table!(
    /// One CPU sample.
    Sample,
    /// Sample column table.
    SampleTable {
        stack: Option<IndexIntoStackTable>,
        time: f64,
        weight: f64,
        #[serde(rename = "threadCPUDelta")]
        thread_cpu_delta: f64,
    }
    extra {
        weight_type: WeightType,
    }
);

/// Marker phase, serialized as its integer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerPhase(pub u8);

impl MarkerPhase {
    pub const INSTANT: MarkerPhase = MarkerPhase(0);
    pub const INTERVAL: MarkerPhase = MarkerPhase(1);
    pub const INTERVAL_START: MarkerPhase = MarkerPhase(2);
    pub const INTERVAL_END: MarkerPhase = MarkerPhase(3);
}

table!(
    /// One marker: a named instant or interval on a thread.
    Marker,
    /// Raw marker column table.
    MarkerTable {
        data: Option<serde_json::Value>,
        name: IndexIntoStringArray,
        #[serde(deserialize_with = "lenient_times")]
        start_time: Option<f64>,
        #[serde(deserialize_with = "lenient_times")]
        end_time: Option<f64>,
        phase: MarkerPhase,
        category: IndexIntoCategoryList,
    }
);

table!(
    /// One stack node: a frame on top of an optional prefix stack.
    Stack,
    /// Stack column table. Stacks form a forest through `prefix`.
    StackTable {
        frame: IndexIntoFrameTable,
        category: IndexIntoCategoryList,
        subcategory: IndexIntoSubcategoryList,
        prefix: Option<IndexIntoStackTable>,
    }
);

table!(
    /// One frame.
    Frame,
    /// Frame column table.
    FrameTable {
        address: Option<u64>,
        inline_depth: Option<u32>,
        category: Option<IndexIntoCategoryList>,
        subcategory: Option<IndexIntoSubcategoryList>,
        func: IndexIntoFuncTable,
        native_symbol: Option<IndexIntoNativeSymbolTable>,
        #[serde(rename = "innerWindowID")]
        inner_window_id: Option<u64>,
        implementation: Option<IndexIntoStringArray>,
        line: Option<u32>,
        column: Option<u32>,
    }
);

table!(
    /// One function.
    Func,
    /// Function column table.
    FuncTable {
        name: IndexIntoStringArray,
        #[serde(rename = "isJS")]
        is_js: bool,
        #[serde(rename = "relevantForJS")]
        relevant_for_js: bool,
        resource: Option<IndexIntoResourceTable>,
        file_name: Option<IndexIntoStringArray>,
        line_number: Option<u32>,
        column_number: Option<u32>,
    }
);

/// Resource kinds, serialized as their integer tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(pub u32);

impl ResourceType {
    pub const UNKNOWN: ResourceType = ResourceType(0);
    pub const LIBRARY: ResourceType = ResourceType(1);
    pub const ADDON: ResourceType = ResourceType(2);
    pub const WEBHOST: ResourceType = ResourceType(3);
    pub const OTHERHOST: ResourceType = ResourceType(4);
    pub const URL: ResourceType = ResourceType(5);
}

table!(
    /// One resource (library, add-on or script URL).
    Resource,
    /// Resource column table.
    ResourceTable {
        lib: Option<IndexIntoLibs>,
        name: IndexIntoStringArray,
        host: Option<IndexIntoStringArray>,
        #[serde(rename = "type")]
        type_: ResourceType,
    }
);

table!(
    /// One native symbol.
    NativeSymbol,
    /// Native symbol column table. Always empty for converted traces.
    NativeSymbolTable {
        lib_index: IndexIntoLibs,
        address: u64,
        name: IndexIntoStringArray,
        function_size: Option<u32>,
    }
);

table!(
    /// A browser extension seen while reading the profile.
    Extension,
    /// Extension column table stored in `meta.extensions`.
    ExtensionTable {
        #[serde(rename = "baseURL")]
        base_url: String,
        id: String,
        name: String,
    }
);

/// Decode a column of optional times, treating anything that is not a
/// number as absent.
fn lenient_times<'de, D>(deserializer: D) -> std::result::Result<Vec<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<serde_json::Value> = Deserialize::deserialize(deserializer)?;
    Ok(values.iter().map(serde_json::Value::as_f64).collect())
}

/// Decode a thread id that may be a number or a numeric string.
fn lenient_tid<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    })
}

// ============================================================================
// Profile types
// ============================================================================

/// A display category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub subcategories: Vec<String>,
}

/// Profile-wide metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Sampling interval in milliseconds.
    pub interval: f64,
    /// Absolute start time, milliseconds since the Unix epoch (0 if unknown).
    pub start_time: f64,
    #[serde(default)]
    pub profiling_start_time: Option<f64>,
    #[serde(default)]
    pub profiling_end_time: Option<f64>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub preprocessed_profile_version: u32,
    #[serde(default)]
    pub product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_from: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub extensions: ExtensionTable,
}

/// One thread with its private string array and column tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    #[serde(default)]
    pub process_type: String,
    #[serde(default)]
    pub process_startup_time: f64,
    #[serde(default)]
    pub process_shutdown_time: Option<f64>,
    #[serde(default)]
    pub register_time: f64,
    #[serde(default)]
    pub unregister_time: Option<f64>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(default)]
    pub is_main_thread: bool,
    pub pid: String,
    #[serde(deserialize_with = "lenient_tid")]
    pub tid: u64,
    #[serde(default)]
    pub string_array: Vec<String>,
    #[serde(default)]
    pub samples: SampleTable,
    #[serde(default)]
    pub markers: MarkerTable,
    #[serde(default)]
    pub stack_table: StackTable,
    #[serde(default)]
    pub frame_table: FrameTable,
    #[serde(default)]
    pub func_table: FuncTable,
    #[serde(default)]
    pub resource_table: ResourceTable,
    #[serde(default)]
    pub native_symbols: NativeSymbolTable,
}

impl Thread {
    /// Create an empty thread for the given process and thread ids.
    pub fn new(pid: impl Into<String>, tid: u64) -> Self {
        Self {
            process_type: "default".to_string(),
            process_startup_time: 0.0,
            process_shutdown_time: None,
            register_time: 0.0,
            unregister_time: None,
            name: String::new(),
            process_name: None,
            is_main_thread: false,
            pid: pid.into(),
            tid,
            string_array: Vec::new(),
            samples: SampleTable::default(),
            markers: MarkerTable::default(),
            stack_table: StackTable::default(),
            frame_table: FrameTable::default(),
            func_table: FuncTable::default(),
            resource_table: ResourceTable::default(),
            native_symbols: NativeSymbolTable::default(),
        }
    }

    /// Look up an entry of the thread's string array.
    pub fn string(&self, index: IndexIntoStringArray) -> Option<&str> {
        self.string_array.get(index).map(String::as_str)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Name of the function behind a frame, if every index resolves.
    pub fn frame_func_name(&self, frame: IndexIntoFrameTable) -> Option<&str> {
        let func = *self.frame_table.func.get(frame)?;
        let name = *self.func_table.name.get(func)?;
        self.string(name)
    }

    /// Frames of a stack from leaf to root.
    pub fn stack_frames(&self, stack: IndexIntoStackTable) -> Vec<IndexIntoFrameTable> {
        let mut frames = Vec::new();
        let mut current = Some(stack);
        while let Some(index) = current {
            if index >= self.stack_table.len() || frames.len() > self.stack_table.len() {
                break;
            }
            frames.push(self.stack_table.frame[index]);
            current = self.stack_table.prefix[index];
        }
        frames
    }

    fn validate(&self, thread: usize, category_count: usize) -> Result<()> {
        self.samples.check_lengths(thread, "samples")?;
        self.markers.check_lengths(thread, "markers")?;
        self.stack_table.check_lengths(thread, "stackTable")?;
        self.frame_table.check_lengths(thread, "frameTable")?;
        self.func_table.check_lengths(thread, "funcTable")?;
        self.resource_table.check_lengths(thread, "resourceTable")?;
        self.native_symbols.check_lengths(thread, "nativeSymbols")?;

        let strings = self.string_array.len();
        let check_string = |table: &'static str, row: usize, string: usize| {
            if string < strings {
                Ok(())
            } else {
                Err(ParseError::InvalidStringReference {
                    thread,
                    table,
                    row,
                    string,
                })
            }
        };
        let check_category = |table: &'static str, row: usize, category: usize| {
            if category < category_count {
                Ok(())
            } else {
                Err(ParseError::InvalidCategory {
                    thread,
                    table,
                    row,
                    category,
                })
            }
        };

        for stack in 0..self.stack_table.len() {
            let frame = self.stack_table.frame[stack];
            if frame >= self.frame_table.len() {
                return Err(ParseError::InvalidFrameReference {
                    thread,
                    stack,
                    frame,
                });
            }
            // A prefix must point backwards, which also rules out cycles.
            if let Some(prefix) = self.stack_table.prefix[stack]
                && prefix >= stack
            {
                return Err(ParseError::InvalidPrefix {
                    thread,
                    stack,
                    prefix,
                });
            }
            check_category("stackTable", stack, self.stack_table.category[stack])?;
        }

        for sample in 0..self.samples.len() {
            if let Some(stack) = self.samples.stack[sample]
                && stack >= self.stack_table.len()
            {
                return Err(ParseError::InvalidStackReference {
                    thread,
                    sample,
                    stack,
                });
            }
        }

        for frame in 0..self.frame_table.len() {
            let func = self.frame_table.func[frame];
            if func >= self.func_table.len() {
                return Err(ParseError::InvalidFuncReference {
                    thread,
                    frame,
                    func,
                });
            }
            if let Some(category) = self.frame_table.category[frame] {
                check_category("frameTable", frame, category)?;
            }
        }

        for func in 0..self.func_table.len() {
            check_string("funcTable", func, self.func_table.name[func])?;
            if let Some(file_name) = self.func_table.file_name[func] {
                check_string("funcTable", func, file_name)?;
            }
            if let Some(resource) = self.func_table.resource[func]
                && resource >= self.resource_table.len()
            {
                return Err(ParseError::InvalidResourceReference {
                    thread,
                    func,
                    resource,
                });
            }
        }

        for resource in 0..self.resource_table.len() {
            check_string("resourceTable", resource, self.resource_table.name[resource])?;
        }

        for marker in 0..self.markers.len() {
            check_string("markers", marker, self.markers.name[marker])?;
            check_category("markers", marker, self.markers.category[marker])?;
        }

        Ok(())
    }
}

/// A processed profile: metadata plus the ordered list of threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    #[serde(default)]
    pub threads: Vec<Thread>,
}

impl Profile {
    /// Parse a processed profile from any `Read`-able source.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let profile: Profile = serde_json::from_reader(reader)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Build a profile from an already decoded JSON document.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let profile: Profile = serde_json::from_value(value)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check every cross-table reference of every thread.
    pub fn validate(&self) -> Result<()> {
        let category_count = self.meta.categories.len();
        for (index, thread) in self.threads.iter().enumerate() {
            thread.validate(index, category_count)?;
        }
        self.meta.extensions.check_lengths(0, "extensions")?;
        debug!(threads = self.threads.len(), "profile validated");
        Ok(())
    }

    /// Length of the profiled range in milliseconds.
    pub fn duration(&self) -> f64 {
        match (self.meta.profiling_start_time, self.meta.profiling_end_time) {
            (Some(start), Some(end)) => end - start,
            _ => 0.0,
        }
    }

    /// Find the thread for a process/thread id pair.
    pub fn thread(&self, pid: &str, tid: u64) -> Option<&Thread> {
        self.threads.iter().find(|t| t.pid == pid && t.tid == tid)
    }

    /// Index of a category by name.
    pub fn category_index(&self, name: &str) -> Option<IndexIntoCategoryList> {
        self.meta.categories.iter().position(|c| c.name == name)
    }

    /// Write this profile as compact JSON.
    pub fn write<W: Write>(&self, mut writer: W) -> WriteResult<()> {
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Write this profile as indented JSON.
    pub fn write_pretty<W: Write>(&self, mut writer: W) -> WriteResult<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}
