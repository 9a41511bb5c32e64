//! Per-thread output accumulation.
//!
//! Every (pid, tid) pair gets a [`ThreadBuilder`] owning its own string
//! table and column tables. Functions, frames, stacks, and resources are
//! deduplicated by key within the thread so identical rows are emitted once.

use crate::category::{CanonicalCategory, url_host};
use crate::convert::ConverterConfig;
use gecko_parse::{
    Frame, FrameTable, Func, FuncTable, IndexIntoCategoryList, IndexIntoFrameTable,
    IndexIntoFuncTable, IndexIntoStackTable, IndexIntoStringArray, Marker,
    MarkerPhase, MarkerTable, Resource, ResourceTable, ResourceType, Sample, SampleTable, Stack,
    StackTable, Thread,
};
use std::collections::HashMap;
use std::hash::Hash;

/// Placeholder used in dedup keys for frames without a script URL.
const UNKNOWN_URL: &str = "(unknown)";

// ============================================================================
// String interning
// ============================================================================

/// Insertion-ordered string interner.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, IndexIntoStringArray>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index of `s`, appending it if this is its first occurrence.
    pub fn intern(&mut self, s: &str) -> IndexIntoStringArray {
        if let Some(&index) = self.index.get(s) {
            return index;
        }
        let index = self.strings.len();
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), index);
        index
    }

    pub fn get(&self, index: IndexIntoStringArray) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.strings
    }
}

// ============================================================================
// Dedup tables
// ============================================================================

/// Maps a composite key to the row it was first stored at.
#[derive(Debug)]
pub struct DedupIndex<K> {
    rows: HashMap<K, usize>,
}

impl<K> Default for DedupIndex<K> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> DedupIndex<K> {
    /// Return the row stored for `key`, calling `insert` to create it on a miss.
    pub fn get_or_insert_with(&mut self, key: K, insert: impl FnOnce() -> usize) -> usize {
        *self.rows.entry(key).or_insert_with(insert)
    }
}

/// Function identity: name, script URL, and line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FuncKey {
    name: String,
    url: String,
    line: i64,
}

/// Source location of a sampled function, as reported by V8.
#[derive(Debug, Clone, Copy)]
pub struct FuncSource<'a> {
    pub name: &'a str,
    pub url: &'a str,
    /// 0-based line, negative when unknown.
    pub line: i64,
    /// 0-based column, negative when unknown.
    pub column: i64,
    pub is_js: bool,
    /// Extension owning the script, if any.
    pub extension: Option<&'a str>,
}

/// Convert a 0-based V8 position into a 1-based one.
fn one_based(position: i64) -> Option<u32> {
    if position < 0 {
        None
    } else {
        u32::try_from(position + 1).ok()
    }
}

// ============================================================================
// Thread accumulator
// ============================================================================

/// Output tables being built for one thread.
#[derive(Debug)]
pub struct ThreadBuilder {
    pub pid: u64,
    pub tid: u64,
    pub name: Option<String>,
    strings: StringTable,
    funcs: DedupIndex<FuncKey>,
    frames: DedupIndex<(IndexIntoFuncTable, IndexIntoCategoryList)>,
    stacks: DedupIndex<(IndexIntoFrameTable, Option<IndexIntoStackTable>)>,
    resources: DedupIndex<String>,
    samples: SampleTable,
    markers: MarkerTable,
    stack_table: StackTable,
    frame_table: FrameTable,
    func_table: FuncTable,
    resource_table: ResourceTable,
}

impl ThreadBuilder {
    pub fn new(pid: u64, tid: u64) -> Self {
        Self {
            pid,
            tid,
            name: None,
            strings: StringTable::new(),
            funcs: DedupIndex::default(),
            frames: DedupIndex::default(),
            stacks: DedupIndex::default(),
            resources: DedupIndex::default(),
            samples: SampleTable::default(),
            markers: MarkerTable::default(),
            stack_table: StackTable::default(),
            frame_table: FrameTable::default(),
            func_table: FuncTable::default(),
            resource_table: ResourceTable::default(),
        }
    }

    pub fn add_marker(
        &mut self,
        name: &str,
        category: CanonicalCategory,
        start_time: f64,
        end_time: Option<f64>,
        data: Option<serde_json::Value>,
    ) -> usize {
        let name = self.strings.intern(name);
        let phase = if end_time.is_some() {
            MarkerPhase::INTERVAL
        } else {
            MarkerPhase::INSTANT
        };
        self.markers.push(Marker {
            data,
            name,
            start_time: Some(start_time),
            end_time,
            phase,
            category: category.index(),
        })
    }

    pub fn add_sample(&mut self, stack: Option<IndexIntoStackTable>, time: f64, cpu_delta: f64) {
        self.samples.push(Sample {
            stack,
            time,
            weight: 1.0,
            thread_cpu_delta: cpu_delta,
        });
    }

    /// Intern a function, creating its script resource on first use.
    pub fn intern_func(&mut self, source: FuncSource<'_>) -> IndexIntoFuncTable {
        let key = FuncKey {
            name: source.name.to_string(),
            url: if source.url.is_empty() {
                UNKNOWN_URL.to_string()
            } else {
                source.url.to_string()
            },
            line: source.line,
        };

        let Self {
            strings,
            funcs,
            resources,
            func_table,
            resource_table,
            ..
        } = self;

        funcs.get_or_insert_with(key, || {
            let resource = if source.url.is_empty() {
                None
            } else {
                Some(resources.get_or_insert_with(source.url.to_string(), || {
                    let (type_, host) = match source.extension {
                        Some(_) => (ResourceType::ADDON, None),
                        None => (ResourceType::URL, url_host(source.url)),
                    };
                    resource_table.push(Resource {
                        lib: None,
                        name: strings.intern(source.url),
                        host: host.map(|host| strings.intern(host)),
                        type_,
                    })
                }))
            };
            func_table.push(Func {
                name: strings.intern(source.name),
                is_js: source.is_js,
                relevant_for_js: false,
                resource,
                file_name: if source.url.is_empty() {
                    None
                } else {
                    Some(strings.intern(source.url))
                },
                line_number: one_based(source.line),
                column_number: one_based(source.column),
            })
        })
    }

    pub fn intern_frame(
        &mut self,
        func: IndexIntoFuncTable,
        category: CanonicalCategory,
    ) -> IndexIntoFrameTable {
        let frame_table = &mut self.frame_table;
        self.frames.get_or_insert_with((func, category.index()), || {
            frame_table.push(Frame {
                address: None,
                inline_depth: None,
                category: Some(category.index()),
                subcategory: Some(0),
                func,
                native_symbol: None,
                inner_window_id: None,
                implementation: None,
                line: None,
                column: None,
            })
        })
    }

    /// Intern a stack node. `prefix` must already exist in this thread.
    pub fn intern_stack(
        &mut self,
        frame: IndexIntoFrameTable,
        prefix: Option<IndexIntoStackTable>,
    ) -> IndexIntoStackTable {
        let category = self
            .frame_table
            .category
            .get(frame)
            .copied()
            .flatten()
            .unwrap_or_default();
        let stack_table = &mut self.stack_table;
        self.stacks.get_or_insert_with((frame, prefix), || {
            stack_table.push(Stack {
                frame,
                category,
                subcategory: 0,
                prefix,
            })
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn stack_count(&self) -> usize {
        self.stack_table.len()
    }

    /// Produce the finished output thread.
    pub fn finish(self, process_name: Option<&str>, config: &ConverterConfig) -> Thread {
        let name = self
            .name
            .unwrap_or_else(|| format!("Thread {}", self.tid));

        let mut thread = Thread::new(self.pid.to_string(), self.tid);
        thread.is_main_thread = config.main_thread_names.iter().any(|main| *main == name);
        thread.name = name;
        thread.process_name = process_name.map(str::to_string);
        thread.string_array = self.strings.into_vec();
        thread.samples = self.samples;
        thread.markers = self.markers;
        thread.stack_table = self.stack_table;
        thread.frame_table = self.frame_table;
        thread.func_table = self.func_table;
        thread.resource_table = self.resource_table;
        thread
    }
}
