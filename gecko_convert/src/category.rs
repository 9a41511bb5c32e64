//! Category mapping for trace events and sampled call frames.
//!
//! Chrome tags every event with a comma separated list of free-form category
//! tags. The processed profile instead uses a small fixed list of display
//! categories, each with a color. Frames of sampled stacks are categorized
//! from their script URL, which is also where extension code is recognized.

use gecko_parse::{Category, Extension, ExtensionTable, IndexIntoCategoryList};
use std::collections::HashSet;

/// URL scheme of scripts that belong to a browser extension.
pub const EXTENSION_SCHEME: &str = "chrome-extension://";

/// The fixed output category list. The discriminant is the category index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalCategory {
    Other,
    Idle,
    Layout,
    JavaScript,
    Gc,
    Network,
    Graphics,
    Dom,
}

impl CanonicalCategory {
    /// All categories in index order.
    pub const ALL: [CanonicalCategory; 8] = [
        CanonicalCategory::Other,
        CanonicalCategory::Idle,
        CanonicalCategory::Layout,
        CanonicalCategory::JavaScript,
        CanonicalCategory::Gc,
        CanonicalCategory::Network,
        CanonicalCategory::Graphics,
        CanonicalCategory::Dom,
    ];

    pub fn index(self) -> IndexIntoCategoryList {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            CanonicalCategory::Other => "Other",
            CanonicalCategory::Idle => "Idle",
            CanonicalCategory::Layout => "Layout",
            CanonicalCategory::JavaScript => "JavaScript",
            CanonicalCategory::Gc => "GC / CC",
            CanonicalCategory::Network => "Network",
            CanonicalCategory::Graphics => "Graphics",
            CanonicalCategory::Dom => "DOM",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            CanonicalCategory::Other => "grey",
            CanonicalCategory::Idle => "transparent",
            CanonicalCategory::Layout => "purple",
            CanonicalCategory::JavaScript => "yellow",
            CanonicalCategory::Gc => "orange",
            CanonicalCategory::Network => "lightblue",
            CanonicalCategory::Graphics => "green",
            CanonicalCategory::Dom => "blue",
        }
    }

    /// Look up a single Chrome category tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let category = match tag {
            "v8"
            | "v8.execute"
            | "v8.compile"
            | "v8.runtime"
            | "v8.wasm"
            | "disabled-by-default-v8.cpu_profiler"
            | "disabled-by-default-v8.compile"
            | "disabled-by-default-v8.runtime" => CanonicalCategory::JavaScript,
            "v8.gc" | "blink_gc" | "disabled-by-default-v8.gc" | "disabled-by-default-blink_gc" => {
                CanonicalCategory::Gc
            }
            "blink" | "layout" | "blink.animations" | "disabled-by-default-blink.invalidation" => {
                CanonicalCategory::Layout
            }
            "blink.user_timing" | "blink.console" | "dom" | "input" => CanonicalCategory::Dom,
            "loading" | "net" | "netlog" | "disabled-by-default-network" => {
                CanonicalCategory::Network
            }
            "cc" | "gpu" | "viz" | "disabled-by-default-devtools.screenshot" => {
                CanonicalCategory::Graphics
            }
            "idle" => CanonicalCategory::Idle,
            "toplevel" | "devtools.timeline" | "__metadata" => CanonicalCategory::Other,
            _ => return None,
        };
        Some(category)
    }
}

/// Category list written into the profile's meta.
pub fn gecko_categories() -> Vec<Category> {
    CanonicalCategory::ALL
        .iter()
        .map(|category| Category {
            name: category.name().to_string(),
            color: category.color().to_string(),
            subcategories: vec!["Other".to_string()],
        })
        .collect()
}

/// Map an event's category tag list. The first recognized tag wins.
pub fn categorize_event(cat: &str) -> CanonicalCategory {
    cat.split(',')
        .find_map(|tag| CanonicalCategory::from_tag(tag.trim()))
        .unwrap_or(CanonicalCategory::Other)
}

/// Map a sampled call frame to a category.
pub fn categorize_frame(url: &str, function_name: &str, code_type: Option<&str>) -> CanonicalCategory {
    if url.starts_with(EXTENSION_SCHEME) {
        return CanonicalCategory::Other;
    }
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://") {
        return CanonicalCategory::JavaScript;
    }
    if code_type == Some("other") || matches!(function_name, "(root)" | "(program)") {
        return CanonicalCategory::Other;
    }
    CanonicalCategory::JavaScript
}

/// Extract the extension identifier from a `chrome-extension://<id>/...` URL.
pub fn extension_id(url: &str) -> Option<&str> {
    let rest = url.strip_prefix(EXTENSION_SCHEME)?;
    let id = rest.split('/').next().unwrap_or_default();
    if id.is_empty() { None } else { Some(id) }
}

/// Host part of an http(s) URL.
pub fn url_host(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() { None } else { Some(host) }
}

/// Extension identifiers seen in sampled frames, in first-seen order.
#[derive(Debug, Default)]
pub struct ExtensionSet {
    ids: Vec<String>,
    seen: HashSet<String>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the extension behind `url`, if any. Returns the id.
    pub fn record_url<'a>(&mut self, url: &'a str) -> Option<&'a str> {
        let id = extension_id(url)?;
        if self.seen.insert(id.to_string()) {
            self.ids.push(id.to_string());
        }
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn into_table(self) -> ExtensionTable {
        let mut table = ExtensionTable::default();
        for id in self.ids {
            table.push(Extension {
                base_url: format!("{EXTENSION_SCHEME}{id}/"),
                name: id.clone(),
                id,
            });
        }
        table
    }
}
