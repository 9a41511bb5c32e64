//! Sample tree reconstruction.
//!
//! V8 reports its sampled call tree as a flat node list where each node names
//! its parent (trace chunks) or its children (standalone profiles). Nodes are
//! folded into the thread's stack table in document order, so a node whose
//! parent has not been seen yet becomes a root.

use crate::category::{CanonicalCategory, ExtensionSet, categorize_frame};
use crate::chrome::ProfileNode;
use crate::tables::{FuncSource, ThreadBuilder};
use crate::time::us_to_ms;
use gecko_parse::IndexIntoStackTable;
use std::collections::HashMap;

/// Display name for frames V8 reports without a function name.
pub const ANONYMOUS_FUNCTION: &str = "(anonymous)";

/// Reconstruction state shared by all chunks of one sampling session.
#[derive(Debug, Default)]
pub struct SessionState {
    node_stacks: HashMap<u64, IndexIntoStackTable>,
    /// Running sample clock in microseconds.
    clock: Option<f64>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock value after the last emitted chunk.
    pub fn clock(&self) -> Option<f64> {
        self.clock
    }

    pub fn stack_for(&self, node: u64) -> Option<IndexIntoStackTable> {
        self.node_stacks.get(&node).copied()
    }

    /// Fold nodes into the thread's stack table.
    pub fn add_nodes(
        &mut self,
        thread: &mut ThreadBuilder,
        nodes: &[ProfileNode],
        extensions: &mut ExtensionSet,
    ) {
        let child_parents: HashMap<u64, u64> = nodes
            .iter()
            .flat_map(|node| node.children.iter().map(move |&child| (child, node.id)))
            .collect();

        for node in nodes {
            let call_frame = &node.call_frame;
            let category = categorize_frame(
                &call_frame.url,
                &call_frame.function_name,
                call_frame.code_type.as_deref(),
            );
            let name = if call_frame.function_name.is_empty() {
                ANONYMOUS_FUNCTION
            } else {
                call_frame.function_name.as_str()
            };

            let func = thread.intern_func(FuncSource {
                name,
                url: &call_frame.url,
                line: call_frame.line_number,
                column: call_frame.column_number,
                is_js: category == CanonicalCategory::JavaScript,
                extension: extensions.record_url(&call_frame.url),
            });
            let frame = thread.intern_frame(func, category);

            let prefix = node
                .parent
                .or_else(|| child_parents.get(&node.id).copied())
                .and_then(|parent| self.stack_for(parent));
            let stack = thread.intern_stack(frame, prefix);
            self.node_stacks.insert(node.id, stack);
        }
    }

    /// Emit one sample per entry, starting the clock at `start` (microseconds).
    ///
    /// Each sample is stamped with the current clock before the clock is
    /// advanced by that sample's delta. Missing deltas count as zero and
    /// samples naming an unknown node get no stack.
    pub fn add_samples(
        &mut self,
        thread: &mut ThreadBuilder,
        samples: &[u64],
        time_deltas: &[f64],
        start: f64,
        origin: f64,
    ) {
        let mut clock = start;
        for (i, node) in samples.iter().enumerate() {
            let delta = time_deltas.get(i).copied().unwrap_or(0.0);
            thread.add_sample(
                self.stack_for(*node),
                us_to_ms(clock - origin),
                us_to_ms(delta.max(0.0)),
            );
            clock += delta;
        }
        self.clock = Some(clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConverterConfig;

    fn nodes(json: &str) -> Vec<ProfileNode> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parents_become_prefixes() {
        let mut thread = ThreadBuilder::new(1, 1);
        let mut extensions = ExtensionSet::new();
        let mut state = SessionState::new();

        state.add_nodes(
            &mut thread,
            &nodes(
                r#"[
                {"id": 1, "callFrame": {"functionName": "(root)", "codeType": "other"}},
                {"id": 2, "callFrame": {"functionName": "main", "url": "https://a.test/app.js",
                                        "lineNumber": 0, "columnNumber": 0}, "parent": 1},
                {"id": 3, "callFrame": {"functionName": "", "url": "https://a.test/app.js",
                                        "lineNumber": 5}, "parent": 2}
            ]"#,
            ),
            &mut extensions,
        );

        let root = state.stack_for(1).unwrap();
        let main = state.stack_for(2).unwrap();
        let anon = state.stack_for(3).unwrap();

        let thread = thread.finish(None, &ConverterConfig::default());
        assert_eq!(thread.stack_table.prefix[root], None);
        assert_eq!(thread.stack_table.prefix[main], Some(root));
        assert_eq!(thread.stack_table.prefix[anon], Some(main));
        assert_eq!(thread.stack_table.category[root], CanonicalCategory::Other.index());
        assert_eq!(thread.stack_table.category[main], CanonicalCategory::JavaScript.index());

        let names: Vec<_> = thread
            .stack_frames(anon)
            .into_iter()
            .map(|frame| thread.frame_func_name(frame).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["(anonymous)", "main", "(root)"]);
    }

    #[test]
    fn children_lists_are_followed() {
        let mut thread = ThreadBuilder::new(1, 1);
        let mut extensions = ExtensionSet::new();
        let mut state = SessionState::new();

        state.add_nodes(
            &mut thread,
            &nodes(
                r#"[
                {"id": 1, "callFrame": {"functionName": "(root)"}, "children": [2]},
                {"id": 2, "callFrame": {"functionName": "work"}}
            ]"#,
            ),
            &mut extensions,
        );

        let thread = thread.finish(None, &ConverterConfig::default());
        assert_eq!(thread.stack_table.prefix[1], Some(0));
    }

    #[test]
    fn unseen_parent_makes_a_root() {
        let mut thread = ThreadBuilder::new(1, 1);
        let mut extensions = ExtensionSet::new();
        let mut state = SessionState::new();

        state.add_nodes(
            &mut thread,
            &nodes(r#"[{"id": 5, "callFrame": {"functionName": "late"}, "parent": 9}]"#),
            &mut extensions,
        );

        let thread = thread.finish(None, &ConverterConfig::default());
        assert_eq!(thread.stack_table.prefix, vec![None]);
    }

    #[test]
    fn identical_subtrees_share_stacks() {
        let mut thread = ThreadBuilder::new(1, 1);
        let mut extensions = ExtensionSet::new();
        let mut state = SessionState::new();

        state.add_nodes(
            &mut thread,
            &nodes(
                r#"[
                {"id": 1, "callFrame": {"functionName": "(root)"}},
                {"id": 2, "callFrame": {"functionName": "f"}, "parent": 1},
                {"id": 3, "callFrame": {"functionName": "f"}, "parent": 1}
            ]"#,
            ),
            &mut extensions,
        );

        assert_eq!(state.stack_for(2), state.stack_for(3));
        assert_eq!(thread.stack_count(), 2);
    }

    #[test]
    fn extension_frames_are_recorded() {
        let mut thread = ThreadBuilder::new(1, 1);
        let mut extensions = ExtensionSet::new();
        let mut state = SessionState::new();

        state.add_nodes(
            &mut thread,
            &nodes(
                r#"[{"id": 1, "callFrame": {"functionName": "inject",
                      "url": "chrome-extension://abc/content.js"}}]"#,
            ),
            &mut extensions,
        );

        assert_eq!(extensions.len(), 1);
        let thread = thread.finish(None, &ConverterConfig::default());
        assert_eq!(thread.stack_table.category[0], CanonicalCategory::Other.index());
        assert!(!thread.func_table.is_js[0]);
    }

    #[test]
    fn samples_follow_running_clock() {
        let mut thread = ThreadBuilder::new(1, 1);
        let mut extensions = ExtensionSet::new();
        let mut state = SessionState::new();

        state.add_nodes(
            &mut thread,
            &nodes(r#"[{"id": 1, "callFrame": {"functionName": "(root)"}}]"#),
            &mut extensions,
        );
        state.add_samples(&mut thread, &[1, 1, 42], &[1000.0, 2000.0], 11_000.0, 10_000.0);

        assert_eq!(state.clock(), Some(14_000.0));

        let thread = thread.finish(None, &ConverterConfig::default());
        assert_eq!(thread.samples.time, vec![1.0, 2.0, 4.0]);
        assert_eq!(thread.samples.stack, vec![Some(0), Some(0), None]);
        assert_eq!(thread.samples.thread_cpu_delta, vec![1.0, 2.0, 0.0]);
        assert_eq!(thread.samples.weight, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn later_chunks_reuse_earlier_nodes() {
        let mut thread = ThreadBuilder::new(1, 1);
        let mut extensions = ExtensionSet::new();
        let mut state = SessionState::new();

        state.add_nodes(
            &mut thread,
            &nodes(r#"[{"id": 1, "callFrame": {"functionName": "(root)"}}]"#),
            &mut extensions,
        );
        state.add_samples(&mut thread, &[1], &[500.0], 0.0, 0.0);

        state.add_nodes(
            &mut thread,
            &nodes(r#"[{"id": 2, "callFrame": {"functionName": "tick"}, "parent": 1}]"#),
            &mut extensions,
        );
        let resume = state.clock().unwrap();
        state.add_samples(&mut thread, &[2, 1], &[500.0, 500.0], resume, 0.0);

        let thread = thread.finish(None, &ConverterConfig::default());
        assert_eq!(thread.samples.time, vec![0.0, 0.5, 1.0]);
        assert_eq!(thread.samples.stack, vec![Some(0), Some(1), Some(0)]);
        assert_eq!(thread.stack_table.prefix[1], Some(0));
    }
}
