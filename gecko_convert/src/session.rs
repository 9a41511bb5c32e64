//! Sampling session correlation.
//!
//! A sampling session is opened by a `Profile` event on the thread being
//! sampled. The `ProfileChunk` events carrying its data share the session id
//! but may be emitted from a different thread, so chunks are routed through
//! this table.

use crate::chrome::{PROFILE_EVENT, Phase, ProfileEventData, TraceEvent};
use std::collections::HashMap;
use tracing::debug;

/// Where a session's samples belong and when its clock starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTarget {
    pub pid: u64,
    pub tid: u64,
    /// Session start in microseconds.
    pub start_time: f64,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    targets: HashMap<String, SessionTarget>,
}

impl SessionTable {
    /// Collect all session start events. The first event for an id wins.
    pub fn build(events: &[TraceEvent]) -> Self {
        let mut targets = HashMap::new();

        for event in events {
            if event.phase() != Phase::Sample || event.name != PROFILE_EVENT {
                continue;
            }
            let Some(id) = &event.id else {
                continue;
            };

            let start_time = event
                .data()
                .and_then(|data| serde_json::from_value::<ProfileEventData>(data.clone()).ok())
                .and_then(|data| data.start_time)
                .unwrap_or(event.ts);

            targets.entry(id.clone()).or_insert(SessionTarget {
                pid: event.pid,
                tid: event.tid,
                start_time,
            });
        }

        debug!(sessions = targets.len(), "correlated sampling sessions");
        Self { targets }
    }

    pub fn get(&self, id: &str) -> Option<&SessionTarget> {
        self.targets.get(id)
    }
}
