//! Ephemeral, in-memory counters for pipeline operations.

use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap};

///
/// EventState
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub tables: BTreeMap<String, TableCounters>,
    pub since_ms: i64,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            ops: EventOps::default(),
            tables: BTreeMap::new(),
            since_ms: crate::schema::default::now_millis(),
        }
    }
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    // Pipeline entrypoints
    pub insert_runs: u64,
    pub patch_runs: u64,
    pub replace_runs: u64,
    pub delete_runs: u64,

    // Outcomes
    pub patch_noops: u64,
    pub unique_violations: u64,
    pub cascade_deletes: u64,

    // Relation engine
    pub relation_reverse_lookups: u64,
    pub relation_delete_blocks: u64,
}

///
/// TableCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TableCounters {
    pub insert_runs: u64,
    pub patch_runs: u64,
    pub replace_runs: u64,
    pub delete_runs: u64,
    pub patch_noops: u64,
    pub unique_violations: u64,
    pub cascade_deletes: u64,
    pub relation_reverse_lookups: u64,
    pub relation_delete_blocks: u64,
}

///
/// EventReport
/// Point-in-time snapshot handed to observability surfaces.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    pub counters: Option<EventState>,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Reset all counters (useful in tests).
pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

/// Snapshot, optionally filtered by window start: a `since_ms` after the
/// current window yields an empty report.
pub(crate) fn report_since(since_ms: Option<i64>) -> EventReport {
    with_state(|m| {
        let in_window = since_ms.is_none_or(|since| since <= m.since_ms);
        EventReport {
            counters: in_window.then(|| m.clone()),
        }
    })
}
