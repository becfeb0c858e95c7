//! Task retention
//!
//! Decides which tasks the dashboard shows. Running and transient tasks are
//! always shown. Terminal tasks are shown for one retention window after we
//! first see them in that state, so failures and completions are visible
//! without accumulating an unbounded task history.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::model::SwarmTask;

/// States on the way to `running`
pub const TRANSIENT_STATES: &[&str] = &[
    "new",
    "pending",
    "assigned",
    "accepted",
    "preparing",
    "starting",
    "ready",
];

/// Final, non-running outcomes
pub const TERMINAL_STATES: &[&str] = &[
    "shutdown", "complete", "failed", "rejected", "orphaned", "remove",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    Running,
    Transient,
    Terminal,
    Unknown,
}

impl StateClass {
    /// Classify a raw task state, case-insensitively
    pub fn of(state: &str) -> Self {
        let state = state.to_lowercase();
        if state == "running" {
            StateClass::Running
        } else if TRANSIENT_STATES.contains(&state.as_str()) {
            StateClass::Transient
        } else if TERMINAL_STATES.contains(&state.as_str()) {
            StateClass::Terminal
        } else {
            StateClass::Unknown
        }
    }

    /// Running or on its way there
    pub fn is_live(&self) -> bool {
        matches!(self, StateClass::Running | StateClass::Transient)
    }
}

/// Select the visible tasks and update the first-seen records in place.
///
/// `records` maps task ID to the time (ms) the task was first seen in a
/// terminal state. After the call it holds entries only for tasks present
/// in `tasks`.
pub fn select_visible<'a>(
    tasks: &'a [SwarmTask],
    records: &mut HashMap<String, i64>,
    now_ms: i64,
    ttl_ms: i64,
) -> Vec<&'a SwarmTask> {
    let mut visible = Vec::new();

    for task in tasks {
        match StateClass::of(task.state()) {
            StateClass::Running | StateClass::Transient => {
                records.remove(&task.id);
                visible.push(task);
            }
            StateClass::Terminal => match records.get(&task.id).copied() {
                None => {
                    records.insert(task.id.clone(), now_ms);
                    visible.push(task);
                }
                Some(first_seen) => {
                    if now_ms - first_seen <= ttl_ms {
                        visible.push(task);
                    }
                }
            },
            StateClass::Unknown => {
                let recent = task
                    .timestamp_utc()
                    .is_some_and(|ts| now_ms - ts.timestamp_millis() <= ttl_ms);
                if recent {
                    visible.push(task);
                }
            }
        }
    }

    let present: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    records.retain(|id, _| present.contains(id.as_str()));

    visible
}

/// Owner of the retention records shared across requests
#[derive(Debug)]
pub struct RetentionTracker {
    ttl: Duration,
    records: Mutex<HashMap<String, i64>>,
}

impl RetentionTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Classify `tasks` at `now_ms`, returning the visible ones
    pub fn select<'a>(&self, tasks: &'a [SwarmTask], now_ms: i64) -> Vec<&'a SwarmTask> {
        let ttl_ms = self.ttl.as_millis() as i64;
        let mut records = match self.records.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        select_visible(tasks, &mut records, now_ms, ttl_ms)
    }

    pub fn first_seen(&self, task_id: &str) -> Option<i64> {
        match self.records.lock() {
            Ok(r) => r.get(task_id).copied(),
            Err(poisoned) => poisoned.into_inner().get(task_id).copied(),
        }
    }

    pub fn len(&self) -> usize {
        match self.records.lock() {
            Ok(r) => r.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
