//! Failure tracking and statistics across life cycles.
//!
//! The tracker owns the ordered life-cycle list (index 0 is always the
//! current LC, older LCs follow in reverse chronological order) and the set
//! of applications currently in the failed state.

use crate::types::{LcInfo, NodeShutdownState};
use tracing::info;

/// Answer to a statistics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub current_fail_count: u32,
    pub total_failures: u32,
    /// Number of life cycles the query iterated. This is the loop-iteration
    /// count, which can exceed the number of stored previous LCs by one;
    /// callers rely on this exact definition.
    pub total_lifecycles: u32,
}

pub struct FailureTracker {
    lifecycles: Vec<LcInfo>,
    current: Vec<String>,
    historic_lc_count: u32,
}

impl FailureTracker {
    pub fn new(historic_lc_count: u32) -> Self {
        Self {
            lifecycles: Vec::new(),
            current: Vec::new(),
            historic_lc_count,
        }
    }

    /// Open the current life cycle with the shutdown-flag value found at
    /// startup. Must run before previous LCs are loaded.
    pub fn begin_lifecycle(&mut self, start_state: NodeShutdownState) {
        self.lifecycles.insert(0, LcInfo::new(start_state));
    }

    /// Append previous life cycles behind the current one.
    pub fn extend_history(&mut self, previous: Vec<LcInfo>) {
        self.lifecycles.extend(previous);
    }

    pub fn lifecycles(&self) -> &[LcInfo] {
        &self.lifecycles
    }

    pub fn is_failed(&self, name: &str) -> bool {
        self.current.iter().any(|entry| entry == name)
    }

    pub fn current_failed_count(&self) -> u32 {
        self.current.len() as u32
    }

    /// Record a transition into the failed state. Returns the app's new
    /// fail count, or `None` if the app already was on the current failed
    /// list (in which case nothing changes).
    pub fn note_failure(&mut self, name: &str) -> Option<u32> {
        if self.is_failed(name) {
            return None;
        }
        self.current.push(name.to_string());

        if self.lifecycles.is_empty() {
            self.lifecycles.push(LcInfo::new(NodeShutdownState::NotSet));
        }
        let app = self.lifecycles[0].find_or_insert(name);
        app.failcount += 1;

        info!(app = name, failcount = app.failcount, "updated error count for application");
        Some(app.failcount)
    }

    /// Record a transition out of the failed state. The fail count and the
    /// history stay untouched. Returns true if the app was on the list.
    pub fn clear_failure(&mut self, name: &str) -> bool {
        if let Some(idx) = self.current.iter().position(|entry| entry == name) {
            self.current.remove(idx);
            true
        } else {
            false
        }
    }

    /// Node-level statistics: the number of currently failed apps and the
    /// number of inspected life cycles that did not start after a clean
    /// shutdown.
    pub fn node_statistics(&self) -> Statistics {
        let mut total_failures = 0;
        let mut idx = 0;
        while idx < self.lifecycles.len() && idx <= self.historic_lc_count as usize {
            if self.lifecycles[idx].start_state != NodeShutdownState::Shutdown {
                total_failures += 1;
            }
            idx += 1;
        }

        Statistics {
            current_fail_count: self.current_failed_count(),
            total_failures,
            total_lifecycles: idx as u32,
        }
    }

    /// Per-application statistics: fail count in the current LC and the sum
    /// over the inspected life cycles.
    pub fn app_statistics(&self, name: &str) -> Statistics {
        let Some(current_lc) = self.lifecycles.first() else {
            return Statistics {
                current_fail_count: 0,
                total_failures: 0,
                total_lifecycles: 0,
            };
        };

        let current_fail_count = current_lc.failcount_of(name);
        let mut total_failures = current_fail_count;
        let mut idx = 1;
        while idx < self.lifecycles.len() && idx <= self.historic_lc_count as usize {
            total_failures += self.lifecycles[idx].failcount_of(name);
            idx += 1;
        }

        Statistics {
            current_fail_count,
            total_failures,
            total_lifecycles: idx as u32,
        }
    }
}
