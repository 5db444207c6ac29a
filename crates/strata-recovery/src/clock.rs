use std::sync::Mutex;

use strata_types::temporal::wall_clock_ms;
use strata_types::TemporalAnchor;

struct ClockState {
    physical_ms: u64,
    logical: u32,
}

/// Hybrid logical clock issuing snapshot creation times.
///
/// Every anchor handed out is strictly greater than the previous one, even
/// when the wall clock stalls or steps backwards, so creation order always
/// matches `created_at` order.
///
/// - **Local event**: `physical = max(wall_clock, state.physical)`; the
///   logical counter resets when physical advances and increments otherwise.
/// - **Observe**: raising the state to an anchor read back from storage
///   keeps new anchors ahead of everything already persisted.
pub struct HybridLogicalClock {
    node_id: u16,
    state: Mutex<ClockState>,
}

impl HybridLogicalClock {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id,
            state: Mutex::new(ClockState {
                physical_ms: 0,
                logical: 0,
            }),
        }
    }

    /// A fresh anchor, strictly greater than any previously returned.
    pub fn now(&self) -> TemporalAnchor {
        let wall = wall_clock_ms();
        let mut state = self.lock();

        let new_physical = wall.max(state.physical_ms);
        let new_logical = if new_physical > state.physical_ms {
            0
        } else {
            state.logical + 1
        };

        state.physical_ms = new_physical;
        state.logical = new_logical;

        TemporalAnchor::new(new_physical, new_logical, self.node_id)
    }

    /// Ensure later anchors sort after `seen`.
    pub fn observe(&self, seen: &TemporalAnchor) {
        let mut state = self.lock();
        if (seen.physical_ms, seen.logical) > (state.physical_ms, state.logical) {
            state.physical_ms = seen.physical_ms;
            state.logical = seen.logical;
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        // Both fields are written together, so a poisoned state is intact.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for HybridLogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLogicalClock")
            .field("node_id", &self.node_id)
            .finish()
    }
}
