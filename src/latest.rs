use std::sync::{Arc, PoisonError, RwLock};

use crate::telemetry::TelemetrySnapshot;

/// Single slot holding the most recent snapshot, shared between the refresh
/// task (sole writer) and the register read path.
///
/// Snapshots are published as whole `Arc`s: the lock only guards a pointer
/// swap or clone, so neither side holds it for longer than that.
#[derive(Debug, Default)]
pub struct LatestValue {
    slot: RwLock<Option<Arc<TelemetrySnapshot>>>,
}

impl LatestValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot. Returns the one it replaced.
    pub fn set(&self, snapshot: TelemetrySnapshot) -> Option<Arc<TelemetrySnapshot>> {
        let snapshot = Arc::new(snapshot);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(snapshot)
    }

    /// Current snapshot, `None` until the first successful fetch.
    pub fn get(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_present(&self) -> bool {
        self.get().is_some()
    }
}
