//! Per-tick summary of what the engine did.

/// Actions taken during one reconciliation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tick: u64,
    /// Signed capacity delta computed for this tick.
    pub delta: i64,
    pub reactivated: usize,
    pub created: usize,
    pub drained: usize,
    /// Instances destroyed because no registry entry referenced them.
    pub dangling_instances_removed: usize,
    /// Registry entries deleted because no instance backed them.
    pub dangling_registrations_removed: usize,
    pub stale_removed: usize,
    pub drained_removed: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.reactivated == 0
            && self.created == 0
            && self.drained == 0
            && self.dangling_instances_removed == 0
            && self.dangling_registrations_removed == 0
            && self.stale_removed == 0
            && self.drained_removed == 0
    }
}
