use std::collections::HashMap;

use parking_lot::Mutex;

use guildtally_core::{TenantId, UserId};

/// In-memory buffer of per-(tenant, user) increments awaiting flush.
///
/// One lock guards both recording and draining, so an increment lands in
/// exactly one drain. Critical sections are map operations only; callers must
/// never hold the lock across I/O.
#[derive(Debug, Default)]
pub struct Accumulator {
    pending: Mutex<HashMap<TenantId, HashMap<UserId, u64>>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one activity event for the pair. Infallible, O(1) amortized.
    pub fn record(&self, tenant: TenantId, user: UserId) {
        let mut pending = self.pending.lock();
        *pending.entry(tenant).or_default().entry(user).or_insert(0) += 1;
    }

    /// Atomically remove and return one tenant's whole pending map.
    ///
    /// Returns `None` when nothing is pending. Which tenant comes out first is
    /// unspecified; every tenant is reached by repeated calls.
    pub fn drain_one(&self) -> Option<(TenantId, HashMap<UserId, u64>)> {
        let mut pending = self.pending.lock();
        let tenant = *pending.keys().next()?;
        let counts = pending.remove(&tenant)?;
        Some((tenant, counts))
    }

    /// Drop one tenant's pending increments without persisting them.
    ///
    /// Bulk reconciliation uses this: the archive recount already covers
    /// everything buffered before suspension, so flushing those deltas
    /// afterwards would double-count. Returns the number of increments dropped.
    pub fn discard_tenant(&self, tenant: TenantId) -> u64 {
        let mut pending = self.pending.lock();
        pending
            .remove(&tenant)
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Number of tenants with buffered increments.
    pub fn pending_tenants(&self) -> usize {
        self.pending.lock().len()
    }
}
