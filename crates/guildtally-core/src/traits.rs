use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ActivityEvent, CounterRow, TenantId, TierLevel, TierTransition, UserId};

/// Durable per-(tenant, user) counter store.
///
/// Backed by the `message_count(guild_id, user_id, message_count)` table.
/// The flush path uses [`add_and_get_total`](StorageGateway::add_and_get_total),
/// an atomic upsert, so concurrent writers cannot create duplicate rows.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Cheap liveness probe; the counter subsystem refuses to start without it.
    async fn ready(&self) -> Result<()>;

    async fn get_total(&self, tenant: TenantId, user: UserId) -> Result<Option<u64>>;

    /// Increment an existing row and return the new total. The row must exist.
    async fn increment_and_get_total(
        &self,
        tenant: TenantId,
        user: UserId,
        delta: u64,
    ) -> Result<u64>;

    /// Insert a first-ever row for the pair.
    async fn insert_initial(&self, tenant: TenantId, user: UserId, total: u64) -> Result<()>;

    /// Atomically add `delta`, creating the row if absent, and return the new
    /// total.
    async fn add_and_get_total(&self, tenant: TenantId, user: UserId, delta: u64) -> Result<u64>;

    /// Replace the stored total with an absolute value, creating the row if
    /// absent. Only bulk reconciliation uses this.
    async fn overwrite_total(&self, tenant: TenantId, user: UserId, total: u64) -> Result<()>;

    /// All counter rows for a tenant, highest totals first.
    async fn tenant_counters(&self, tenant: TenantId) -> Result<Vec<CounterRow>>;
}

/// Role-assignment collaborator. Applying a tier supersedes any lower tier the
/// user holds; the call is idempotent.
#[async_trait]
pub trait TierSink: Send + Sync {
    async fn apply_tier(&self, transition: TierTransition) -> Result<()>;
}

/// Membership lookups needed for tier evaluation.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn joined_at(&self, tenant: TenantId, user: UserId) -> Result<DateTime<Utc>>;

    async fn held_tiers(&self, tenant: TenantId, user: UserId) -> Result<Vec<TierLevel>>;
}

/// Historical message archive, for bulk reconciliation. Returns every event in
/// the channels the caller can read, unfiltered.
#[async_trait]
pub trait MessageArchive: Send + Sync {
    async fn fetch_all(&self, tenant: TenantId) -> Result<Vec<ActivityEvent>>;
}
