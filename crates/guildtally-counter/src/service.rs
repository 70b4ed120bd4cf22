use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{error, info};

use guildtally_core::{
    ActivityEvent, CounterConfig, CounterRow, MemberDirectory, MessageArchive, Result,
    StorageGateway, TallyError, TenantId, TierSink, UserId, UserStats,
};

use crate::accumulator::Accumulator;
use crate::flush::{FlushScheduler, FlushStatsSnapshot};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::tiers::TierPolicy;

/// Long-lived owner of the counter pipeline.
///
/// Every collaborator is injected at construction; there is no ambient global
/// state and no runtime probing for optional dependencies. [`start`] verifies
/// the storage gateway before the flush loop spins up and disables the
/// subsystem with a configuration error when it is unreachable.
///
/// [`start`]: TallyService::start
pub struct TallyService {
    config: CounterConfig,
    accumulator: Arc<Accumulator>,
    storage: Arc<dyn StorageGateway>,
    directory: Arc<dyn MemberDirectory>,
    scheduler: Arc<FlushScheduler>,
    reconciler: Reconciler,
}

impl TallyService {
    pub fn new(
        config: CounterConfig,
        storage: Arc<dyn StorageGateway>,
        sink: Arc<dyn TierSink>,
        directory: Arc<dyn MemberDirectory>,
        archive: Arc<dyn MessageArchive>,
    ) -> Self {
        Self::with_policy(config, TierPolicy::default(), storage, sink, directory, archive)
    }

    pub fn with_policy(
        config: CounterConfig,
        policy: TierPolicy,
        storage: Arc<dyn StorageGateway>,
        sink: Arc<dyn TierSink>,
        directory: Arc<dyn MemberDirectory>,
        archive: Arc<dyn MessageArchive>,
    ) -> Self {
        let accumulator = Arc::new(Accumulator::new());
        let scheduler = Arc::new(FlushScheduler::new(
            Arc::clone(&accumulator),
            Arc::clone(&storage),
            sink,
            Arc::clone(&directory),
            policy,
            config.flush_interval(),
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&scheduler),
            archive,
            config.confirm_timeout(),
        );
        Self {
            config,
            accumulator,
            storage,
            directory,
            scheduler,
            reconciler,
        }
    }

    /// Verify storage readiness and start the periodic flush loop.
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.storage.ready().await {
            error!(error = %e, "storage gateway unavailable, counter subsystem disabled");
            return Err(TallyError::Configuration(format!(
                "storage gateway unavailable: {e}"
            )));
        }
        self.scheduler.start();
        info!("counter subsystem started");
        Ok(())
    }

    /// Record one platform event, applying the tenant allow-list and the
    /// eligibility filter. Returns whether the event was counted.
    pub fn observe(&self, event: &ActivityEvent) -> bool {
        if !self.config.is_counted(event.tenant) || !event.is_countable() {
            return false;
        }
        self.accumulator.record(event.tenant, event.user);
        true
    }

    /// Run one flush cycle immediately, outside the periodic schedule.
    pub async fn flush_now(&self) {
        self.scheduler.flush_once().await;
    }

    /// Counter total and tenure for one member.
    pub async fn user_stats(&self, tenant: TenantId, user: UserId) -> Result<UserStats> {
        let total = self.storage.get_total(tenant, user).await?;
        let joined_at = self.directory.joined_at(tenant, user).await?;
        let tenure_days = (Utc::now() - joined_at).num_days().max(0) as u64;
        Ok(UserStats { total, tenure_days })
    }

    /// All persisted counters for a tenant, highest first.
    pub async fn tenant_counters(&self, tenant: TenantId) -> Result<Vec<CounterRow>> {
        self.storage.tenant_counters(tenant).await
    }

    /// Recount a tenant's history from the archive, gated on confirmation.
    pub async fn reconcile(
        &self,
        tenant: TenantId,
        confirmation: oneshot::Receiver<bool>,
    ) -> Result<ReconcileOutcome> {
        self.reconciler.run(tenant, confirmation).await
    }

    /// Stop the flush loop and drain whatever is still buffered.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("counter subsystem stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn pending_tenants(&self) -> usize {
        self.accumulator.pending_tenants()
    }

    pub fn stats(&self) -> FlushStatsSnapshot {
        self.scheduler.stats()
    }
}
