use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use guildtally_core::{MessageArchive, Result, TallyError, TenantId, UserId};

use crate::flush::{promote_if_eligible, FlushScheduler};

/// Report for one bulk reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub run_id: Uuid,
    pub messages_scanned: usize,
    pub messages_counted: usize,
    pub users_seeded: usize,
    pub users_failed: usize,
    /// Buffered increments dropped at suspension; the recount subsumes them.
    pub pending_discarded: u64,
}

/// One-shot historical recount seeding storage with absolute totals.
///
/// Mutually exclusive with the periodic flush loop: the scheduler is stopped
/// for the duration and restarted afterwards, and the tenant's buffered
/// increments are discarded so the absolute overwrite is never followed by a
/// stale incremental flush.
pub struct Reconciler {
    scheduler: Arc<FlushScheduler>,
    archive: Arc<dyn MessageArchive>,
    confirm_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        scheduler: Arc<FlushScheduler>,
        archive: Arc<dyn MessageArchive>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            scheduler,
            archive,
            confirm_timeout,
        }
    }

    /// Run a full recount for one tenant once the caller confirms.
    ///
    /// The confirmation channel must resolve to `true` within the configured
    /// timeout; a timeout, a dropped sender, or an explicit `false` aborts with
    /// [`TallyError::ConfirmationTimeout`] before any state is touched.
    pub async fn run(
        &self,
        tenant: TenantId,
        confirmation: oneshot::Receiver<bool>,
    ) -> Result<ReconcileOutcome> {
        let run_id = Uuid::new_v4();
        let confirmed = match timeout(self.confirm_timeout, confirmation).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => false,
            Err(_) => false,
        };
        if !confirmed {
            info!(%run_id, tenant, "reconciliation not confirmed, discarding");
            return Err(TallyError::ConfirmationTimeout);
        }

        info!(%run_id, tenant, "reconciliation confirmed, suspending flush scheduler");
        let was_running = self.scheduler.is_running();
        self.scheduler.stop().await;
        let result = self.recount(run_id, tenant).await;
        if was_running {
            self.scheduler.start();
        }
        result
    }

    async fn recount(&self, run_id: Uuid, tenant: TenantId) -> Result<ReconcileOutcome> {
        let ctx = self.scheduler.context();
        let pending_discarded = ctx.accumulator.discard_tenant(tenant);

        let events = self.archive.fetch_all(tenant).await?;
        let messages_scanned = events.len();

        let mut totals: HashMap<UserId, u64> = HashMap::new();
        for event in events.iter().filter(|e| e.is_countable()) {
            *totals.entry(event.user).or_insert(0) += 1;
        }
        let messages_counted = totals.values().sum::<u64>() as usize;

        let mut users_seeded = 0;
        let mut users_failed = 0;
        for (user, total) in totals {
            match ctx.storage.overwrite_total(tenant, user, total).await {
                Ok(()) => {
                    users_seeded += 1;
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        promote_if_eligible(&ctx, tenant, user, total).await;
                    });
                }
                Err(e) => {
                    users_failed += 1;
                    warn!(tenant, user, total, error = %e, "couldn't seed recounted total");
                }
            }
        }

        info!(
            %run_id,
            tenant,
            messages_scanned,
            messages_counted,
            users_seeded,
            users_failed,
            pending_discarded,
            "reconciliation finished"
        );
        Ok(ReconcileOutcome {
            run_id,
            messages_scanned,
            messages_counted,
            users_seeded,
            users_failed,
            pending_discarded,
        })
    }
}
