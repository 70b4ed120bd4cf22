use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use guildtally_core::{
    MemberDirectory, StorageGateway, TallyError, TenantId, TierSink, TierTransition, UserId,
};

use crate::accumulator::Accumulator;
use crate::tiers::TierPolicy;

/// Counters for the background flush pipeline.
#[derive(Debug, Default)]
pub struct FlushStats {
    cycles: AtomicU64,
    users_flushed: AtomicU64,
    users_failed: AtomicU64,
    transitions_applied: AtomicU64,
}

impl FlushStats {
    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            users_flushed: self.users_flushed.load(Ordering::Relaxed),
            users_failed: self.users_failed.load(Ordering::Relaxed),
            transitions_applied: self.transitions_applied.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStatsSnapshot {
    pub cycles: u64,
    pub users_flushed: u64,
    pub users_failed: u64,
    pub transitions_applied: u64,
}

/// Shared handles for one flush or reconciliation pass.
#[derive(Clone)]
pub(crate) struct FlushContext {
    pub accumulator: Arc<Accumulator>,
    pub storage: Arc<dyn StorageGateway>,
    pub sink: Arc<dyn TierSink>,
    pub directory: Arc<dyn MemberDirectory>,
    pub policy: Arc<TierPolicy>,
    pub stats: Arc<FlushStats>,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic task draining the accumulator into durable storage.
///
/// Cancellation is cooperative: it is observed between cycles, so an in-flight
/// drain/persist cycle always completes before the loop exits. At most one
/// cycle of buffered increments can be lost on a hard stop.
pub struct FlushScheduler {
    ctx: FlushContext,
    period: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl FlushScheduler {
    pub fn new(
        accumulator: Arc<Accumulator>,
        storage: Arc<dyn StorageGateway>,
        sink: Arc<dyn TierSink>,
        directory: Arc<dyn MemberDirectory>,
        policy: TierPolicy,
        period: Duration,
    ) -> Self {
        Self {
            ctx: FlushContext {
                accumulator,
                storage,
                sink,
                directory,
                policy: Arc::new(policy),
                stats: Arc::new(FlushStats::default()),
            },
            period,
            running: Mutex::new(None),
        }
    }

    /// Spawn the periodic loop. A no-op when already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let ctx = self.ctx.clone();
        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(?period, "flush scheduler started");
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => flush_cycle(&ctx).await,
                }
            }
            info!("flush scheduler stopped");
        });
        *running = Some(RunningLoop { token, handle });
    }

    /// Cancel the loop and wait for the in-flight cycle to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(RunningLoop { token, handle }) = running {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "flush loop didn't join cleanly");
            }
        }
    }

    /// Stop the loop, then run one final best-effort drain.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.flush_once().await;
    }

    /// Run a single flush cycle on the caller's task.
    pub async fn flush_once(&self) {
        flush_cycle(&self.ctx).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn stats(&self) -> FlushStatsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub(crate) fn context(&self) -> &FlushContext {
        &self.ctx
    }
}

/// Drain every pending tenant and persist its deltas.
///
/// A persistence failure skips that user only; the rest of the tenant map and
/// the remaining tenants still flush. Failed deltas are not re-queued.
async fn flush_cycle(ctx: &FlushContext) {
    while let Some((tenant, counts)) = ctx.accumulator.drain_one() {
        debug!(tenant, users = counts.len(), "flushing tenant deltas");
        for (user, delta) in counts {
            match ctx.storage.add_and_get_total(tenant, user, delta).await {
                Ok(total) => {
                    ctx.stats.users_flushed.fetch_add(1, Ordering::Relaxed);
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        promote_if_eligible(&ctx, tenant, user, total).await;
                    });
                }
                Err(e) => {
                    ctx.stats.users_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(tenant, user, delta, error = %e, "couldn't persist delta, skipping");
                }
            }
        }
    }
    ctx.stats.cycles.fetch_add(1, Ordering::Relaxed);
}

/// Evaluate the tier ladder against a freshly persisted total and apply the
/// resulting transition, if any.
///
/// Runs detached from the flush loop; every failure here is logged and
/// swallowed so evaluation can never abort a flush cycle.
pub(crate) async fn promote_if_eligible(
    ctx: &FlushContext,
    tenant: TenantId,
    user: UserId,
    total: u64,
) {
    let joined_at = match ctx.directory.joined_at(tenant, user).await {
        Ok(joined_at) => joined_at,
        Err(e) => {
            warn!(tenant, user, error = %e, "couldn't resolve join date, skipping evaluation");
            return;
        }
    };
    let tenure_days = (Utc::now() - joined_at).num_days().max(0) as u64;
    let held = match ctx.directory.held_tiers(tenant, user).await {
        Ok(held) => held,
        Err(e) => {
            warn!(tenant, user, error = %e, "couldn't resolve held tiers, skipping evaluation");
            return;
        }
    };
    let Some(tier) = ctx.policy.evaluate(total, tenure_days, &held) else {
        return;
    };
    match ctx.sink.apply_tier(TierTransition { tenant, user, to: tier }).await {
        Ok(()) => {
            ctx.stats.transitions_applied.fetch_add(1, Ordering::Relaxed);
            info!(tenant, user, tier = %tier, total, "tier applied");
        }
        Err(TallyError::PermissionDenied(reason)) => {
            warn!(tenant, user, tier = %tier, %reason, "missing permissions to apply tier");
        }
        Err(e) => {
            warn!(tenant, user, tier = %tier, error = %e, "tier application failed");
        }
    }
}
