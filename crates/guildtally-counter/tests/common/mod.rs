#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::{DashMap, DashSet};

use guildtally_core::{
    ActivityEvent, CounterConfig, CounterRow, MemberDirectory, MessageArchive, Result,
    StorageGateway, TallyError, TenantId, TierLevel, TierSink, TierTransition, UserId,
};
use guildtally_counter::{Accumulator, FlushScheduler, TallyService, TierPolicy};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Give detached tier-evaluation tasks a moment to land.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

pub fn countable(tenant: TenantId, user: UserId) -> ActivityEvent {
    ActivityEvent {
        tenant,
        user,
        author_is_bot: false,
        author_is_owner: false,
        token_count: 5,
    }
}

#[derive(Default)]
pub struct MockGateway {
    totals: DashMap<(TenantId, UserId), u64>,
    fail_users: DashSet<UserId>,
    unready: AtomicBool,
}

impl MockGateway {
    pub fn fail_user(&self, user: UserId) {
        self.fail_users.insert(user);
    }

    pub fn set_unready(&self) {
        self.unready.store(true, Ordering::SeqCst);
    }

    pub fn total(&self, tenant: TenantId, user: UserId) -> Option<u64> {
        self.totals.get(&(tenant, user)).map(|v| *v)
    }
}

#[async_trait]
impl StorageGateway for MockGateway {
    async fn ready(&self) -> Result<()> {
        if self.unready.load(Ordering::SeqCst) {
            Err(TallyError::TransientStorage("mock storage offline".into()))
        } else {
            Ok(())
        }
    }

    async fn get_total(&self, tenant: TenantId, user: UserId) -> Result<Option<u64>> {
        Ok(self.total(tenant, user))
    }

    async fn increment_and_get_total(
        &self,
        tenant: TenantId,
        user: UserId,
        delta: u64,
    ) -> Result<u64> {
        match self.totals.get_mut(&(tenant, user)) {
            Some(mut entry) => {
                *entry += delta;
                Ok(*entry)
            }
            None => Err(TallyError::TransientStorage(format!(
                "no counter row for ({tenant}, {user})"
            ))),
        }
    }

    async fn insert_initial(&self, tenant: TenantId, user: UserId, total: u64) -> Result<()> {
        self.totals.insert((tenant, user), total);
        Ok(())
    }

    async fn add_and_get_total(&self, tenant: TenantId, user: UserId, delta: u64) -> Result<u64> {
        if self.fail_users.contains(&user) {
            return Err(TallyError::TransientStorage("injected write failure".into()));
        }
        let mut entry = self.totals.entry((tenant, user)).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }

    async fn overwrite_total(&self, tenant: TenantId, user: UserId, total: u64) -> Result<()> {
        if self.fail_users.contains(&user) {
            return Err(TallyError::TransientStorage("injected write failure".into()));
        }
        self.totals.insert((tenant, user), total);
        Ok(())
    }

    async fn tenant_counters(&self, tenant: TenantId) -> Result<Vec<CounterRow>> {
        let mut rows: Vec<CounterRow> = self
            .totals
            .iter()
            .filter(|entry| entry.key().0 == tenant)
            .map(|entry| CounterRow {
                tenant,
                user: entry.key().1,
                total: *entry.value(),
            })
            .collect();
        rows.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(rows)
    }
}

pub struct MockSink {
    applied: Mutex<Vec<TierTransition>>,
    held: Arc<DashMap<(TenantId, UserId), Vec<TierLevel>>>,
    deny: AtomicBool,
}

impl MockSink {
    fn new(held: Arc<DashMap<(TenantId, UserId), Vec<TierLevel>>>) -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            held,
            deny: AtomicBool::new(false),
        }
    }

    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<TierTransition> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl TierSink for MockSink {
    async fn apply_tier(&self, transition: TierTransition) -> Result<()> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(TallyError::PermissionDenied("mock role denied".into()));
        }
        self.applied.lock().unwrap().push(transition);
        // Supersede: the new tier replaces whatever was held before.
        self.held
            .insert((transition.tenant, transition.user), vec![transition.to]);
        Ok(())
    }
}

pub struct MockDirectory {
    joined: DashMap<(TenantId, UserId), DateTime<Utc>>,
    held: Arc<DashMap<(TenantId, UserId), Vec<TierLevel>>>,
}

impl MockDirectory {
    fn new(held: Arc<DashMap<(TenantId, UserId), Vec<TierLevel>>>) -> Self {
        Self {
            joined: DashMap::new(),
            held,
        }
    }

    pub fn set_member(
        &self,
        tenant: TenantId,
        user: UserId,
        tenure_days: i64,
        held: Vec<TierLevel>,
    ) {
        self.joined
            .insert((tenant, user), Utc::now() - ChronoDuration::days(tenure_days));
        self.held.insert((tenant, user), held);
    }

    pub fn held(&self, tenant: TenantId, user: UserId) -> Vec<TierLevel> {
        self.held
            .get(&(tenant, user))
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MemberDirectory for MockDirectory {
    async fn joined_at(&self, tenant: TenantId, user: UserId) -> Result<DateTime<Utc>> {
        Ok(self
            .joined
            .get(&(tenant, user))
            .map(|v| *v)
            .unwrap_or_else(Utc::now))
    }

    async fn held_tiers(&self, tenant: TenantId, user: UserId) -> Result<Vec<TierLevel>> {
        Ok(self.held(tenant, user))
    }
}

#[derive(Default)]
pub struct MockArchive {
    history: DashMap<TenantId, Vec<ActivityEvent>>,
}

impl MockArchive {
    pub fn set_history(&self, tenant: TenantId, events: Vec<ActivityEvent>) {
        self.history.insert(tenant, events);
    }
}

#[async_trait]
impl MessageArchive for MockArchive {
    async fn fetch_all(&self, tenant: TenantId) -> Result<Vec<ActivityEvent>> {
        Ok(self
            .history
            .get(&tenant)
            .map(|v| v.clone())
            .unwrap_or_default())
    }
}

/// A full set of mock collaborators sharing one held-tiers view.
pub struct World {
    pub gateway: Arc<MockGateway>,
    pub sink: Arc<MockSink>,
    pub directory: Arc<MockDirectory>,
    pub archive: Arc<MockArchive>,
}

impl World {
    pub fn new() -> Self {
        let held = Arc::new(DashMap::new());
        Self {
            gateway: Arc::new(MockGateway::default()),
            sink: Arc::new(MockSink::new(Arc::clone(&held))),
            directory: Arc::new(MockDirectory::new(held)),
            archive: Arc::new(MockArchive::default()),
        }
    }

    pub fn service(&self, config: CounterConfig) -> TallyService {
        TallyService::new(
            config,
            self.gateway.clone(),
            self.sink.clone(),
            self.directory.clone(),
            self.archive.clone(),
        )
    }

    /// A bare scheduler over a fresh accumulator, for timer-level tests.
    pub fn scheduler(
        &self,
        period: std::time::Duration,
    ) -> (Arc<Accumulator>, FlushScheduler) {
        let accumulator = Arc::new(Accumulator::new());
        let scheduler = FlushScheduler::new(
            Arc::clone(&accumulator),
            self.gateway.clone(),
            self.sink.clone(),
            self.directory.clone(),
            TierPolicy::default(),
            period,
        );
        (accumulator, scheduler)
    }
}
