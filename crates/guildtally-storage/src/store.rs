use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::time::timeout;
use tracing::{info, warn};

use guildtally_core::{
    CounterRow, Result, StorageConfig, StorageGateway, TallyError, TenantId, UserId,
};

/// How long a graceful pool shutdown may take before we give up waiting.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Counter store backed by SQLite.
///
/// One row per (tenant, user) pair in `message_count`, protected by a unique
/// index so the increment path can upsert atomically instead of racing a
/// check-then-insert.
#[derive(Clone, Debug)]
pub struct SqliteCounterStore {
    pool: SqlitePool,
    command_timeout: Duration,
}

impl SqliteCounterStore {
    /// Connect a pool per the given config and prepare the schema.
    ///
    /// Connection failure is a configuration error: callers are expected to
    /// disable the counter subsystem rather than run without storage.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| {
                TallyError::Configuration(format!("couldn't connect to {}: {e}", config.url))
            })?;
        let store = Self {
            pool,
            command_timeout: config.command_timeout(),
        };
        store.migrate().await?;
        info!(url = %config.url, "counter store connected");
        Ok(store)
    }

    /// Wrap an existing pool. The schema is still the caller's to migrate.
    pub fn with_pool(pool: SqlitePool, command_timeout: Duration) -> Self {
        Self {
            pool,
            command_timeout,
        }
    }

    /// Create the counter table and its uniqueness guarantee if absent.
    pub async fn migrate(&self) -> Result<()> {
        self.run("create message_count", async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS message_count (
                    guild_id      INTEGER NOT NULL,
                    user_id       INTEGER NOT NULL,
                    message_count INTEGER NOT NULL
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_message_count_guild_user
                 ON message_count(guild_id, user_id)",
            )
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Gracefully close the pool, bounded by [`CLOSE_TIMEOUT`].
    pub async fn close(&self) {
        if timeout(CLOSE_TIMEOUT, self.pool.close()).await.is_err() {
            warn!("counter store pool didn't close in time");
        } else {
            info!("counter store pool closed");
        }
    }

    /// Run a storage command under the configured command timeout, mapping
    /// driver errors and timeouts into the transient taxonomy.
    async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TallyError::TransientStorage(format!("{op}: {e}"))),
            Err(_) => Err(TallyError::TransientStorage(format!(
                "{op}: timed out after {:?}",
                self.command_timeout
            ))),
        }
    }
}

#[async_trait]
impl StorageGateway for SqliteCounterStore {
    async fn ready(&self) -> Result<()> {
        self.run("readiness probe", async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn get_total(&self, tenant: TenantId, user: UserId) -> Result<Option<u64>> {
        let total: Option<i64> = self
            .run("get total", async {
                sqlx::query_scalar(
                    "SELECT message_count FROM message_count WHERE guild_id = ? AND user_id = ?",
                )
                .bind(tenant as i64)
                .bind(user as i64)
                .fetch_optional(&self.pool)
                .await
            })
            .await?;
        Ok(total.map(|t| t as u64))
    }

    async fn increment_and_get_total(
        &self,
        tenant: TenantId,
        user: UserId,
        delta: u64,
    ) -> Result<u64> {
        let total: Option<i64> = self
            .run("increment total", async {
                sqlx::query_scalar(
                    r#"
                    UPDATE message_count SET message_count = message_count + ?
                    WHERE guild_id = ? AND user_id = ?
                    RETURNING message_count
                    "#,
                )
                .bind(delta as i64)
                .bind(tenant as i64)
                .bind(user as i64)
                .fetch_optional(&self.pool)
                .await
            })
            .await?;
        total.map(|t| t as u64).ok_or_else(|| {
            TallyError::TransientStorage(format!(
                "increment total: no counter row for ({tenant}, {user})"
            ))
        })
    }

    async fn insert_initial(&self, tenant: TenantId, user: UserId, total: u64) -> Result<()> {
        self.run("insert initial", async {
            sqlx::query(
                "INSERT INTO message_count (guild_id, user_id, message_count) VALUES (?, ?, ?)",
            )
            .bind(tenant as i64)
            .bind(user as i64)
            .bind(total as i64)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn add_and_get_total(&self, tenant: TenantId, user: UserId, delta: u64) -> Result<u64> {
        let total: i64 = self
            .run("upsert delta", async {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO message_count (guild_id, user_id, message_count)
                    VALUES (?, ?, ?)
                    ON CONFLICT(guild_id, user_id)
                    DO UPDATE SET message_count = message_count + excluded.message_count
                    RETURNING message_count
                    "#,
                )
                .bind(tenant as i64)
                .bind(user as i64)
                .bind(delta as i64)
                .fetch_one(&self.pool)
                .await
            })
            .await?;
        Ok(total as u64)
    }

    async fn overwrite_total(&self, tenant: TenantId, user: UserId, total: u64) -> Result<()> {
        self.run("overwrite total", async {
            sqlx::query(
                r#"
                INSERT INTO message_count (guild_id, user_id, message_count)
                VALUES (?, ?, ?)
                ON CONFLICT(guild_id, user_id)
                DO UPDATE SET message_count = excluded.message_count
                "#,
            )
            .bind(tenant as i64)
            .bind(user as i64)
            .bind(total as i64)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn tenant_counters(&self, tenant: TenantId) -> Result<Vec<CounterRow>> {
        let rows = self
            .run("list tenant counters", async {
                sqlx::query(
                    r#"
                    SELECT user_id, message_count FROM message_count
                    WHERE guild_id = ?
                    ORDER BY message_count DESC
                    "#,
                )
                .bind(tenant as i64)
                .fetch_all(&self.pool)
                .await
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| CounterRow {
                tenant,
                user: row.get::<i64, _>("user_id") as u64,
                total: row.get::<i64, _>("message_count") as u64,
            })
            .collect())
    }
}
