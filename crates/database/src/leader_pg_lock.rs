//! Session level advisory lock used to elect the single instance that runs the
//! expiry sweep. The lock lives as long as the connection holding it, so the
//! connection is kept out of the pool while we are leader.

use {
    sqlx::postgres::PgPool,
    std::time::{Duration, Instant},
};

struct Held {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    key: String,
}

impl Held {
    async fn is_alive(&mut self) -> bool {
        sqlx::query("SELECT 1")
            .execute(&mut *self.conn)
            .await
            .is_ok()
    }

    async fn release(mut self) {
        if let Err(err) = sqlx::query("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
            .bind(&self.key)
            .execute(&mut *self.conn)
            .await
        {
            tracing::warn!(?err, key = %self.key, "failed to release leader lock");
        }
    }
}

pub struct LeaderLock {
    pool: PgPool,
    key: String,
    held: Option<Held>,
    last_attempt: Option<Instant>,
    retry_every: Duration,
}

impl LeaderLock {
    pub fn new(pool: PgPool, key: String, retry_every: Duration) -> Self {
        Self {
            pool,
            key,
            held: None,
            last_attempt: None,
            retry_every,
        }
    }

    /// Call once per loop iteration. Verifies a held lock is still alive and
    /// otherwise tries to acquire it, at most once per `retry_every`. Returns
    /// whether we are the leader right now.
    pub async fn tick(&mut self) -> Result<bool, sqlx::Error> {
        if let Some(held) = self.held.as_mut() {
            if !held.is_alive().await {
                tracing::warn!(key = %self.key, "leader connection died; stepping down");
                self.held = None;
            }
        }

        let may_retry = self
            .last_attempt
            .is_none_or(|last| last.elapsed() >= self.retry_every);
        if self.held.is_none() && may_retry {
            self.last_attempt = Some(Instant::now());
            let mut conn = self.pool.acquire().await?;
            let acquired: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                    .bind(&self.key)
                    .fetch_one(&mut *conn)
                    .await?;
            if acquired {
                tracing::info!(key = %self.key, "became leader");
                self.held = Some(Held {
                    conn,
                    key: self.key.clone(),
                });
            }
        }

        Ok(self.held.is_some())
    }

    pub async fn step_down(&mut self) {
        if let Some(held) = self.held.take() {
            held.release().await;
            tracing::info!(key = %self.key, "released leader lock");
        }
    }
}
