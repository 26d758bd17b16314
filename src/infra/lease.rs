//! Pass leases guaranteeing one reconciliation pass at a time.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::{AppError, DatabaseError, PassLease};

/// In-process lease; enough when a single replica runs the reconciler.
#[derive(Debug, Default)]
pub struct LocalPassLease {
    held: AtomicBool,
}

impl LocalPassLease {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PassLease for LocalPassLease {
    async fn try_acquire(&self) -> Result<bool, AppError> {
        Ok(self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn release(&self) -> Result<(), AppError> {
        self.held.store(false, Ordering::Release);
        Ok(())
    }

    fn abandon(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Advisory-lock key shared by every replica: ASCII "reconcil".
pub const DEFAULT_ADVISORY_KEY: i64 = 0x7265_636f_6e63_696c;

/// Cluster-wide lease backed by a Postgres session advisory lock.
///
/// The lock lives on one pooled session, so that connection is held until
/// `release` unlocks it. A session whose unlock fails is closed instead of
/// going back to the pool, which ends it and frees the lock.
pub struct PostgresPassLease {
    pool: PgPool,
    key: i64,
    session: Arc<Mutex<Option<PoolConnection<Postgres>>>>,
}

impl PostgresPassLease {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_key(pool, DEFAULT_ADVISORY_KEY)
    }

    #[must_use]
    pub fn with_key(pool: PgPool, key: i64) -> Self {
        Self {
            pool,
            key,
            session: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl PassLease for PostgresPassLease {
    #[instrument(skip(self), fields(key = self.key))]
    async fn try_acquire(&self) -> Result<bool, AppError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(false);
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        if acquired {
            *session = Some(conn);
        } else {
            debug!("Advisory lock held by another replica");
        }
        Ok(acquired)
    }

    #[instrument(skip(self), fields(key = self.key))]
    async fn release(&self) -> Result<(), AppError> {
        let mut session = self.session.lock().await;
        let unlocked = match session.as_mut() {
            Some(conn) => sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .fetch_one(&mut **conn)
                .await,
            None => return Ok(()),
        };
        let Some(conn) = session.take() else {
            return Ok(());
        };

        match unlocked {
            Ok(true) => {}
            Ok(false) => {
                warn!("Lease session did not hold the advisory lock, closing it");
                close_session(conn).await;
            }
            Err(e) => {
                warn!(error = ?e, "Failed to unlock advisory lock, closing the session");
                close_session(conn).await;
            }
        }
        Ok(())
    }

    fn abandon(&self) {
        let session = Arc::clone(&self.session);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime left means the pool and its sessions are shutting down.
            return;
        };
        runtime.spawn(async move {
            if let Some(conn) = session.lock().await.take() {
                warn!("Reconciliation pass abandoned, closing lease session");
                close_session(conn).await;
            }
        });
    }
}

/// Ends the session holding the lock so the server frees it.
async fn close_session(conn: PoolConnection<Postgres>) {
    if let Err(e) = conn.close().await {
        warn!(error = ?e, "Failed to close lease session");
    }
}
