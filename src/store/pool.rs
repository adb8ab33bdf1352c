//! Bounded connection pool over SQLite connections.
//!
//! A semaphore caps the number of live checkouts at `max_connections`; idle
//! connections are kept on a stack and reused. A checkout is exclusive to
//! its holder and goes back to the pool when the guard is dropped, on every
//! exit path.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use super::error::PoolError;

/// Opens one fresh connection
pub type Opener = Arc<dyn Fn() -> rusqlite::Result<Connection> + Send + Sync>;

/// Pool sizing and acquisition limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

struct PoolInner {
    label: String,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    opener: Opener,
    settings: PoolSettings,
    opened: AtomicUsize,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        // The guarded Vec stays consistent even if a holder panicked
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self) -> Result<Connection, PoolError> {
        let conn = (self.opener)().map_err(|source| PoolError::Open {
            database: self.label.clone(),
            source,
        })?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }
}

/// Shared handle to the pool; clones refer to the same connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create the pool and open `min_connections` connections eagerly
    pub fn open(
        label: impl Into<String>,
        opener: Opener,
        settings: PoolSettings,
    ) -> Result<Self, PoolError> {
        let inner = Arc::new(PoolInner {
            label: label.into(),
            idle: Mutex::new(Vec::with_capacity(settings.max_connections)),
            permits: Arc::new(Semaphore::new(settings.max_connections)),
            opener,
            settings,
            opened: AtomicUsize::new(0),
        });

        let mut warm = Vec::with_capacity(settings.min_connections);
        for _ in 0..settings.min_connections {
            warm.push(inner.open()?);
        }
        inner.idle().extend(warm);

        debug!(
            database = %inner.label,
            min = settings.min_connections,
            max = settings.max_connections,
            "Connection pool ready"
        );

        Ok(Self { inner })
    }

    /// Check out a connection, waiting at most `acquire_timeout`
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let waited = self.inner.settings.acquire_timeout;
        let permit = tokio::time::timeout(waited, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::Exhausted { waited })?
            .map_err(|_| PoolError::Closed)?;

        self.checkout(permit)
    }

    /// Check out a connection only if one is free right now
    pub fn acquire_now(&self) -> Result<PooledConnection, PoolError> {
        let permit = self
            .inner
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|err| match err {
                TryAcquireError::Closed => PoolError::Closed,
                TryAcquireError::NoPermits => PoolError::Exhausted {
                    waited: Duration::ZERO,
                },
            })?;

        self.checkout(permit)
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection, PoolError> {
        let reused = self.inner.idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.inner.open()?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Checkouts that could start right now without waiting
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Connections opened over the pool's lifetime
    pub fn opened_count(&self) -> usize {
        self.inner.opened.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> PoolSettings {
        self.inner.settings
    }
}

/// Exclusive checkout; returns the connection to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `drop` takes the connection out
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // A connection left inside a transaction (panic mid-body) is discarded
            if conn.is_autocommit() {
                self.pool.idle().push(conn);
            }
        }
        // `_permit` is released after the connection is back on the stack
    }
}
