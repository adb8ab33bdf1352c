//! Persistence gateway.
//!
//! The [`Gateway`] owns a bounded [`ConnectionPool`] and runs every storage
//! operation through [`Gateway::scoped`]:
//!
//! ```text
//! acquire → BEGIN → body → COMMIT | ROLLBACK → release
//! ```
//!
//! Failures never escape as errors. They are logged, counted, and handed
//! back as [`StoreOutcome::Failed`], which callers collapse into the
//! category default (absent id, empty list, `false`) when they don't care
//! why. Only [`Gateway::connect`] fails hard, with a [`ConfigurationError`].

pub mod error;
pub mod outcome;
pub mod pool;
pub mod records;
pub(crate) mod schema;
pub mod summaries;
pub mod transcripts;
pub mod update;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::{Connection, Transaction};
use tracing::{debug, error, info, warn};

pub use error::{ConfigurationError, PersistenceError, PoolError};
pub use outcome::{OpCategory, StoreOutcome};
pub use pool::{ConnectionPool, Opener, PoolSettings, PooledConnection};
pub use records::{
    AccountEntry, CalendarEvent, Contact, DiaryEntry, Entity, EntryType, NewAccountEntry,
    NewCalendarEvent, NewContact, NewDiaryEntry, NewEntity, NewTask, Priority, Task, TaskStatus,
};
pub use summaries::{DaySummary, NewDaySummary};
pub use update::{Column, ColumnKind, Table};

use crate::domain::ExtractedRecord;

/// How to reach the database and size the pool
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// SQLite file path (a `sqlite://` or `sqlite:` prefix is accepted)
    pub database: String,
    pub pool: PoolSettings,

    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl StoreSettings {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            pool: PoolSettings::default(),
            busy_timeout: Duration::from_millis(5_000),
        }
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Filesystem path with any URL scheme stripped
    pub fn database_path(&self) -> PathBuf {
        let raw = self.database.trim();
        let path = raw
            .strip_prefix("sqlite://")
            .or_else(|| raw.strip_prefix("sqlite:"))
            .unwrap_or(raw);
        PathBuf::from(path)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let PoolSettings {
            min_connections: min,
            max_connections: max,
            ..
        } = self.pool;
        if max == 0 || min > max {
            return Err(ConfigurationError::InvalidPoolSize { min, max });
        }
        Ok(())
    }
}

/// Pooled, transaction-scoped access to the voxroute database.
///
/// Cheap to clone; clones share the pool and the failure counter.
#[derive(Clone)]
pub struct Gateway {
    pool: ConnectionPool,
    database: Arc<str>,
    failures: Arc<AtomicU64>,
}

impl Gateway {
    /// Open the pool, check connectivity and apply pending migrations.
    ///
    /// This is the only gateway call that returns an error: storage that
    /// cannot be reached here is a configuration problem, not a per-request
    /// failure.
    pub fn connect(settings: StoreSettings) -> Result<Self, ConfigurationError> {
        settings.validate()?;

        let path = settings.database_path();
        let database = path.display().to_string();
        let busy_timeout = settings.busy_timeout;

        let opener: Opener = Arc::new(move || open_connection(&path, busy_timeout));
        let mut pool_settings = settings.pool;
        // At least one connection is opened now so an unreachable path fails here
        pool_settings.min_connections = pool_settings.min_connections.max(1);

        let unreachable = |source: PoolError| ConfigurationError::Unreachable {
            database: database.clone(),
            source,
        };

        let pool = ConnectionPool::open(database.clone(), opener, pool_settings)
            .map_err(unreachable)?;

        {
            let mut conn = pool.acquire_now().map_err(unreachable)?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|source| {
                    unreachable(PoolError::Open {
                        database: database.clone(),
                        source,
                    })
                })?;
            let applied = schema::migrate(&mut conn)?;
            debug!(applied, "Schema up to date");
        }

        info!(
            database = %database,
            max_connections = pool_settings.max_connections,
            "Persistence gateway ready"
        );

        Ok(Self {
            pool,
            database: database.into(),
            failures: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Number of operations that degraded to a default since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Run `body` inside a scoped transaction.
    ///
    /// The body returns `Ok(Some(v))` for a hit, `Ok(None)` for nothing
    /// matched, or an error. The transaction commits only on `Ok`. The
    /// connection goes back to the pool on every path, including a panic in
    /// `body`.
    pub async fn scoped<T, F>(&self, category: OpCategory, op: &'static str, body: F) -> StoreOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<Option<T>, PersistenceError> + Send + 'static,
    {
        let started = Instant::now();

        let result = match self.pool.acquire().await {
            Ok(conn) => tokio::task::spawn_blocking(move || run_in_transaction(conn, category, op, body))
                .await
                .unwrap_or_else(|join_err| Err(PersistenceError::Task(join_err.to_string()))),
            Err(pool_err) => Err(pool_err.into()),
        };

        let outcome = StoreOutcome::from(result);
        match &outcome {
            StoreOutcome::Failed(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    op,
                    %category,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Storage operation failed"
                );
            }
            _ => debug!(
                op,
                %category,
                found = outcome.is_found(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Storage operation finished"
            ),
        }

        outcome
    }

    /// Partially update one row; only the given fields change
    pub async fn update_fields(&self, table: Table, id: i64, fields: ExtractedRecord) -> StoreOutcome<()> {
        self.scoped(OpCategory::Update, "update_fields", move |tx| {
            update::update_row(tx, table, id, &fields)
        })
        .await
    }

    /// Read one row of any known table with JSON columns decoded
    pub async fn get_row(&self, table: Table, id: i64) -> StoreOutcome<ExtractedRecord> {
        self.scoped(OpCategory::Read, "get_row", move |tx| update::read_row(tx, table, id))
            .await
    }
}

fn run_in_transaction<T, F>(
    mut conn: PooledConnection,
    category: OpCategory,
    op: &'static str,
    body: F,
) -> Result<Option<T>, PersistenceError>
where
    F: FnOnce(&Transaction<'_>) -> Result<Option<T>, PersistenceError>,
{
    let tx = conn.transaction_with_behavior(category.transaction_behavior())?;
    match body(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(op, error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

fn open_connection(path: &std::path::Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}
