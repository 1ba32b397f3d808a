#![deny(warnings)]

//! Persistence layer: history schema, sqlite store and an in-memory store.
//!
//! Two record streams are kept. Tick snapshots are keyed by tick and job
//! records by job id; both are written with insert-or-replace so a job's row
//! moves STARTED -> COMPLETED/CANCELLED in place. Money is stored as integer
//! cents.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::runtime::Runtime;
use twin_core::{JobId, JobRecord, JobStatus, MachineHealth, Shift, Tick, TickSnapshot};

/// Returns the default SQLite URL used for local history.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/factory.db"
}

/// Convert a monetary amount to integer cents, rounding half to even.
pub fn decimal_to_cents_i64(d: Decimal) -> Option<i64> {
    d.checked_mul(Decimal::ONE_HUNDRED)?.round().to_i64()
}

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Storage failures. Callers treat these as best-effort write losses.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("value out of range for column {0}")]
    OutOfRange(&'static str),
    #[error("corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },
}

/// Append/upsert store for the two history streams.
pub trait HistoryStore: Send + Sync {
    /// Insert or replace the snapshot for `snapshot.tick`.
    fn record_tick(&mut self, snapshot: &TickSnapshot) -> Result<(), PersistenceError>;
    /// Insert or replace the row for `record.job_id`.
    fn record_job(&mut self, record: &JobRecord) -> Result<(), PersistenceError>;
    /// All snapshots ordered by tick.
    fn ticks(&self) -> Result<Vec<TickSnapshot>, PersistenceError>;
    /// All job rows ordered by job id.
    fn jobs(&self) -> Result<Vec<JobRecord>, PersistenceError>;
}

impl<S: HistoryStore + ?Sized> HistoryStore for Box<S> {
    fn record_tick(&mut self, snapshot: &TickSnapshot) -> Result<(), PersistenceError> {
        (**self).record_tick(snapshot)
    }

    fn record_job(&mut self, record: &JobRecord) -> Result<(), PersistenceError> {
        (**self).record_job(record)
    }

    fn ticks(&self) -> Result<Vec<TickSnapshot>, PersistenceError> {
        (**self).ticks()
    }

    fn jobs(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        (**self).jobs()
    }
}

/// Volatile store used for tests and `--memory` runs.
#[derive(Clone, Debug, Default)]
pub struct MemoryHistory {
    ticks: BTreeMap<Tick, TickSnapshot>,
    jobs: BTreeMap<JobId, JobRecord>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistory {
    fn record_tick(&mut self, snapshot: &TickSnapshot) -> Result<(), PersistenceError> {
        self.ticks.insert(snapshot.tick, snapshot.clone());
        Ok(())
    }

    fn record_job(&mut self, record: &JobRecord) -> Result<(), PersistenceError> {
        self.jobs.insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    fn ticks(&self) -> Result<Vec<TickSnapshot>, PersistenceError> {
        Ok(self.ticks.values().cloned().collect())
    }

    fn jobs(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        Ok(self.jobs.values().cloned().collect())
    }
}

/// Create the parent directory of a file-backed sqlite URL.
pub fn prepare_sqlite_path(url: &str) -> std::io::Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"));
    if let Some(path) = path {
        if path.starts_with(":memory:") || path.is_empty() {
            return Ok(());
        }
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}

/// Open the pool and apply migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool, PersistenceError> {
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // A single long-lived connection keeps `sqlite::memory:` databases alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

fn to_i64(v: u64, column: &'static str) -> Result<i64, PersistenceError> {
    i64::try_from(v).map_err(|_| PersistenceError::OutOfRange(column))
}

fn to_u64(v: i64, column: &'static str) -> Result<u64, PersistenceError> {
    u64::try_from(v).map_err(|_| PersistenceError::OutOfRange(column))
}

fn cents(d: Decimal, column: &'static str) -> Result<i64, PersistenceError> {
    decimal_to_cents_i64(d).ok_or(PersistenceError::OutOfRange(column))
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub async fn insert_tick(pool: &SqlitePool, s: &TickSnapshot) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT OR REPLACE INTO factory_history \
         (tick, cash_cents, inventory, machine_health, active_job_count, shift, recorded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(to_i64(s.tick, "tick")?)
    .bind(cents(s.cash, "cash_cents")?)
    .bind(to_i64(s.inventory, "inventory")?)
    .bind(s.health.value())
    .bind(i64::from(s.active_job_count))
    .bind(s.shift.as_str())
    .bind(now_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_job(pool: &SqlitePool, r: &JobRecord) -> Result<(), PersistenceError> {
    let end_tick = match r.end_tick {
        Some(t) => Some(to_i64(t, "end_tick")?),
        None => None,
    };
    sqlx::query(
        "INSERT OR REPLACE INTO job_history \
         (job_id, start_tick, end_tick, status, revenue_cents, cost_cents, recorded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(r.job_id.as_str())
    .bind(to_i64(r.start_tick, "start_tick")?)
    .bind(end_tick)
    .bind(r.status.as_str())
    .bind(cents(r.revenue, "revenue_cents")?)
    .bind(cents(r.cost, "cost_cents")?)
    .bind(now_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

type TickRow = (i64, i64, i64, f64, i64, String);
type JobRow = (String, i64, Option<i64>, String, i64, i64);

pub async fn load_ticks(pool: &SqlitePool) -> Result<Vec<TickSnapshot>, PersistenceError> {
    let rows: Vec<TickRow> = sqlx::query_as(
        "SELECT tick, cash_cents, inventory, machine_health, active_job_count, shift \
         FROM factory_history ORDER BY tick",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(tick, cash, inventory, health, count, shift)| {
            let shift = Shift::from_str(&shift).map_err(|e| PersistenceError::CorruptRow {
                table: "factory_history",
                detail: e.to_string(),
            })?;
            Ok(TickSnapshot {
                tick: to_u64(tick, "tick")?,
                cash: cents_to_decimal(cash),
                inventory: to_u64(inventory, "inventory")?,
                health: MachineHealth::new(health),
                active_job_count: u32::try_from(count)
                    .map_err(|_| PersistenceError::OutOfRange("active_job_count"))?,
                shift,
            })
        })
        .collect()
}

pub async fn load_jobs(pool: &SqlitePool) -> Result<Vec<JobRecord>, PersistenceError> {
    let rows: Vec<JobRow> = sqlx::query_as(
        "SELECT job_id, start_tick, end_tick, status, revenue_cents, cost_cents \
         FROM job_history ORDER BY job_id",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(job_id, start, end, status, revenue, cost)| {
            let status = JobStatus::parse(&status).ok_or_else(|| PersistenceError::CorruptRow {
                table: "job_history",
                detail: format!("unknown status {status:?}"),
            })?;
            Ok(JobRecord {
                job_id: JobId(job_id),
                start_tick: to_u64(start, "start_tick")?,
                end_tick: end.map(|t| to_u64(t, "end_tick")).transpose()?,
                status,
                revenue: cents_to_decimal(revenue),
                cost: cents_to_decimal(cost),
            })
        })
        .collect()
}

/// Synchronous sqlite-backed store. Each call blocks on a private
/// current-thread runtime until the write has finished.
pub struct SqliteHistory {
    rt: Runtime,
    pool: SqlitePool,
}

impl SqliteHistory {
    pub fn open(url: &str) -> Result<Self, PersistenceError> {
        prepare_sqlite_path(url)?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let pool = rt.block_on(init_db(url))?;
        tracing::info!(url, "history database ready");
        Ok(Self { rt, pool })
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::open("sqlite::memory:")
    }
}

impl HistoryStore for SqliteHistory {
    fn record_tick(&mut self, snapshot: &TickSnapshot) -> Result<(), PersistenceError> {
        self.rt.block_on(insert_tick(&self.pool, snapshot))
    }

    fn record_job(&mut self, record: &JobRecord) -> Result<(), PersistenceError> {
        self.rt.block_on(upsert_job(&self.pool, record))
    }

    fn ticks(&self) -> Result<Vec<TickSnapshot>, PersistenceError> {
        self.rt.block_on(load_ticks(&self.pool))
    }

    fn jobs(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        self.rt.block_on(load_jobs(&self.pool))
    }
}
