//! SQLite-backed relational store.
//!
//! The store is the single shared mutable resource: every money-moving
//! operation runs inside one transaction obtained from [`Store::begin_write`].
//! SQLite is a single-writer engine, so the store carries a process-wide
//! writer gate that serializes mutating transactions the way row-level
//! pessimistic locks do on a server database; compare-and-set updates and
//! ledger idempotency keys guard against other processes sharing the file.
//!
//! Money amounts are `rust_decimal::Decimal` stored as TEXT, timestamps
//! are RFC3339 TEXT, ids are hyphenated UUID TEXT.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::types::{CoreError, CoreResult};

mod schema;

pub use schema::SCHEMA;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
    named_locks: Arc<NamedLocks>,
}

/// A mutating unit of work: the writer gate plus an open transaction.
/// Dropping it without [`WriteTx::commit`] rolls the transaction back.
pub struct WriteTx {
    pub tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteTx {
    pub async fn commit(self) -> CoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> CoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl Store {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        let store = Self::wrap(pool);
        store.init_schema().await?;
        info!(url, "Store connected");
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive and visible to every borrower.
    pub async fn open_in_memory() -> CoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self::wrap(pool);
        store.init_schema().await?;
        Ok(store)
    }

    fn wrap(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
            named_locks: Arc::new(NamedLocks::default()),
        }
    }

    async fn init_schema(&self) -> CoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&mut *conn).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a mutating unit of work. Holds the writer gate until commit
    /// or rollback, serializing concurrent mutators.
    pub async fn begin_write(&self) -> CoreResult<WriteTx> {
        let gate = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTx { tx, _gate: gate })
    }

    /// Application-scoped named lock for a logical resource — used to
    /// serialize first-time deposit-address allocation per (asset, network)
    /// without locking any particular row.
    pub async fn named_lock(&self, asset: &str, network: &str) -> OwnedMutexGuard<()> {
        self.named_locks.acquire(lock_key(asset, network)).await
    }
}

/// Stable 64-bit key for a named lock over an (asset, network) pair.
fn lock_key(asset: &str, network: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(asset.as_bytes());
    hasher.update(b":");
    hasher.update(network.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest >= 8 bytes"))
}

#[derive(Default)]
struct NamedLocks {
    inner: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl NamedLocks {
    async fn acquire(&self, key: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// Value codecs
// ---------------------------------------------------------------------------

pub fn dec_to_db(d: Decimal) -> String {
    d.to_string()
}

pub fn dec_from_db(s: &str) -> CoreResult<Decimal> {
    Decimal::from_str(s).map_err(|e| CoreError::Data(format!("bad decimal {s:?}: {e}")))
}

pub fn dec_from_db_opt(s: Option<&str>) -> CoreResult<Option<Decimal>> {
    s.map(dec_from_db).transpose()
}

pub fn ts_to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub fn ts_from_db(s: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::Data(format!("bad timestamp {s:?}: {e}")))
}

pub fn ts_from_db_opt(s: Option<&str>) -> CoreResult<Option<DateTime<Utc>>> {
    s.map(ts_from_db).transpose()
}

pub fn uuid_from_db(s: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| CoreError::Data(format!("bad uuid {s:?}: {e}")))
}

pub fn uuid_from_db_opt(s: Option<&str>) -> CoreResult<Option<Uuid>> {
    s.map(|v| uuid_from_db(v)).transpose()
}

/// Whether a storage error is a uniqueness-constraint violation — the
/// signal for "already applied" and "creation race" handling.
pub fn is_unique_violation(e: &CoreError) -> bool {
    match e {
        CoreError::Storage(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_schema_applies() {
        let store = Store::open_in_memory().await.unwrap();
        // A second apply must be a no-op (IF NOT EXISTS everywhere).
        store.init_schema().await.unwrap();
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM rounds")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn test_write_tx_rolls_back_on_drop() {
        let store = Store::open_in_memory().await.unwrap();
        {
            let mut wtx = store.begin_write().await.unwrap();
            sqlx::query(
                "INSERT INTO ledger (id, event_type, amount, asset, network, created_at)
                 VALUES (?, 'DEPOSIT', '1', 'TON', 'TON', ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(ts_to_db(Utc::now()))
            .execute(&mut *wtx.tx)
            .await
            .unwrap();
            wtx.rollback().await.unwrap();
        }
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[test]
    fn test_decimal_codec() {
        let d = dec!(123.456789);
        assert_eq!(dec_from_db(&dec_to_db(d)).unwrap(), d);
        assert!(dec_from_db("not-a-number").is_err());
    }

    #[test]
    fn test_timestamp_codec() {
        let now = Utc::now();
        let back = ts_from_db(&ts_to_db(now)).unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
        assert!(ts_from_db("yesterday").is_err());
    }

    #[test]
    fn test_lock_key_stable_and_distinct() {
        assert_eq!(lock_key("USDT", "TRC20"), lock_key("USDT", "TRC20"));
        assert_ne!(lock_key("USDT", "TRC20"), lock_key("USDT", "ERC20"));
        assert_ne!(lock_key("USDT", "TRC20"), lock_key("USDTT", "RC20"));
    }

    #[tokio::test]
    async fn test_named_lock_serializes() {
        let store = Store::open_in_memory().await.unwrap();
        let g1 = store.named_lock("USDT", "TRC20").await;
        // Different pair is independent.
        let _g2 = store.named_lock("USDT", "ERC20").await;
        // Same pair would block: verify try_lock semantics via a timeout.
        let store2 = store.clone();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            store2.named_lock("USDT", "TRC20"),
        )
        .await;
        assert!(blocked.is_err());
        drop(g1);
        let ok = tokio::time::timeout(
            Duration::from_millis(50),
            store.named_lock("USDT", "TRC20"),
        )
        .await;
        assert!(ok.is_ok());
    }
}
