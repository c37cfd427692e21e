//! Ledger & Balance Store.
//!
//! Every state change to a balance is expressed as exactly one ledger row
//! in the same transaction, carrying before/after snapshots of both
//! buckets. The ledger is append-only and is the audit source of truth;
//! balances are the materialized cache of its effects. Replays are
//! detected by the UNIQUE idempotency key: a colliding write is reported
//! as [`PostResult::Replayed`], never as an error to the caller.
//!
//! All functions here take `&mut SqliteConnection` so they compose inside
//! the caller's unit of work.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::store::{
    dec_from_db, dec_from_db_opt, dec_to_db, is_unique_violation, ts_from_db, ts_to_db,
    uuid_from_db, uuid_from_db_opt,
};
use crate::types::{Balance, CoreError, CoreResult, LedgerEntry, LedgerEventType};

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

/// A ledger row about to be written.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: Option<Uuid>,
    pub round_id: Option<Uuid>,
    pub bet_id: Option<Uuid>,
    pub event_type: LedgerEventType,
    pub amount: Decimal,
    pub asset: String,
    pub network: String,
    pub available_before: Option<Decimal>,
    pub available_after: Option<Decimal>,
    pub locked_before: Option<Decimal>,
    pub locked_after: Option<Decimal>,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

impl NewEntry {
    pub fn new(
        event_type: LedgerEventType,
        amount: Decimal,
        asset: &str,
        network: &str,
    ) -> Self {
        Self {
            user_id: None,
            round_id: None,
            bet_id: None,
            event_type,
            amount,
            asset: asset.to_string(),
            network: network.to_string(),
            available_before: None,
            available_after: None,
            locked_before: None,
            locked_after: None,
            description: None,
            idempotency_key: None,
        }
    }

    /// Attach before/after snapshots taken around a balance mutation.
    pub fn snapshots(
        mut self,
        available_before: Decimal,
        available_after: Decimal,
        locked_before: Decimal,
        locked_after: Decimal,
    ) -> Self {
        self.available_before = Some(available_before);
        self.available_after = Some(available_after);
        self.locked_before = Some(locked_before);
        self.locked_after = Some(locked_after);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostResult {
    Posted,
    /// The idempotency key was already present: the event has been applied
    /// before and this write is a no-op.
    Replayed,
}

/// Append one ledger row. A uniqueness collision on the idempotency key
/// maps to `Replayed`.
pub async fn post(conn: &mut SqliteConnection, entry: &NewEntry) -> CoreResult<PostResult> {
    let res = sqlx::query(
        "INSERT INTO ledger (id, user_id, round_id, bet_id, event_type, amount, asset, network,
                             available_before, available_after, locked_before, locked_after,
                             description, idempotency_key, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entry.user_id.map(|u| u.to_string()))
    .bind(entry.round_id.map(|u| u.to_string()))
    .bind(entry.bet_id.map(|u| u.to_string()))
    .bind(entry.event_type.to_string())
    .bind(dec_to_db(entry.amount))
    .bind(&entry.asset)
    .bind(&entry.network)
    .bind(entry.available_before.map(dec_to_db))
    .bind(entry.available_after.map(dec_to_db))
    .bind(entry.locked_before.map(dec_to_db))
    .bind(entry.locked_after.map(dec_to_db))
    .bind(&entry.description)
    .bind(&entry.idempotency_key)
    .bind(ts_to_db(Utc::now()))
    .execute(&mut *conn)
    .await
    .map_err(CoreError::from);

    match res {
        Ok(_) => Ok(PostResult::Posted),
        Err(e) if is_unique_violation(&e) => Ok(PostResult::Replayed),
        Err(e) => Err(e),
    }
}

/// Whether an idempotency key has already been recorded.
pub async fn key_exists(conn: &mut SqliteConnection, key: &str) -> CoreResult<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT id FROM ledger WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.is_some())
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

fn balance_from_row(row: &SqliteRow) -> CoreResult<Balance> {
    Ok(Balance {
        id: uuid_from_db(row.get("id"))?,
        user_id: uuid_from_db(row.get("user_id"))?,
        asset: row.get("asset"),
        network: row.get("network"),
        available: dec_from_db(row.get("available"))?,
        locked: dec_from_db(row.get("locked"))?,
        updated_at: ts_from_db(row.get("updated_at"))?,
    })
}

/// Fetch the balance row for a mutation. Callers must already hold the
/// writer gate (i.e. be inside a [`crate::store::WriteTx`]), which is what
/// serializes concurrent mutators of the same row.
pub async fn balance_for_update(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    asset: &str,
    network: &str,
) -> CoreResult<Option<Balance>> {
    let row = sqlx::query(
        "SELECT * FROM balances WHERE user_id = ? AND asset = ? AND network = ?",
    )
    .bind(user_id.to_string())
    .bind(asset)
    .bind(network)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(balance_from_row).transpose()
}

/// Fetch the balance row, creating a zeroed one lazily on first need.
pub async fn ensure_balance(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    asset: &str,
    network: &str,
) -> CoreResult<Balance> {
    if let Some(existing) = balance_for_update(conn, user_id, asset, network).await? {
        return Ok(existing);
    }
    let balance = Balance {
        id: Uuid::new_v4(),
        user_id,
        asset: asset.to_string(),
        network: network.to_string(),
        available: Decimal::ZERO,
        locked: Decimal::ZERO,
        updated_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO balances (id, user_id, asset, network, available, locked, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(balance.id.to_string())
    .bind(balance.user_id.to_string())
    .bind(&balance.asset)
    .bind(&balance.network)
    .bind(dec_to_db(balance.available))
    .bind(dec_to_db(balance.locked))
    .bind(ts_to_db(balance.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(balance)
}

/// Persist new bucket values for an already-loaded balance row.
pub async fn write_balance(conn: &mut SqliteConnection, balance: &Balance) -> CoreResult<()> {
    sqlx::query("UPDATE balances SET available = ?, locked = ?, updated_at = ? WHERE id = ?")
        .bind(dec_to_db(balance.available))
        .bind(dec_to_db(balance.locked))
        .bind(ts_to_db(Utc::now()))
        .bind(balance.id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Read-only balance lookup.
pub async fn balance_of(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    asset: &str,
    network: &str,
) -> CoreResult<Option<Balance>> {
    balance_for_update(conn, user_id, asset, network).await
}

/// All balance rows — the reconciliation monitor walks these.
pub async fn all_balances(conn: &mut SqliteConnection) -> CoreResult<Vec<Balance>> {
    let rows = sqlx::query("SELECT * FROM balances")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(balance_from_row).collect()
}

// ---------------------------------------------------------------------------
// Audit reads
// ---------------------------------------------------------------------------

fn entry_from_row(row: &SqliteRow) -> CoreResult<LedgerEntry> {
    Ok(LedgerEntry {
        id: uuid_from_db(row.get("id"))?,
        user_id: uuid_from_db_opt(row.get::<Option<&str>, _>("user_id"))?,
        round_id: uuid_from_db_opt(row.get::<Option<&str>, _>("round_id"))?,
        bet_id: uuid_from_db_opt(row.get::<Option<&str>, _>("bet_id"))?,
        event_type: row.get::<&str, _>("event_type").parse()?,
        amount: dec_from_db(row.get("amount"))?,
        asset: row.get("asset"),
        network: row.get("network"),
        available_before: dec_from_db_opt(row.get::<Option<&str>, _>("available_before"))?,
        available_after: dec_from_db_opt(row.get::<Option<&str>, _>("available_after"))?,
        locked_before: dec_from_db_opt(row.get::<Option<&str>, _>("locked_before"))?,
        locked_after: dec_from_db_opt(row.get::<Option<&str>, _>("locked_after"))?,
        description: row.get("description"),
        idempotency_key: row.get("idempotency_key"),
        created_at: ts_from_db(row.get("created_at"))?,
    })
}

/// Recent ledger rows for a user, newest first.
pub async fn entries_for_user(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    limit: i64,
) -> CoreResult<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM ledger WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
    )
    .bind(user_id.to_string())
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(entry_from_row).collect()
}

/// All rows of one event type (used for house-fee reconciliation).
pub async fn entries_of_type(
    conn: &mut SqliteConnection,
    event_type: LedgerEventType,
) -> CoreResult<Vec<LedgerEntry>> {
    let rows = sqlx::query("SELECT * FROM ledger WHERE event_type = ?")
        .bind(event_type.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(entry_from_row).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
