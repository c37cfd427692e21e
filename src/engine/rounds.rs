//! Round state machine.
//!
//! Rounds move BETTING_OPEN → LOCKED → RESOLVED_UP/RESOLVED_DOWN/VOID,
//! with an administrative CANCELLED exit from either live state. Every
//! transition is a compare-and-set against the row's current status, so
//! a racing driver instance loses cleanly (rowcount zero) instead of
//! double-applying. No round ever re-enters BETTING_OPEN.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{
    dec_from_db, dec_from_db_opt, dec_to_db, is_unique_violation, ts_from_db, ts_from_db_opt,
    ts_to_db, uuid_from_db, Store,
};
use crate::types::{CoreResult, Rejection, Round, RoundStatus};

pub(crate) fn round_from_row(row: &SqliteRow) -> CoreResult<Round> {
    Ok(Round {
        id: uuid_from_db(row.get("id"))?,
        round_number: row.get("round_number"),
        asset_symbol: row.get("asset_symbol"),
        status: row.get::<&str, _>("status").parse()?,
        lock_price: dec_from_db_opt(row.get::<Option<&str>, _>("lock_price"))?,
        settle_price: dec_from_db_opt(row.get::<Option<&str>, _>("settle_price"))?,
        total_up_amount: dec_from_db(row.get("total_up_amount"))?,
        total_down_amount: dec_from_db(row.get("total_down_amount"))?,
        house_fee: dec_from_db(row.get("house_fee"))?,
        betting_start_at: ts_from_db(row.get("betting_start_at"))?,
        betting_end_at: ts_from_db(row.get("betting_end_at"))?,
        locked_at: ts_from_db_opt(row.get::<Option<&str>, _>("locked_at"))?,
        settled_at: ts_from_db_opt(row.get::<Option<&str>, _>("settled_at"))?,
        created_at: ts_from_db(row.get("created_at"))?,
    })
}

pub(crate) async fn get_round(
    conn: &mut SqliteConnection,
    round_id: Uuid,
) -> CoreResult<Option<Round>> {
    let row = sqlx::query("SELECT * FROM rounds WHERE id = ?")
        .bind(round_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(round_from_row).transpose()
}

/// Pool totals and implied odds for display layers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoundStatsView {
    pub round_id: Uuid,
    pub round_number: i64,
    pub asset_symbol: String,
    pub status: RoundStatus,
    pub total_pool: Decimal,
    pub up_pool: Decimal,
    pub down_pool: Decimal,
    pub up_odds: Option<Decimal>,
    pub down_odds: Option<Decimal>,
    pub lock_price: Option<Decimal>,
    pub settle_price: Option<Decimal>,
    pub house_fee: Decimal,
    pub betting_end_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RoundManager
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RoundManager {
    store: Store,
}

impl RoundManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The live round (open or locked) for a symbol, if any. At most one
    /// exists at a time.
    pub async fn current_round(&self, asset_symbol: &str) -> CoreResult<Option<Round>> {
        let mut conn = self.store.pool().acquire().await?;
        let row = sqlx::query(
            "SELECT * FROM rounds
             WHERE asset_symbol = ? AND status IN ('BETTING_OPEN', 'LOCKED')
             ORDER BY round_number DESC LIMIT 1",
        )
        .bind(asset_symbol)
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(round_from_row).transpose()
    }

    /// The round currently accepting bets for a symbol, if any.
    pub async fn betting_open_round(&self, asset_symbol: &str) -> CoreResult<Option<Round>> {
        let mut conn = self.store.pool().acquire().await?;
        let row = sqlx::query(
            "SELECT * FROM rounds WHERE asset_symbol = ? AND status = 'BETTING_OPEN'",
        )
        .bind(asset_symbol)
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(round_from_row).transpose()
    }

    pub async fn get(&self, round_id: Uuid) -> CoreResult<Option<Round>> {
        let mut conn = self.store.pool().acquire().await?;
        get_round(&mut conn, round_id).await
    }

    /// Create the next round for a symbol. Rejected while an open round
    /// exists; if two creators race past that check, the loser detects the
    /// (asset_symbol, round_number) uniqueness conflict and adopts the
    /// winner's row instead of erroring.
    pub async fn create_round(
        &self,
        asset_symbol: &str,
        betting_duration: Duration,
    ) -> CoreResult<Round> {
        let mut wtx = self.store.begin_write().await?;

        let open = sqlx::query(
            "SELECT * FROM rounds WHERE asset_symbol = ? AND status = 'BETTING_OPEN'",
        )
        .bind(asset_symbol)
        .fetch_optional(&mut *wtx.tx)
        .await?;
        if open.is_some() {
            return Err(Rejection::OpenRoundExists {
                asset_symbol: asset_symbol.to_string(),
            }
            .into());
        }

        let (max_num,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(round_number) FROM rounds WHERE asset_symbol = ?",
        )
        .bind(asset_symbol)
        .fetch_one(&mut *wtx.tx)
        .await?;
        let round_number = max_num.unwrap_or(0) + 1;

        let now = Utc::now();
        let round = Round {
            id: Uuid::new_v4(),
            round_number,
            asset_symbol: asset_symbol.to_string(),
            status: RoundStatus::BettingOpen,
            lock_price: None,
            settle_price: None,
            total_up_amount: Decimal::ZERO,
            total_down_amount: Decimal::ZERO,
            house_fee: Decimal::ZERO,
            betting_start_at: now,
            betting_end_at: now + betting_duration,
            locked_at: None,
            settled_at: None,
            created_at: now,
        };

        let inserted = sqlx::query(
            "INSERT INTO rounds (id, round_number, asset_symbol, status, total_up_amount,
                                 total_down_amount, house_fee, betting_start_at,
                                 betting_end_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(round.id.to_string())
        .bind(round.round_number)
        .bind(&round.asset_symbol)
        .bind(round.status.to_string())
        .bind(dec_to_db(round.total_up_amount))
        .bind(dec_to_db(round.total_down_amount))
        .bind(dec_to_db(round.house_fee))
        .bind(ts_to_db(round.betting_start_at))
        .bind(ts_to_db(round.betting_end_at))
        .bind(ts_to_db(round.created_at))
        .execute(&mut *wtx.tx)
        .await
        .map_err(crate::types::CoreError::from);

        match inserted {
            Ok(_) => {
                wtx.commit().await?;
                info!(
                    asset_symbol,
                    round_number,
                    betting_end_at = %round.betting_end_at,
                    "Round created"
                );
                Ok(round)
            }
            Err(e) if is_unique_violation(&e) => {
                // Another creator won the race; adopt its round.
                wtx.rollback().await?;
                warn!(asset_symbol, round_number, "Round creation raced, adopting winner");
                if let Some(existing) = self.betting_open_round(asset_symbol).await? {
                    Ok(existing)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// CAS transition BETTING_OPEN → LOCKED, capturing the lock price.
    /// Returns false when another driver already locked (or the round is
    /// not open).
    pub async fn lock_round(&self, round_id: Uuid, lock_price: Decimal) -> CoreResult<bool> {
        let mut wtx = self.store.begin_write().await?;
        let res = sqlx::query(
            "UPDATE rounds SET status = 'LOCKED', lock_price = ?, locked_at = ?
             WHERE id = ? AND status = 'BETTING_OPEN'",
        )
        .bind(dec_to_db(lock_price))
        .bind(ts_to_db(Utc::now()))
        .bind(round_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        wtx.commit().await?;

        let locked = res.rows_affected() > 0;
        if locked {
            info!(%round_id, %lock_price, "Round locked");
        } else {
            debug!(%round_id, "Lock skipped — round no longer BETTING_OPEN");
        }
        Ok(locked)
    }

    /// Claim a round for settlement (§ cross-process claim): atomically
    /// set `settled_at` while the round is LOCKED and unclaimed. Rowcount
    /// zero means another worker owns the attempt.
    pub async fn claim_settlement(&self, round_id: Uuid) -> CoreResult<bool> {
        let mut wtx = self.store.begin_write().await?;
        let res = sqlx::query(
            "UPDATE rounds SET settled_at = ?
             WHERE id = ? AND status = 'LOCKED' AND settled_at IS NULL",
        )
        .bind(ts_to_db(Utc::now()))
        .bind(round_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        wtx.commit().await?;
        Ok(res.rows_affected() > 0)
    }

    /// Release a settlement claim after the work failed, letting a later
    /// attempt retry. A successful settlement never calls this: the
    /// terminal status is the permanent guard.
    pub async fn release_claim(&self, round_id: Uuid) -> CoreResult<()> {
        let mut wtx = self.store.begin_write().await?;
        sqlx::query(
            "UPDATE rounds SET settled_at = NULL
             WHERE id = ? AND status = 'LOCKED'",
        )
        .bind(round_id.to_string())
        .execute(&mut *wtx.tx)
        .await?;
        wtx.commit().await?;
        warn!(%round_id, "Settlement claim released");
        Ok(())
    }

    /// Pool totals and implied odds for a round.
    pub async fn round_stats(&self, round_id: Uuid) -> CoreResult<Option<RoundStatsView>> {
        let Some(round) = self.get(round_id).await? else {
            return Ok(None);
        };
        let total = round.total_pool();
        let odds = |side: Decimal| {
            if side > Decimal::ZERO {
                Some(total / side)
            } else {
                None
            }
        };
        Ok(Some(RoundStatsView {
            round_id: round.id,
            round_number: round.round_number,
            asset_symbol: round.asset_symbol.clone(),
            status: round.status,
            total_pool: total,
            up_pool: round.total_up_amount,
            down_pool: round.total_down_amount,
            up_odds: odds(round.total_up_amount),
            down_odds: odds(round.total_down_amount),
            lock_price: round.lock_price,
            settle_price: round.settle_price,
            house_fee: round.house_fee,
            betting_end_at: round.betting_end_at,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
