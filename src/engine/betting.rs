//! Bet placement.
//!
//! A bet moves its stake from the user's available bucket to the locked
//! bucket, all inside one unit of work with its BET_LOCK ledger row. The
//! stake stays locked until settlement releases it as a payout, a loss,
//! or a refund. One bet per user per round, enforced by the database.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ledger::{self, NewEntry};
use crate::store::{
    dec_from_db, dec_from_db_opt, dec_to_db, is_unique_violation, ts_from_db, ts_to_db,
    uuid_from_db, Store,
};
use crate::types::{
    Bet, BetStatus, CoreResult, Direction, LedgerEventType, Rejection, RoundStatus,
};

use super::rounds::get_round;

pub(crate) fn bet_from_row(row: &SqliteRow) -> CoreResult<Bet> {
    Ok(Bet {
        id: uuid_from_db(row.get("id"))?,
        user_id: uuid_from_db(row.get("user_id"))?,
        round_id: uuid_from_db(row.get("round_id"))?,
        direction: row.get::<&str, _>("direction").parse()?,
        amount: dec_from_db(row.get("amount"))?,
        payout: dec_from_db_opt(row.get::<Option<&str>, _>("payout"))?,
        status: row.get::<&str, _>("status").parse()?,
        created_at: ts_from_db(row.get("created_at"))?,
    })
}

/// All bets of a round, ordered by user id so retries walk them in a
/// stable order.
pub(crate) async fn bets_for_round(
    conn: &mut SqliteConnection,
    round_id: Uuid,
) -> CoreResult<Vec<Bet>> {
    let rows = sqlx::query("SELECT * FROM bets WHERE round_id = ? ORDER BY user_id")
        .bind(round_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(bet_from_row).collect()
}

// ---------------------------------------------------------------------------
// BettingEngine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BettingEngine {
    pub(crate) store: Store,
    pub(crate) game: GameConfig,
}

impl BettingEngine {
    pub fn new(store: Store, game: GameConfig) -> Self {
        Self { store, game }
    }

    /// Place a bet on an open round. The stake is locked immediately and
    /// a BET_LOCK ledger row is written in the same transaction.
    pub async fn place_bet(
        &self,
        user_id: Uuid,
        round_id: Uuid,
        direction: Direction,
        amount: Decimal,
    ) -> CoreResult<Bet> {
        if amount < self.game.min_bet {
            return Err(Rejection::AmountBelowMinimum {
                min: self.game.min_bet,
            }
            .into());
        }
        if amount > self.game.max_bet {
            return Err(Rejection::AmountAboveMaximum {
                max: self.game.max_bet,
            }
            .into());
        }

        let asset = self.game.settlement_asset.clone();
        let network = self.game.settlement_network.clone();

        let mut wtx = self.store.begin_write().await?;

        let round = get_round(&mut wtx.tx, round_id)
            .await?
            .ok_or(Rejection::RoundNotFound)?;
        if round.status != RoundStatus::BettingOpen {
            return Err(Rejection::RoundNotOpen.into());
        }
        let now = Utc::now();
        if now >= round.betting_end_at {
            return Err(Rejection::BettingWindowOver.into());
        }

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM bets WHERE user_id = ? AND round_id = ?")
                .bind(user_id.to_string())
                .bind(round_id.to_string())
                .fetch_optional(&mut *wtx.tx)
                .await?;
        if existing.is_some() {
            return Err(Rejection::DuplicateBet.into());
        }

        let mut balance = ledger::ensure_balance(&mut wtx.tx, user_id, &asset, &network).await?;
        if balance.available < amount {
            return Err(Rejection::InsufficientFunds {
                needed: amount,
                available: balance.available,
            }
            .into());
        }
        let before = balance.clone();
        balance.available -= amount;
        balance.locked += amount;
        ledger::write_balance(&mut wtx.tx, &balance).await?;

        let bet = Bet {
            id: Uuid::new_v4(),
            user_id,
            round_id,
            direction,
            amount,
            payout: None,
            status: BetStatus::Pending,
            created_at: now,
        };
        let inserted = sqlx::query(
            "INSERT INTO bets (id, user_id, round_id, direction, amount, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bet.id.to_string())
        .bind(bet.user_id.to_string())
        .bind(bet.round_id.to_string())
        .bind(bet.direction.to_string())
        .bind(dec_to_db(bet.amount))
        .bind(bet.status.to_string())
        .bind(ts_to_db(bet.created_at))
        .execute(&mut *wtx.tx)
        .await
        .map_err(crate::types::CoreError::from);
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(Rejection::DuplicateBet.into());
            }
            return Err(e);
        }

        let (column, new_total) = match direction {
            Direction::Up => ("total_up_amount", round.total_up_amount + amount),
            Direction::Down => ("total_down_amount", round.total_down_amount + amount),
        };
        sqlx::query(&format!("UPDATE rounds SET {column} = ? WHERE id = ?"))
            .bind(dec_to_db(new_total))
            .bind(round_id.to_string())
            .execute(&mut *wtx.tx)
            .await?;

        let mut entry = NewEntry::new(LedgerEventType::BetLock, amount, &asset, &network)
            .snapshots(before.available, balance.available, before.locked, balance.locked);
        entry.user_id = Some(user_id);
        entry.round_id = Some(round_id);
        entry.bet_id = Some(bet.id);
        entry.description = Some(format!(
            "Bet {} on {} round #{}",
            direction, round.asset_symbol, round.round_number
        ));
        entry.idempotency_key = Some(format!("BET_LOCK:{}", bet.id));
        ledger::post(&mut wtx.tx, &entry).await?;

        wtx.commit().await?;
        info!(
            %user_id,
            round_number = round.round_number,
            %direction,
            %amount,
            "Bet placed"
        );
        Ok(bet)
    }

    /// The user's bet on a round, if any.
    pub async fn user_bet(&self, user_id: Uuid, round_id: Uuid) -> CoreResult<Option<Bet>> {
        let mut conn = self.store.pool().acquire().await?;
        let row = sqlx::query("SELECT * FROM bets WHERE user_id = ? AND round_id = ?")
            .bind(user_id.to_string())
            .bind(round_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(bet_from_row).transpose()
    }

    /// Recent bets of a user, newest first.
    pub async fn bet_history(&self, user_id: Uuid, limit: i64) -> CoreResult<Vec<Bet>> {
        let mut conn = self.store.pool().acquire().await?;
        let rows = sqlx::query(
            "SELECT * FROM bets WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id.to_string())
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(bet_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
